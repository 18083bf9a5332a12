//! Data structures for the analysis

mod count_matrix;
mod dataset;
mod metadata;

pub use count_matrix::CountMatrix;
pub use dataset::DeseqDataSet;
pub use metadata::{is_missing, SampleMetadata, MISSING_TOKENS};
