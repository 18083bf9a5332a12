//! Reading input tables and writing results

mod results;
mod tsv;

#[cfg(test)]
pub(crate) use results::sample_results;
pub use results::{Contrast, DeResults, ResultsSummary};
pub use tsv::{read_count_matrix, read_metadata, write_results, GENE_ID_COLUMN};
