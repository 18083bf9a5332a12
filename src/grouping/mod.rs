//! Group comparison of normalized expression for the heatmaps

mod partition;
mod ratio;
mod table;

pub use partition::{partition_samples, SamplePartition};
pub use ratio::{group_ratios, RatioTable};
pub use table::ExpressionTable;
