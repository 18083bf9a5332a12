//! Sample, gene and outlier filters

mod cooks;
mod independent;
mod inputs;

pub use cooks::{
    calculate_cooks_distance, cooks_cutoff, cooks_outlier_genes, replace_outliers, robust_method_of_moments_disp,
};
pub use independent::{independent_filtering, FilterOutcome};
pub use inputs::{align_metadata, drop_missing_condition, filter_low_count_genes};
