//! rust_de_report: two-condition RNA-seq differential expression report
//!
//! Fits a negative binomial GLM per gene (median-of-ratios size factors,
//! shrunken dispersions, Wald test, apeglm-style fold-change shrinkage) and
//! renders the diagnostics around it: a dispersion plot, clustered heatmaps of
//! normalized counts and an MA plot.
//!
//! # Example
//!
//! ```ignore
//! use rust_de_report::prelude::*;
//!
//! let config = AnalysisConfig::from_file("analysis.yaml")?;
//! let inputs = InputPaths { counts: "counts.tsv".into(), metadata: "coldata.tsv".into() };
//! let report = run_pipeline(&inputs, &outputs, &config)?;
//! println!("{}", report.shrunk.summary(config.alpha));
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod data;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod grouping;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod plot;
pub mod shrinkage;
pub mod stats;
pub mod testing;

#[cfg(test)]
pub(crate) mod test_support;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::AnalysisConfig;
    pub use crate::data::{CountMatrix, DeseqDataSet, SampleMetadata};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams, TrendFitMethod};
    pub use crate::error::{DeError, Result};
    pub use crate::glm::{fit_glm, GlmFitParams, TwoGroupDesign};
    pub use crate::grouping::{partition_samples, ExpressionTable, RatioTable, SamplePartition};
    pub use crate::io::{read_count_matrix, read_metadata, write_results, DeResults};
    pub use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    pub use crate::pipeline::{run_pipeline, InputPaths, OutputPaths, PipelineReport};
    pub use crate::shrinkage::{lfc_shrink, ApeglmParams};
    pub use crate::testing::{results, ResultsParams};
}

use prelude::*;

/// Size factors, dispersions and the GLM fit, in that order.
///
/// Size factors already on the dataset are kept.
pub fn fit_deseq(dds: &mut DeseqDataSet) -> Result<TrendFitMethod> {
    if !dds.has_size_factors() {
        estimate_size_factors(dds, SizeFactorMethod::Ratio)?;
    }
    let trend = estimate_dispersions(dds, &DispersionParams::default())?;
    fit_glm(dds, &GlmFitParams::default())?;
    Ok(trend)
}
