//! The report pipeline: load, filter, fit, heatmaps, testing
//!
//! Each stage takes what the previous one produced and returns what the next
//! one needs; nothing is kept in global state.

use std::path::{Path, PathBuf};

use ndarray::Array1;

use crate::config::AnalysisConfig;
use crate::data::{CountMatrix, DeseqDataSet, SampleMetadata};
use crate::dispersion::{estimate_dispersions, refit_without_outliers, DispersionParams, TrendFitMethod};
use crate::error::{DeError, Result};
use crate::filter::{
    align_metadata, calculate_cooks_distance, cooks_cutoff, drop_missing_condition, filter_low_count_genes,
    replace_outliers,
};
use crate::glm::{fit_glm, GlmFitParams, TwoGroupDesign};
use crate::grouping::{group_ratios, partition_samples, ExpressionTable, RatioTable, SamplePartition};
use crate::io::{read_count_matrix, read_metadata, write_results, DeResults};
use crate::normalization::{estimate_size_factors, SizeFactorMethod};
use crate::plot::{plot_clustermap, plot_dispersions, plot_ma};
use crate::shrinkage::{lfc_shrink, ApeglmParams};
use crate::testing::{results, ResultsParams};

/// Metadata column holding the condition labels
pub const CONDITION_COLUMN: &str = "condition";

/// Trim fraction of the group mean that replaces outlier counts
const REPLACEMENT_TRIM: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct InputPaths {
    pub counts: PathBuf,
    pub metadata: PathBuf,
}

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub dispersion_plot: PathBuf,
    pub heatmap: PathBuf,
    pub top_heatmap: PathBuf,
    pub ma_plot: PathBuf,
    /// Results table; nothing is written when absent
    pub results: Option<PathBuf>,
}

/// Normalized, ratio-annotated table behind the heatmaps
#[derive(Debug, Clone)]
pub struct HeatmapOutput {
    pub ratios: RatioTable,
    /// Partition of the table's columns, group A first
    pub partition: SamplePartition,
    /// Row order by ascending ratio, applied only with `order_heatmap_by_ratio`
    pub ratio_order: Vec<usize>,
}

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub size_factors: Array1<f64>,
    pub trend: TrendFitMethod,
    pub heatmap: HeatmapOutput,
    pub results: DeResults,
    pub shrunk: DeResults,
    /// Genes whose outlier counts were replaced before refitting
    pub refitted_genes: usize,
}

/// Read both tables and align metadata rows to the count columns
pub fn load_inputs(paths: &InputPaths) -> Result<(CountMatrix, SampleMetadata)> {
    let counts = read_count_matrix(&paths.counts)?;
    let metadata = read_metadata(&paths.metadata)?;
    let metadata = align_metadata(&counts, &metadata)?;
    Ok((counts, metadata))
}

/// Drop samples without a condition, then genes below the total-count cut
pub fn filter_inputs(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    config: &AnalysisConfig,
) -> Result<(CountMatrix, SampleMetadata)> {
    let (counts, metadata) = drop_missing_condition(counts, metadata, CONDITION_COLUMN)?;
    let counts = filter_low_count_genes(&counts, config.min_gene_count)?;
    Ok((counts, metadata))
}

/// Size factors, dispersions, GLM and Cook's handling; writes the dispersion plot
pub fn fit_model(
    counts: CountMatrix,
    metadata: SampleMetadata,
    config: &AnalysisConfig,
    dispersion_plot: &Path,
) -> Result<(DeseqDataSet, TrendFitMethod, usize)> {
    let design = TwoGroupDesign::from_metadata(&metadata, CONDITION_COLUMN, &config.condition_a_identifier)?;
    if !design.treatment().contains(config.condition_b_identifier.as_str()) {
        log::warn!(
            "Treatment level '{}' does not contain the condition B identifier '{}'",
            design.treatment(),
            config.condition_b_identifier
        );
    }
    log::info!(
        "Fitting {} genes x {} samples, {} vs {}",
        counts.n_genes(),
        counts.n_samples(),
        design.treatment(),
        design.reference()
    );
    let mut dds = DeseqDataSet::new(counts, metadata, design)?;

    estimate_size_factors(&mut dds, SizeFactorMethod::Ratio)?;
    let params = DispersionParams::default();
    let trend = estimate_dispersions(&mut dds, &params)?;
    fit_glm(&mut dds, &GlmFitParams::default())?;

    let cooks = calculate_cooks_distance(&dds)?;
    dds.set_cooks(cooks)?;
    let mut refitted = 0;
    if config.refit_cooks {
        let cutoff = cooks_cutoff(dds.n_samples(), dds.design().n_coefs());
        let rows = replace_outliers(&mut dds, cutoff, config.min_replicates, REPLACEMENT_TRIM)?;
        refit_without_outliers(&mut dds, &rows, &params)?;
        refitted = rows.len();
    }

    plot_dispersions(&dds, dispersion_plot)?;
    Ok((dds, trend, refitted))
}

/// Normalize, split samples into the two groups, annotate ratios, print the
/// table and draw the full and top-N clustered heatmaps
pub fn heatmap_stage(
    counts: &CountMatrix,
    size_factors: &Array1<f64>,
    config: &AnalysisConfig,
    heatmap: &Path,
    top_heatmap: &Path,
) -> Result<HeatmapOutput> {
    let table = ExpressionTable::normalize(counts, size_factors.view())?.drop_zero_rows();

    let partition = partition_samples(
        table.sample_ids(),
        &config.condition_a_identifier,
        &config.condition_b_identifier,
    )?;
    let table = table.select_columns(&partition.column_order());
    let partition = partition.contiguous();

    let ratios = group_ratios(&table, &partition);
    let mut annotated = RatioTable::new(table, ratios);
    if config.drop_infinite_ratios {
        annotated = annotated.drop_infinite();
    }
    let ratio_order = annotated.ratio_order();
    if config.order_heatmap_by_ratio {
        annotated = annotated.sorted_by_ratio();
    }

    println!("{}", annotated.table);

    plot_clustermap(&annotated.table, heatmap)?;
    plot_clustermap(&annotated.table.head(config.threshold_plot), top_heatmap)?;

    Ok(HeatmapOutput {
        ratios: annotated,
        partition,
        ratio_order,
    })
}

/// Wald test and summary, shrinkage and summary, MA plot and the optional
/// results table. Returns the unshrunk and shrunk results.
pub fn testing_stage(
    dds: &DeseqDataSet,
    config: &AnalysisConfig,
    ma_plot: &Path,
    results_path: Option<&Path>,
) -> Result<(DeResults, DeResults)> {
    let params = ResultsParams {
        alpha: config.alpha,
        cooks_filter: config.cooks_filter,
        independent_filter: config.independent_filter,
    };
    let res = results(dds, &params)?;
    println!("{}", res.summary(config.alpha));

    let mut shrunk = res.clone();
    lfc_shrink(dds, &mut shrunk, &config.shrink_coefficient(), &ApeglmParams::default())?;
    println!("{}", shrunk.summary(config.alpha));

    plot_ma(&shrunk, config.alpha, config.ma_marker_size, ma_plot)?;
    if let Some(path) = results_path {
        write_results(path, &shrunk)?;
        log::info!("Wrote {}", path.display());
    }
    Ok((res, shrunk))
}

/// Run every stage in order
pub fn run_pipeline(inputs: &InputPaths, outputs: &OutputPaths, config: &AnalysisConfig) -> Result<PipelineReport> {
    config.validate()?;
    let (counts, metadata) = load_inputs(inputs)?;
    let (counts, metadata) = filter_inputs(&counts, &metadata, config)?;

    let (dds, trend, refitted_genes) = fit_model(counts.clone(), metadata, config, &outputs.dispersion_plot)?;
    let size_factors = dds
        .size_factors()
        .cloned()
        .ok_or_else(|| DeError::SizeFactorFailed {
            reason: "size factors missing after the fit".to_string(),
        })?;

    let heatmap = heatmap_stage(&counts, &size_factors, config, &outputs.heatmap, &outputs.top_heatmap)?;
    let (results, shrunk) = testing_stage(&dds, config, &outputs.ma_plot, outputs.results.as_deref())?;

    Ok(PipelineReport {
        size_factors,
        trend,
        heatmap,
        results,
        shrunk,
        refitted_genes,
    })
}
