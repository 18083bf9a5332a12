//! Dispersion estimation for negative binomial models

mod gene_wise;
mod map;
mod posterior;
mod trend;

pub use gene_wise::estimate_gene_dispersions;
pub use map::{estimate_map_dispersions, estimate_prior_variance};
pub use trend::{evaluate_trend, fit_dispersion_trend, TrendFitMethod};

use ndarray::Array1;
use rayon::prelude::*;

use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::glm::{refit_glm, GlmFitParams};
use crate::stats::mean;

/// Configurable parameters for dispersion estimation
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound on every dispersion estimate
    pub min_disp: f64,
    /// Log-posterior change treated as converged
    pub disp_tol: f64,
    /// Initial step size of the line search
    pub kappa_0: f64,
    pub maxit: usize,
    /// Robust SDs above the trend beyond which a gene keeps its own estimate
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Gene-wise estimates, trend, then MAP shrinkage
pub fn estimate_dispersions(dds: &mut DeseqDataSet, params: &DispersionParams) -> Result<TrendFitMethod> {
    estimate_gene_dispersions(dds, params)?;
    let method = fit_dispersion_trend(dds)?;
    estimate_map_dispersions(dds, params)?;
    Ok(method)
}

/// Re-estimate dispersions and refit the GLM for `rows` after their counts
/// changed, reusing the stored trend coefficients and prior variance.
pub fn refit_without_outliers(dds: &mut DeseqDataSet, rows: &[usize], params: &DispersionParams) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let missing = |what: &str| DeError::DispersionEstimationFailed {
        gene_id: "N/A".to_string(),
        reason: format!("{} required for refit", what),
    };
    let size_factors = dds.size_factors().ok_or_else(|| missing("size factors"))?.to_vec();
    let coefs = dds.dispersion_function().ok_or_else(|| missing("dispersion trend"))?;
    let prior_var = dds.dispersion_prior_var().ok_or_else(|| missing("dispersion prior variance"))?;
    let var_log_disp_ests = dds.var_log_disp_ests().ok_or_else(|| missing("varLogDispEsts"))?;
    let design = dds.design().clone();
    let x = design.matrix();
    let counts = dds.counts().counts().to_owned();
    let xim = mean(&size_factors.iter().map(|&s| 1.0 / s).collect::<Vec<_>>());

    log::info!("refitting {} genes after outlier replacement", rows.len());

    let fits: Vec<(f64, Vec<f64>)> = rows
        .par_iter()
        .map(|&i| {
            let y = counts.row(i).to_vec();
            gene_wise::estimate_dispersion_gene(&y, &size_factors, &design, &x, xim, params)
        })
        .collect();

    let mut gene = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.to_owned();
    let mut mu = dds.mu().ok_or_else(|| missing("fitted means"))?.to_owned();
    for (&i, (disp, gene_mu)) in rows.iter().zip(fits) {
        gene[i] = disp;
        mu.row_mut(i).assign(&Array1::from_vec(gene_mu));
    }
    dds.set_gene_dispersions(gene)?;
    dds.set_mu(mu)?;

    let base_means = dds.base_means().ok_or_else(|| missing("normalized counts"))?;
    let mut trended = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.to_owned();
    for &i in rows {
        trended[i] = evaluate_trend(coefs, base_means[i]);
    }
    dds.set_trended_dispersions(trended)?;

    let (map_values, outlier_flags) = map::map_rows(dds, rows, prior_var, var_log_disp_ests, params)?;
    let mut map = dds.dispersions().ok_or_else(|| missing("MAP dispersions"))?.to_owned();
    let mut outliers = dds.dispersion_outliers().ok_or_else(|| missing("dispersion outliers"))?.clone();
    for ((&i, value), flag) in rows.iter().zip(map_values).zip(outlier_flags) {
        map[i] = value;
        outliers[i] = flag;
    }
    dds.set_map_dispersions(map)?;
    dds.set_dispersion_outliers(outliers)?;

    refit_glm(dds, rows, &GlmFitParams::default())
}
