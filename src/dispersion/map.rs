//! Maximum a posteriori dispersions shrunk towards the trend

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::posterior::{grid_search, line_search, LogNormalPrior};
use super::DispersionParams;
use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::stats::mad_squared;

/// Smallest prior variance of log-dispersion residuals
const MIN_PRIOR_VAR: f64 = 0.25;

fn missing(what: &str) -> DeError {
    DeError::DispersionEstimationFailed {
        gene_id: "N/A".to_string(),
        reason: format!("{} required for MAP dispersions", what),
    }
}

/// Shrink gene-wise dispersions towards the trend and store the result.
///
/// Genes whose gene-wise estimate lies more than `outlier_sd` robust standard
/// deviations above the trend keep their gene-wise value.
pub fn estimate_map_dispersions(dds: &mut DeseqDataSet, params: &DispersionParams) -> Result<()> {
    let gene = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.to_vec();
    let trend = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.to_vec();
    let (n_samples, n_coefs) = (dds.n_samples(), dds.design().n_coefs());

    let (prior_var, var_log_disp_ests) = estimate_prior_variance(&gene, &trend, n_samples, n_coefs, params.min_disp);
    log::debug!("dispersion prior variance {:.4} (varLogDispEsts {:.4})", prior_var, var_log_disp_ests);
    dds.set_dispersion_prior_var(prior_var);
    dds.set_var_log_disp_ests(var_log_disp_ests);

    let rows: Vec<usize> = (0..dds.n_genes()).collect();
    let (map, outliers) = map_rows(dds, &rows, prior_var, var_log_disp_ests, params)?;

    log::info!(
        "{} genes flagged as dispersion outliers",
        outliers.iter().filter(|&&o| o).count()
    );
    dds.set_dispersion_outliers(outliers)?;
    dds.set_map_dispersions(Array1::from_vec(map))
}

/// MAP estimates and outlier flags for the given rows, in row order
pub(crate) fn map_rows(
    dds: &DeseqDataSet,
    rows: &[usize],
    prior_var: f64,
    var_log_disp_ests: f64,
    params: &DispersionParams,
) -> Result<(Vec<f64>, Vec<bool>)> {
    let gene = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?;
    let trend = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?;
    let mu = dds.mu().ok_or_else(|| missing("fitted means"))?;
    let counts = dds.counts().counts();
    let x = dds.design().matrix();
    let max_disp = (dds.n_samples() as f64).max(10.0);
    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();

    let fits: Vec<(f64, bool)> = rows
        .par_iter()
        .map(|&i| {
            let y = counts.row(i).to_vec();
            let m = mu.row(i).to_vec();
            let (g, t) = (gene[i], trend[i]);
            let map = fit_map_dispersion(&y, &x, &m, g, t, prior_var, max_disp, params);
            let outlier = g.is_finite() && t.is_finite() && g > 0.0 && t > 0.0 && (g / t).ln() > threshold;
            (if outlier { g } else { map }, outlier)
        })
        .collect();
    Ok(fits.into_iter().unzip())
}

/// `(dispPriorVar, varLogDispEsts)` from the log residuals of gene-wise
/// estimates around the trend. Falls back to the minimum prior variance
/// when the residual degrees of freedom are three or fewer.
pub fn estimate_prior_variance(
    gene: &[f64],
    trend: &[f64],
    n_samples: usize,
    n_coefs: usize,
    min_disp: f64,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene
        .iter()
        .zip(trend)
        .filter(|(&g, &t)| g.is_finite() && t.is_finite() && g >= min_disp * 100.0 && t > 0.0)
        .map(|(&g, &t)| (g / t).ln())
        .collect();
    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coefs + 3 {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }
    let df = (n_samples - n_coefs) as f64;
    ((var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR), var_log_disp_ests)
}

/// Derivative of the digamma function: recurrence up to 6, then the
/// asymptotic series.
pub(crate) fn trigamma(x: f64) -> f64 {
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x + x2 / 2.0 + (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0))) / (x * x * x)
}

#[allow(clippy::too_many_arguments)]
fn fit_map_dispersion(
    counts: &[f64],
    x: &Array2<f64>,
    mu: &[f64],
    gene_disp: f64,
    trend_disp: f64,
    prior_var: f64,
    max_disp: f64,
    params: &DispersionParams,
) -> f64 {
    if !(trend_disp > 0.0) || !trend_disp.is_finite() {
        return 0.1;
    }
    if !gene_disp.is_finite() {
        return trend_disp;
    }

    let prior = Some(LogNormalPrior {
        mean: trend_disp.ln(),
        variance: prior_var,
    });
    let start = if gene_disp > 0.1 * trend_disp { gene_disp } else { trend_disp };
    let search = line_search(counts, x, mu, start, max_disp, prior, params);
    let alpha = if search.iterations >= params.maxit {
        grid_search(counts, x, mu, params.min_disp, max_disp, prior)
    } else {
        search.log_alpha.exp()
    };
    alpha.clamp(params.min_disp, max_disp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::{estimate_gene_dispersions, fit_dispersion_trend};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::simulated;
    use statrs::function::gamma::digamma;

    fn numeric_trigamma(x: f64) -> f64 {
        let h = 1e-5;
        (digamma(x + h) - digamma(x - h)) / (2.0 * h)
    }

    #[test]
    fn test_trigamma() {
        assert!((trigamma(1.0) - std::f64::consts::PI.powi(2) / 6.0).abs() < 1e-9);
        for &x in &[0.5, 2.5, 7.0, 20.0] {
            assert!((trigamma(x) - numeric_trigamma(x)).abs() < 1e-5);
        }
    }

    #[test]
    fn test_prior_variance_small_df_uses_floor() {
        let gene = [0.1, 0.5, 0.02, 0.3, 1.0];
        let trend = [0.2; 5];
        let (prior, var) = estimate_prior_variance(&gene, &trend, 4, 2, 1e-8);
        assert_eq!(prior, MIN_PRIOR_VAR);
        assert!(var > 0.0);
    }

    #[test]
    fn test_map_shrinks_towards_trend() {
        let mut dds = simulated(80, 5);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        let params = DispersionParams::default();
        estimate_gene_dispersions(&mut dds, &params).unwrap();
        fit_dispersion_trend(&mut dds).unwrap();
        estimate_map_dispersions(&mut dds, &params).unwrap();

        let gene = dds.gene_dispersions().unwrap();
        let trend = dds.trended_dispersions().unwrap();
        let map = dds.dispersions().unwrap();
        let outliers = dds.dispersion_outliers().unwrap();
        let (mut spread_gene, mut spread_map) = (0.0, 0.0);
        for i in 0..80 {
            if outliers[i] {
                assert_eq!(map[i], gene[i]);
                continue;
            }
            spread_gene += (gene[i].ln() - trend[i].ln()).abs();
            spread_map += (map[i].ln() - trend[i].ln()).abs();
        }
        assert!(spread_map < spread_gene);
    }
}
