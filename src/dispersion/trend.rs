//! Dispersion-mean trend fitting

use ndarray::Array1;

use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::stats::{mean, trimmed_mean};

/// How the trended dispersion was obtained
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrendFitMethod {
    /// `dispersion = a0 + a1 / mean`
    Parametric,
    /// Constant at the (lightly trimmed) mean gene-wise dispersion
    Mean,
}

/// Gene-wise estimates below this never inform the trend
const MIN_TREND_DISP: f64 = 1e-6;

/// Fit the trend, falling back to the mean when the parametric fit fails.
/// Returns the method that produced the stored trend.
pub fn fit_dispersion_trend(dds: &mut DeseqDataSet) -> Result<TrendFitMethod> {
    let gene_dispersions = dds
        .gene_dispersions()
        .ok_or_else(|| DeError::TrendFittingFailed {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?
        .to_vec();
    let means = dds.base_means().ok_or_else(|| DeError::TrendFittingFailed {
        reason: "normalized counts required for trend fitting".to_string(),
    })?;

    let (coefs, method) = match fit_parametric(&means, &gene_dispersions) {
        Ok(coefs) => (coefs, TrendFitMethod::Parametric),
        Err(e) => {
            log::warn!("{}; using the mean dispersion as trend", e);
            ((mean_dispersion(&gene_dispersions), 0.0), TrendFitMethod::Mean)
        }
    };

    log::debug!("dispersion trend: asymptDisp={:.6}, extraPois={:.6}", coefs.0, coefs.1);
    let trended: Vec<f64> = means.iter().map(|&m| evaluate_trend(coefs, m)).collect();
    dds.set_dispersion_function(coefs.0, coefs.1);
    dds.set_trended_dispersions(Array1::from_vec(trended))?;
    Ok(method)
}

/// `a0 + a1 / mean`, or `a0` for genes with zero mean
pub fn evaluate_trend(coefs: (f64, f64), mean: f64) -> f64 {
    if mean > 0.0 {
        coefs.0 + coefs.1 / mean
    } else {
        coefs.0
    }
}

/// Trimmed mean of the estimates above the boundary. When every gene sits at
/// the lower bound (replicates no noisier than Poisson) the trend is the
/// plain mean of the bounded estimates, so the fit carries on at the floor.
fn mean_dispersion(gene_dispersions: &[f64]) -> f64 {
    let usable: Vec<f64> = gene_dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 1e-7)
        .collect();
    if !usable.is_empty() {
        return trimmed_mean(&usable, 0.001);
    }

    let finite: Vec<f64> = gene_dispersions.iter().copied().filter(|d| d.is_finite()).collect();
    log::warn!(
        "All {} gene-wise dispersions are at the lower bound; trend held at the floor",
        gene_dispersions.len()
    );
    if finite.is_empty() {
        MIN_TREND_DISP
    } else {
        mean(&finite).max(f64::MIN_POSITIVE)
    }
}

/// Iterated Gamma GLM (identity link) of dispersion on `1 / mean`, dropping
/// genes whose residual ratio falls outside `(1e-4, 15)` each round.
fn fit_parametric(means: &[f64], dispersions: &[f64]) -> Result<(f64, f64)> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > MIN_TREND_DISP)
        .map(|(&m, &d)| (m, d))
        .collect();
    if data.len() < 3 {
        return Err(DeError::TrendFittingFailed {
            reason: "too few genes for a parametric dispersion fit".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..11 {
        let previous = coefs;
        let kept: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = previous.0 + previous.1 / m;
                fitted > 0.0 && d / fitted > 1e-4 && d / fitted < 15.0
            })
            .collect();
        if kept.len() < 3 {
            return Err(DeError::TrendFittingFailed {
                reason: "too few genes with moderate residuals".to_string(),
            });
        }

        let (next, converged) = gamma_identity_glm(&kept, previous);
        coefs = next;
        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(DeError::TrendFittingFailed {
                reason: format!("non-positive trend coefficients (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }

        let change = (coefs.0 / previous.0).ln().powi(2) + (coefs.1 / previous.1).ln().powi(2);
        log::trace!("trend iteration {}: {} genes, change {:.3e}", iter + 1, kept.len(), change);
        if change < 1e-6 && converged {
            return Ok(coefs);
        }
    }

    Err(DeError::TrendFittingFailed {
        reason: "parametric dispersion fit did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], coefs: (f64, f64)) -> f64 {
    data.iter()
        .map(|&(m, d)| {
            let mu = (coefs.0 + coefs.1 / m).max(1e-8);
            2.0 * (-(d / mu).ln() + (d - mu) / mu)
        })
        .sum()
}

/// IRLS for `d ~ a0 + a1 * (1 / m)` with Gamma variance
fn gamma_identity_glm(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, start);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, (a0, a1));
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parametric_fit_recovers_coefficients() {
        let means: Vec<f64> = (1..200).map(|i| i as f64 * 2.5).collect();
        let disps: Vec<f64> = means
            .iter()
            .enumerate()
            .map(|(i, &m)| (0.05 + 2.0 / m) * (1.0 + 0.2 * (i as f64 * 1.7).sin()))
            .collect();
        let (a0, a1) = fit_parametric(&means, &disps).unwrap();
        assert!((a0 - 0.05).abs() < 0.02, "a0 = {}", a0);
        assert!((a1 - 2.0).abs() < 0.5, "a1 = {}", a1);
    }

    #[test]
    fn test_parametric_fit_needs_data() {
        assert!(fit_parametric(&[1.0, 2.0], &[0.1, 0.2]).is_err());
    }

    #[test]
    fn test_evaluate_trend() {
        assert!((evaluate_trend((0.1, 2.0), 4.0) - 0.6).abs() < 1e-12);
        assert_eq!(evaluate_trend((0.1, 2.0), 0.0), 0.1);
    }

    #[test]
    fn test_mean_dispersion_skips_boundary_genes() {
        let m = mean_dispersion(&[1e-8, f64::NAN, 0.2, 0.4]);
        assert!((m - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_mean_dispersion_at_floor_keeps_going() {
        let m = mean_dispersion(&[1e-8, 1e-8, 1e-8]);
        assert!((m - 1e-8).abs() < 1e-20);
        assert_eq!(mean_dispersion(&[f64::NAN]), MIN_TREND_DISP);
    }
}
