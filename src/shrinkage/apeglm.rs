//! Log fold change shrinkage with a Cauchy prior
//!
//! The shrunken coefficient is the MAP estimate of the negative binomial GLM
//! under a Cauchy prior on the shrunk coefficient and a wide normal prior on
//! the others. The Cauchy scale comes from a method of moments estimate of
//! the prior variance of the MLE fold changes. Posterior standard errors are
//! the Laplace approximation at the mode.

use rayon::prelude::*;

use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::glm::linalg::{invert_spd, solve_spd};
use crate::glm::MAX_ETA;
use crate::io::DeResults;

/// Parameters for fold change shrinkage
#[derive(Debug, Clone)]
pub struct ApeglmParams {
    /// Upper bound on the Cauchy scale
    pub max_prior_scale: f64,
    /// Standard deviation of the normal prior on unshrunk coefficients
    pub no_shrink_scale: f64,
    pub max_iter: usize,
    /// Newton steps stop once the gradient norm drops below this
    pub tolerance: f64,
}

impl Default for ApeglmParams {
    fn default() -> Self {
        Self {
            max_prior_scale: 1.0,
            no_shrink_scale: 15.0,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }
}

/// Replace `log2_fold_changes` and `lfc_se` of `results` with shrunken
/// estimates for the coefficient `coef`. Statistics and p-values keep their
/// Wald values.
pub fn lfc_shrink(dds: &DeseqDataSet, results: &mut DeResults, coef: &str, params: &ApeglmParams) -> Result<()> {
    let coef_idx = dds.design().coefficient_index(coef)?;
    if results.n_genes() != dds.n_genes() {
        return Err(DeError::DimensionMismatch {
            expected: format!("{} result rows", dds.n_genes()),
            got: results.n_genes().to_string(),
        });
    }
    let size_factors = dds.size_factors().ok_or_else(|| DeError::InvalidContrast {
        reason: "size factors required for shrinkage".to_string(),
    })?;
    let dispersions = dds.dispersions().ok_or_else(|| DeError::InvalidContrast {
        reason: "dispersions required for shrinkage".to_string(),
    })?;
    let mle = dds.coefficients().ok_or_else(|| DeError::InvalidContrast {
        reason: "GLM must be fitted before shrinkage".to_string(),
    })?;

    let ln2 = std::f64::consts::LN_2;
    let counts = dds.counts().counts();
    let nonzero: Vec<bool> = counts.rows().into_iter().map(|row| row.sum() > 0.0).collect();
    let (lfc, se): (Vec<f64>, Vec<f64>) = (0..dds.n_genes())
        .filter(|&i| nonzero[i])
        .map(|i| (results.log2_fold_changes[i] * ln2, results.lfc_se[i] * ln2))
        .unzip();
    let prior_var = prior_variance(&lfc, &se);
    let scale = prior_var.sqrt().min(params.max_prior_scale);
    log::info!("Shrinking {} with Cauchy prior scale {:.4}", coef, scale);

    let prior = Prior {
        shrink: coef_idx,
        scale_sq: scale * scale,
        no_shrink_var: params.no_shrink_scale * params.no_shrink_scale,
    };
    let design = dds.design().matrix();
    let offsets: Vec<f64> = size_factors.iter().map(|s| s.ln()).collect();

    let fits: Vec<(f64, f64)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            if !nonzero[i] {
                return (f64::NAN, f64::NAN);
            }
            let gene = Gene {
                y: counts.row(i).to_vec(),
                x: &design,
                offsets: &offsets,
                size: 1.0 / dispersions[i],
                prior: &prior,
            };
            let start: Vec<f64> = mle.row(i).iter().map(|b| if b.is_finite() { *b } else { 0.0 }).collect();
            let beta = map_estimate(&gene, start, params);
            let sd = gene.posterior_sd(&beta);
            (beta[coef_idx] / ln2, sd[coef_idx] / ln2)
        })
        .collect();

    for (i, (l, s)) in fits.into_iter().enumerate() {
        results.log2_fold_changes[i] = l;
        results.lfc_se[i] = s;
    }
    results.shrunk = true;
    Ok(())
}

/// Method of moments prior variance of the true log fold changes.
///
/// Root of `A = sum((x^2 - d) w) / sum(w)` with `w = 1 / (2 (A + d)^2)`,
/// searched in `[1e-6, 400]`; `x` are MLE fold changes and `d` their
/// squared standard errors, both natural-log.
pub(crate) fn prior_variance(lfc: &[f64], se: &[f64]) -> f64 {
    const MIN_VAR: f64 = 1e-6;
    const MAX_VAR: f64 = 400.0;
    let pairs: Vec<(f64, f64)> = lfc
        .iter()
        .zip(se)
        .filter(|(l, s)| l.is_finite() && s.is_finite())
        .map(|(&l, &s)| (l * l, s * s))
        .collect();
    if pairs.is_empty() {
        return MIN_VAR;
    }

    let objective = |a: f64| {
        let (num, den) = pairs.iter().fold((0.0, 0.0), |(num, den), &(x2, d)| {
            let w = 1.0 / (2.0 * (a + d).powi(2));
            (num + (x2 - d) * w, den + w)
        });
        num / den - a
    };
    if objective(MIN_VAR) < 0.0 {
        return MIN_VAR;
    }
    if objective(MAX_VAR) > 0.0 {
        return MAX_VAR;
    }

    let (mut lo, mut hi) = (MIN_VAR, MAX_VAR);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if objective(mid) > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

struct Prior {
    shrink: usize,
    scale_sq: f64,
    no_shrink_var: f64,
}

struct Gene<'a> {
    y: Vec<f64>,
    x: &'a ndarray::Array2<f64>,
    offsets: &'a [f64],
    size: f64,
    prior: &'a Prior,
}

impl Gene<'_> {
    fn eta(&self, beta: &[f64], j: usize) -> f64 {
        let xb: f64 = self.x.row(j).iter().zip(beta).map(|(x, b)| x * b).sum();
        (xb + self.offsets[j]).min(MAX_ETA)
    }

    /// Negative log posterior up to a constant
    fn objective(&self, beta: &[f64]) -> f64 {
        let mut value = 0.0;
        for (j, &y) in self.y.iter().enumerate() {
            let eta = self.eta(beta, j);
            value -= y * eta - (y + self.size) * (self.size + eta.exp()).ln();
        }
        for (k, &b) in beta.iter().enumerate() {
            value += if k == self.prior.shrink {
                (1.0 + b * b / self.prior.scale_sq).ln()
            } else {
                b * b / (2.0 * self.prior.no_shrink_var)
            };
        }
        value
    }

    /// Gradient and Hessian of the negative log posterior, Hessian row-major
    fn derivatives(&self, beta: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let p = beta.len();
        let mut grad = vec![0.0; p];
        let mut hess = vec![0.0; p * p];
        for (j, &y) in self.y.iter().enumerate() {
            let mu = self.eta(beta, j).exp();
            let resid = y - (y + self.size) * mu / (self.size + mu);
            let weight = (y + self.size) * mu * self.size / (self.size + mu).powi(2);
            let row = self.x.row(j);
            for a in 0..p {
                grad[a] -= row[a] * resid;
                for b in 0..p {
                    hess[a * p + b] += row[a] * row[b] * weight;
                }
            }
        }
        for k in 0..p {
            let b = beta[k];
            if k == self.prior.shrink {
                let s2 = self.prior.scale_sq;
                grad[k] += 2.0 * b / (s2 + b * b);
                hess[k * p + k] += 2.0 * (s2 - b * b) / (s2 + b * b).powi(2);
            } else {
                grad[k] += b / self.prior.no_shrink_var;
                hess[k * p + k] += 1.0 / self.prior.no_shrink_var;
            }
        }
        (grad, hess)
    }

    /// Laplace standard deviations at the mode, NaN when the Hessian is not
    /// positive definite
    fn posterior_sd(&self, beta: &[f64]) -> Vec<f64> {
        let p = beta.len();
        let (_, hess) = self.derivatives(beta);
        match invert_spd(&hess, p) {
            Some(cov) => (0..p).map(|k| cov[k * p + k].max(0.0).sqrt()).collect(),
            None => vec![f64::NAN; p],
        }
    }
}

/// Damped Newton iterations with a backtracking line search. Steps fall back
/// to the negative gradient where the Hessian is indefinite.
fn map_estimate(gene: &Gene, mut beta: Vec<f64>, params: &ApeglmParams) -> Vec<f64> {
    let p = beta.len();
    let mut value = gene.objective(&beta);
    for _ in 0..params.max_iter {
        let (grad, hess) = gene.derivatives(&beta);
        if grad.iter().map(|g| g * g).sum::<f64>().sqrt() < params.tolerance {
            break;
        }
        let direction = solve_spd(&hess, &grad, p).unwrap_or_else(|| grad.clone());
        let slope: f64 = direction.iter().zip(&grad).map(|(d, g)| d * g).sum();

        let mut step = 1.0;
        let mut improved = false;
        for _ in 0..30 {
            let candidate: Vec<f64> = beta.iter().zip(&direction).map(|(b, d)| b - step * d).collect();
            let candidate_value = gene.objective(&candidate);
            if candidate_value.is_finite() && candidate_value <= value - 1e-4 * step * slope {
                beta = candidate;
                value = candidate_value;
                improved = true;
                break;
            }
            step *= 0.5;
        }
        if !improved {
            break;
        }
    }
    beta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::simulated;
    use crate::testing::{results, ResultsParams};

    fn fitted() -> DeseqDataSet {
        let mut dds = simulated(150, 3);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_prior_variance_bounds() {
        assert_eq!(prior_variance(&[], &[]), 1e-6);
        // estimates smaller than their noise imply no spread
        assert_eq!(prior_variance(&[0.01, -0.01], &[1.0, 1.0]), 1e-6);
        let lfc: Vec<f64> = (0..100).map(|i| if i % 2 == 0 { 2.0 } else { -2.0 }).collect();
        let v = prior_variance(&lfc, &vec![0.1; 100]);
        assert!((v - (4.0 - 0.01)).abs() < 1e-6);
    }

    #[test]
    fn test_shrinkage_pulls_toward_zero() {
        let dds = fitted();
        let mle = results(&dds, &ResultsParams::default()).unwrap();
        let mut shrunk = mle.clone();
        lfc_shrink(&dds, &mut shrunk, "condition_treat_vs_ctrl", &ApeglmParams::default()).unwrap();
        assert!(shrunk.shrunk);
        for (a, b) in shrunk.pvalues.iter().zip(&mle.pvalues) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }

        let mut closer = 0;
        for i in 0..mle.n_genes() {
            assert!(shrunk.log2_fold_changes[i].is_finite());
            assert!(shrunk.lfc_se[i] > 0.0);
            if shrunk.log2_fold_changes[i].abs() <= mle.log2_fold_changes[i].abs() + 1e-6 {
                closer += 1;
            }
        }
        assert!(closer as f64 >= 0.9 * mle.n_genes() as f64);
        // a four-fold change survives shrinkage
        assert!(shrunk.log2_fold_changes[0] > 1.0);
    }

    #[test]
    fn test_unknown_coefficient() {
        let dds = fitted();
        let mut res = results(&dds, &ResultsParams::default()).unwrap();
        let err = lfc_shrink(&dds, &mut res, "condition_x_vs_y", &ApeglmParams::default());
        assert!(matches!(err, Err(DeError::InvalidContrast { .. })));
        assert!(!res.shrunk);
    }
}
