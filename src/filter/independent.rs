//! Independent filtering on mean expression
//!
//! Adjusted p-values are computed for 50 baseMean cutoffs spanning the
//! quantiles from the fraction of zero means up to 0.95. The chosen cutoff is
//! the first whose rejection count exceeds the lowess-smoothed maximum minus
//! the root mean squared residual of the fit.

use crate::stats::quantile_sorted;
use crate::testing::benjamini_hochberg;

const N_THETA: usize = 50;

/// Span of the lowess fit of rejections against theta
const LOWESS_FRAC: f64 = 0.2;

/// Below this many rejections no filtering is applied
const MIN_REJECTIONS: usize = 10;

/// Outcome of independent filtering
#[derive(Debug, Clone)]
pub struct FilterOutcome {
    pub padj: Vec<f64>,
    /// Quantile of baseMean used as cutoff
    pub theta: f64,
    pub cutoff: f64,
    pub rejections: usize,
}

/// BH-adjusted p-values after dropping genes below the selected baseMean cutoff
pub fn independent_filtering(base_means: &[f64], pvalues: &[f64], alpha: f64) -> FilterOutcome {
    let n = base_means.len();
    let mut sorted: Vec<f64> = base_means.iter().copied().filter(|m| m.is_finite()).collect();
    if n == 0 || sorted.is_empty() {
        return FilterOutcome {
            padj: benjamini_hochberg(pvalues),
            theta: 0.0,
            cutoff: 0.0,
            rejections: 0,
        };
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let lower = base_means.iter().filter(|&&m| m == 0.0).count() as f64 / n as f64;
    let upper = if lower < 0.95 { 0.95 } else { 1.0 };
    let thetas: Vec<f64> = (0..N_THETA)
        .map(|i| lower + (upper - lower) * i as f64 / (N_THETA - 1) as f64)
        .collect();
    let cutoffs: Vec<f64> = thetas.iter().map(|&t| quantile_sorted(&sorted, t)).collect();

    let adjusted: Vec<Vec<f64>> = cutoffs
        .iter()
        .map(|&cutoff| {
            let kept: Vec<f64> = pvalues
                .iter()
                .zip(base_means)
                .map(|(&p, &m)| if m >= cutoff { p } else { f64::NAN })
                .collect();
            benjamini_hochberg(&kept)
        })
        .collect();
    let rejections: Vec<usize> = adjusted
        .iter()
        .map(|padj| padj.iter().filter(|&&p| p < alpha).count())
        .collect();

    let j = select_theta(&thetas, &rejections);
    log::debug!(
        "independent filtering: theta={:.3}, cutoff={:.3}, rejections={}",
        thetas[j],
        cutoffs[j],
        rejections[j]
    );
    FilterOutcome {
        theta: thetas[j],
        cutoff: cutoffs[j],
        rejections: rejections[j],
        padj: adjusted.into_iter().nth(j).unwrap_or_default(),
    }
}

fn select_theta(thetas: &[f64], rejections: &[usize]) -> usize {
    if rejections.iter().copied().max().unwrap_or(0) <= MIN_REJECTIONS {
        return 0;
    }
    let y: Vec<f64> = rejections.iter().map(|&r| r as f64).collect();
    let fit = lowess(thetas, &y, LOWESS_FRAC, 3);

    let residuals: Vec<f64> = y
        .iter()
        .zip(&fit)
        .filter(|(&r, _)| r > 0.0)
        .map(|(&r, &f)| r - f)
        .collect();
    let rmse = if residuals.is_empty() {
        0.0
    } else {
        (residuals.iter().map(|r| r * r).sum::<f64>() / residuals.len() as f64).sqrt()
    };
    let threshold = fit.iter().copied().fold(f64::NEG_INFINITY, f64::max) - rmse;
    y.iter().position(|&r| r > threshold).unwrap_or(0)
}

/// Locally weighted linear regression with tricube weights and `iterations`
/// bisquare robustness passes. `x` must be sorted.
pub(crate) fn lowess(x: &[f64], y: &[f64], frac: f64, iterations: usize) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return y.to_vec();
    }
    let span = ((frac * n as f64 + 1e-7) as usize).clamp(2, n);
    let mut robustness = vec![1.0; n];
    let mut fitted = vec![0.0; n];

    for pass in 0..=iterations {
        let mut left = 0;
        for i in 0..n {
            while left + span < n && x[i] - x[left] > x[left + span] - x[i] {
                left += 1;
            }
            let window = left..left + span;
            let h = (x[i] - x[left]).max(x[left + span - 1] - x[i]);
            fitted[i] = local_linear(x, y, &robustness, window, x[i], h).unwrap_or(y[i]);
        }

        if pass == iterations {
            break;
        }
        let abs_res: Vec<f64> = y.iter().zip(&fitted).map(|(a, b)| (a - b).abs()).collect();
        let scale = 6.0 * crate::stats::median(&abs_res);
        if scale < 1e-7 * abs_res.iter().sum::<f64>() / n as f64 || scale == 0.0 {
            break;
        }
        for (w, r) in robustness.iter_mut().zip(&abs_res) {
            let u = r / scale;
            *w = if u < 1.0 { (1.0 - u * u).powi(2) } else { 0.0 };
        }
    }
    fitted
}

fn local_linear(
    x: &[f64],
    y: &[f64],
    robustness: &[f64],
    window: std::ops::Range<usize>,
    at: f64,
    h: f64,
) -> Option<f64> {
    let mut weights = Vec::with_capacity(window.len());
    for j in window.clone() {
        let u = if h > 0.0 { (x[j] - at).abs() / h } else { 0.0 };
        let w = if u < 1.0 { (1.0 - u.powi(3)).powi(3) } else { 0.0 };
        weights.push(w * robustness[j]);
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }

    let xs = &x[window.clone()];
    let ys = &y[window];
    let x_bar: f64 = weights.iter().zip(xs).map(|(w, x)| w * x).sum::<f64>() / total;
    let y_bar: f64 = weights.iter().zip(ys).map(|(w, y)| w * y).sum::<f64>() / total;
    let sxx: f64 = weights.iter().zip(xs).map(|(w, x)| w * (x - x_bar).powi(2)).sum();
    if sxx <= 1e-12 * total {
        return Some(y_bar);
    }
    let sxy: f64 = weights
        .iter()
        .zip(xs.iter().zip(ys))
        .map(|(w, (x, y))| w * (x - x_bar) * (y - y_bar))
        .sum();
    Some(y_bar + sxy / sxx * (at - x_bar))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowess_reproduces_line() {
        let x: Vec<f64> = (0..11).map(|i| i as f64 / 10.0).collect();
        let y: Vec<f64> = (0..11).map(|i| i as f64 * 10.0).collect();
        let fit = lowess(&x, &y, 0.5, 3);
        for (f, t) in fit.iter().zip(&y) {
            assert!((f - t).abs() < 1e-6);
        }
    }

    #[test]
    fn test_lowess_downweights_outlier() {
        let x: Vec<f64> = (0..11).map(|i| i as f64 / 10.0).collect();
        let mut y: Vec<f64> = (0..11).map(|i| 10.0 + 2.0 * i as f64).collect();
        y[3] = 50.0;
        let plain = lowess(&x, &y, 0.5, 0);
        let robust = lowess(&x, &y, 0.5, 3);
        assert!((robust[3] - 16.0).abs() <= (plain[3] - 16.0).abs());
    }

    #[test]
    fn test_few_rejections_keep_every_gene() {
        let base_means: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let pvalues = vec![0.5; 100];
        let out = independent_filtering(&base_means, &pvalues, 0.05);
        assert_eq!(out.theta, 0.0);
        assert!(out.padj.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_genes_below_cutoff_get_na() {
        let base_means: Vec<f64> = (1..=400).map(|i| i as f64).collect();
        let pvalues: Vec<f64> = (1..=400)
            .map(|i| if i > 200 { 1e-4 * (i as f64 / 400.0) } else { 0.02 + 0.9 * ((i * 37) % 100) as f64 / 100.0 })
            .collect();
        let out = independent_filtering(&base_means, &pvalues, 0.05);
        assert_eq!(out.padj.len(), 400);
        assert_eq!(out.rejections, out.padj.iter().filter(|&&p| p < 0.05).count());
        assert!(out.rejections >= 200);
        for (m, p) in base_means.iter().zip(&out.padj) {
            assert_eq!(*m < out.cutoff, p.is_nan());
        }
    }
}
