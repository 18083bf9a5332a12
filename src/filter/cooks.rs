//! Cook's distance outlier handling
//!
//! Cook's distances come from the GLM hat diagonals and a robust method of
//! moments dispersion: `cooks = pearson_res^2 / p * h / (1 - h)^2`.
//! Large distances either get their counts replaced (enough replicates) or
//! their gene's p-value set to NA.

use ndarray::Array2;
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::stats::{mean, trimmed_mean};

/// Floor on the robust dispersion used for Cook's distances
const MIN_ROBUST_DISP: f64 = 0.04;

/// Group size from which per-group trimmed variances are used
const MIN_CELL_FOR_VARIANCE: usize = 3;

/// Cook's distance per gene and sample (genes x samples)
pub fn calculate_cooks_distance(dds: &DeseqDataSet) -> Result<Array2<f64>> {
    let mu = dds.glm_mu().ok_or_else(|| DeError::InvalidInput {
        reason: "GLM must be fitted before computing Cook's distances".to_string(),
    })?;
    let hat = dds.hat_diagonals().ok_or_else(|| DeError::InvalidInput {
        reason: "hat diagonals missing from the GLM fit".to_string(),
    })?;
    let dispersions = robust_method_of_moments_disp(dds)?;
    let counts = dds.counts().counts();
    let (n_genes, n_samples) = (dds.n_genes(), dds.n_samples());
    let p = dds.design().n_coefs() as f64;

    let rows: Vec<Vec<f64>> = (0..n_genes)
        .into_par_iter()
        .map(|i| {
            let alpha = dispersions[i];
            (0..n_samples)
                .map(|j| {
                    let (y, m, h) = (counts[[i, j]], mu[[i, j]], hat[[i, j]]);
                    let v = m + alpha * m * m;
                    let pearson_sq = if v > 0.0 { (y - m).powi(2) / v } else { 0.0 };
                    if h.is_finite() && h < 1.0 && pearson_sq.is_finite() {
                        pearson_sq / p * h / (1.0 - h).powi(2)
                    } else {
                        f64::NAN
                    }
                })
                .collect()
        })
        .collect();

    Ok(Array2::from_shape_fn((n_genes, n_samples), |(i, j)| rows[i][j]))
}

/// `(v - m) / m^2` from trimmed variances of normalized counts, floored at 0.04
pub fn robust_method_of_moments_disp(dds: &DeseqDataSet) -> Result<Vec<f64>> {
    let normalized = dds.normalized_counts().ok_or_else(|| DeError::InvalidInput {
        reason: "normalized counts required for robust dispersions".to_string(),
    })?;
    let (reference, treated) = dds.design().group_indices();
    let cells: Vec<&Vec<usize>> = [&reference, &treated]
        .into_iter()
        .filter(|cell| cell.len() >= MIN_CELL_FOR_VARIANCE)
        .collect();

    Ok(normalized
        .rows()
        .into_iter()
        .map(|row| {
            let values = row.to_vec();
            let variance = if cells.is_empty() {
                trimmed_variance(&values, 1.0 / 8.0, 1.51)
            } else {
                cells
                    .iter()
                    .map(|cell| {
                        let cell_values: Vec<f64> = cell.iter().map(|&j| values[j]).collect();
                        let (trim, scale) = cell_trim(cell.len());
                        trimmed_variance(&cell_values, trim, scale)
                    })
                    .fold(0.0, f64::max)
            };
            let m = mean(&values);
            if m > 0.0 {
                ((variance - m) / (m * m)).max(MIN_ROBUST_DISP)
            } else {
                MIN_ROBUST_DISP
            }
        })
        .collect())
}

/// Trim ratio and bias correction for a cell of `n` samples
fn cell_trim(n: usize) -> (f64, f64) {
    match n {
        0..=3 => (1.0 / 3.0, 2.04),
        4..=23 => (1.0 / 4.0, 1.86),
        _ => (1.0 / 8.0, 1.51),
    }
}

fn trimmed_variance(values: &[f64], trim: f64, scale: f64) -> f64 {
    let center = trimmed_mean(values, trim);
    let sq: Vec<f64> = values.iter().map(|&v| (v - center).powi(2)).collect();
    scale * trimmed_mean(&sq, trim)
}

/// 0.99 quantile of F(p, m - p)
pub fn cooks_cutoff(n_samples: usize, n_coefs: usize) -> f64 {
    if n_samples <= n_coefs {
        return f64::INFINITY;
    }
    match FisherSnedecor::new(n_coefs as f64, (n_samples - n_coefs) as f64) {
        Ok(f) => f.inverse_cdf(0.99),
        Err(_) => f64::INFINITY,
    }
}

/// Largest finite Cook's distance of a gene and the sample it belongs to
fn max_cooks(row: ndarray::ArrayView1<'_, f64>) -> Option<(usize, f64)> {
    row.iter()
        .enumerate()
        .filter(|(_, c)| c.is_finite())
        .fold(None, |best: Option<(usize, f64)>, (j, &c)| match best {
            Some((_, b)) if b >= c => best,
            _ => Some((j, c)),
        })
}

/// Genes whose p-values are withheld because of a Cook's outlier.
///
/// A gene is flagged when its largest distance exceeds `cutoff` unless three
/// or more samples carry a higher count than the outlying sample. Genes whose
/// counts were replaced are never flagged, nor is anything when no group has
/// three samples.
pub fn cooks_outlier_genes(dds: &DeseqDataSet, cutoff: f64) -> Result<Vec<bool>> {
    let n_genes = dds.n_genes();
    if dds.design().max_group_size() < MIN_CELL_FOR_VARIANCE {
        return Ok(vec![false; n_genes]);
    }
    let cooks = dds.cooks().ok_or_else(|| DeError::InvalidInput {
        reason: "Cook's distances have not been computed".to_string(),
    })?;
    let counts = dds.counts().counts();
    let replaced = dds.replaced().cloned().unwrap_or_else(|| vec![false; n_genes]);

    Ok((0..n_genes)
        .map(|i| {
            if replaced[i] {
                return false;
            }
            match max_cooks(cooks.row(i)) {
                Some((j, c)) if c > cutoff => {
                    let outlier_count = counts[[i, j]];
                    counts.row(i).iter().filter(|&&y| y > outlier_count).count() < 3
                }
                _ => false,
            }
        })
        .collect())
}

/// Replace counts whose Cook's distance exceeds `cutoff` in groups with at
/// least `min_replicates` samples. The replacement is the 0.2-trimmed mean
/// of the gene's normalized counts times the sample's size factor, truncated
/// to an integer. Returns the rows that changed and records them on `dds`.
pub fn replace_outliers(dds: &mut DeseqDataSet, cutoff: f64, min_replicates: usize, trim: f64) -> Result<Vec<usize>> {
    let n_genes = dds.n_genes();
    let (reference, treated) = dds.design().group_indices();
    let mut replaceable = vec![false; dds.n_samples()];
    for group in [&reference, &treated] {
        if group.len() >= min_replicates {
            for &j in group {
                replaceable[j] = true;
            }
        }
    }
    if !replaceable.iter().any(|&r| r) {
        dds.set_replaced(vec![false; n_genes])?;
        return Ok(Vec::new());
    }

    let cooks = dds.cooks().ok_or_else(|| DeError::InvalidInput {
        reason: "Cook's distances have not been computed".to_string(),
    })?;
    let size_factors = dds.size_factors().ok_or_else(|| DeError::InvalidInput {
        reason: "size factors required for outlier replacement".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| DeError::InvalidInput {
        reason: "normalized counts required for outlier replacement".to_string(),
    })?;

    let mut counts = dds.counts().counts().to_owned();
    let mut replaced_rows = Vec::new();
    for i in 0..n_genes {
        let trimmed = trimmed_mean(&normalized.row(i).to_vec(), trim);
        let mut changed = false;
        for (j, &is_replaceable) in replaceable.iter().enumerate() {
            let c = cooks[[i, j]];
            if is_replaceable && c.is_finite() && c > cutoff {
                counts[[i, j]] = (trimmed * size_factors[j]).floor();
                changed = true;
            }
        }
        if changed {
            replaced_rows.push(i);
        }
    }

    let mut flags = vec![false; n_genes];
    for &i in &replaced_rows {
        flags[i] = true;
    }
    if !replaced_rows.is_empty() {
        log::info!("replaced outlier counts in {} genes", replaced_rows.len());
        dds.replace_counts(counts)?;
    }
    dds.set_replaced(flags)?;
    Ok(replaced_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::test_support::dataset;
    use ndarray::{array, Array1};

    fn fitted(counts: Array2<f64>, conditions: &[&str]) -> DeseqDataSet {
        let mut dds = dataset(counts, conditions, "A");
        dds.set_size_factors(Array1::ones(conditions.len())).unwrap();
        let n = dds.n_genes();
        dds.set_map_dispersions(Array1::from_elem(n, 0.05)).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_cutoff_matches_f_quantile() {
        // qf(0.99, 2, 4) = 18.0
        assert!((cooks_cutoff(6, 2) - 18.0).abs() < 1e-4);
        assert!(cooks_cutoff(2, 2).is_infinite());
    }

    #[test]
    fn test_outlier_sample_has_largest_distance() {
        let conditions = ["A", "A", "A", "A", "B", "B", "B", "B"];
        let dds = fitted(
            array![
                [100.0, 104.0, 98.0, 900.0, 50.0, 52.0, 49.0, 51.0],
                [20.0, 22.0, 19.0, 21.0, 40.0, 41.0, 39.0, 42.0]
            ],
            &conditions,
        );
        let cooks = calculate_cooks_distance(&dds).unwrap();
        let (j, _) = max_cooks(cooks.row(0)).unwrap();
        assert_eq!(j, 3);
        assert!(cooks.row(1).iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_outlier_genes_respects_high_count_rule() {
        let conditions = ["A", "A", "A", "B", "B", "B"];
        let mut dds = fitted(
            array![
                [10.0, 11.0, 500.0, 10.0, 12.0, 9.0],
                [100.0, 110.0, 1.0, 100.0, 120.0, 90.0]
            ],
            &conditions,
        );
        let mut cooks = Array2::zeros((2, 6));
        cooks[[0, 2]] = 50.0;
        cooks[[1, 2]] = 50.0;
        dds.set_cooks(cooks).unwrap();

        let flagged = cooks_outlier_genes(&dds, 18.0).unwrap();
        // gene 2's outlier is the low count: five samples are higher
        assert_eq!(flagged, vec![true, false]);
    }

    #[test]
    fn test_no_filtering_without_three_replicates() {
        let mut dds = fitted(array![[10.0, 500.0, 10.0, 12.0]], &["A", "A", "B", "B"]);
        dds.set_cooks(array![[0.0, 100.0, 0.0, 0.0]]).unwrap();
        assert_eq!(cooks_outlier_genes(&dds, 1.0).unwrap(), vec![false]);
    }

    #[test]
    fn test_replace_outliers_uses_trimmed_mean() {
        let conditions = ["A"; 7].iter().chain(["B"; 7].iter()).copied().collect::<Vec<_>>();
        let mut row = vec![10.0; 14];
        row[2] = 1000.0;
        let counts = Array2::from_shape_vec((2, 14), row.into_iter().chain(vec![5.0; 14]).collect()).unwrap();
        let mut dds = fitted(counts, &conditions);
        let mut cooks = Array2::zeros((2, 14));
        cooks[[0, 2]] = 100.0;
        dds.set_cooks(cooks).unwrap();

        let rows = replace_outliers(&mut dds, 5.0, 7, 0.2).unwrap();
        assert_eq!(rows, vec![0]);
        assert_eq!(dds.counts().counts()[[0, 2]], 10.0);
        assert_eq!(dds.replaced().unwrap(), &vec![true, false]);
    }

    #[test]
    fn test_replace_outliers_needs_large_groups() {
        let mut dds = fitted(array![[10.0, 500.0, 10.0, 12.0]], &["A", "A", "B", "B"]);
        dds.set_cooks(array![[0.0, 100.0, 0.0, 0.0]]).unwrap();
        assert!(replace_outliers(&mut dds, 1.0, 7, 0.2).unwrap().is_empty());
        assert_eq!(dds.counts().counts()[[0, 1]], 500.0);
    }
}
