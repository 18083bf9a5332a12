//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SizeFactorMethod {
    /// Median of ratios over genes with no zero count
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

/// Estimate size factors and store them (with normalized counts) on the dataset.
///
/// `Ratio` falls back to `PosCounts` when every gene has a zero somewhere.
pub fn estimate_size_factors(dds: &mut DeseqDataSet, method: SizeFactorMethod) -> Result<SizeFactorMethod> {
    let counts = dds.counts().counts();

    let (size_factors, used) = match method {
        SizeFactorMethod::Ratio => match size_factors_ratio(counts) {
            Ok(sf) => (sf, SizeFactorMethod::Ratio),
            Err(DeError::SizeFactorFailed { reason }) => {
                log::warn!("{}; falling back to positive-counts size factors", reason);
                (size_factors_poscounts(counts)?, SizeFactorMethod::PosCounts)
            }
            Err(e) => return Err(e),
        },
        SizeFactorMethod::PosCounts => (size_factors_poscounts(counts)?, SizeFactorMethod::PosCounts),
    };

    log::debug!("Size factors ({:?}): {:?}", used, size_factors.to_vec());
    dds.set_size_factors(size_factors)?;
    Ok(used)
}

/// Per-sample median of `count / geometric mean` over the reference genes
fn median_ratios(counts: ArrayView2<f64>, reference: &[(usize, f64)]) -> Vec<f64> {
    counts
        .axis_iter(Axis(1))
        .map(|col| {
            let ratios: Vec<f64> = reference
                .iter()
                .filter(|(i, _)| col[*i] > 0.0)
                .map(|(i, log_geo)| (col[*i].ln() - log_geo).exp())
                .collect();
            median(&ratios)
        })
        .collect()
}

fn check_not_empty(counts: ArrayView2<f64>) -> Result<()> {
    if counts.nrows() == 0 || counts.ncols() == 0 {
        return Err(DeError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }
    Ok(())
}

fn size_factors_ratio(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_not_empty(counts)?;
    let n_samples = counts.ncols() as f64;

    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().map(|x| x.ln()).sum::<f64>() / n_samples))
        .collect();

    if reference.is_empty() {
        return Err(DeError::SizeFactorFailed {
            reason: "every gene contains at least one zero".to_string(),
        });
    }

    let sf = median_ratios(counts, &reference);
    if sf.iter().any(|&x| !(x > 0.0) || !x.is_finite()) {
        return Err(DeError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }
    Ok(Array1::from(sf))
}

fn size_factors_poscounts(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    check_not_empty(counts)?;
    let n_samples = counts.ncols() as f64;

    // log-sum over positive entries divided by the full sample count
    let reference: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().filter(|&&x| x > 0.0).map(|x| x.ln()).sum::<f64>() / n_samples))
        .collect();

    if reference.is_empty() {
        return Err(DeError::SizeFactorFailed {
            reason: "No genes with positive counts found".to_string(),
        });
    }

    let mut sf: Vec<f64> = median_ratios(counts, &reference)
        .into_iter()
        .map(|x| if x.is_finite() && x > 0.0 { x } else { 1.0 })
        .collect();

    // Center so the geometric mean is one
    let log_center = sf.iter().map(|x| x.ln()).sum::<f64>() / n_samples;
    let center = log_center.exp();
    sf.iter_mut().for_each(|x| *x /= center);

    Ok(Array1::from(sf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::dataset;
    use ndarray::array;

    #[test]
    fn test_size_factor_estimation() {
        let mut dds = dataset(
            array![
                [100.0, 200.0, 80.0, 160.0],
                [500.0, 1000.0, 400.0, 800.0],
                [50.0, 100.0, 40.0, 80.0],
                [200.0, 400.0, 160.0, 320.0]
            ],
            &["A", "A", "B", "B"],
            "A",
        );
        let used = estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        assert_eq!(used, SizeFactorMethod::Ratio);

        let sf = dds.size_factors().unwrap();
        assert!(sf.iter().all(|&x| x > 0.0));
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-9);
        assert!((sf[3] / sf[2] - 2.0).abs() < 1e-9);

        let norm = dds.normalized_counts().unwrap();
        let row: Vec<f64> = norm.row(0).to_vec();
        assert!(row.iter().all(|v| (v - row[0]).abs() < 1e-6));
    }

    #[test]
    fn test_fallback_to_poscounts() {
        let mut dds = dataset(
            array![[0.0, 10.0, 12.0, 9.0], [20.0, 0.0, 25.0, 18.0], [30.0, 33.0, 0.0, 28.0], [5.0, 6.0, 4.0, 0.0]],
            &["A", "A", "B", "B"],
            "A",
        );
        let used = estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        assert_eq!(used, SizeFactorMethod::PosCounts);

        let sf = dds.size_factors().unwrap();
        let log_mean: f64 = sf.iter().map(|x| x.ln()).sum::<f64>() / 4.0;
        assert!(log_mean.abs() < 1e-9);
    }
}
