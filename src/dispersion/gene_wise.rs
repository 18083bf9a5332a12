//! Gene-wise dispersion estimates (Cox-Reid adjusted maximum likelihood)

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::posterior::{grid_search, line_search};
use super::DispersionParams;
use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::glm::{TwoGroupDesign, MIN_MU};
use crate::stats::{mean, sample_variance};

/// Estimate one dispersion per gene and store it with the fitted means
pub fn estimate_gene_dispersions(dds: &mut DeseqDataSet, params: &DispersionParams) -> Result<()> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| DeError::DispersionEstimationFailed {
            gene_id: "N/A".to_string(),
            reason: "size factors must be estimated first".to_string(),
        })?
        .to_vec();
    let design = dds.design().clone();
    let x = design.matrix();
    let counts = dds.counts().counts().to_owned();
    let n_samples = dds.n_samples();

    if n_samples <= design.n_coefs() {
        return Err(DeError::InvalidDesign {
            reason: "no replicates available for dispersion estimation".to_string(),
        });
    }

    let xim = mean(&size_factors.iter().map(|&s| 1.0 / s).collect::<Vec<_>>());

    let fits: Vec<(f64, Vec<f64>)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let y: Vec<f64> = counts.row(i).to_vec();
            estimate_dispersion_gene(&y, &size_factors, &design, &x, xim, params)
        })
        .collect();

    let mut dispersions = Array1::zeros(fits.len());
    let mut mu = Array2::zeros((fits.len(), n_samples));
    for (i, (disp, gene_mu)) in fits.into_iter().enumerate() {
        dispersions[i] = disp;
        mu.row_mut(i).assign(&Array1::from_vec(gene_mu));
    }

    let n_nan = dispersions.iter().filter(|d| d.is_nan()).count();
    if n_nan > 0 {
        log::debug!("{} all-zero genes left without a dispersion", n_nan);
    }
    dds.set_gene_dispersions(dispersions)?;
    dds.set_mu(mu)
}

/// Dispersion and fitted means for one gene; all-zero genes give NaN
pub(crate) fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &TwoGroupDesign,
    x: &Array2<f64>,
    xim: f64,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n]);
    }

    let max_disp = (n as f64).max(10.0);
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();
    let group_means = group_means(&normalized, design);

    let rough = rough_disp_estimate(&normalized, &group_means, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu: Vec<f64> = (0..n)
        .map(|j| (group_means[design.group_of(j)] * size_factors[j]).max(MIN_MU))
        .collect();

    let search = line_search(counts, x, &mu, alpha_init, max_disp, None, params);
    let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase {
        alpha_init
    } else {
        search.log_alpha.exp().max(params.min_disp)
    };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(counts, x, &mu, params.min_disp, max_disp, None);
    }

    (alpha.clamp(params.min_disp, max_disp), mu)
}

/// Per-group means of normalized counts, indexed by group
fn group_means(normalized: &[f64], design: &TwoGroupDesign) -> [f64; 2] {
    let mut sums = [0.0; 2];
    let mut sizes = [0usize; 2];
    for (j, &v) in normalized.iter().enumerate() {
        let g = design.group_of(j);
        sums[g] += v;
        sizes[g] += 1;
    }
    [sums[0] / sizes[0].max(1) as f64, sums[1] / sizes[1].max(1) as f64]
}

fn rough_disp_estimate(normalized: &[f64], group_means: &[f64; 2], design: &TwoGroupDesign) -> f64 {
    let df = (normalized.len() - design.n_coefs()) as f64;
    let sum: f64 = normalized
        .iter()
        .enumerate()
        .map(|(j, &y)| {
            let mu = group_means[design.group_of(j)].max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum();
    (sum / df).max(0.0)
}

fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let base_mean = mean(normalized);
    if base_mean <= 1e-10 {
        return f64::INFINITY;
    }
    (sample_variance(normalized) - xim * base_mean) / (base_mean * base_mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::{dataset, simulated};
    use ndarray::array;

    #[test]
    fn test_gene_dispersions_are_bounded() {
        let mut dds = simulated(60, 4);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_gene_dispersions(&mut dds, &DispersionParams::default()).unwrap();

        let disp = dds.gene_dispersions().unwrap();
        assert_eq!(disp.len(), 60);
        assert!(disp.iter().all(|&d| d >= 1e-8 && d <= 10.0));
        assert_eq!(dds.mu().unwrap().dim(), (60, 8));
    }

    #[test]
    fn test_all_zero_gene_has_nan_dispersion() {
        let counts = array![
            [0.0, 0.0, 0.0, 0.0],
            [10.0, 12.0, 30.0, 33.0],
            [5.0, 9.0, 4.0, 7.0],
            [100.0, 90.0, 120.0, 80.0]
        ];
        let mut dds = dataset(counts, &["A", "A", "B", "B"], "A");
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_gene_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let disp = dds.gene_dispersions().unwrap();
        assert!(disp[0].is_nan());
        assert!(disp.iter().skip(1).all(|d| d.is_finite()));
    }

    #[test]
    fn test_overdispersed_gene_gets_larger_estimate() {
        let counts = array![
            [100.0, 101.0, 99.0, 100.0, 102.0, 98.0],
            [20.0, 200.0, 90.0, 15.0, 180.0, 60.0],
            [50.0, 55.0, 45.0, 52.0, 48.0, 50.0]
        ];
        let mut dds = dataset(counts, &["A", "A", "A", "B", "B", "B"], "A");
        dds.set_size_factors(Array1::ones(6)).unwrap();
        estimate_gene_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        let disp = dds.gene_dispersions().unwrap();
        assert!(disp[1] > 10.0 * disp[0]);
    }

    #[test]
    fn test_requires_replicates() {
        let mut dds = dataset(array![[1.0, 2.0], [3.0, 4.0]], &["A", "B"], "A");
        dds.set_size_factors(Array1::ones(2)).unwrap();
        assert!(estimate_gene_dispersions(&mut dds, &DispersionParams::default()).is_err());
    }
}
