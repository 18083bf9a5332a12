//! Shared fixtures for unit tests

use ndarray::Array2;

use crate::data::{CountMatrix, DeseqDataSet, SampleMetadata};
use crate::glm::TwoGroupDesign;

/// Dataset over `counts` (genes x samples) with one condition per column
pub(crate) fn dataset(counts: Array2<f64>, conditions: &[&str], reference: &str) -> DeseqDataSet {
    let genes = (1..=counts.nrows()).map(|i| format!("gene{}", i)).collect();
    let samples: Vec<String> = conditions
        .iter()
        .enumerate()
        .map(|(j, c)| format!("{}_{}", c, j + 1))
        .collect();
    let counts = CountMatrix::new(counts, genes, samples.clone()).unwrap();
    let mut meta = SampleMetadata::new(samples);
    meta.add_condition("condition", conditions.iter().map(|c| c.to_string()).collect())
        .unwrap();
    let design = TwoGroupDesign::from_metadata(&meta, "condition", reference).unwrap();
    DeseqDataSet::new(counts, meta, design).unwrap()
}

/// Deterministic over-dispersed counts for `per_group` samples of "ctrl" then
/// "treat". Every fifth gene is four-fold up in "treat".
pub(crate) fn simulated(n_genes: usize, per_group: usize) -> DeseqDataSet {
    let n_samples = 2 * per_group;
    let depth: Vec<f64> = (0..n_samples).map(|j| 0.7 + 0.15 * (j % 5) as f64).collect();
    let counts = Array2::from_shape_fn((n_genes, n_samples), |(i, j)| {
        let base = 8.0 * 1.12_f64.powi((i % 40) as i32);
        let effect = if i % 5 == 0 && j >= per_group { 4.0 } else { 1.0 };
        let jitter = 1.0 + 0.3 * ((i as f64) * 7.31 + (j as f64) * 3.17).sin();
        (base * effect * depth[j] * jitter).round()
    });
    let conditions: Vec<&str> = (0..n_samples).map(|j| if j < per_group { "ctrl" } else { "treat" }).collect();
    dataset(counts, &conditions, "ctrl")
}
