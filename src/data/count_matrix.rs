//! Count matrix representation for RNA-seq data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{DeError, Result};

/// Rename repeated gene ids to `id_1`, `id_2`, ... keeping the first occurrence.
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    if names.iter().all(|name| {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        *count == 1
    }) {
        return names;
    }

    seen.clear();
    names
        .into_iter()
        .map(|name| {
            let count = seen.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                name
            } else {
                let renamed = format!("{}_{}", name, *count - 1);
                log::warn!("Duplicate gene id '{}' renamed to '{}'", name, renamed);
                renamed
            }
        })
        .collect()
}

/// Read counts, genes in rows and samples in columns
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix, validating shape and values
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(DeError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(DeError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }
        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(DeError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }
        if counts.iter().any(|&x| x != x.round()) {
            log::warn!("Some count values are not integers; the negative binomial model expects raw counts");
        }

        Ok(Self {
            counts,
            gene_ids: deduplicate_names(gene_ids),
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Total count of every gene across all samples
    pub fn gene_totals(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Sequencing depth of every sample
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Keep only genes whose total count is at least `min_total`
    pub fn filter_by_total(&self, min_total: f64) -> Result<Self> {
        let keep: Vec<usize> = self
            .gene_totals()
            .iter()
            .enumerate()
            .filter(|(_, &total)| total >= min_total)
            .map(|(i, _)| i)
            .collect();

        if keep.is_empty() {
            return Err(DeError::EmptyData {
                reason: format!("No gene has a total count of at least {}", min_total),
            });
        }

        self.subset_genes(&keep)
    }

    /// Subset to specific samples, in the order given
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(1), sample_indices);
        let sample_ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        Self::new(counts, self.gene_ids.clone(), sample_ids)
    }

    /// Subset to specific genes, in the order given
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(0), gene_indices);
        let gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Same genes and samples with a new count array (outlier replacement)
    pub(crate) fn with_counts(&self, counts: Array2<f64>) -> Result<Self> {
        Self::new(counts, self.gene_ids.clone(), self.sample_ids.clone())
    }
}
