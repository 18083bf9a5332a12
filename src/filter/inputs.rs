//! Sample and gene filters applied before model fitting

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{DeError, Result};

/// Reorder metadata rows to follow the count matrix's sample columns.
///
/// Every count sample must have a metadata row; metadata rows without a
/// count column are dropped with a warning.
pub fn align_metadata(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<SampleMetadata> {
    let mut order = Vec::with_capacity(counts.n_samples());
    let mut absent = Vec::new();
    for sample in counts.sample_ids() {
        match metadata.sample_index(sample) {
            Some(idx) => order.push(idx),
            None => absent.push(sample.as_str()),
        }
    }
    if !absent.is_empty() {
        return Err(DeError::InvalidMetadata {
            reason: format!("samples missing from metadata: {}", absent.join(", ")),
        });
    }

    let extra = metadata.n_samples() - order.len();
    if extra > 0 {
        log::warn!("Ignoring {} metadata rows with no matching count column", extra);
    }
    metadata.subset(&order)
}

/// Drop samples whose `column` value is missing, from both tables alike.
/// `metadata` must already be aligned to `counts`.
pub fn drop_missing_condition(
    counts: &CountMatrix,
    metadata: &SampleMetadata,
    column: &str,
) -> Result<(CountMatrix, SampleMetadata)> {
    if counts.sample_ids() != metadata.sample_ids() {
        return Err(DeError::InvalidMetadata {
            reason: "metadata rows are not aligned to count columns".to_string(),
        });
    }
    metadata.require_column(column)?;

    let keep = metadata.samples_with_value(column);
    if keep.is_empty() {
        return Err(DeError::EmptyData {
            reason: format!("every sample has a missing '{}'", column),
        });
    }
    let dropped = counts.n_samples() - keep.len();
    if dropped > 0 {
        log::info!("Dropped {} samples with a missing '{}'", dropped, column);
    }
    Ok((counts.subset_samples(&keep)?, metadata.subset(&keep)?))
}

/// Keep genes whose total count over the retained samples is at least `min_total`
pub fn filter_low_count_genes(counts: &CountMatrix, min_total: f64) -> Result<CountMatrix> {
    let filtered = counts.filter_by_total(min_total)?;
    log::info!(
        "Kept {} of {} genes with total count >= {}",
        filtered.n_genes(),
        counts.n_genes(),
        min_total
    );
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn counts() -> CountMatrix {
        CountMatrix::new(
            array![[1.0, 2.0, 3.0, 4.0], [10.0, 0.0, 0.0, 0.0], [0.0, 0.0, 1.0, 2.0]],
            vec!["g1".into(), "g2".into(), "g3".into()],
            vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()],
        )
        .unwrap()
    }

    fn metadata(ids: &[&str], conditions: &[Option<&str>]) -> SampleMetadata {
        let mut meta = SampleMetadata::new(ids.iter().map(|s| s.to_string()).collect());
        meta.add_column("condition", conditions.iter().map(|c| c.map(String::from)).collect())
            .unwrap();
        meta
    }

    #[test]
    fn test_align_reorders_and_ignores_extra_rows() {
        let meta = metadata(
            &["s4", "s2", "extra", "s1", "s3"],
            &[Some("B"), Some("A"), Some("A"), Some("A"), Some("B")],
        );
        let aligned = align_metadata(&counts(), &meta).unwrap();
        assert_eq!(aligned.sample_ids(), &["s1", "s2", "s3", "s4"]);
        assert_eq!(aligned.column("condition").unwrap()[3].as_deref(), Some("B"));
    }

    #[test]
    fn test_align_requires_every_sample() {
        let meta = metadata(&["s1", "s2", "s3"], &[Some("A"), Some("A"), Some("B")]);
        assert!(matches!(align_metadata(&counts(), &meta), Err(DeError::InvalidMetadata { .. })));
    }

    #[test]
    fn test_missing_condition_dropped_in_lockstep() {
        let meta = metadata(&["s1", "s2", "s3", "s4"], &[Some("A"), None, Some("B"), Some("B")]);
        let (c, m) = drop_missing_condition(&counts(), &meta, "condition").unwrap();
        assert_eq!(c.sample_ids(), &["s1", "s3", "s4"]);
        assert_eq!(m.sample_ids(), c.sample_ids());
        assert_eq!(c.counts()[[0, 1]], 3.0);
    }

    #[test]
    fn test_all_missing_is_an_error() {
        let meta = metadata(&["s1", "s2", "s3", "s4"], &[None, None, None, None]);
        assert!(drop_missing_condition(&counts(), &meta, "condition").is_err());
    }

    #[test]
    fn test_gene_threshold_applies_to_totals() {
        let filtered = filter_low_count_genes(&counts(), 10.0).unwrap();
        assert_eq!(filtered.gene_ids(), &["g1", "g2"]);
        assert!(filtered.gene_totals().iter().all(|&t| t >= 10.0));
    }
}
