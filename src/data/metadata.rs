//! Sample metadata (one row per sample, categorical columns)

use std::collections::{HashMap, HashSet};

use crate::error::{DeError, Result};

/// Tokens read as a missing value, matching the usual dataframe NA spellings
pub const MISSING_TOKENS: &[&str] = &["", "NA", "NaN", "nan", "N/A", "n/a", "NULL", "null", "None", "<NA>", "#N/A"];

/// Whether a raw field denotes a missing value
pub fn is_missing(value: &str) -> bool {
    MISSING_TOKENS.contains(&value.trim())
}

/// Per-sample annotations keyed by column name
#[derive(Debug, Clone)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Column names in file order
    column_names: Vec<String>,
    columns: HashMap<String, Vec<Option<String>>>,
}

impl SampleMetadata {
    pub fn new(sample_ids: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                log::warn!("Duplicate sample ID detected: '{}'", id);
            }
        }
        Self {
            sample_ids,
            column_names: Vec::new(),
            columns: HashMap::new(),
        }
    }

    /// Add a column; `None` entries are missing values
    pub fn add_column(&mut self, name: &str, values: Vec<Option<String>>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(DeError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        if self.columns.insert(name.to_string(), values).is_none() {
            self.column_names.push(name.to_string());
        }
        Ok(())
    }

    /// Add a column with no missing values
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        self.add_column(name, values.into_iter().map(Some).collect())
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn column(&self, name: &str) -> Option<&[Option<String>]> {
        self.columns.get(name).map(|v| v.as_slice())
    }

    /// Column values, failing if the column is absent
    pub fn require_column(&self, name: &str) -> Result<&[Option<String>]> {
        self.column(name).ok_or_else(|| DeError::InvalidMetadata {
            reason: format!("metadata has no '{}' column (columns: {:?})", name, self.column_names),
        })
    }

    /// Sorted distinct non-missing values of a column
    pub fn levels(&self, name: &str) -> Option<Vec<String>> {
        self.columns.get(name).map(|values| {
            let mut unique: Vec<String> = values.iter().flatten().cloned().collect();
            unique.sort();
            unique.dedup();
            unique
        })
    }

    /// Indices of samples whose value in `name` is present
    pub fn samples_with_value(&self, name: &str) -> Vec<usize> {
        self.columns
            .get(name)
            .map(|values| values.iter().enumerate().filter(|(_, v)| v.is_some()).map(|(i, _)| i).collect())
            .unwrap_or_default()
    }

    /// Indices of samples with a given level
    pub fn samples_with_level(&self, name: &str, level: &str) -> Vec<usize> {
        self.columns
            .get(name)
            .map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.as_deref() == Some(level))
                    .map(|(i, _)| i)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Subset (and reorder) rows
    pub fn subset(&self, sample_indices: &[usize]) -> Result<Self> {
        let ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        let mut subset = SampleMetadata::new(ids);
        for name in &self.column_names {
            let values = &self.columns[name];
            subset.add_column(name, sample_indices.iter().map(|&i| values[i].clone()).collect())?;
        }
        Ok(subset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> SampleMetadata {
        let mut meta = SampleMetadata::new(vec!["s1".into(), "s2".into(), "s3".into(), "s4".into()]);
        meta.add_column(
            "condition",
            vec![Some("control".into()), None, Some("treated".into()), Some("control".into())],
        )
        .unwrap();
        meta
    }

    #[test]
    fn test_levels_skip_missing() {
        let meta = metadata();
        assert_eq!(meta.levels("condition").unwrap(), vec!["control", "treated"]);
        assert_eq!(meta.samples_with_level("condition", "control"), vec![0, 3]);
        assert_eq!(meta.samples_with_value("condition"), vec![0, 2, 3]);
    }

    #[test]
    fn test_subset_keeps_columns() {
        let subset = metadata().subset(&[3, 2]).unwrap();
        assert_eq!(subset.sample_ids(), &["s4", "s3"]);
        assert_eq!(subset.column("condition").unwrap()[1].as_deref(), Some("treated"));
    }

    #[test]
    fn test_missing_tokens() {
        assert!(is_missing("NA"));
        assert!(is_missing("  "));
        assert!(is_missing("nan"));
        assert!(!is_missing("control"));
    }

    #[test]
    fn test_require_column_reports_missing() {
        assert!(matches!(metadata().require_column("batch"), Err(DeError::InvalidMetadata { .. })));
    }
}
