//! Analysis configuration

use std::path::Path;

use serde::Deserialize;

use crate::error::{DeError, Result};

/// Settings of one analysis run.
///
/// Loaded from JSON or YAML with every key optional; keys this struct does
/// not know are ignored, so a whole workflow config can be passed. Command-line
/// flags override individual values afterwards.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Substring marking condition A (reference) sample names and level
    pub condition_a_identifier: String,
    /// Condition B (treatment) level
    pub condition_b_identifier: String,
    /// Rows shown in the top-N heatmap
    pub threshold_plot: usize,
    /// Genes with a smaller total count are dropped before fitting
    pub min_gene_count: f64,
    /// Worker threads; 0 uses every core
    pub threads: usize,
    pub alpha: f64,
    pub drop_infinite_ratios: bool,
    pub order_heatmap_by_ratio: bool,
    pub ma_marker_size: u32,
    pub refit_cooks: bool,
    pub min_replicates: usize,
    pub cooks_filter: bool,
    pub independent_filter: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            condition_a_identifier: String::new(),
            condition_b_identifier: String::new(),
            threshold_plot: 20,
            min_gene_count: 10.0,
            threads: 0,
            alpha: 0.05,
            drop_infinite_ratios: true,
            order_heatmap_by_ratio: false,
            ma_marker_size: 20,
            refit_cooks: true,
            min_replicates: 7,
            cooks_filter: true,
            independent_filter: true,
        }
    }
}

impl AnalysisConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// `.yaml` and `.yml` files are read as YAML, anything else as JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            Self::from_yaml_file(path)
        } else {
            Self::from_json_file(path)
        }
    }

    /// Coefficient whose fold changes are shrunk
    pub fn shrink_coefficient(&self) -> String {
        format!("condition_{}_vs_{}", self.condition_b_identifier, self.condition_a_identifier)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(DeError::InvalidConfig { reason });
        if self.condition_a_identifier.is_empty() || self.condition_b_identifier.is_empty() {
            return invalid("both condition identifiers must be set".to_string());
        }
        if self.condition_a_identifier == self.condition_b_identifier {
            return invalid(format!(
                "condition identifiers must differ (both are '{}')",
                self.condition_a_identifier
            ));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid(format!("alpha must lie in (0, 1), got {}", self.alpha));
        }
        if !(self.min_gene_count >= 0.0) {
            return invalid(format!("min_gene_count must be non-negative, got {}", self.min_gene_count));
        }
        if self.threshold_plot == 0 {
            return invalid("threshold_plot must be at least 1".to_string());
        }
        if self.ma_marker_size == 0 {
            return invalid("ma_marker_size must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn valid() -> AnalysisConfig {
        AnalysisConfig {
            condition_a_identifier: "WT".to_string(),
            condition_b_identifier: "KO".to_string(),
            ..AnalysisConfig::default()
        }
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"condition_a_identifier": "WT", "condition_b_identifier": "KO", "threshold_plot": 50}}"#
        )
        .unwrap();
        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.threshold_plot, 50);
        assert_eq!(config.min_gene_count, 10.0);
        assert!(config.drop_infinite_ratios);
        assert!(!config.order_heatmap_by_ratio);
        assert_eq!(config.shrink_coefficient(), "condition_KO_vs_WT");
        config.validate().unwrap();
    }

    #[test]
    fn test_workflow_yaml_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "samples: config/samples.tsv").unwrap();
        writeln!(file, "condition_a_identifier: WT").unwrap();
        writeln!(file, "condition_b_identifier: KO").unwrap();
        writeln!(file, "threshold_plot: 30").unwrap();
        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.condition_a_identifier, "WT");
        assert_eq!(config.threshold_plot, 30);
        assert_eq!(config.alpha, 0.05);

        let mut bad = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(bad, "threshold_plot: [1, 2").unwrap();
        assert!(matches!(AnalysisConfig::from_file(bad.path()), Err(DeError::YamlError(_))));
    }

    #[test]
    fn test_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{\"threshold_plot\": \"many\"}}").unwrap();
        assert!(matches!(AnalysisConfig::from_json_file(file.path()), Err(DeError::JsonError(_))));
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());
        assert!(AnalysisConfig::default().validate().is_err());
        let same = AnalysisConfig {
            condition_b_identifier: "WT".to_string(),
            ..valid()
        };
        assert!(matches!(same.validate(), Err(DeError::InvalidConfig { .. })));
        let alpha = AnalysisConfig { alpha: 1.5, ..valid() };
        assert!(alpha.validate().is_err());
        let plot = AnalysisConfig {
            threshold_plot: 0,
            ..valid()
        };
        assert!(plot.validate().is_err());
    }
}
