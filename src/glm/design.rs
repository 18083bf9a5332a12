//! Two-level design (`~ condition`) and its model matrix

use ndarray::Array2;

use crate::data::SampleMetadata;
use crate::error::{DeError, Result};

/// Name of the intercept coefficient
pub const INTERCEPT: &str = "Intercept";

/// A single categorical variable with a reference and a treatment level.
///
/// The model matrix has two columns, the intercept and an indicator of the
/// treatment level, so coefficient 1 is the natural-log fold change of the
/// treatment over the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct TwoGroupDesign {
    variable: String,
    reference: String,
    treatment: String,
    /// Per sample: does it carry the treatment level
    is_treatment: Vec<bool>,
}

/// Find the level named by `identifier`: an exact match wins, otherwise the
/// single level that contains it.
fn resolve_level<'a>(levels: &'a [String], identifier: &str) -> Option<&'a String> {
    if let Some(level) = levels.iter().find(|l| l.as_str() == identifier) {
        return Some(level);
    }
    let mut containing = levels.iter().filter(|l| l.contains(identifier));
    match (containing.next(), containing.next()) {
        (Some(level), None) => Some(level),
        _ => None,
    }
}

impl TwoGroupDesign {
    /// Build the design from a metadata column with exactly two levels.
    ///
    /// The level matching `reference_id` is the reference. When it matches no
    /// level the alphabetically first level is used instead.
    pub fn from_metadata(metadata: &SampleMetadata, variable: &str, reference_id: &str) -> Result<Self> {
        let values = metadata.require_column(variable)?;
        if values.iter().any(|v| v.is_none()) {
            return Err(DeError::InvalidDesign {
                reason: format!("'{}' has missing values; drop those samples first", variable),
            });
        }

        let levels = metadata.levels(variable).unwrap_or_default();
        if levels.len() != 2 {
            return Err(DeError::InvalidDesign {
                reason: format!(
                    "'{}' must have exactly two levels after filtering, found {} ({:?})",
                    variable,
                    levels.len(),
                    levels
                ),
            });
        }

        let reference = match resolve_level(&levels, reference_id) {
            Some(level) => level.clone(),
            None => {
                log::warn!(
                    "No '{}' level matches '{}'; using '{}' as reference",
                    variable,
                    reference_id,
                    levels[0]
                );
                levels[0].clone()
            }
        };
        let treatment = levels.iter().find(|l| **l != reference).cloned().unwrap_or_default();

        let is_treatment = values.iter().map(|v| v.as_deref() == Some(treatment.as_str())).collect();

        Ok(Self {
            variable: variable.to_string(),
            reference,
            treatment,
            is_treatment,
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn treatment(&self) -> &str {
        &self.treatment
    }

    pub fn n_samples(&self) -> usize {
        self.is_treatment.len()
    }

    pub fn n_coefs(&self) -> usize {
        2
    }

    pub fn is_treatment(&self) -> &[bool] {
        &self.is_treatment
    }

    /// Sample indices of the reference and treatment groups
    pub fn group_indices(&self) -> (Vec<usize>, Vec<usize>) {
        let (treated, reference): (Vec<usize>, Vec<usize>) =
            (0..self.n_samples()).partition(|&j| self.is_treatment[j]);
        (reference, treated)
    }

    /// Group label (0 = reference, 1 = treatment) per sample
    pub fn group_of(&self, sample: usize) -> usize {
        usize::from(self.is_treatment[sample])
    }

    /// Size of the larger group
    pub fn max_group_size(&self) -> usize {
        let treated = self.is_treatment.iter().filter(|&&t| t).count();
        treated.max(self.n_samples() - treated)
    }

    /// Model matrix: intercept column and treatment indicator
    pub fn matrix(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.n_samples(), 2), |(j, k)| {
            if k == 0 || self.is_treatment[j] {
                1.0
            } else {
                0.0
            }
        })
    }

    /// `condition_<treatment>_vs_<reference>`
    pub fn coefficient_name(&self) -> String {
        format!("{}_{}_vs_{}", self.variable, self.treatment, self.reference)
    }

    pub fn coefficient_names(&self) -> Vec<String> {
        vec![INTERCEPT.to_string(), self.coefficient_name()]
    }

    /// Column index of a named coefficient.
    ///
    /// Besides the exact names, `<variable>_<b>_vs_<a>` is accepted when `b`
    /// and `a` resolve to the treatment and reference levels.
    pub fn coefficient_index(&self, name: &str) -> Result<usize> {
        if let Some(idx) = self.coefficient_names().iter().position(|c| c == name) {
            return Ok(idx);
        }

        let levels = [self.reference.clone(), self.treatment.clone()];
        let resolved = name
            .strip_prefix(&format!("{}_", self.variable))
            .and_then(|rest| rest.split_once("_vs_"))
            .and_then(|(num, den)| Some((resolve_level(&levels, num)?, resolve_level(&levels, den)?)));

        match resolved {
            Some((num, den)) if *num == self.treatment && *den == self.reference => Ok(1),
            Some((num, den)) if *num == self.reference && *den == self.treatment => Err(DeError::InvalidContrast {
                reason: format!(
                    "'{}' reverses the fitted coefficient '{}'; '{}' is the reference level",
                    name,
                    self.coefficient_name(),
                    self.reference
                ),
            }),
            _ => Err(DeError::InvalidContrast {
                reason: format!("coefficient '{}' not found (available: {:?})", name, self.coefficient_names()),
            }),
        }
    }

    /// Restrict the design to a subset of samples
    pub fn subset(&self, sample_indices: &[usize]) -> Self {
        Self {
            variable: self.variable.clone(),
            reference: self.reference.clone(),
            treatment: self.treatment.clone(),
            is_treatment: sample_indices.iter().map(|&j| self.is_treatment[j]).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(conditions: &[&str]) -> SampleMetadata {
        let ids = (1..=conditions.len()).map(|i| format!("s{}", i)).collect();
        let mut meta = SampleMetadata::new(ids);
        meta.add_condition("condition", conditions.iter().map(|c| c.to_string()).collect())
            .unwrap();
        meta
    }

    #[test]
    fn test_design_matrix_creation() {
        let design = TwoGroupDesign::from_metadata(&metadata(&["wt", "ko", "wt", "ko"]), "condition", "wt").unwrap();
        assert_eq!(design.reference(), "wt");
        assert_eq!(design.treatment(), "ko");
        let x = design.matrix();
        assert_eq!(x.column(0).to_vec(), vec![1.0; 4]);
        assert_eq!(x.column(1).to_vec(), vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(design.coefficient_name(), "condition_ko_vs_wt");
        assert_eq!(design.group_indices(), (vec![0, 2], vec![1, 3]));
    }

    #[test]
    fn test_reference_falls_back_to_first_level() {
        let design = TwoGroupDesign::from_metadata(&metadata(&["b", "a"]), "condition", "zzz").unwrap();
        assert_eq!(design.reference(), "a");
    }

    #[test]
    fn test_reference_resolved_by_substring() {
        let design =
            TwoGroupDesign::from_metadata(&metadata(&["control_x", "heat_x"]), "condition", "heat").unwrap();
        assert_eq!(design.reference(), "heat_x");
    }

    #[test]
    fn test_requires_two_levels() {
        let result = TwoGroupDesign::from_metadata(&metadata(&["a", "a"]), "condition", "a");
        assert!(matches!(result, Err(DeError::InvalidDesign { .. })));
        let result = TwoGroupDesign::from_metadata(&metadata(&["a", "b", "c"]), "condition", "a");
        assert!(matches!(result, Err(DeError::InvalidDesign { .. })));
    }

    #[test]
    fn test_coefficient_index() {
        let design = TwoGroupDesign::from_metadata(&metadata(&["wt", "ko"]), "condition", "wt").unwrap();
        assert_eq!(design.coefficient_index("condition_ko_vs_wt").unwrap(), 1);
        assert_eq!(design.coefficient_index("Intercept").unwrap(), 0);
        assert!(matches!(
            design.coefficient_index("condition_wt_vs_ko"),
            Err(DeError::InvalidContrast { .. })
        ));
        assert!(matches!(
            design.coefficient_index("condition_x_vs_y"),
            Err(DeError::InvalidContrast { .. })
        ));
    }
}
