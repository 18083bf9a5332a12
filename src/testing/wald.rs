//! Wald test of the treatment coefficient

use ndarray::Axis;

use super::pvalue::calculate_pvalue;
use crate::data::DeseqDataSet;
use crate::error::{DeError, Result};
use crate::io::{Contrast, DeResults};

/// Wald statistics and unadjusted p-values for the treatment-vs-reference
/// coefficient. `padj` is left as NaN; see [`super::results`].
pub fn wald_test(dds: &DeseqDataSet) -> Result<DeResults> {
    let coefficients = dds.coefficients().ok_or_else(|| DeError::InvalidContrast {
        reason: "GLM must be fitted before testing".to_string(),
    })?;
    let standard_errors = dds.standard_errors().ok_or_else(|| DeError::InvalidContrast {
        reason: "standard errors not available".to_string(),
    })?;
    let normalized = dds.normalized_counts().ok_or_else(|| DeError::InvalidInput {
        reason: "size factors must be estimated before testing".to_string(),
    })?;

    let design = dds.design();
    let coef = design.coefficient_index(&design.coefficient_name())?;
    let n_genes = dds.n_genes();
    let n = dds.n_samples() as f64;
    let ln2 = std::f64::consts::LN_2;

    let base_means: Vec<f64> = normalized.axis_iter(Axis(0)).map(|row| row.sum() / n).collect();
    let base_vars: Vec<f64> = normalized
        .axis_iter(Axis(0))
        .zip(&base_means)
        .map(|(row, &m)| row.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0))
        .collect();

    let mut log2_fold_changes = Vec::with_capacity(n_genes);
    let mut lfc_se = Vec::with_capacity(n_genes);
    let mut stat = Vec::with_capacity(n_genes);
    for i in 0..n_genes {
        // genes without reads get no test
        if base_means[i] == 0.0 {
            log2_fold_changes.push(0.0);
            lfc_se.push(0.0);
            stat.push(f64::NAN);
            continue;
        }
        let beta = coefficients[[i, coef]];
        let se = standard_errors[[i, coef]];
        log2_fold_changes.push(beta / ln2);
        lfc_se.push(se / ln2);
        stat.push(if se > 0.0 && se.is_finite() { beta / se } else { f64::NAN });
    }
    let pvalues: Vec<f64> = stat.iter().map(|&z| calculate_pvalue(z)).collect();

    let or_nan = |v: Option<&ndarray::Array1<f64>>| v.map(|a| a.to_vec()).unwrap_or_else(|| vec![f64::NAN; n_genes]);
    Ok(DeResults {
        gene_ids: dds.gene_ids().to_vec(),
        base_means,
        base_vars,
        log2_fold_changes,
        lfc_se,
        stat,
        pvalues,
        padj: vec![f64::NAN; n_genes],
        dispersions: or_nan(dds.dispersions()),
        gene_wise_dispersions: or_nan(dds.gene_dispersions()),
        trended_dispersions: or_nan(dds.trended_dispersions()),
        contrast: Contrast {
            variable: design.variable().to_string(),
            numerator: design.treatment().to_string(),
            denominator: design.reference().to_string(),
        },
        shrunk: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::{dataset, simulated};
    use ndarray::array;

    fn fitted(mut dds: DeseqDataSet) -> DeseqDataSet {
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        dds
    }

    #[test]
    fn test_wald_requires_fit() {
        let dds = simulated(20, 3);
        assert!(matches!(wald_test(&dds), Err(DeError::InvalidContrast { .. })));
    }

    #[test]
    fn test_wald_direction_and_contrast() {
        let dds = fitted(simulated(60, 3));
        let res = wald_test(&dds).unwrap();
        assert_eq!(res.contrast.to_string(), "condition treat vs ctrl");
        // gene 0 is four-fold up in "treat"
        assert!((res.log2_fold_changes[0] - 2.0).abs() < 0.5);
        assert!(res.pvalues[0] < 0.01);
        for i in 0..res.n_genes() {
            if res.stat[i].is_finite() {
                assert!((res.stat[i] - res.log2_fold_changes[i] / res.lfc_se[i]).abs() < 1e-8);
                assert!(res.pvalues[i] >= 0.0 && res.pvalues[i] <= 1.0);
            }
        }
    }

    #[test]
    fn test_all_zero_gene_is_untested() {
        let counts = array![
            [10.0, 12.0, 9.0, 40.0, 38.0, 44.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [100.0, 90.0, 110.0, 95.0, 105.0, 100.0],
            [30.0, 28.0, 35.0, 31.0, 29.0, 33.0],
        ];
        let dds = fitted(dataset(counts, &["A", "A", "A", "B", "B", "B"], "A"));
        let res = wald_test(&dds).unwrap();
        assert_eq!(res.base_means[1], 0.0);
        assert_eq!(res.log2_fold_changes[1], 0.0);
        assert_eq!(res.lfc_se[1], 0.0);
        assert!(res.pvalues[1].is_nan());
    }
}
