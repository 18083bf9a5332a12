//! Statistical testing for differential expression

mod fdr;
mod pvalue;
mod wald;

pub use fdr::benjamini_hochberg;
pub use pvalue::calculate_pvalue;
pub use wald::wald_test;

use crate::data::DeseqDataSet;
use crate::error::Result;
use crate::filter::{cooks_cutoff, cooks_outlier_genes, independent_filtering};
use crate::io::DeResults;

/// Options for building the results table
#[derive(Debug, Clone)]
pub struct ResultsParams {
    /// Significance level used by independent filtering and the summary
    pub alpha: f64,
    /// Set p-values of genes with a Cook's outlier to NaN
    pub cooks_filter: bool,
    /// Choose a baseMean cutoff maximizing rejections before BH
    pub independent_filter: bool,
}

impl Default for ResultsParams {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            cooks_filter: true,
            independent_filter: true,
        }
    }
}

/// Wald test followed by outlier masking and p-value adjustment
pub fn results(dds: &DeseqDataSet, params: &ResultsParams) -> Result<DeResults> {
    let mut res = wald_test(dds)?;

    if params.cooks_filter && dds.cooks().is_some() {
        let cutoff = cooks_cutoff(dds.n_samples(), dds.design().n_coefs());
        let outliers = cooks_outlier_genes(dds, cutoff)?;
        let masked = outliers.iter().filter(|&&o| o).count();
        if masked > 0 {
            log::info!("Setting p-values of {} genes with Cook's outliers to NA", masked);
        }
        for (p, _) in res.pvalues.iter_mut().zip(&outliers).filter(|(_, &o)| o) {
            *p = f64::NAN;
        }
    }

    res.padj = if params.independent_filter {
        let outcome = independent_filtering(&res.base_means, &res.pvalues, params.alpha);
        log::info!(
            "Independent filtering kept genes with baseMean >= {:.3} ({} rejections)",
            outcome.cutoff,
            outcome.rejections
        );
        outcome.padj
    } else {
        benjamini_hochberg(&res.pvalues)
    };
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispersion::{estimate_dispersions, DispersionParams};
    use crate::filter::calculate_cooks_distance;
    use crate::glm::{fit_glm, GlmFitParams};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use crate::test_support::simulated;

    fn fitted() -> DeseqDataSet {
        let mut dds = simulated(200, 4);
        estimate_size_factors(&mut dds, SizeFactorMethod::Ratio).unwrap();
        estimate_dispersions(&mut dds, &DispersionParams::default()).unwrap();
        fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        let cooks = calculate_cooks_distance(&dds).unwrap();
        dds.set_cooks(cooks).unwrap();
        dds
    }

    #[test]
    fn test_results_adjusts_pvalues() {
        let dds = fitted();
        let res = results(&dds, &ResultsParams::default()).unwrap();
        assert_eq!(res.n_genes(), 200);
        for (p, q) in res.pvalues.iter().zip(&res.padj) {
            if q.is_finite() {
                assert!(q >= p);
            }
        }
        // every fifth gene is truly changed
        let hits = res.significant_genes(0.05);
        assert!(hits.len() >= 20, "only {} hits", hits.len());
    }

    #[test]
    fn test_plain_bh_without_filtering() {
        let dds = fitted();
        let params = ResultsParams {
            independent_filter: false,
            cooks_filter: false,
            ..ResultsParams::default()
        };
        let res = results(&dds, &params).unwrap();
        let expected = benjamini_hochberg(&res.pvalues);
        for (a, b) in res.padj.iter().zip(&expected) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
    }
}
