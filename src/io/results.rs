//! Per-gene differential expression results

use std::fmt;

use serde::Serialize;

/// Result table of a two-group Wald test
#[derive(Debug, Clone, Serialize)]
pub struct DeResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts over all samples
    pub base_means: Vec<f64>,
    pub base_vars: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    /// Wald statistic, left untouched by shrinkage
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
    /// Final (MAP) dispersions
    pub dispersions: Vec<f64>,
    pub gene_wise_dispersions: Vec<f64>,
    pub trended_dispersions: Vec<f64>,
    pub contrast: Contrast,
    /// Whether `log2_fold_changes` and `lfc_se` hold shrunken estimates
    pub shrunk: bool,
}

/// `variable`: `numerator` vs `denominator`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl fmt::Display for Contrast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

impl DeResults {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn is_significant(&self, i: usize, alpha: f64) -> bool {
        self.padj[i].is_finite() && self.padj[i] < alpha
    }

    pub fn significant_genes(&self, alpha: f64) -> Vec<&str> {
        (0..self.n_genes())
            .filter(|&i| self.is_significant(i, alpha))
            .map(|i| self.gene_ids[i].as_str())
            .collect()
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary<'_> {
        let significant: Vec<usize> = (0..self.n_genes()).filter(|&i| self.is_significant(i, alpha)).collect();
        ResultsSummary {
            results: self,
            alpha,
            genes_tested: self.pvalues.iter().filter(|p| p.is_finite()).count(),
            significant: significant.len(),
            upregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] > 0.0).count(),
            downregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] < 0.0).count(),
        }
    }
}

/// Printable summary: header line, a truncated table and rejection counts
#[derive(Debug, Clone)]
pub struct ResultsSummary<'a> {
    results: &'a DeResults,
    pub alpha: f64,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
}

/// Rows shown from each end of a long table
const PREVIEW_ROWS: usize = 5;

fn cell(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v != 0.0 && (v.abs() < 1e-3 || v.abs() >= 1e6) {
        format!("{:.6e}", v)
    } else {
        format!("{:.6}", v)
    }
}

impl fmt::Display for ResultsSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let res = self.results;
        let prefix = if res.shrunk { "Shrunk log2" } else { "Log2" };
        writeln!(f, "{} fold change & Wald test p-value: {}", prefix, res.contrast)?;

        let id_width = res.gene_ids.iter().map(|g| g.len()).max().unwrap_or(0).max(4);
        writeln!(
            f,
            "{:<id_width$} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
            "",
            "baseMean",
            "log2FoldChange",
            "lfcSE",
            "stat",
            "pvalue",
            "padj",
            id_width = id_width
        )?;

        let n = res.n_genes();
        let rows: Vec<Option<usize>> = if n > 2 * PREVIEW_ROWS {
            (0..PREVIEW_ROWS)
                .map(Some)
                .chain(std::iter::once(None))
                .chain((n - PREVIEW_ROWS..n).map(Some))
                .collect()
        } else {
            (0..n).map(Some).collect()
        };
        for row in rows {
            match row {
                Some(i) => writeln!(
                    f,
                    "{:<id_width$} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}",
                    res.gene_ids[i],
                    cell(res.base_means[i]),
                    cell(res.log2_fold_changes[i]),
                    cell(res.lfc_se[i]),
                    cell(res.stat[i]),
                    cell(res.pvalues[i]),
                    cell(res.padj[i]),
                    id_width = id_width
                )?,
                None => writeln!(f, "{:<id_width$} {:>14}", "...", "...", id_width = id_width)?,
            }
        }
        writeln!(f)?;
        writeln!(f, "[{} rows x 6 columns]", n)?;
        writeln!(f, "genes with a p-value: {}", self.genes_tested)?;
        writeln!(f, "padj < {}: {}", self.alpha, self.significant)?;
        writeln!(f, "  LFC > 0 (up): {}", self.upregulated)?;
        write!(f, "  LFC < 0 (down): {}", self.downregulated)
    }
}

#[cfg(test)]
pub(crate) fn sample_results(n: usize) -> DeResults {
    DeResults {
        gene_ids: (0..n).map(|i| format!("gene{}", i)).collect(),
        base_means: (0..n).map(|i| 10.0 * (i + 1) as f64).collect(),
        base_vars: vec![5.0; n],
        log2_fold_changes: (0..n).map(|i| if i % 2 == 0 { 1.5 } else { -0.5 }).collect(),
        lfc_se: vec![0.3; n],
        stat: vec![2.0; n],
        pvalues: (0..n).map(|i| 0.001 * (i + 1) as f64).collect(),
        padj: (0..n).map(|i| if i == n - 1 { f64::NAN } else { 0.01 * (i + 1) as f64 }).collect(),
        dispersions: vec![0.1; n],
        gene_wise_dispersions: vec![0.1; n],
        trended_dispersions: vec![0.1; n],
        contrast: Contrast {
            variable: "condition".to_string(),
            numerator: "B".to_string(),
            denominator: "A".to_string(),
        },
        shrunk: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts() {
        let res = sample_results(8);
        let summary = res.summary(0.05);
        // padj 0.01..0.04 are significant; genes 0 and 2 up, 1 and 3 down
        assert_eq!(summary.significant, 4);
        assert_eq!(summary.upregulated, 2);
        assert_eq!(summary.downregulated, 2);
        assert_eq!(summary.genes_tested, 8);
    }

    #[test]
    fn test_summary_header_marks_shrinkage() {
        let mut res = sample_results(3);
        let text = res.summary(0.05).to_string();
        assert!(text.starts_with("Log2 fold change & Wald test p-value: condition B vs A"));
        res.shrunk = true;
        let text = res.summary(0.05).to_string();
        assert!(text.starts_with("Shrunk log2 fold change & Wald test p-value: condition B vs A"));
    }

    #[test]
    fn test_long_tables_are_truncated() {
        let text = sample_results(20).summary(0.05).to_string();
        assert!(text.contains("gene4 "));
        assert!(!text.contains("gene10 "));
        assert!(text.contains("gene19 "));
        assert!(text.contains("[20 rows x 6 columns]"));
    }
}
