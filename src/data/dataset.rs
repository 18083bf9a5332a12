//! DeseqDataSet: counts, design and every fitted quantity of the model

use ndarray::{Array1, Array2};

use super::{CountMatrix, SampleMetadata};
use crate::error::{DeError, Result};
use crate::glm::TwoGroupDesign;

/// Container passed between the fitting stages.
///
/// Counts are genes x samples. Each stage fills its own fields and later
/// stages read them back through the getters.
#[derive(Debug, Clone)]
pub struct DeseqDataSet {
    counts: CountMatrix,
    metadata: SampleMetadata,
    design: TwoGroupDesign,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    map_dispersions: Option<Array1<f64>>,
    /// `asymptDisp + extraPois / mean`
    dispersion_function: Option<(f64, f64)>,
    dispersion_prior_var: Option<f64>,
    var_log_disp_ests: Option<f64>,
    dispersion_outliers: Option<Vec<bool>>,
    /// Fitted means used for dispersion estimation
    mu: Option<Array2<f64>>,

    /// Natural-log coefficients, genes x 2
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
    hat_diagonals: Option<Array2<f64>>,
    /// Fitted means of the GLM
    glm_mu: Option<Array2<f64>>,
    converged: Option<Vec<bool>>,

    cooks: Option<Array2<f64>>,
    /// Genes whose outlier counts were replaced and refitted
    replaced: Option<Vec<bool>>,
}

fn check_len(what: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(DeError::DimensionMismatch {
            expected: format!("{} {}", expected, what),
            got: format!("{} {}", got, what),
        });
    }
    Ok(())
}

impl DeseqDataSet {
    /// Create a dataset; `metadata` rows must follow the count columns.
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, design: TwoGroupDesign) -> Result<Self> {
        if counts.sample_ids() != metadata.sample_ids() {
            return Err(DeError::InvalidMetadata {
                reason: "Sample IDs in counts and metadata do not match".to_string(),
            });
        }
        check_len("design rows", counts.n_samples(), design.n_samples())?;
        if counts.n_genes() == 0 {
            return Err(DeError::EmptyData {
                reason: "no genes left to model".to_string(),
            });
        }

        Ok(Self {
            counts,
            metadata,
            design,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            map_dispersions: None,
            dispersion_function: None,
            dispersion_prior_var: None,
            var_log_disp_ests: None,
            dispersion_outliers: None,
            mu: None,
            coefficients: None,
            standard_errors: None,
            hat_diagonals: None,
            glm_mu: None,
            converged: None,
            cooks: None,
            replaced: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design(&self) -> &TwoGroupDesign {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    pub fn gene_ids(&self) -> &[String] {
        self.counts.gene_ids()
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    /// Final (MAP) dispersions
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.map_dispersions.as_ref()
    }

    pub fn dispersion_function(&self) -> Option<(f64, f64)> {
        self.dispersion_function
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn var_log_disp_ests(&self) -> Option<f64> {
        self.var_log_disp_ests
    }

    pub fn dispersion_outliers(&self) -> Option<&Vec<bool>> {
        self.dispersion_outliers.as_ref()
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    pub fn hat_diagonals(&self) -> Option<&Array2<f64>> {
        self.hat_diagonals.as_ref()
    }

    pub fn glm_mu(&self) -> Option<&Array2<f64>> {
        self.glm_mu.as_ref()
    }

    pub fn converged(&self) -> Option<&Vec<bool>> {
        self.converged.as_ref()
    }

    pub fn cooks(&self) -> Option<&Array2<f64>> {
        self.cooks.as_ref()
    }

    pub fn replaced(&self) -> Option<&Vec<bool>> {
        self.replaced.as_ref()
    }

    pub fn has_size_factors(&self) -> bool {
        self.size_factors.is_some()
    }

    pub fn has_dispersions(&self) -> bool {
        self.map_dispersions.is_some()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some()
    }

    /// Mean of the normalized counts per gene
    pub fn base_means(&self) -> Option<Vec<f64>> {
        self.normalized_counts
            .as_ref()
            .map(|norm| norm.rows().into_iter().map(|row| row.mean().unwrap_or(0.0)).collect())
    }

    /// Set size factors and recompute normalized counts
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        check_len("size factors", self.n_samples(), size_factors.len())?;
        if size_factors.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(DeError::SizeFactorFailed {
                reason: "size factors must be positive and finite".to_string(),
            });
        }
        let mut normalized = self.counts.counts().to_owned();
        for (mut col, &sf) in normalized.columns_mut().into_iter().zip(size_factors.iter()) {
            col.mapv_inplace(|x| x / sf);
        }
        self.normalized_counts = Some(normalized);
        self.size_factors = Some(size_factors);
        Ok(())
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        check_len("dispersions", self.n_genes(), dispersions.len())?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_trended_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        check_len("dispersions", self.n_genes(), dispersions.len())?;
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_map_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        check_len("dispersions", self.n_genes(), dispersions.len())?;
        self.map_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn set_dispersion_function(&mut self, asympt_disp: f64, extra_pois: f64) {
        self.dispersion_function = Some((asympt_disp, extra_pois));
    }

    pub fn set_dispersion_prior_var(&mut self, var: f64) {
        self.dispersion_prior_var = Some(var);
    }

    pub fn set_var_log_disp_ests(&mut self, var: f64) {
        self.var_log_disp_ests = Some(var);
    }

    pub fn set_dispersion_outliers(&mut self, outliers: Vec<bool>) -> Result<()> {
        check_len("outlier flags", self.n_genes(), outliers.len())?;
        self.dispersion_outliers = Some(outliers);
        Ok(())
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        check_len("mu rows", self.n_genes(), mu.nrows())?;
        self.mu = Some(mu);
        Ok(())
    }

    /// Store the GLM fit (all arrays genes x coefficients or genes x samples)
    pub fn set_glm_fit(
        &mut self,
        coefficients: Array2<f64>,
        standard_errors: Array2<f64>,
        hat_diagonals: Array2<f64>,
        mu: Array2<f64>,
        converged: Vec<bool>,
    ) -> Result<()> {
        check_len("coefficient rows", self.n_genes(), coefficients.nrows())?;
        check_len("standard error rows", self.n_genes(), standard_errors.nrows())?;
        check_len("hat diagonal rows", self.n_genes(), hat_diagonals.nrows())?;
        check_len("mu rows", self.n_genes(), mu.nrows())?;
        check_len("convergence flags", self.n_genes(), converged.len())?;
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        self.hat_diagonals = Some(hat_diagonals);
        self.glm_mu = Some(mu);
        self.converged = Some(converged);
        Ok(())
    }

    pub fn set_cooks(&mut self, cooks: Array2<f64>) -> Result<()> {
        check_len("cooks rows", self.n_genes(), cooks.nrows())?;
        self.cooks = Some(cooks);
        Ok(())
    }

    pub fn set_replaced(&mut self, replaced: Vec<bool>) -> Result<()> {
        check_len("replacement flags", self.n_genes(), replaced.len())?;
        self.replaced = Some(replaced);
        Ok(())
    }

    /// Swap in a count array of the same shape and refresh normalized counts
    pub fn replace_counts(&mut self, counts: Array2<f64>) -> Result<()> {
        self.counts = self.counts.with_counts(counts)?;
        if let Some(sf) = self.size_factors.clone() {
            self.set_size_factors(sf)?;
        }
        Ok(())
    }
}
