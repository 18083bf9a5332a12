//! Labelled genes x samples expression table

use std::fmt;

use ndarray::{Array2, ArrayView1, Axis};

use crate::data::CountMatrix;
use crate::error::{DeError, Result};

/// Normalized expression with gene row labels and sample column labels
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTable {
    values: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl ExpressionTable {
    pub fn new(values: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        if values.nrows() != gene_ids.len() || values.ncols() != sample_ids.len() {
            return Err(DeError::DimensionMismatch {
                expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
                got: format!("{} x {}", values.nrows(), values.ncols()),
            });
        }
        Ok(Self {
            values,
            gene_ids,
            sample_ids,
        })
    }

    /// Counts divided by their sample's size factor, the usual normalized
    /// count: a sample with twice the depth has its counts halved.
    ///
    /// Multiplying by the factor would amplify the depth differences instead
    /// of removing them, so it is not offered.
    pub fn normalize(counts: &CountMatrix, size_factors: ArrayView1<f64>) -> Result<Self> {
        if size_factors.len() != counts.n_samples() {
            return Err(DeError::DimensionMismatch {
                expected: format!("{} size factors", counts.n_samples()),
                got: size_factors.len().to_string(),
            });
        }
        let values = &counts.counts() / &size_factors.insert_axis(Axis(0));
        Self::new(values, counts.gene_ids().to_vec(), counts.sample_ids().to_vec())
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            values: self.values.select(Axis(0), rows),
            gene_ids: rows.iter().map(|&i| self.gene_ids[i].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
        }
    }

    pub fn select_columns(&self, columns: &[usize]) -> Self {
        Self {
            values: self.values.select(Axis(1), columns),
            gene_ids: self.gene_ids.clone(),
            sample_ids: columns.iter().map(|&j| self.sample_ids[j].clone()).collect(),
        }
    }

    /// First `n` rows (all rows when there are fewer)
    pub fn head(&self, n: usize) -> Self {
        let rows: Vec<usize> = (0..n.min(self.n_genes())).collect();
        self.select_rows(&rows)
    }

    /// Remove genes that are zero in every sample. Sample columns are never
    /// dropped, even when all of their counts are zero.
    pub fn drop_zero_rows(&self) -> Self {
        let keep: Vec<usize> = self
            .values
            .rows()
            .into_iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|&v| v != 0.0))
            .map(|(i, _)| i)
            .collect();
        let dropped = self.n_genes() - keep.len();
        if dropped > 0 {
            log::info!("Dropped {} all-zero rows from the normalized table", dropped);
        }
        self.select_rows(&keep)
    }

    /// Mean of each row over the given columns
    pub fn row_means(&self, columns: &[usize]) -> Vec<f64> {
        if columns.is_empty() {
            return vec![f64::NAN; self.n_genes()];
        }
        self.values
            .rows()
            .into_iter()
            .map(|row| columns.iter().map(|&j| row[j]).sum::<f64>() / columns.len() as f64)
            .collect()
    }
}

/// Rows and columns shown from each end of a large table
const PREVIEW: usize = 5;

fn preview(n: usize) -> Vec<Option<usize>> {
    if n > 2 * PREVIEW {
        (0..PREVIEW)
            .map(Some)
            .chain(std::iter::once(None))
            .chain((n - PREVIEW..n).map(Some))
            .collect()
    } else {
        (0..n).map(Some).collect()
    }
}

impl fmt::Display for ExpressionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let columns = preview(self.n_samples());
        let id_width = self.gene_ids.iter().map(|g| g.len()).max().unwrap_or(0).max(3);
        let width = self
            .sample_ids
            .iter()
            .map(|s| s.len())
            .max()
            .unwrap_or(0)
            .max(12);

        write!(f, "{:<id_width$}", "", id_width = id_width)?;
        for col in &columns {
            let name = col.map_or("...", |j| self.sample_ids[j].as_str());
            write!(f, " {:>width$}", name, width = width)?;
        }
        writeln!(f)?;

        for row in preview(self.n_genes()) {
            match row {
                Some(i) => {
                    write!(f, "{:<id_width$}", self.gene_ids[i], id_width = id_width)?;
                    for col in &columns {
                        match col {
                            Some(j) => write!(f, " {:>width$.4}", self.values[[i, *j]], width = width)?,
                            None => write!(f, " {:>width$}", "...", width = width)?,
                        }
                    }
                }
                None => write!(f, "{:<id_width$}", "...", id_width = id_width)?,
            }
            writeln!(f)?;
        }
        writeln!(f)?;
        write!(f, "[{} rows x {} columns]", self.n_genes(), self.n_samples())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table() -> ExpressionTable {
        ExpressionTable::new(
            array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0], [4.0, 0.0, 6.0]],
            vec!["g1".into(), "g2".into(), "g3".into()],
            vec!["a1".into(), "b1".into(), "a2".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_shape_checked() {
        let err = ExpressionTable::new(array![[1.0, 2.0]], vec!["g".into()], vec!["s".into()]);
        assert!(matches!(err, Err(DeError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_normalize_divides_by_size_factor() {
        let counts = CountMatrix::new(
            array![[2.0, 8.0], [0.0, 4.0]],
            vec!["g1".into(), "g2".into()],
            vec!["s1".into(), "s2".into()],
        )
        .unwrap();
        let t = ExpressionTable::normalize(&counts, array![0.5, 2.0].view()).unwrap();
        assert_eq!(t.values(), &array![[4.0, 4.0], [0.0, 2.0]]);
        assert!(ExpressionTable::normalize(&counts, array![1.0].view()).is_err());
    }

    #[test]
    fn test_drop_zero_rows_keeps_labels() {
        let t = table().drop_zero_rows();
        assert_eq!(t.gene_ids(), &["g1", "g3"]);
        assert_eq!(t.values()[[1, 2]], 6.0);
    }

    #[test]
    fn test_zero_sample_column_survives_row_drop() {
        let t = ExpressionTable::new(
            array![[3.0, 0.0], [0.0, 0.0]],
            vec!["g1".into(), "g2".into()],
            vec!["s1".into(), "empty".into()],
        )
        .unwrap()
        .drop_zero_rows();
        assert_eq!(t.gene_ids(), &["g1"]);
        assert_eq!(t.sample_ids(), &["s1", "empty"]);
    }

    #[test]
    fn test_select_and_means() {
        let t = table().select_columns(&[0, 2, 1]);
        assert_eq!(t.sample_ids(), &["a1", "a2", "b1"]);
        assert_eq!(t.row_means(&[0, 1]), vec![2.0, 0.0, 5.0]);
        assert_eq!(table().head(2).gene_ids(), &["g1", "g2"]);
        assert_eq!(table().head(10).n_genes(), 3);
    }

    #[test]
    fn test_display_truncates_long_tables() {
        let n = 30;
        let t = ExpressionTable::new(
            Array2::from_shape_fn((n, 2), |(i, j)| (i + j) as f64),
            (0..n).map(|i| format!("gene{}", i)).collect(),
            vec!["s1".into(), "s2".into()],
        )
        .unwrap();
        let text = t.to_string();
        assert!(text.contains("gene4 "));
        assert!(!text.contains("gene12 "));
        assert!(text.contains("gene29 "));
        assert!(text.ends_with("[30 rows x 2 columns]"));
    }
}
