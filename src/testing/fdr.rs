//! Multiple testing correction

/// Benjamini-Hochberg adjusted p-values. NaN p-values stay NaN and do not
/// count toward the number of tests.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..pvalues.len()).filter(|&i| !pvalues[i].is_nan()).collect();
    let m = order.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }
    order.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    let mut running_min = 1.0_f64;
    for (rank, &i) in order.iter().enumerate().rev() {
        let adjusted = pvalues[i] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(adjusted);
        padj[i] = running_min;
    }
    padj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bh_known_values() {
        let padj = benjamini_hochberg(&[0.01, 0.04, 0.03, 0.02]);
        // every p * 4 / rank equals 0.04
        for adj in &padj {
            assert!((adj - 0.04).abs() < 1e-12);
        }
        let padj = benjamini_hochberg(&[0.001, 0.5, 0.02]);
        assert!((padj[0] - 0.003).abs() < 1e-12);
        assert!((padj[2] - 0.03).abs() < 1e-12);
        assert!((padj[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bh_skips_nan() {
        let padj = benjamini_hochberg(&[0.01, f64::NAN, 0.03, 0.02]);
        assert!(padj[1].is_nan());
        assert!((padj[0] - 0.03).abs() < 1e-12);
        assert!(benjamini_hochberg(&[f64::NAN, f64::NAN]).iter().all(|p| p.is_nan()));
    }

    #[test]
    fn test_bh_monotone_and_capped() {
        let pvalues = [0.001, 0.01, 0.05, 0.1, 0.9, 0.95];
        let padj = benjamini_hochberg(&pvalues);
        for w in padj.windows(2) {
            assert!(w[0] <= w[1]);
        }
        assert!(padj.iter().zip(&pvalues).all(|(a, p)| *a >= *p - 1e-12 && *a <= 1.0));
    }
}
