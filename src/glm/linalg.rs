//! Dense symmetric solves for the tiny systems of per-gene fits.
//!
//! Matrices are row-major `n * n` slices; `n` is the number of coefficients.

/// Cholesky factor of a symmetric positive definite matrix, `None` when a
/// pivot is not positive.
pub fn cholesky(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if !(sum > 0.0) || !sum.is_finite() {
                    return None;
                }
                l[i * n + j] = sum.sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    Some(l)
}

fn solve_with_factor(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

/// Solve `A x = b` for symmetric positive definite `A`
pub fn solve_spd(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    cholesky(a, n).map(|l| solve_with_factor(&l, b, n))
}

/// Inverse of a symmetric positive definite matrix
pub fn invert_spd(a: &[f64], n: usize) -> Option<Vec<f64>> {
    let l = cholesky(a, n)?;
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        let mut e = vec![0.0; n];
        e[i] = 1.0;
        let col = solve_with_factor(&l, &e, n);
        for j in 0..n {
            inv[j * n + i] = col[j];
        }
    }
    Some(inv)
}

/// Log-determinant of a symmetric positive definite matrix
pub fn log_det_spd(a: &[f64], n: usize) -> Option<f64> {
    cholesky(a, n).map(|l| 2.0 * (0..n).map(|i| l[i * n + i].ln()).sum::<f64>())
}

/// `X' diag(w) X` for a samples x coefficients design
pub fn xtwx(design: &ndarray::Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut out = vec![0.0; p * p];
    for (row, &w) in design.rows().into_iter().zip(weights) {
        for j in 0..p {
            for k in 0..p {
                out[j * p + k] += w * row[j] * row[k];
            }
        }
    }
    out
}

/// Product of two `n * n` matrices
pub fn matmul(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![0.0; n * n];
    for i in 0..n {
        for k in 0..n {
            let aik = a[i * n + k];
            for j in 0..n {
                out[i * n + j] += aik * b[k * n + j];
            }
        }
    }
    out
}
