//! Small statistical helpers shared across modules

use std::cmp::Ordering;

/// Consistency constant making the MAD estimate the normal standard deviation
pub const MAD_SCALE: f64 = 1.4826;

fn sort_finite(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    sorted
}

/// Median of the non-NaN values (NaN when there are none)
pub fn median(values: &[f64]) -> f64 {
    let sorted = sort_finite(values);
    let n = sorted.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 0 => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
        _ => sorted[n / 2],
    }
}

/// Linear-interpolation quantile of already sorted data (`h = (n - 1) p`)
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let h = (n as f64 - 1.0) * p.clamp(0.0, 1.0);
    let lo = h.floor() as usize;
    let hi = (h.ceil() as usize).min(n - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Squared scaled median absolute deviation
pub fn mad_squared(values: &[f64]) -> f64 {
    let center = median(values);
    if center.is_nan() {
        return 0.0;
    }
    let deviations: Vec<f64> = values.iter().filter(|v| !v.is_nan()).map(|&v| (v - center).abs()).collect();
    let mad = median(&deviations) * MAD_SCALE;
    mad * mad
}

/// Mean after dropping `floor(n * trim)` values from each end
pub fn trimmed_mean(values: &[f64], trim: f64) -> f64 {
    let sorted = sort_finite(values);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    let k = (n as f64 * trim).floor() as usize;
    let kept = if 2 * k >= n { &sorted[..] } else { &sorted[k..n - k] };
    kept.iter().sum::<f64>() / kept.len() as f64
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (`n - 1` denominator)
pub fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
        assert_eq!(median(&[f64::NAN, 5.0]), 5.0);
    }

    #[test]
    fn test_quantile_sorted_interpolates() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_sorted(&x, 0.0), 1.0);
        assert_eq!(quantile_sorted(&x, 1.0), 5.0);
        assert!((quantile_sorted(&x, 0.3) - 2.2).abs() < 1e-12);
    }

    #[test]
    fn test_mad_squared_normal_scale() {
        // |x - 3| = 2,1,0,1,2 -> MAD = 1
        let mad2 = mad_squared(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((mad2 - MAD_SCALE * MAD_SCALE).abs() < 1e-12);
    }

    #[test]
    fn test_trimmed_mean() {
        let values = [1.0, 2.0, 3.0, 4.0, 100.0];
        // floor(5 * 0.2) = 1 dropped from each end
        assert!((trimmed_mean(&values, 0.2) - 3.0).abs() < 1e-12);
        assert!((trimmed_mean(&[2.0, 4.0], 0.2) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_variance() {
        assert!((sample_variance(&[1.0, 2.0, 3.0, 4.0]) - 5.0 / 3.0).abs() < 1e-12);
        assert!(sample_variance(&[1.0]).is_nan());
    }
}
