//! Dense vector helpers, covariance forms and summary statistics

use nalgebra::{DMatrix, DVector};
use statrs::statistics::Statistics;

/// Dot product
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Marginal risk `Σ·w`
pub fn marginal_risk(cov: &DMatrix<f64>, weights: &[f64]) -> DVector<f64> {
    cov * DVector::from_column_slice(weights)
}

/// Portfolio variance `w·Σ·w`
pub fn quad_form(cov: &DMatrix<f64>, weights: &[f64]) -> f64 {
    let w = DVector::from_column_slice(weights);
    w.dot(&(cov * &w))
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Sample standard deviation (n - 1), 0 for fewer than two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

/// Pearson correlation of two equal-length series, `None` when either is flat
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }

    let std_a = a.iter().std_dev();
    let std_b = b.iter().std_dev();
    if !(std_a > 0.0 && std_b > 0.0) {
        return None;
    }

    let rho = a.iter().covariance(b.iter()) / (std_a * std_b);
    rho.is_finite().then(|| rho.clamp(-1.0, 1.0))
}

/// Euclidean projection onto `{w : Σw = total, lower ≤ w ≤ upper}`.
///
/// Solved by bisection on the shift τ in `clamp(y - τ, lower, upper)`.
/// When the box cannot reach `total` the result is the closest corner.
pub fn project_capped_simplex(y: &[f64], lower: &[f64], upper: &[f64], total: f64) -> Vec<f64> {
    let n = y.len();
    if n == 0 {
        return Vec::new();
    }

    let shifted = |tau: f64| -> Vec<f64> {
        (0..n).map(|i| (y[i] - tau).clamp(lower[i], upper[i])).collect()
    };

    let lo_sum: f64 = lower.iter().sum();
    let hi_sum: f64 = upper.iter().sum();
    if total <= lo_sum {
        return lower.to_vec();
    }
    if total >= hi_sum {
        return upper.to_vec();
    }

    // g(τ) = Σ clamp(y - τ) is non-increasing in τ
    let mut tau_lo = (0..n).map(|i| y[i] - upper[i]).fold(f64::INFINITY, f64::min) - 1.0;
    let mut tau_hi = (0..n).map(|i| y[i] - lower[i]).fold(f64::NEG_INFINITY, f64::max) + 1.0;

    for _ in 0..200 {
        let mid = 0.5 * (tau_lo + tau_hi);
        let s: f64 = shifted(mid).iter().sum();
        if s > total {
            tau_lo = mid;
        } else {
            tau_hi = mid;
        }
        if tau_hi - tau_lo < 1e-15 {
            break;
        }
    }

    let mut w = shifted(0.5 * (tau_lo + tau_hi));

    // Spread the remaining rounding residue over coordinates with slack
    let residue = total - w.iter().sum::<f64>();
    if residue.abs() > 0.0 {
        for i in 0..n {
            let room = if residue > 0.0 { upper[i] - w[i] } else { lower[i] - w[i] };
            let step = if residue > 0.0 { residue.min(room) } else { residue.max(room) };
            if step != 0.0 {
                w[i] += step;
                break;
            }
        }
    }

    w
}

/// Equal weights clipped to the bounds and projected back onto the budget
pub fn bounded_equal_weights(lower: &[f64], upper: &[f64]) -> Vec<f64> {
    let n = lower.len();
    if n == 0 {
        return Vec::new();
    }
    let equal = vec![1.0 / n as f64; n];
    project_capped_simplex(&equal, lower, upper, 1.0)
}

/// Largest absolute coordinate difference
pub fn max_abs_diff(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_form() {
        let m = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let v = [1.0, 2.0];
        // 2 + 2*0.5*2 + 4
        assert!((quad_form(&m, &v) - 8.0).abs() < 1e-12);

        let marginal = marginal_risk(&m, &v);
        assert!((marginal[0] - 3.0).abs() < 1e-12);
        assert!((marginal[1] - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[0.1, 0.1, 0.1]) - 0.1).abs() < 1e-15);
        assert!((mean(&[1.0, 2.0, 3.0, 4.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_sample_std() {
        assert_eq!(sample_std(&[1.0]), 0.0);
        assert!((sample_std(&[1.0, 2.0, 3.0, 4.0]) - 1.2909944487358056).abs() < 1e-12);
    }

    #[test]
    fn test_pearson() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [2.0, 4.0, 6.0, 8.0];
        let c = [4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&a, &c).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&a, &[1.0, 1.0, 1.0, 1.0]).is_none());
        assert!(pearson(&a, &b[..3]).is_none());

        // Σdxdy = 8, Σdx² = Σdy² = 10
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 1.0, 4.0, 3.0, 5.0];
        assert!((pearson(&x, &y).unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_projection_respects_bounds_and_budget() {
        let lower = [0.1, 0.0, 0.0];
        let upper = [0.5, 0.4, 0.3];
        let w = project_capped_simplex(&[2.0, -1.0, 0.7], &lower, &upper, 1.0);

        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for i in 0..3 {
            assert!(w[i] >= lower[i] - 1e-12 && w[i] <= upper[i] + 1e-12);
        }
        assert!((w[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_projection_of_feasible_point_is_identity() {
        let lower = [0.0; 3];
        let upper = [1.0; 3];
        let y = [0.2, 0.3, 0.5];
        let w = project_capped_simplex(&y, &lower, &upper, 1.0);
        assert!(max_abs_diff(&w, &y) < 1e-9);
    }

    #[test]
    fn test_bounded_equal_weights() {
        let w = bounded_equal_weights(&[0.1, 0.0, 0.0], &[0.5, 0.4, 0.3]);
        // 1/3 fits every box except lp, which caps at 0.3
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(w[2] <= 0.3 + 1e-12);
        assert!((w[0] - w[1]).abs() < 1e-9);
    }
}
