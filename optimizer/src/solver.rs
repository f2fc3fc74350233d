//! Bounded, budget-constrained local minimizer
//!
//! Minimizes a smooth objective over `{w : Σw = 1, lower ≤ w ≤ upper}` by
//! projected gradient descent with a backtracking step. An extra linear
//! equality `a·w = b` is handled with an augmented Lagrangian outer loop.

use tracing::debug;

use crate::error::{OptimizerError, Result};
use crate::linalg::{dot, max_abs_diff, project_capped_simplex};

/// Solver limits
#[derive(Debug, Clone, Copy)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Convergence threshold on the step and on the objective change
    pub tolerance: f64,
    /// Central-difference width for the numeric gradient
    pub gradient_step: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-10,
            gradient_step: 1e-6,
        }
    }
}

/// Outcome of a solve
#[derive(Debug, Clone)]
pub struct Solution {
    pub weights: Vec<f64>,
    pub objective: f64,
    pub iterations: usize,
    pub converged: bool,
}

const MAX_STEP: f64 = 1e8;
const MIN_STEP: f64 = 1e-20;
const OUTER_ITERATIONS: usize = 50;
const EQUALITY_TOLERANCE: f64 = 1e-8;

/// Bounds and budget of the feasible set
#[derive(Debug, Clone)]
pub struct Feasible<'a> {
    pub lower: &'a [f64],
    pub upper: &'a [f64],
}

impl<'a> Feasible<'a> {
    pub fn new(lower: &'a [f64], upper: &'a [f64]) -> Self {
        Self { lower, upper }
    }

    fn project(&self, y: &[f64]) -> Vec<f64> {
        project_capped_simplex(y, self.lower, self.upper, 1.0)
    }

    /// Smallest and largest `a·w` reachable on the feasible set
    pub fn linear_range(&self, a: &[f64]) -> (f64, f64) {
        let n = a.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i, &j| a[i].total_cmp(&a[j]));

        let fill = |indices: &mut dyn Iterator<Item = usize>| -> f64 {
            let mut w = self.lower.to_vec();
            let mut remaining = 1.0 - self.lower.iter().sum::<f64>();
            for i in indices {
                if remaining <= 0.0 {
                    break;
                }
                let add = (self.upper[i] - self.lower[i]).min(remaining);
                w[i] += add;
                remaining -= add;
            }
            dot(a, &w)
        };

        let min = fill(&mut order.iter().copied());
        let max = fill(&mut order.iter().rev().copied());
        (min, max)
    }
}

fn numeric_gradient<F: Fn(&[f64]) -> f64>(f: &F, x: &[f64], h: f64) -> Vec<f64> {
    let mut shifted = x.to_vec();
    (0..x.len())
        .map(|i| {
            let original = shifted[i];
            shifted[i] = original + h;
            let up = f(&shifted);
            shifted[i] = original - h;
            let down = f(&shifted);
            shifted[i] = original;
            (up - down) / (2.0 * h)
        })
        .collect()
}

/// Projected gradient descent, never fails; reports whether it converged
fn projected_gradient<F: Fn(&[f64]) -> f64>(
    f: &F,
    x0: &[f64],
    feasible: &Feasible<'_>,
    options: &SolverOptions,
) -> Solution {
    let mut x = feasible.project(x0);
    let mut fx = f(&x);
    let mut step: f64 = 1.0;

    for iteration in 1..=options.max_iterations {
        let g = numeric_gradient(f, &x, options.gradient_step);
        step = (step * 2.0).min(MAX_STEP);

        let (x_next, f_next) = loop {
            let trial: Vec<f64> = x.iter().zip(g.iter()).map(|(xi, gi)| xi - step * gi).collect();
            let candidate = feasible.project(&trial);
            let delta: Vec<f64> = candidate.iter().zip(x.iter()).map(|(c, xi)| c - xi).collect();
            let f_candidate = f(&candidate);

            // Sufficient decrease for the projected step
            let bound = fx + dot(&g, &delta) + dot(&delta, &delta) / (2.0 * step);
            if f_candidate <= bound + 1e-15 * fx.abs().max(1.0) {
                break (candidate, f_candidate);
            }

            step *= 0.5;
            if step < MIN_STEP {
                break (x.clone(), fx);
            }
        };

        let moved = max_abs_diff(&x_next, &x);
        let improvement = (fx - f_next).abs();
        x = x_next;
        fx = f_next;

        if moved < options.tolerance || improvement <= options.tolerance * fx.abs().max(1e-6) {
            debug!(iterations = iteration, objective = fx, "Solver converged");
            return Solution {
                weights: x,
                objective: fx,
                iterations: iteration,
                converged: true,
            };
        }
    }

    Solution {
        weights: x,
        objective: fx,
        iterations: options.max_iterations,
        converged: false,
    }
}

/// Minimize `f` over the bounded simplex
pub fn minimize<F: Fn(&[f64]) -> f64>(
    f: F,
    x0: &[f64],
    feasible: &Feasible<'_>,
    options: &SolverOptions,
    objective_name: &str,
) -> Result<Solution> {
    let solution = projected_gradient(&f, x0, feasible, options);
    if solution.converged {
        Ok(solution)
    } else {
        Err(OptimizerError::non_convergence(objective_name, solution.iterations))
    }
}

/// Minimize `f` over the bounded simplex subject to `a·w = b`
pub fn minimize_with_equality<F: Fn(&[f64]) -> f64>(
    f: F,
    x0: &[f64],
    feasible: &Feasible<'_>,
    a: &[f64],
    b: f64,
    options: &SolverOptions,
    objective_name: &str,
) -> Result<Solution> {
    let (reach_min, reach_max) = feasible.linear_range(a);
    let slack = 1e-9 * b.abs().max(1.0);
    if b < reach_min - slack || b > reach_max + slack {
        return Err(OptimizerError::infeasible(format!(
            "target {:.6} outside reachable range [{:.6}, {:.6}]",
            b, reach_min, reach_max
        )));
    }

    let mut multiplier = 0.0;
    let mut penalty = 10.0;
    let mut x = x0.to_vec();
    let mut total_iterations = 0;
    let mut last_violation = f64::INFINITY;

    for _ in 0..OUTER_ITERATIONS {
        let lagrangian = |w: &[f64]| {
            let c = dot(a, w) - b;
            f(w) + multiplier * c + 0.5 * penalty * c * c
        };

        let inner = projected_gradient(&lagrangian, &x, feasible, options);
        total_iterations += inner.iterations;
        x = inner.weights;

        let violation = dot(a, &x) - b;
        if violation.abs() < EQUALITY_TOLERANCE && inner.converged {
            return Ok(Solution {
                objective: f(&x),
                weights: x,
                iterations: total_iterations,
                converged: true,
            });
        }

        multiplier += penalty * violation;
        if violation.abs() > 0.25 * last_violation {
            penalty = (penalty * 10.0).min(1e12);
        }
        last_violation = violation.abs();
    }

    Err(OptimizerError::non_convergence(objective_name, total_iterations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::quad_form;
    use nalgebra::DMatrix;

    fn cov() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            3,
            3,
            &[
                0.0025, 0.0015, 0.0030, //
                0.0015, 0.0100, 0.0060, //
                0.0030, 0.0060, 0.0400,
            ],
        )
    }

    #[test]
    fn test_min_variance_unbounded_prefers_low_vol() {
        let lower = [0.0; 3];
        let upper = [1.0; 3];
        let feasible = Feasible::new(&lower, &upper);
        let c = cov();

        let solution = minimize(
            |w| quad_form(&c, w),
            &[1.0 / 3.0; 3],
            &feasible,
            &SolverOptions::default(),
            "min_variance",
        )
        .unwrap();

        assert!(solution.converged);
        assert!((solution.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(solution.weights[0] > solution.weights[2]);
    }

    #[test]
    fn test_bounds_are_binding() {
        let lower = [0.1, 0.0, 0.0];
        let upper = [0.5, 0.4, 0.3];
        let feasible = Feasible::new(&lower, &upper);
        let c = cov();

        let solution = minimize(
            |w| quad_form(&c, w),
            &[1.0 / 3.0; 3],
            &feasible,
            &SolverOptions::default(),
            "min_variance",
        )
        .unwrap();

        assert!(solution.weights[0] <= 0.5 + 1e-9);
        assert!(solution.weights[0] >= 0.5 - 1e-6);
    }

    #[test]
    fn test_linear_range() {
        let lower = [0.1, 0.0, 0.0];
        let upper = [0.5, 0.4, 0.3];
        let feasible = Feasible::new(&lower, &upper);
        let (lo, hi) = feasible.linear_range(&[0.08, 0.12, 0.25]);

        // min: 0.5 staking, 0.4 lending, 0.1 lp
        assert!((lo - (0.04 + 0.048 + 0.025)).abs() < 1e-12);
        // max: 0.3 lp, 0.4 lending, 0.3 staking
        assert!((hi - (0.075 + 0.048 + 0.024)).abs() < 1e-12);
    }

    #[test]
    fn test_equality_constraint_is_met() {
        let lower = [0.0; 3];
        let upper = [1.0; 3];
        let feasible = Feasible::new(&lower, &upper);
        let c = cov();
        let returns = [0.08, 0.12, 0.25];

        let solution = minimize_with_equality(
            |w| quad_form(&c, w),
            &[1.0 / 3.0; 3],
            &feasible,
            &returns,
            0.15,
            &SolverOptions::default(),
            "mean_variance",
        )
        .unwrap();

        assert!((dot(&returns, &solution.weights) - 0.15).abs() < 1e-6);
        assert!((solution.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unreachable_target_is_infeasible() {
        let lower = [0.1, 0.0, 0.0];
        let upper = [0.5, 0.4, 0.3];
        let feasible = Feasible::new(&lower, &upper);

        let err = minimize_with_equality(
            |w| w[0],
            &[0.4, 0.3, 0.3],
            &feasible,
            &[0.08, 0.12, 0.25],
            0.25,
            &SolverOptions::default(),
            "mean_variance",
        )
        .unwrap_err();

        assert!(matches!(err, OptimizerError::Infeasible { .. }));
    }
}
