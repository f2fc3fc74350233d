//! Constrained portfolio allocation
//!
//! Every objective is solved over `{w : Σw = 1, min ≤ w ≤ max}` from a
//! bounds-respecting warm start. A solve that does not converge falls back to
//! that warm start instead of failing the cycle.

use chrono::Utc;
use nalgebra::DMatrix;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::config::OptimizationConfig;
use crate::error::{OptimizerError, Result};
use crate::linalg::{
    bounded_equal_weights, dot, marginal_risk, mean, project_capped_simplex, quad_form,
};
use crate::normalizer::{portfolio_metrics, MetricsNormalizer};
use crate::solver::{minimize, minimize_with_equality, Feasible, SolverOptions};
use crate::types::{
    Allocation, AllocationResult, FrontierPoint, Improvement, OptimizationInput,
    OptimizationMethod, PortfolioMetrics, RebalanceRecommendation, Trade, TradeAction,
};

/// Risk-free rate used when mean-variance falls back to max Sharpe
pub const FALLBACK_RISK_FREE_RATE: f64 = 0.02;

/// Thresholds deciding whether a rebalance is worth its costs
#[derive(Debug, Clone, Copy)]
pub struct RebalanceThresholds {
    /// Minimum |target - current| weight for a trade
    pub min_trade: f64,
    pub min_sharpe_improvement: f64,
    pub min_return_improvement: f64,
}

impl Default for RebalanceThresholds {
    fn default() -> Self {
        Self {
            min_trade: 0.05,
            min_sharpe_improvement: 0.05,
            min_return_improvement: 0.01,
        }
    }
}

/// Allocation optimizer
#[derive(Debug, Clone)]
pub struct AllocationOptimizer {
    options: SolverOptions,
    thresholds: RebalanceThresholds,
}

impl AllocationOptimizer {
    pub fn new(config: &OptimizationConfig) -> Self {
        Self {
            options: SolverOptions {
                max_iterations: config.max_iterations,
                tolerance: config.tolerance,
                ..SolverOptions::default()
            },
            thresholds: RebalanceThresholds {
                min_trade: config.min_rebalance_threshold,
                min_sharpe_improvement: config.min_sharpe_improvement,
                min_return_improvement: config.min_return_improvement,
            },
        }
    }

    pub fn with_options(options: SolverOptions, thresholds: RebalanceThresholds) -> Self {
        Self { options, thresholds }
    }

    pub fn thresholds(&self) -> RebalanceThresholds {
        self.thresholds
    }

    /// Solve for weights under `method`
    pub fn optimize(&self, input: &OptimizationInput, method: OptimizationMethod) -> Result<AllocationResult> {
        let n = input.strategies.len();
        if n == 0 {
            return Err(OptimizerError::InvalidInput("No eligible strategies".to_string()));
        }

        let (lower, upper) = bounds(input);
        let feasible = Feasible::new(&lower, &upper);
        let cov = input.covariance();
        let returns = input.returns();
        let rf = input.risk_free_rate;

        let (weights, converged, method) = match method {
            OptimizationMethod::MaxSharpe => {
                let (w, ok) = self.solve_max_sharpe(&feasible, &cov, &returns, rf)?;
                (w, ok, method)
            }
            OptimizationMethod::MinVariance => {
                let x0 = bounded_equal_weights(&lower, &upper);
                let (w, ok) = self.solve_or_fallback(
                    |w: &[f64]| quad_form(&cov, w),
                    x0,
                    &feasible,
                    method,
                )?;
                (w, ok, method)
            }
            OptimizationMethod::RiskParity => {
                let x0 = inverse_volatility_weights(input, &lower, &upper);
                let (w, ok) = self.solve_or_fallback(
                    |w: &[f64]| risk_parity_objective(&cov, w),
                    x0,
                    &feasible,
                    method,
                )?;
                (w, ok, method)
            }
            OptimizationMethod::MeanVariance => {
                let target = mean(&returns);
                match self.solve_mean_variance(&feasible, &cov, &returns, target) {
                    Ok(w) => (w, true, method),
                    Err(e) => {
                        warn!(
                            target_return = target,
                            error = %e,
                            "Mean-variance solve failed, falling back to max Sharpe"
                        );
                        let (w, ok) = self.solve_max_sharpe(&feasible, &cov, &returns, FALLBACK_RISK_FREE_RATE)?;
                        (w, ok, OptimizationMethod::MaxSharpe)
                    }
                }
            }
        };

        let metrics = portfolio_metrics(input, &weights, rf);

        let mut allocations: Allocation = input
            .strategies
            .iter()
            .zip(weights.iter())
            .map(|(s, w)| (s.strategy_id.clone(), *w))
            .collect();
        for id in &input.excluded {
            allocations.entry(id.clone()).or_insert(0.0);
        }

        info!(
            method = %method,
            expected_return = metrics.expected_return,
            volatility = metrics.volatility,
            sharpe = metrics.sharpe_ratio,
            converged,
            "Allocation optimized"
        );

        Ok(AllocationResult {
            allocations,
            expected_return: metrics.expected_return,
            expected_volatility: metrics.volatility,
            sharpe_ratio: metrics.sharpe_ratio,
            method,
            converged,
            timestamp: Utc::now(),
        })
    }

    fn solve_max_sharpe(
        &self,
        feasible: &Feasible<'_>,
        cov: &DMatrix<f64>,
        returns: &[f64],
        rf: f64,
    ) -> Result<(Vec<f64>, bool)> {
        let x0 = bounded_equal_weights(feasible.lower, feasible.upper);
        self.solve_or_fallback(
            |w: &[f64]| {
                let vol = quad_form(cov, w).max(0.0).sqrt();
                if vol == 0.0 {
                    0.0
                } else {
                    -(dot(w, returns) - rf) / vol
                }
            },
            x0,
            feasible,
            OptimizationMethod::MaxSharpe,
        )
    }

    /// Minimize, returning the warm start on non-convergence
    fn solve_or_fallback<F: Fn(&[f64]) -> f64>(
        &self,
        objective: F,
        x0: Vec<f64>,
        feasible: &Feasible<'_>,
        method: OptimizationMethod,
    ) -> Result<(Vec<f64>, bool)> {
        match minimize(objective, &x0, feasible, &self.options, method.name()) {
            Ok(solution) => {
                debug!(method = %method, iterations = solution.iterations, "Solve finished");
                Ok((solution.weights, true))
            }
            Err(OptimizerError::NonConvergence { objective, iterations }) => {
                warn!(
                    objective = %objective,
                    iterations,
                    "Solver did not converge, using bounded starting allocation"
                );
                Ok((x0, false))
            }
            Err(e) => Err(e),
        }
    }

    /// Minimum variance at `w·returns = target`
    pub fn solve_mean_variance(
        &self,
        feasible: &Feasible<'_>,
        cov: &DMatrix<f64>,
        returns: &[f64],
        target: f64,
    ) -> Result<Vec<f64>> {
        let x0 = bounded_equal_weights(feasible.lower, feasible.upper);
        let solution = minimize_with_equality(
            |w: &[f64]| quad_form(cov, w),
            &x0,
            feasible,
            returns,
            target,
            &self.options,
            OptimizationMethod::MeanVariance.name(),
        )?;
        Ok(solution.weights)
    }

    /// Mean-variance solves at `num_points` evenly spaced target returns.
    ///
    /// Targets outside the reachable range or that fail to converge are
    /// skipped, so the frontier may be shorter than requested.
    pub fn generate_efficient_frontier(&self, input: &OptimizationInput, num_points: usize) -> Vec<FrontierPoint> {
        let n = input.strategies.len();
        if n == 0 || num_points == 0 {
            return Vec::new();
        }

        let (lower, upper) = bounds(input);
        let feasible = Feasible::new(&lower, &upper);
        let cov = input.covariance();
        let returns = input.returns();
        let rf = input.risk_free_rate;

        let min_return = returns.iter().copied().fold(f64::INFINITY, f64::min);
        let max_return = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut points = Vec::with_capacity(num_points);
        for k in 0..num_points {
            let target = if num_points == 1 {
                min_return
            } else {
                min_return + (max_return - min_return) * k as f64 / (num_points - 1) as f64
            };

            let weights = match self.solve_mean_variance(&feasible, &cov, &returns, target) {
                Ok(w) => w,
                Err(e) => {
                    debug!(target_return = target, error = %e, "Frontier point skipped");
                    continue;
                }
            };

            let metrics = portfolio_metrics(input, &weights, rf);
            points.push(FrontierPoint {
                target_return: target,
                expected_return: metrics.expected_return,
                volatility: metrics.volatility,
                sharpe_ratio: metrics.sharpe_ratio,
                weights: input
                    .strategies
                    .iter()
                    .zip(weights.iter())
                    .map(|(s, w)| (s.strategy_id.clone(), *w))
                    .collect(),
            });
        }

        info!(requested = num_points, generated = points.len(), "Efficient frontier generated");
        points
    }

    /// Compare the optimal allocation against `current` and decide whether to move
    pub fn recommend_rebalance(
        &self,
        current: &Allocation,
        input: &OptimizationInput,
        method: OptimizationMethod,
    ) -> Result<RebalanceRecommendation> {
        if input.strategies.is_empty() {
            return Ok(RebalanceRecommendation {
                current_allocations: current.clone(),
                target_allocations: Allocation::new(),
                trades: Vec::new(),
                expected_improvement: Improvement::default(),
                should_rebalance: false,
                reason: "No eligible strategies".to_string(),
            });
        }

        let target = self.optimize(input, method)?;

        let current_total: f64 = current.values().sum();
        let current_normalized = if current_total > 0.0 {
            MetricsNormalizer::normalize_allocations(current)
        } else {
            current.clone()
        };

        let current_metrics = if current_total > 0.0 {
            portfolio_metrics(input, &input.weights_for(&current_normalized), input.risk_free_rate)
        } else {
            PortfolioMetrics {
                expected_return: 0.0,
                volatility: 0.0,
                sharpe_ratio: 0.0,
                weighted_risk_score: 0.0,
                diversification_ratio: 0.0,
            }
        };

        let improvement = Improvement {
            return_improvement: target.expected_return - current_metrics.expected_return,
            volatility_change: target.expected_volatility - current_metrics.volatility,
            sharpe_improvement: target.sharpe_ratio - current_metrics.sharpe_ratio,
        };

        let trades = plan_trades(
            &current_normalized,
            &target.allocations,
            input.total_amount,
            self.thresholds.min_trade,
        );

        let should_rebalance = !trades.is_empty()
            && (improvement.sharpe_improvement > self.thresholds.min_sharpe_improvement
                || improvement.return_improvement > self.thresholds.min_return_improvement);

        let reason = rebalance_reason(&trades, &improvement, should_rebalance);

        info!(
            trades = trades.len(),
            should_rebalance,
            sharpe_improvement = improvement.sharpe_improvement,
            return_improvement = improvement.return_improvement,
            "Rebalance evaluated"
        );

        Ok(RebalanceRecommendation {
            current_allocations: current_normalized,
            target_allocations: target.allocations,
            trades,
            expected_improvement: improvement,
            should_rebalance,
            reason,
        })
    }
}

/// Trades for every strategy whose weight moves by more than `threshold`.
///
/// Decreases come first so capital is freed before it is deployed, then
/// larger moves before smaller ones.
pub fn plan_trades(current: &Allocation, target: &Allocation, total_value: f64, threshold: f64) -> Vec<Trade> {
    let ids: BTreeSet<&String> = current.keys().chain(target.keys()).collect();

    let mut trades: Vec<Trade> = ids
        .into_iter()
        .filter_map(|id| {
            let current_weight = current.get(id).copied().unwrap_or(0.0);
            let target_weight = target.get(id).copied().unwrap_or(0.0);
            let change = target_weight - current_weight;
            if change.abs() <= threshold {
                return None;
            }
            Some(Trade {
                strategy_id: id.clone(),
                action: if change > 0.0 { TradeAction::Increase } else { TradeAction::Decrease },
                current_weight,
                target_weight,
                weight_change: change,
                amount: change.abs() * total_value,
            })
        })
        .collect();

    trades.sort_by(|a, b| {
        let rank = |t: &Trade| match t.action {
            TradeAction::Decrease => 0,
            TradeAction::Increase => 1,
        };
        rank(a)
            .cmp(&rank(b))
            .then_with(|| b.weight_change.abs().partial_cmp(&a.weight_change.abs()).unwrap_or(Ordering::Equal))
    });

    trades
}

fn rebalance_reason(trades: &[Trade], improvement: &Improvement, should_rebalance: bool) -> String {
    if trades.is_empty() {
        return "Portfolio is already optimally allocated".to_string();
    }
    if !should_rebalance {
        return "Potential improvement is too small to justify rebalancing costs".to_string();
    }

    let mut reasons = Vec::new();
    if improvement.sharpe_improvement > 0.1 {
        reasons.push(format!(
            "Significant Sharpe ratio improvement (+{:.2})",
            improvement.sharpe_improvement
        ));
    }
    if improvement.return_improvement > 0.02 {
        reasons.push(format!(
            "Expected return increase (+{:.1}%)",
            improvement.return_improvement * 100.0
        ));
    }
    if improvement.volatility_change < -0.02 {
        reasons.push(format!(
            "Risk reduction ({:.1}% volatility)",
            improvement.volatility_change * 100.0
        ));
    }

    if reasons.is_empty() {
        "Minor portfolio optimization opportunity".to_string()
    } else {
        reasons.join("; ")
    }
}

fn bounds(input: &OptimizationInput) -> (Vec<f64>, Vec<f64>) {
    input
        .strategies
        .iter()
        .map(|s| (s.min_allocation, s.max_allocation))
        .unzip()
}

/// Inverse-volatility weights projected onto the bounds
fn inverse_volatility_weights(input: &OptimizationInput, lower: &[f64], upper: &[f64]) -> Vec<f64> {
    let inverse: Vec<f64> = input
        .strategies
        .iter()
        .map(|s| if s.volatility > 0.0 { 1.0 / s.volatility } else { 0.0 })
        .collect();
    let total: f64 = inverse.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return bounded_equal_weights(lower, upper);
    }
    let raw: Vec<f64> = inverse.iter().map(|v| v / total).collect();
    project_capped_simplex(&raw, lower, upper, 1.0)
}

/// Squared deviation of each position's risk contribution from an equal share
fn risk_parity_objective(cov: &DMatrix<f64>, w: &[f64]) -> f64 {
    let marginal = marginal_risk(cov, w);
    let vol = dot(w, marginal.as_slice()).max(0.0).sqrt();
    if vol == 0.0 {
        return 0.0;
    }
    let target = vol / w.len() as f64;
    w.iter()
        .zip(marginal.iter())
        .map(|(wi, mi)| {
            let contribution = wi * mi / vol;
            (contribution - target).powi(2)
        })
        .sum()
}
