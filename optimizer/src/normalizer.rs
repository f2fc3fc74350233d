//! Metrics normalization
//!
//! Turns raw strategy metrics into bounded, comparable features, filters out
//! ineligible strategies and builds the correlation matrix for the cycle.

use nalgebra::DMatrix;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, info, warn};
use yieldflow_dataplane::{ReturnHistory, StrategyMetrics};

use crate::config::{OptimizerConfig, RiskConfig, StrategyBounds};
use crate::forecast::synthetic::sample_normal;
use crate::linalg::{dot, pearson, quad_form};
use crate::types::{
    Allocation, CorrelationMatrix, CorrelationSource, NormalizedStrategy, OptimizationInput,
    PortfolioMetrics,
};

/// Off-diagonal correlation assumed between strategies of the same type
pub const SAME_TYPE_CORRELATION: f64 = 0.7;

/// Off-diagonal correlation assumed between strategies of different types
pub const CROSS_TYPE_CORRELATION: f64 = 0.3;

/// Minimum age score for a strategy to stay eligible
const MIN_AGE_SCORE: f64 = 0.25;

/// Metrics normalizer
#[derive(Debug, Clone)]
pub struct MetricsNormalizer {
    risk: RiskConfig,
    bounds: Vec<StrategyBounds>,
    seed: u64,
}

impl MetricsNormalizer {
    pub fn new(config: &OptimizerConfig) -> Self {
        Self {
            risk: config.risk.clone(),
            bounds: config.strategies.clone(),
            seed: config.optimization.synthetic_seed,
        }
    }

    /// Log-scaled TVL score; 1.0 is reached at ten times the minimum TVL
    pub fn tvl_score(&self, tvl: f64) -> f64 {
        let min_tvl = self.risk.min_tvl;
        if tvl < min_tvl {
            return 0.0;
        }
        ((tvl / min_tvl).ln() / 10f64.ln()).clamp(0.0, 1.0)
    }

    /// Age relative to four times the minimum protocol age, capped at 1
    pub fn age_score(&self, age_days: u32) -> f64 {
        let target = self.risk.min_protocol_age as f64 * 4.0;
        (age_days as f64 / target).min(1.0)
    }

    /// Convert raw metrics into normalized strategies
    pub fn normalize(
        &self,
        metrics: &[StrategyMetrics],
        current_allocations: &Allocation,
    ) -> Vec<NormalizedStrategy> {
        metrics
            .iter()
            .map(|m| {
                let (min_allocation, max_allocation) =
                    StrategyBounds::lookup(&self.bounds, &m.strategy_id);
                NormalizedStrategy {
                    strategy_id: m.strategy_id.clone(),
                    name: m.name.clone(),
                    strategy_type: m.strategy_type,
                    expected_return: m.current_apy,
                    volatility: m.volatility,
                    risk: m.risk_score as f64 / 100.0,
                    tvl_score: self.tvl_score(m.tvl),
                    age_score: self.age_score(m.protocol_age_days),
                    sharpe_ratio: m.sharpe_ratio,
                    current_weight: current_allocations
                        .get(&m.strategy_id)
                        .copied()
                        .unwrap_or(0.0),
                    min_allocation,
                    max_allocation,
                }
            })
            .collect()
    }

    /// Split strategies into eligible ones and the ids of excluded ones
    pub fn filter(
        &self,
        strategies: Vec<NormalizedStrategy>,
    ) -> (Vec<NormalizedStrategy>, Vec<String>) {
        let mut included = Vec::with_capacity(strategies.len());
        let mut excluded = Vec::new();

        for s in strategies {
            if s.volatility > self.risk.max_volatility {
                info!(
                    strategy = %s.strategy_id,
                    volatility = s.volatility,
                    max_volatility = self.risk.max_volatility,
                    "Excluding strategy due to high volatility"
                );
                excluded.push(s.strategy_id);
                continue;
            }

            if s.tvl_score <= 0.0 {
                info!(strategy = %s.strategy_id, "Excluding strategy due to low TVL");
                excluded.push(s.strategy_id);
                continue;
            }

            if s.age_score < MIN_AGE_SCORE {
                info!(
                    strategy = %s.strategy_id,
                    age_score = s.age_score,
                    "Excluding strategy due to protocol age"
                );
                excluded.push(s.strategy_id);
                continue;
            }

            included.push(s);
        }

        (included, excluded)
    }

    /// Build the correlation matrix from aligned return series, or the type heuristic.
    ///
    /// The same-type / cross-type values are placeholders until real return
    /// history is available for every strategy.
    pub fn build_correlation(
        &self,
        strategies: &[NormalizedStrategy],
        history: Option<&ReturnHistory>,
    ) -> CorrelationMatrix {
        let n = strategies.len();

        if let Some(series) = history.and_then(|h| aligned_series(strategies, h)) {
            let values = DMatrix::from_fn(n, n, |i, j| {
                if i == j {
                    1.0
                } else {
                    pearson(series[i], series[j]).unwrap_or(0.0)
                }
            });
            debug!(strategies = n, "Correlation built from return history");
            return CorrelationMatrix::new(values, CorrelationSource::Historical);
        }

        let values = DMatrix::from_fn(n, n, |i, j| {
            if strategies[i].strategy_type == strategies[j].strategy_type {
                SAME_TYPE_CORRELATION
            } else {
                CROSS_TYPE_CORRELATION
            }
        });

        CorrelationMatrix::new(values, CorrelationSource::Heuristic)
    }

    /// Cap every strategy's maximum allocation
    pub fn apply_allocation_cap(strategies: &mut [NormalizedStrategy], cap: f64) {
        for s in strategies.iter_mut() {
            s.max_allocation = s.max_allocation.min(cap);
            s.min_allocation = s.min_allocation.min(s.max_allocation);
        }
    }

    /// Relax bounds proportionally when no allocation can satisfy them
    pub fn relax_bounds(strategies: &mut [NormalizedStrategy]) {
        if strategies.is_empty() {
            return;
        }

        let min_sum: f64 = strategies.iter().map(|s| s.min_allocation).sum();
        if min_sum > 1.0 {
            warn!(min_sum, "Minimum allocations exceed the budget, scaling them down");
            for s in strategies.iter_mut() {
                s.min_allocation /= min_sum;
            }
        }

        let max_sum: f64 = strategies.iter().map(|s| s.max_allocation).sum();
        if max_sum < 1.0 {
            warn!(max_sum, "Maximum allocations cannot cover the budget, scaling them up");
            let n = strategies.len() as f64;
            for s in strategies.iter_mut() {
                s.max_allocation = if max_sum > 0.0 {
                    (s.max_allocation / max_sum).min(1.0)
                } else {
                    1.0 / n
                };
                s.min_allocation = s.min_allocation.min(s.max_allocation);
            }
        }
    }

    /// Normalize, filter and correlate in one step
    pub fn prepare(
        &self,
        metrics: &[StrategyMetrics],
        current_allocations: &Allocation,
        total_amount: f64,
        history: Option<ReturnHistory>,
        max_single_allocation: Option<f64>,
    ) -> OptimizationInput {
        let normalized = self.normalize(metrics, current_allocations);
        let (mut strategies, excluded) = self.filter(normalized);

        if let Some(cap) = max_single_allocation {
            Self::apply_allocation_cap(&mut strategies, cap);
        }
        Self::relax_bounds(&mut strategies);

        let correlation = self.build_correlation(&strategies, history.as_ref());

        OptimizationInput {
            strategies,
            correlation,
            risk_free_rate: self.risk.risk_free_rate,
            total_amount,
            excluded,
            return_history: history,
        }
    }

    /// Return, volatility, Sharpe, weighted risk and diversification of a weight vector
    pub fn portfolio_metrics(&self, input: &OptimizationInput, weights: &[f64]) -> PortfolioMetrics {
        portfolio_metrics(input, weights, self.risk.risk_free_rate)
    }

    /// Seeded synthetic daily returns, used only when no real history exists
    pub fn generate_historical_returns(
        &self,
        strategies: &[NormalizedStrategy],
        days: usize,
    ) -> ReturnHistory {
        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let mut history = ReturnHistory::new();

        for s in strategies {
            let daily_return = s.expected_return / 365.0;
            let daily_vol = s.volatility / 365f64.sqrt();
            let returns = (0..days)
                .map(|_| sample_normal(&mut rng, daily_return, daily_vol))
                .collect();
            history.insert(s.strategy_id.clone(), returns);
        }

        history
    }

    /// Scale allocations to sum to 1, unchanged when they sum to 0
    pub fn normalize_allocations(allocations: &Allocation) -> Allocation {
        let total: f64 = allocations.values().sum();
        if total == 0.0 {
            return allocations.clone();
        }
        allocations
            .iter()
            .map(|(id, w)| (id.clone(), w / total))
            .collect()
    }
}

/// Portfolio metrics of a weight vector aligned with `input.strategies`
pub fn portfolio_metrics(input: &OptimizationInput, weights: &[f64], risk_free_rate: f64) -> PortfolioMetrics {
    let returns = input.returns();
    let volatilities = input.volatilities();
    let cov = input.covariance();

    let expected_return = dot(weights, &returns);
    let volatility = quad_form(&cov, weights).max(0.0).sqrt();
    let sharpe_ratio = if volatility > 0.0 {
        (expected_return - risk_free_rate) / volatility
    } else {
        0.0
    };
    let risks: Vec<f64> = input.strategies.iter().map(|s| s.risk).collect();
    let diversification_ratio = if volatility > 0.0 {
        dot(weights, &volatilities) / volatility
    } else {
        1.0
    };

    PortfolioMetrics {
        expected_return,
        volatility,
        sharpe_ratio,
        weighted_risk_score: dot(weights, &risks),
        diversification_ratio,
    }
}

/// Return series for every strategy, all of one length of at least two
fn aligned_series<'a>(
    strategies: &[NormalizedStrategy],
    history: &'a ReturnHistory,
) -> Option<Vec<&'a [f64]>> {
    let series: Vec<&[f64]> = strategies
        .iter()
        .map(|s| history.get(&s.strategy_id).map(|v| v.as_slice()))
        .collect::<Option<_>>()?;

    let len = series.first()?.len();
    if len < 2 || series.iter().any(|s| s.len() != len) {
        return None;
    }
    Some(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use yieldflow_dataplane::{default_strategies, StrategyType};

    fn normalizer() -> MetricsNormalizer {
        MetricsNormalizer::new(&OptimizerConfig::default())
    }

    #[test]
    fn test_tvl_score() {
        let n = normalizer();
        assert_eq!(n.tvl_score(50_000.0), 0.0);
        assert_eq!(n.tvl_score(100_000.0), 0.0);
        assert!((n.tvl_score(1_000_000.0) - 1.0).abs() < 1e-12);
        assert_eq!(n.tvl_score(5_000_000.0), 1.0);
        assert!((n.tvl_score(316_227.766) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_age_score() {
        let n = normalizer();
        assert_eq!(n.age_score(365), 1.0);
        assert!((n.age_score(90) - 0.75).abs() < 1e-12);
        assert!((n.age_score(20) - 20.0 / 120.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_applies_bounds_and_weights() {
        let n = normalizer();
        let mut current = Allocation::new();
        current.insert("lending".to_string(), 0.4);

        let strategies = n.normalize(&default_strategies(0.02), &current);
        assert_eq!(strategies.len(), 3);
        assert_eq!(strategies[0].min_allocation, 0.1);
        assert_eq!(strategies[0].max_allocation, 0.5);
        assert_eq!(strategies[1].current_weight, 0.4);
        assert!((strategies[2].risk - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_uses_configured_bounds() {
        let mut config = OptimizerConfig::default();
        config.strategies[1].max_allocation = 0.25;
        config.strategies.remove(2);
        let n = MetricsNormalizer::new(&config);

        let strategies = n.normalize(&default_strategies(0.02), &Allocation::new());
        assert_eq!((strategies[1].min_allocation, strategies[1].max_allocation), (0.0, 0.25));
        // lp no longer has configured bounds
        assert_eq!((strategies[2].min_allocation, strategies[2].max_allocation), (0.0, 1.0));
    }

    #[test]
    fn test_filter_excludes_ineligible() {
        let n = normalizer();
        let mut metrics = default_strategies(0.02);
        metrics[0].volatility = 0.5;
        metrics[1].tvl = 10_000.0;
        metrics[2].protocol_age_days = 10;

        let (included, excluded) = n.filter(n.normalize(&metrics, &Allocation::new()));
        assert!(included.is_empty());
        assert_eq!(excluded, vec!["staking", "lending", "lp"]);
    }

    #[test]
    fn test_heuristic_correlation() {
        let n = normalizer();
        let mut metrics = default_strategies(0.02);
        metrics[1].strategy_type = StrategyType::Staking;

        let strategies = n.normalize(&metrics, &Allocation::new());
        let corr = n.build_correlation(&strategies, None);

        assert_eq!(corr.source(), CorrelationSource::Heuristic);
        assert_eq!(corr.get(0, 0), 1.0);
        assert_eq!(corr.get(0, 1), SAME_TYPE_CORRELATION);
        assert_eq!(corr.get(0, 2), CROSS_TYPE_CORRELATION);
        assert_eq!(corr.get(2, 1), corr.get(1, 2));
    }

    #[test]
    fn test_historical_correlation_requires_every_series() {
        let n = normalizer();
        let strategies = n.normalize(&default_strategies(0.02), &Allocation::new());

        let mut partial = ReturnHistory::new();
        partial.insert("staking".to_string(), vec![0.1, 0.2, 0.3]);
        assert_eq!(
            n.build_correlation(&strategies, Some(&partial)).source(),
            CorrelationSource::Heuristic
        );

        let full = n.generate_historical_returns(&strategies, 30);
        let corr = n.build_correlation(&strategies, Some(&full));
        assert_eq!(corr.source(), CorrelationSource::Historical);
        for i in 0..3 {
            assert_eq!(corr.get(i, i), 1.0);
            for j in 0..3 {
                assert_eq!(corr.get(i, j), corr.get(j, i));
            }
        }
    }

    #[test]
    fn test_synthetic_returns_are_deterministic() {
        let n = normalizer();
        let strategies = n.normalize(&default_strategies(0.02), &Allocation::new());
        assert_eq!(
            n.generate_historical_returns(&strategies, 30),
            n.generate_historical_returns(&strategies, 30)
        );
    }

    #[test]
    fn test_relax_bounds_when_caps_too_tight() {
        let n = normalizer();
        let metrics = default_strategies(0.02);
        let input = n.prepare(&metrics[2..], &Allocation::new(), 1000.0, None, None);

        // lp alone is capped at 0.3, relaxed to take the whole budget
        assert_eq!(input.strategies.len(), 1);
        assert!((input.strategies[0].max_allocation - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_allocation_cap() {
        let n = normalizer();
        let input = n.prepare(&default_strategies(0.02), &Allocation::new(), 1000.0, None, Some(0.4));
        assert!(input.strategies.iter().all(|s| s.max_allocation <= 0.4 + 1e-12));
    }

    #[test]
    fn test_portfolio_metrics() {
        let n = normalizer();
        let input = n.prepare(&default_strategies(0.02), &Allocation::new(), 1000.0, None, None);
        let m = n.portfolio_metrics(&input, &[1.0, 0.0, 0.0]);

        assert!((m.expected_return - 0.08).abs() < 1e-12);
        assert!((m.volatility - 0.05).abs() < 1e-12);
        assert!((m.sharpe_ratio - 1.2).abs() < 1e-9);
        assert!((m.diversification_ratio - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_allocations() {
        let mut a = Allocation::new();
        a.insert("x".to_string(), 2.0);
        a.insert("y".to_string(), 2.0);
        let normalized = MetricsNormalizer::normalize_allocations(&a);
        assert_eq!(normalized["x"], 0.5);

        let zero: Allocation = [("x".to_string(), 0.0)].into_iter().collect();
        assert_eq!(MetricsNormalizer::normalize_allocations(&zero), zero);
    }
}
