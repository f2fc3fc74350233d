//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::Arc;

use yieldflow_dataplane::{
    default_strategies, MetricsSource, StaticMetricsSource, StrategyMetrics, StrategyType,
};
use yieldflow_optimizer::*;

pub const RISK_FREE_RATE: f64 = 0.02;

/// The three reference strategies: staking, lending and liquidity
pub fn reference_metrics() -> Vec<StrategyMetrics> {
    default_strategies(RISK_FREE_RATE)
}

/// A strategy with the given figures and an old, deep protocol
pub fn strategy(id: &str, strategy_type: StrategyType, apy: f64, volatility: f64, risk_score: u8) -> StrategyMetrics {
    let mut m = reference_metrics().remove(0);
    m.strategy_id = id.to_string();
    m.name = id.to_string();
    m.strategy_type = strategy_type;
    m.current_apy = apy;
    m.avg_apy_7d = apy;
    m.avg_apy_30d = apy;
    m.volatility = volatility;
    m.risk_score = risk_score;
    m.tvl = 5_000_000.0;
    m.protocol_age_days = 365;
    m.sharpe_ratio = if volatility > 0.0 { (apy - RISK_FREE_RATE) / volatility } else { 0.0 };
    m
}

/// Prepared input for the reference strategies under the default bounds
pub fn reference_input() -> OptimizationInput {
    let config = OptimizerConfig::default();
    MetricsNormalizer::new(&config).prepare(&reference_metrics(), &Allocation::new(), 10_000.0, None, None)
}

/// Config whose continuous loop retries immediately
pub fn fast_retry_config() -> OptimizerConfig {
    let mut config = OptimizerConfig::default();
    config.continuous.initial_backoff_secs = 0;
    config.continuous.max_backoff_secs = 0;
    config.continuous.jitter_factor = 0.0;
    config.continuous.circuit_cooldown_secs = 0;
    config.continuous.max_consecutive_failures = 2;
    config
}

pub fn static_orchestrator() -> OptimizationOrchestrator {
    orchestrator_with(Arc::new(StaticMetricsSource::with_default_strategies()))
}

pub fn orchestrator_with(source: Arc<dyn MetricsSource>) -> OptimizationOrchestrator {
    let orchestrator = OptimizationOrchestrator::new(OptimizerConfig::default(), source);
    orchestrator.initialize().expect("default config is valid");
    orchestrator
}

pub fn allocation(pairs: &[(&str, f64)]) -> Allocation {
    pairs.iter().map(|(id, w)| (id.to_string(), *w)).collect()
}
