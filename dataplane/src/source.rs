//! The metrics source seam and an in-memory implementation

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::{
    utils, MarketSnapshot, Result, ReturnHistory, StrategyMetrics, StrategyType, YieldHistory,
};

/// Anything that can supply strategy metrics for an optimization cycle
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Source name used in logs and errors
    fn name(&self) -> &str {
        "metrics_source"
    }

    /// Fetch current metrics for every known strategy
    async fn fetch_strategy_metrics(&self) -> Result<Vec<StrategyMetrics>>;

    /// Fetch aligned daily return series for the given strategies, if the source has them
    async fn fetch_return_history(&self, _strategy_ids: &[String]) -> Result<Option<ReturnHistory>> {
        Ok(None)
    }

    /// Fetch the time-ordered yield history of one strategy, if the source has it
    async fn fetch_yield_history(&self, _strategy_id: &str) -> Result<Option<YieldHistory>> {
        Ok(None)
    }

    /// Fetch market-wide features, if the source has them
    async fn fetch_market_snapshot(&self) -> Result<Option<MarketSnapshot>> {
        Ok(None)
    }
}

/// In-memory metrics source for development, tests and offline runs
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    metrics: RwLock<Vec<StrategyMetrics>>,
    returns: RwLock<Option<ReturnHistory>>,
    yields: RwLock<HashMap<String, YieldHistory>>,
    market: RwLock<Option<MarketSnapshot>>,
}

impl StaticMetricsSource {
    /// Create a source serving the given metrics
    pub fn new(metrics: Vec<StrategyMetrics>) -> Self {
        Self {
            metrics: RwLock::new(metrics),
            ..Self::default()
        }
    }

    /// Create a source with the three reference strategies
    pub fn with_default_strategies() -> Self {
        Self::new(default_strategies(0.02))
    }

    /// Replace the served metrics
    pub fn set_metrics(&self, metrics: Vec<StrategyMetrics>) {
        *self.metrics.write() = metrics;
    }

    /// Serve aligned return history alongside the metrics
    pub fn with_return_history(self, returns: ReturnHistory) -> Self {
        *self.returns.write() = Some(returns);
        self
    }

    /// Serve a yield history for one strategy
    pub fn with_yield_history(self, strategy_id: impl Into<String>, history: YieldHistory) -> Self {
        self.yields.write().insert(strategy_id.into(), history);
        self
    }

    /// Serve a market snapshot
    pub fn with_market_snapshot(self, snapshot: MarketSnapshot) -> Self {
        *self.market.write() = Some(snapshot);
        self
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn fetch_strategy_metrics(&self) -> Result<Vec<StrategyMetrics>> {
        let metrics = self.metrics.read().clone();
        debug!(source = self.name(), strategies = metrics.len(), "Serving static strategy metrics");
        Ok(metrics)
    }

    async fn fetch_return_history(&self, strategy_ids: &[String]) -> Result<Option<ReturnHistory>> {
        let returns = self.returns.read();
        let Some(all) = returns.as_ref() else {
            return Ok(None);
        };

        let mut subset = ReturnHistory::new();
        for id in strategy_ids {
            match all.get(id) {
                Some(series) => {
                    subset.insert(id.clone(), series.clone());
                }
                None => return Ok(None),
            }
        }
        Ok(Some(subset))
    }

    async fn fetch_yield_history(&self, strategy_id: &str) -> Result<Option<YieldHistory>> {
        Ok(self.yields.read().get(strategy_id).cloned())
    }

    async fn fetch_market_snapshot(&self) -> Result<Option<MarketSnapshot>> {
        Ok(*self.market.read())
    }
}

/// Reference strategies: native staking, a lending market and an LP position
pub fn default_strategies(risk_free_rate: f64) -> Vec<StrategyMetrics> {
    let reference = [
        ("staking", "Native Staking", StrategyType::Staking, 0.08, 5_000_000.0, 20u8, 0.05),
        ("lending", "Lending Protocol", StrategyType::Lending, 0.12, 2_000_000.0, 40u8, 0.10),
        ("lp", "Liquidity Provision", StrategyType::Liquidity, 0.25, 1_000_000.0, 60u8, 0.20),
    ];

    reference
        .into_iter()
        .map(|(id, name, strategy_type, apy, tvl, risk_score, volatility)| StrategyMetrics {
            strategy_id: id.to_string(),
            name: name.to_string(),
            strategy_type,
            current_apy: apy,
            avg_apy_7d: apy,
            avg_apy_30d: apy,
            tvl,
            tvl_change_24h: 0.02,
            risk_score,
            volatility,
            sharpe_ratio: utils::sharpe_ratio(apy, volatility, risk_free_rate),
            max_drawdown: utils::DEFAULT_MAX_DRAWDOWN,
            protocol_age_days: strategy_type.default_protocol_age_days(),
        })
        .collect()
}
