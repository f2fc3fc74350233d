//! Core data types for strategy metrics and history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::HashMap;

use crate::{utils, StrategyType};

/// Raw per-strategy metrics as supplied by the data layer, read-only per cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyMetrics {
    /// Unique strategy identifier
    pub strategy_id: String,

    /// Display name
    pub name: String,

    /// Explicit strategy category
    pub strategy_type: StrategyType,

    /// Current APY as a fraction (0.08 = 8%)
    pub current_apy: f64,

    /// 7-day average APY
    pub avg_apy_7d: f64,

    /// 30-day average APY
    pub avg_apy_30d: f64,

    /// Total value locked
    pub tvl: f64,

    /// Relative TVL change over 24h
    pub tvl_change_24h: f64,

    /// Risk score on a 0-100 scale
    pub risk_score: u8,

    /// Annualized volatility
    pub volatility: f64,

    /// Sharpe ratio
    pub sharpe_ratio: f64,

    /// Maximum drawdown as a fraction
    pub max_drawdown: f64,

    /// Protocol age in days
    pub protocol_age_days: u32,
}

impl StrategyMetrics {
    /// Build metrics from a strategy's headline figures, deriving the rest
    /// from an optional yield history the way the chain fetcher does.
    #[allow(clippy::too_many_arguments)]
    pub fn from_history(
        strategy_id: impl Into<String>,
        name: impl Into<String>,
        strategy_type: StrategyType,
        current_apy: f64,
        tvl: f64,
        risk_score: u8,
        history: &[YieldObservation],
        risk_free_rate: f64,
    ) -> Self {
        let apys: Vec<f64> = history.iter().map(|h| h.apy).collect();
        let avg_apy_7d = if apys.len() >= 7 {
            apys[apys.len() - 7..].iter().mean()
        } else {
            current_apy
        };
        let avg_apy_30d = if apys.is_empty() { current_apy } else { apys.iter().mean() };
        let volatility = utils::annualized_volatility(&apys);

        Self {
            strategy_id: strategy_id.into(),
            name: name.into(),
            strategy_type,
            current_apy,
            avg_apy_7d,
            avg_apy_30d,
            tvl,
            tvl_change_24h: 0.02,
            risk_score: risk_score.min(100),
            volatility,
            sharpe_ratio: utils::sharpe_ratio(current_apy, volatility, risk_free_rate),
            max_drawdown: utils::max_drawdown_from_tvl(history),
            protocol_age_days: strategy_type.default_protocol_age_days(),
        }
    }
}

/// A single dated yield observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldObservation {
    pub timestamp: DateTime<Utc>,
    pub apy: f64,
    /// TVL at the observation, when the source tracks it
    pub tvl: Option<f64>,
}

/// Time-ordered yield history for one strategy
pub type YieldHistory = Vec<YieldObservation>;

/// Aligned daily return series keyed by strategy id
pub type ReturnHistory = HashMap<String, Vec<f64>>;

/// Optional market-wide features
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// 24h price change in percent
    pub price_change_24h: f64,
    /// 24h traded volume
    pub volume_24h: f64,
    pub timestamp: DateTime<Utc>,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            price_change_24h: 0.0,
            volume_24h: 10_000_000.0,
            timestamp: Utc::now(),
        }
    }
}
