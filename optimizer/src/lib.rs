//! # Yieldflow Optimizer
//!
//! Allocates capital across competing yield strategies. One cycle normalizes
//! raw strategy metrics, forecasts near-term yield, solves for allocation
//! weights under a chosen objective, scores the resulting portfolio's risk
//! and recommends a rebalance against the current allocation.
//!
//! ## Components
//!
//! - **MetricsNormalizer**: bounded features, eligibility filtering, correlation
//! - **YieldForecaster**: per-strategy tree-ensemble forecasts with a heuristic fallback
//! - **AllocationOptimizer**: max Sharpe, min variance, risk parity, mean-variance
//! - **RiskEngine**: four-factor strategy scores and portfolio tail metrics
//! - **OptimizationOrchestrator**: the cycle, run state and last-result cache

pub mod allocation;
pub mod config;
pub mod error;
pub mod forecast;
pub mod linalg;
pub mod normalizer;
pub mod orchestrator;
pub mod risk;
pub mod solver;
pub mod types;

// Re-export commonly used types
pub use allocation::{plan_trades, AllocationOptimizer, RebalanceThresholds};
pub use config::{
    ContinuousConfig, ForecastConfig, OptimizationConfig, OptimizerConfig, RiskConfig, StrategyBounds,
};
pub use error::{OptimizerError, Result};
pub use forecast::YieldForecaster;
pub use normalizer::MetricsNormalizer;
pub use orchestrator::OptimizationOrchestrator;
pub use risk::RiskEngine;
pub use types::*;

/// Current version of the optimizer
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
