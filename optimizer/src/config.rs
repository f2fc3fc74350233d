//! Configuration management for the optimizer
//!
//! Loads from a YAML file, from layered config sources plus environment,
//! or falls back to defaults. Validation happens before the orchestrator
//! wires any component.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use yieldflow_dataplane::DataplaneConfig;

use crate::error::{OptimizerError, Result};
use crate::types::OptimizationMethod;

/// Optimizer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    /// Data layer settings
    pub dataplane: DataplaneConfig,

    /// Per-strategy allocation bounds
    pub strategies: Vec<StrategyBounds>,

    /// Risk thresholds
    pub risk: RiskConfig,

    /// Optimization and rebalancing settings
    pub optimization: OptimizationConfig,

    /// Forecasting model settings
    pub forecast: ForecastConfig,

    /// Continuous loop retry and circuit breaker settings
    pub continuous: ContinuousConfig,
}

/// Allocation bounds for one strategy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategyBounds {
    pub id: String,
    pub name: String,
    pub min_allocation: f64,
    pub max_allocation: f64,
}

impl StrategyBounds {
    /// Bounds configured for `strategy_id`, `[0, 1]` when it has none
    pub fn lookup(bounds: &[StrategyBounds], strategy_id: &str) -> (f64, f64) {
        bounds
            .iter()
            .find(|b| b.id == strategy_id)
            .map(|b| (b.min_allocation, b.max_allocation))
            .unwrap_or((0.0, 1.0))
    }
}

/// Risk thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Strategies above this annualized volatility are excluded
    pub max_volatility: f64,

    /// Minimum acceptable Sharpe ratio
    pub min_sharpe_ratio: f64,

    /// Risk-free rate used for Sharpe calculations
    pub risk_free_rate: f64,

    /// Drawdown above which a warning is raised
    pub max_drawdown: f64,

    /// Minimum TVL for a strategy to be eligible
    pub min_tvl: f64,

    /// Minimum protocol age in days
    pub min_protocol_age: u32,
}

/// Optimization and rebalancing settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizationConfig {
    /// Hours between cycles in continuous mode
    pub rebalance_interval_hours: u64,

    /// Minimum weight change that produces a trade
    pub min_rebalance_threshold: f64,

    /// Sharpe gain required to recommend rebalancing
    pub min_sharpe_improvement: f64,

    /// Return gain required to recommend rebalancing
    pub min_return_improvement: f64,

    /// Maximum acceptable slippage
    pub max_slippage: f64,

    /// Days of history a forecaster needs before training
    pub lookback_days: usize,

    /// Days of synthetic history generated when none is available
    pub history_days: usize,

    /// Most recent observations used for prediction
    pub forecast_window: usize,

    /// Default objective
    pub method: OptimizationMethod,

    /// Solver iteration limit
    pub max_iterations: usize,

    /// Solver convergence tolerance
    pub tolerance: f64,

    /// Seed for synthetic series
    pub synthetic_seed: u64,
}

/// Forecasting model settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForecastConfig {
    /// Rows with both targets required to fit models
    pub min_training_rows: usize,

    /// Boosting stages for the 7-day model
    pub boosting_estimators: usize,

    /// Tree depth for the 7-day model
    pub boosting_max_depth: usize,

    /// Shrinkage for the 7-day model
    pub learning_rate: f64,

    /// Trees in the 30-day forest
    pub forest_estimators: usize,

    /// Tree depth for the 30-day forest
    pub forest_max_depth: usize,

    /// Seed for bootstrap sampling
    pub random_seed: u64,
}

/// Continuous loop retry and circuit breaker settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContinuousConfig {
    /// First retry delay after a failed cycle, in seconds
    pub initial_backoff_secs: u64,

    /// Growth factor between retries
    pub backoff_multiplier: f64,

    /// Retry delay ceiling, in seconds
    pub max_backoff_secs: u64,

    /// Random jitter as a fraction of the delay
    pub jitter_factor: f64,

    /// Consecutive failures before the circuit opens
    pub max_consecutive_failures: u32,

    /// How long the circuit stays open, in seconds
    pub circuit_cooldown_secs: u64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            dataplane: DataplaneConfig::default(),
            strategies: Self::default_strategies(),
            risk: RiskConfig {
                max_volatility: 0.30,
                min_sharpe_ratio: 0.5,
                risk_free_rate: 0.02,
                max_drawdown: 0.15,
                min_tvl: 100_000.0,
                min_protocol_age: 30,
            },
            optimization: OptimizationConfig {
                rebalance_interval_hours: 24,
                min_rebalance_threshold: 0.05,
                min_sharpe_improvement: 0.05,
                min_return_improvement: 0.01,
                max_slippage: 0.02,
                lookback_days: 30,
                history_days: 60,
                forecast_window: 30,
                method: OptimizationMethod::MaxSharpe,
                max_iterations: 1000,
                tolerance: 1e-10,
                synthetic_seed: 42,
            },
            forecast: ForecastConfig {
                min_training_rows: 10,
                boosting_estimators: 100,
                boosting_max_depth: 4,
                learning_rate: 0.1,
                forest_estimators: 100,
                forest_max_depth: 5,
                random_seed: 42,
            },
            continuous: ContinuousConfig {
                initial_backoff_secs: 60,
                backoff_multiplier: 2.0,
                max_backoff_secs: 3600,
                jitter_factor: 0.1,
                max_consecutive_failures: 5,
                circuit_cooldown_secs: 3600,
            },
        }
    }
}

impl OptimizerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from layered files and `YIELDFLOW__` environment variables
    pub fn load() -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;

        let config = Config::builder()
            .add_source(config::File::from_str(
                &defaults.to_string(),
                config::FileFormat::Json,
            ))
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                File::with_name(&format!(
                    "config/{}",
                    std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into())
                ))
                .required(false),
            )
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("YIELDFLOW").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load from `YIELDFLOW_CONFIG_PATH` when set, otherwise from layered sources
    pub fn from_env_and_file() -> Result<Self> {
        if let Ok(config_path) = std::env::var("YIELDFLOW_CONFIG_PATH") {
            tracing::info!("Loading optimizer config from: {}", config_path);
            return Self::from_file(config_path);
        }

        Self::load()
    }

    /// Reference strategy bounds
    fn default_strategies() -> Vec<StrategyBounds> {
        vec![
            StrategyBounds {
                id: "staking".to_string(),
                name: "Native Staking".to_string(),
                min_allocation: 0.1,
                max_allocation: 0.5,
            },
            StrategyBounds {
                id: "lending".to_string(),
                name: "Lending Protocol".to_string(),
                min_allocation: 0.0,
                max_allocation: 0.4,
            },
            StrategyBounds {
                id: "lp".to_string(),
                name: "Liquidity Provision".to_string(),
                min_allocation: 0.0,
                max_allocation: 0.3,
            },
        ]
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.dataplane
            .validate()
            .map_err(|e| OptimizerError::configuration(e.to_string()))?;

        for s in &self.strategies {
            if !(0.0..=1.0).contains(&s.min_allocation) || !(0.0..=1.0).contains(&s.max_allocation) {
                return Err(OptimizerError::configuration(format!(
                    "Allocation bounds for {} must lie in [0, 1]",
                    s.id
                )));
            }
            if s.min_allocation > s.max_allocation {
                return Err(OptimizerError::configuration(format!(
                    "Inverted allocation bounds for {}: min {} > max {}",
                    s.id, s.min_allocation, s.max_allocation
                )));
            }
        }

        if self.risk.min_tvl <= 0.0 {
            return Err(OptimizerError::configuration("risk.min_tvl must be positive"));
        }

        if self.risk.min_protocol_age == 0 {
            return Err(OptimizerError::configuration("risk.min_protocol_age must be positive"));
        }

        if self.optimization.max_iterations == 0 {
            return Err(OptimizerError::configuration(
                "optimization.max_iterations must be greater than 0",
            ));
        }

        if self.optimization.tolerance <= 0.0 {
            return Err(OptimizerError::configuration("optimization.tolerance must be positive"));
        }

        if self.forecast.boosting_estimators == 0 || self.forecast.forest_estimators == 0 {
            return Err(OptimizerError::configuration("forecast estimator counts must be positive"));
        }

        if self.continuous.max_consecutive_failures == 0 {
            return Err(OptimizerError::configuration(
                "continuous.max_consecutive_failures must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Save configuration to YAML file (for generating examples)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }
}

impl ContinuousConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OptimizerConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.strategies.len(), 3);
        assert_eq!(StrategyBounds::lookup(&config.strategies, "staking"), (0.1, 0.5));
        assert_eq!(StrategyBounds::lookup(&config.strategies, "unknown"), (0.0, 1.0));
        assert_eq!(config.optimization.method, OptimizationMethod::MaxSharpe);
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let mut config = OptimizerConfig::default();
        config.strategies[1].min_allocation = 0.6;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, OptimizerError::Configuration { .. }));
    }

    #[test]
    fn test_missing_endpoint_rejected() {
        let mut config = OptimizerConfig::default();
        config.dataplane.rpc_endpoint.clear();
        assert!(matches!(
            config.validate(),
            Err(OptimizerError::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut config = OptimizerConfig::default();
        config.optimization.max_iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_config() {
        let config = OptimizerConfig::default();
        let temp_path = std::env::temp_dir().join("test_yieldflow_config.yaml");

        config.save_to_file(&temp_path).unwrap();
        let loaded = OptimizerConfig::from_file(&temp_path).unwrap();

        assert_eq!(loaded.strategies.len(), config.strategies.len());
        assert_eq!(loaded.risk.min_tvl, config.risk.min_tvl);
        assert_eq!(loaded.optimization.method, config.optimization.method);

        std::fs::remove_file(temp_path).ok();
    }
}
