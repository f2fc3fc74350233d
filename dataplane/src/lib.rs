//! # Yieldflow Dataplane
//!
//! The data layer feeding the yield optimizer: raw per-strategy metrics,
//! yield/TVL history and optional return series, behind a single
//! [`MetricsSource`] seam so the optimizer never talks to the chain directly.

pub mod config;
pub mod error;
pub mod types;
pub mod source;
pub mod cache;
pub mod utils;

// Re-export commonly used types
pub use cache::CachedMetricsSource;
pub use config::{ContractConfig, DataplaneConfig, SourceMode};
pub use error::{DataplaneError, Result};
pub use source::{default_strategies, MetricsSource, StaticMetricsSource};
pub use utils::{retry_with_backoff, RetryConfig};
pub use types::*;

/// Current version of the dataplane
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Category of a yield strategy, carried explicitly through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Staking,
    Lending,
    Liquidity,
    Other,
}

impl StrategyType {
    /// Get the human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            StrategyType::Staking => "staking",
            StrategyType::Lending => "lending",
            StrategyType::Liquidity => "liquidity",
            StrategyType::Other => "other",
        }
    }

    /// Typical protocol age used when the data layer cannot observe one
    pub fn default_protocol_age_days(&self) -> u32 {
        match self {
            StrategyType::Staking => 365,
            StrategyType::Lending => 180,
            StrategyType::Liquidity => 90,
            StrategyType::Other => 60,
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for StrategyType {
    type Err = DataplaneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "staking" => Ok(StrategyType::Staking),
            "lending" => Ok(StrategyType::Lending),
            "liquidity" | "lp" => Ok(StrategyType::Liquidity),
            "other" => Ok(StrategyType::Other),
            _ => Err(DataplaneError::InvalidStrategyType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_type_parsing() {
        assert_eq!("staking".parse::<StrategyType>().unwrap(), StrategyType::Staking);
        assert_eq!("LP".parse::<StrategyType>().unwrap(), StrategyType::Liquidity);
        assert!("yolo".parse::<StrategyType>().is_err());
    }

    #[test]
    fn test_strategy_type_serde_names() {
        let json = serde_json::to_string(&StrategyType::Lending).unwrap();
        assert_eq!(json, "\"lending\"");
    }
}
