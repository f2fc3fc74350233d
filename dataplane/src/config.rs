//! Configuration management for the dataplane

use config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::utils::RetryConfig;

/// Main configuration structure for the dataplane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataplaneConfig {
    /// RPC endpoint of the network node
    pub rpc_endpoint: String,

    /// Network name (testnet, mainnet)
    pub network: String,

    /// Chain name used when signing queries
    pub chain_name: String,

    /// Contract identifiers the strategy data is read from
    pub contracts: ContractConfig,

    /// How long fetched metrics stay valid, in seconds
    pub cache_ttl_secs: u64,

    /// Where strategy metrics come from
    pub mode: SourceMode,

    /// Maximum attempts per fetch
    pub max_retries: u32,

    /// First retry delay in milliseconds
    pub retry_initial_delay_ms: u64,

    /// Upper bound on a single source request, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// Contract identifiers
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Vault factory contract hash
    pub vault_factory: String,

    /// Strategy registry contract hash
    pub strategy_registry: String,

    /// Price oracle contract hash
    pub oracle: String,
}

/// Metrics source selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Built-in reference strategies
    Static,
    /// Live chain queries through an external collaborator
    Rpc,
}

impl DataplaneConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_endpoint.trim().is_empty() {
            return Err(ConfigError::Message("rpc_endpoint must be set".into()));
        }

        if Url::parse(&self.rpc_endpoint).is_err() {
            return Err(ConfigError::Message(format!(
                "Invalid RPC endpoint URL: {}",
                self.rpc_endpoint
            )));
        }

        if self.chain_name.trim().is_empty() {
            return Err(ConfigError::Message("chain_name must be set".into()));
        }

        for (name, value) in [
            ("vault_factory", &self.contracts.vault_factory),
            ("strategy_registry", &self.contracts.strategy_registry),
            ("oracle", &self.contracts.oracle),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!(
                    "Contract identifier {} must be set",
                    name
                )));
            }
        }

        if self.max_retries == 0 {
            return Err(ConfigError::Message("max_retries must be greater than 0".into()));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Message("request_timeout_secs must be greater than 0".into()));
        }

        Ok(())
    }

    /// Cache validity window
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Per-request timeout for source fetches
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Retry policy for source fetches
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            ..RetryConfig::default()
        }
    }
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            rpc_endpoint: "https://rpc.testnet.casperlabs.io/rpc".to_string(),
            network: "testnet".to_string(),
            chain_name: "casper-test".to_string(),
            contracts: ContractConfig {
                vault_factory: "hash-0000000000000000000000000000000000000000000000000000000000000001".to_string(),
                strategy_registry: "hash-0000000000000000000000000000000000000000000000000000000000000002".to_string(),
                oracle: "hash-0000000000000000000000000000000000000000000000000000000000000003".to_string(),
            },
            cache_ttl_secs: 300,
            mode: SourceMode::Static,
            max_retries: 3,
            retry_initial_delay_ms: 100,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
