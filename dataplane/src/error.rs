//! Error types for the dataplane module

use thiserror::Error;

/// Result type alias for dataplane operations
pub type Result<T> = std::result::Result<T, DataplaneError>;

/// Comprehensive error types for dataplane operations
#[derive(Error, Debug)]
pub enum DataplaneError {
    #[error("Invalid strategy type: {0}")]
    InvalidStrategyType(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Data unavailable from {source_name}: {message}")]
    DataUnavailable { source_name: String, message: String },

    #[error("Invalid metrics for strategy {strategy_id}: {message}")]
    InvalidMetrics { strategy_id: String, message: String },

    #[error("Connection timeout for source: {source_name}")]
    ConnectionTimeout { source_name: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataplaneError {
    /// Create a data unavailable error
    pub fn unavailable<S: Into<String>, M: Into<String>>(source_name: S, message: M) -> Self {
        Self::DataUnavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid metrics error
    pub fn invalid_metrics<S: Into<String>, M: Into<String>>(strategy_id: S, message: M) -> Self {
        Self::InvalidMetrics {
            strategy_id: strategy_id.into(),
            message: message.into(),
        }
    }

    /// Create a connection timeout error
    pub fn timeout<S: Into<String>>(source_name: S) -> Self {
        Self::ConnectionTimeout {
            source_name: source_name.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataplaneError::DataUnavailable { .. }
                | DataplaneError::ConnectionTimeout { .. }
                | DataplaneError::Io(_)
        )
    }
}
