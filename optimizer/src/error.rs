//! Error types for the optimizer

use thiserror::Error;

/// Result type alias for optimizer operations
pub type Result<T> = std::result::Result<T, OptimizerError>;

/// Comprehensive error types for the optimizer
#[derive(Error, Debug)]
pub enum OptimizerError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Data unavailable: {message}")]
    DataUnavailable { message: String },

    #[error("Insufficient data for {strategy}: {samples} samples, {required} required")]
    InsufficientData {
        strategy: String,
        samples: usize,
        required: usize,
    },

    #[error("Optimization did not converge ({objective}) after {iterations} iterations")]
    NonConvergence { objective: String, iterations: usize },

    #[error("Infeasible problem: {message}")]
    Infeasible { message: String },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("State error: {message}")]
    State { message: String },

    #[error("Dataplane error: {0}")]
    Dataplane(#[from] yieldflow_dataplane::DataplaneError),

    #[error("Config loading error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OptimizerError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a data unavailable error
    pub fn data_unavailable<S: Into<String>>(message: S) -> Self {
        Self::DataUnavailable {
            message: message.into(),
        }
    }

    /// Create an insufficient data error
    pub fn insufficient_data<S: Into<String>>(strategy: S, samples: usize, required: usize) -> Self {
        Self::InsufficientData {
            strategy: strategy.into(),
            samples,
            required,
        }
    }

    /// Create a non-convergence error
    pub fn non_convergence<S: Into<String>>(objective: S, iterations: usize) -> Self {
        Self::NonConvergence {
            objective: objective.into(),
            iterations,
        }
    }

    /// Create an infeasible problem error
    pub fn infeasible<S: Into<String>>(message: S) -> Self {
        Self::Infeasible {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a state error
    pub fn state<S: Into<String>>(message: S) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            OptimizerError::DataUnavailable { .. } | OptimizerError::Io(_) => true,
            OptimizerError::Dataplane(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether a data-layer failure should fall back to cached data instead of failing the cycle
    pub fn is_data_unavailable(&self) -> bool {
        matches!(
            self,
            OptimizerError::DataUnavailable { .. }
                | OptimizerError::Dataplane(yieldflow_dataplane::DataplaneError::DataUnavailable { .. })
                | OptimizerError::Dataplane(yieldflow_dataplane::DataplaneError::ConnectionTimeout { .. })
        )
    }
}
