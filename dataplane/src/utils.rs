//! Utility functions and helpers for the dataplane

use statrs::statistics::Statistics;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{Result, YieldObservation};

/// Volatility reported when there is too little history to measure one
pub const DEFAULT_VOLATILITY: f64 = 0.1;

/// Drawdown reported when TVL history is missing
pub const DEFAULT_MAX_DRAWDOWN: f64 = 0.05;

/// Retry configuration for operations
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Retry a future with exponential backoff.
///
/// Errors that are not retryable are returned immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    operation: F,
    config: RetryConfig,
    operation_name: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        debug!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = config.max_attempts,
            "Attempting operation"
        );

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(error) if attempt < config.max_attempts && error.is_retryable() => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                delay = std::cmp::min(delay.mul_f64(config.backoff_multiplier), config.max_delay);
                attempt += 1;
            }
            Err(error) => {
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    error = %error,
                    "Operation failed after all retry attempts"
                );
                return Err(error);
            }
        }
    }
}

/// Annualized volatility of a daily APY series.
///
/// Population standard deviation scaled by sqrt(365) and capped at 1.0.
pub fn annualized_volatility(apys: &[f64]) -> f64 {
    if apys.len() < 2 {
        return DEFAULT_VOLATILITY;
    }

    // Flat series: no spread, and no rounding residue either
    if apys.iter().all(|a| *a == apys[0]) {
        return 0.0;
    }

    (apys.iter().population_std_dev() * 365f64.sqrt()).min(1.0)
}

/// Sharpe ratio, 0 when volatility is 0
pub fn sharpe_ratio(apy: f64, volatility: f64, risk_free_rate: f64) -> f64 {
    if volatility == 0.0 {
        return 0.0;
    }
    (apy - risk_free_rate) / volatility
}

/// Peak-to-trough TVL decline over a history
pub fn max_drawdown_from_tvl(history: &[YieldObservation]) -> f64 {
    if history.len() < 2 {
        return DEFAULT_MAX_DRAWDOWN;
    }

    let tvls: Vec<f64> = history.iter().map(|h| h.tvl.unwrap_or(0.0)).collect();
    if tvls.iter().all(|t| *t == 0.0) {
        return DEFAULT_MAX_DRAWDOWN;
    }

    let mut peak = tvls[0];
    let mut max_drawdown: f64 = 0.0;
    for tvl in tvls {
        if tvl > peak {
            peak = tvl;
        }
        let drawdown = if peak > 0.0 { (peak - tvl) / peak } else { 0.0 };
        max_drawdown = max_drawdown.max(drawdown);
    }

    max_drawdown
}
