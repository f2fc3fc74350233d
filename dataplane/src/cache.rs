//! TTL cache in front of a metrics source

use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::{
    utils::{retry_with_backoff, RetryConfig},
    DataplaneError, MarketSnapshot, MetricsSource, Result, ReturnHistory, StrategyMetrics,
    YieldHistory,
};

/// Default validity window for cached metrics
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Default upper bound on one inner fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    metrics: Vec<StrategyMetrics>,
}

/// Caches strategy metrics for a TTL and serves stale data while the inner
/// source is unreachable. Errors that are not transient pass through.
pub struct CachedMetricsSource<S> {
    inner: S,
    ttl: Duration,
    timeout: Duration,
    retry: RetryConfig,
    entry: RwLock<Option<CacheEntry>>,
}

impl<S: MetricsSource> CachedMetricsSource<S> {
    /// Wrap a source with the default TTL and retry policy
    pub fn new(inner: S) -> Self {
        Self::with_ttl(inner, DEFAULT_CACHE_TTL)
    }

    /// Wrap a source with a custom TTL
    pub fn with_ttl(inner: S, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            timeout: DEFAULT_FETCH_TIMEOUT,
            retry: RetryConfig::default(),
            entry: RwLock::new(None),
        }
    }

    /// Override the retry policy used for inner fetches
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Override the per-attempt fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Access the wrapped source
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drop the cached metrics so the next fetch goes to the inner source
    pub fn invalidate(&self) {
        *self.entry.write() = None;
    }

    fn fresh(&self) -> Option<Vec<StrategyMetrics>> {
        self.entry
            .read()
            .as_ref()
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.metrics.clone())
    }

    async fn fetch_with_timeout(&self) -> Result<Vec<StrategyMetrics>> {
        tokio::time::timeout(self.timeout, self.inner.fetch_strategy_metrics())
            .await
            .map_err(|_| DataplaneError::timeout(self.inner.name()))?
    }
}

#[async_trait]
impl<S: MetricsSource> MetricsSource for CachedMetricsSource<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn fetch_strategy_metrics(&self) -> Result<Vec<StrategyMetrics>> {
        if let Some(metrics) = self.fresh() {
            debug!(source = self.name(), "Serving cached strategy metrics");
            return Ok(metrics);
        }

        let fetched = retry_with_backoff(
            || self.fetch_with_timeout(),
            self.retry.clone(),
            "fetch_strategy_metrics",
        )
        .await;

        match fetched {
            Ok(metrics) => {
                *self.entry.write() = Some(CacheEntry {
                    fetched_at: Instant::now(),
                    metrics: metrics.clone(),
                });
                Ok(metrics)
            }
            Err(error) if !error.is_retryable() => {
                warn!(source = self.name(), error = %error, "Metrics fetch rejected");
                Err(error)
            }
            Err(error) => {
                let stale = self.entry.read().clone();
                match stale {
                    Some(entry) => {
                        warn!(
                            source = self.name(),
                            age_secs = entry.fetched_at.elapsed().as_secs(),
                            error = %error,
                            "Metrics fetch failed, serving stale cache"
                        );
                        Ok(entry.metrics)
                    }
                    None => Err(DataplaneError::unavailable(self.name(), error.to_string())),
                }
            }
        }
    }

    async fn fetch_return_history(&self, strategy_ids: &[String]) -> Result<Option<ReturnHistory>> {
        self.inner.fetch_return_history(strategy_ids).await
    }

    async fn fetch_yield_history(&self, strategy_id: &str) -> Result<Option<YieldHistory>> {
        self.inner.fetch_yield_history(strategy_id).await
    }

    async fn fetch_market_snapshot(&self) -> Result<Option<MarketSnapshot>> {
        self.inner.fetch_market_snapshot().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::default_strategies;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

    struct FlakySource {
        calls: AtomicU32,
        failing: AtomicBool,
        invalid: AtomicBool,
        delay_ms: AtomicU64,
    }

    impl FlakySource {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
                failing: AtomicBool::new(false),
                invalid: AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetricsSource for FlakySource {
        async fn fetch_strategy_metrics(&self) -> Result<Vec<StrategyMetrics>> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            if self.invalid.load(Ordering::SeqCst) {
                Err(DataplaneError::invalid_metrics("lp", "negative tvl"))
            } else if self.failing.load(Ordering::SeqCst) {
                Err(DataplaneError::unavailable("flaky", "rpc down"))
            } else {
                Ok(default_strategies(0.02))
            }
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let cached = CachedMetricsSource::new(FlakySource::new());
        cached.fetch_strategy_metrics().await.unwrap();
        cached.fetch_strategy_metrics().await.unwrap();
        assert_eq!(cached.inner().calls(), 1);

        cached.invalidate();
        cached.fetch_strategy_metrics().await.unwrap();
        assert_eq!(cached.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_stale_data_served_on_failure() {
        let cached = CachedMetricsSource::with_ttl(FlakySource::new(), Duration::ZERO).with_retry(fast_retry());
        let first = cached.fetch_strategy_metrics().await.unwrap();

        cached.inner().failing.store(true, Ordering::SeqCst);
        let second = cached.fetch_strategy_metrics().await.unwrap();
        assert_eq!(first, second);
        // One good fetch, then both retry attempts
        assert_eq!(cached.inner().calls(), 3);
    }

    #[tokio::test]
    async fn test_unavailable_without_cache() {
        let source = FlakySource::new();
        source.failing.store(true, Ordering::SeqCst);
        let cached = CachedMetricsSource::new(source).with_retry(fast_retry());

        let err = cached.fetch_strategy_metrics().await.unwrap_err();
        assert!(matches!(err, DataplaneError::DataUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_invalid_metrics_bypass_stale_cache() {
        let cached = CachedMetricsSource::with_ttl(FlakySource::new(), Duration::ZERO).with_retry(fast_retry());
        cached.fetch_strategy_metrics().await.unwrap();

        cached.inner().invalid.store(true, Ordering::SeqCst);
        let err = cached.fetch_strategy_metrics().await.unwrap_err();

        assert!(matches!(err, DataplaneError::InvalidMetrics { ref strategy_id, .. } if strategy_id == "lp"));
        // Not retried either
        assert_eq!(cached.inner().calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_metrics_not_rewrapped_without_cache() {
        let source = FlakySource::new();
        source.invalid.store(true, Ordering::SeqCst);
        let cached = CachedMetricsSource::new(source).with_retry(fast_retry());

        let err = cached.fetch_strategy_metrics().await.unwrap_err();
        assert!(matches!(err, DataplaneError::InvalidMetrics { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_slow_source_times_out_to_stale_cache() {
        let cached = CachedMetricsSource::with_ttl(FlakySource::new(), Duration::ZERO)
            .with_retry(fast_retry())
            .with_timeout(Duration::from_millis(20));
        let first = cached.fetch_strategy_metrics().await.unwrap();

        cached.inner().delay_ms.store(5_000, Ordering::SeqCst);
        let second = tokio::time::timeout(Duration::from_secs(2), cached.fetch_strategy_metrics())
            .await
            .expect("timeout bounds the fetch")
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_slow_source_without_cache_is_unavailable() {
        let source = FlakySource::new();
        source.delay_ms.store(5_000, Ordering::SeqCst);
        let cached = CachedMetricsSource::new(source)
            .with_retry(fast_retry())
            .with_timeout(Duration::from_millis(20));

        let err = cached.fetch_strategy_metrics().await.unwrap_err();
        match err {
            DataplaneError::DataUnavailable { message, .. } => assert!(message.contains("timeout")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalidate_forces_refetch() {
        let cached = CachedMetricsSource::new(FlakySource::new());
        tokio_test::block_on(async {
            tokio_test::assert_ok!(cached.fetch_strategy_metrics().await);
            cached.invalidate();
            tokio_test::assert_ok!(cached.fetch_strategy_metrics().await);
        });
        assert_eq!(cached.inner().calls(), 2);
    }
}
