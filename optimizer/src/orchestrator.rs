//! Optimization orchestrator
//!
//! Sequences fetch → normalize → forecast → optimize → risk-assess →
//! recommend, one cycle at a time. Run state and the last result are
//! published as whole immutable snapshots, so readers never observe a
//! partially updated record.

use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use yieldflow_dataplane::{MarketSnapshot, MetricsSource, StrategyMetrics};

use crate::allocation::AllocationOptimizer;
use crate::config::OptimizerConfig;
use crate::error::{OptimizerError, Result};
use crate::forecast::YieldForecaster;
use crate::normalizer::{portfolio_metrics, MetricsNormalizer};
use crate::risk::RiskEngine;
use crate::types::{
    AgentState, Allocation, AllocationAmount, CircuitState, ExpectedMetrics, FrontierPoint,
    Lifecycle, OptimizationInput, OptimizationMethod, OptimizationResult, ProjectedValue,
    Recommendation, RiskSummary, RiskTolerance, SimulationResult, TrainingReport, YieldPrediction,
};

/// Amount used when an operation needs a cycle but none was requested
pub const DEFAULT_AMOUNT: f64 = 10_000.0;

/// Accepted range for a caller-supplied allocation sum
const ALLOCATION_SUM_RANGE: std::ops::RangeInclusive<f64> = 0.99..=1.01;

pub const MIN_FRONTIER_POINTS: usize = 5;
pub const MAX_FRONTIER_POINTS: usize = 50;
pub const MAX_SIMULATION_DAYS: u32 = 365;

/// Components wired at initialize()
struct Pipeline {
    normalizer: MetricsNormalizer,
    forecaster: YieldForecaster,
    allocator: AllocationOptimizer,
    risk: RiskEngine,
}

/// Owns the pipeline, the run state and the last-result cache
pub struct OptimizationOrchestrator {
    config: OptimizerConfig,
    source: Arc<dyn MetricsSource>,
    pipeline: RwLock<Option<Arc<Pipeline>>>,
    state: RwLock<Arc<AgentState>>,
    last_result: RwLock<Option<Arc<OptimizationResult>>>,
    /// Held for the whole of a cycle so cycles never overlap
    cycle_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl OptimizationOrchestrator {
    pub fn new(config: OptimizerConfig, source: Arc<dyn MetricsSource>) -> Self {
        Self {
            config,
            source,
            pipeline: RwLock::new(None),
            state: RwLock::new(Arc::new(AgentState::default())),
            last_result: RwLock::new(None),
            cycle_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Validate configuration and wire the pipeline
    pub fn initialize(&self) -> Result<()> {
        let lifecycle = self.state.read().lifecycle;
        if lifecycle != Lifecycle::NotInitialized {
            return Err(OptimizerError::state(format!(
                "Cannot initialize from {:?}",
                lifecycle
            )));
        }

        self.config.validate()?;

        let pipeline = Pipeline {
            normalizer: MetricsNormalizer::new(&self.config),
            forecaster: YieldForecaster::new(&self.config.forecast, self.config.optimization.lookback_days),
            allocator: AllocationOptimizer::new(&self.config.optimization),
            risk: RiskEngine::new(&self.config.risk),
        };
        *self.pipeline.write() = Some(Arc::new(pipeline));

        self.update_state(|s| {
            s.lifecycle = Lifecycle::Running;
            s.is_running = true;
        });

        info!(
            network = %self.config.dataplane.network,
            strategies = self.config.strategies.len(),
            method = %self.config.optimization.method,
            "Optimizer initialized"
        );
        Ok(())
    }

    /// Stop the continuous loop and wait for an in-flight cycle to finish
    pub async fn shutdown(&self) {
        info!("Shutting down optimizer");
        self.update_state(|s| {
            s.lifecycle = Lifecycle::ShuttingDown;
            s.is_running = false;
        });
        self.cancel.cancel();

        let _cycle = self.cycle_lock.lock().await;
        *self.pipeline.write() = None;
        self.update_state(|s| s.lifecycle = Lifecycle::Stopped);
        info!("Optimizer stopped");
    }

    /// Token cancelled by shutdown()
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn get_state(&self) -> Arc<AgentState> {
        Arc::clone(&self.state.read())
    }

    pub fn get_last_result(&self) -> Option<Arc<OptimizationResult>> {
        self.last_result.read().clone()
    }

    pub fn get_strategy(&self, strategy_id: &str) -> Option<StrategyMetrics> {
        self.get_last_result()?
            .strategy_metrics
            .iter()
            .find(|m| m.strategy_id == strategy_id)
            .cloned()
    }

    pub fn get_prediction(&self, strategy_id: &str) -> Option<YieldPrediction> {
        self.get_last_result()?
            .predictions
            .iter()
            .find(|p| p.strategy_id == strategy_id)
            .cloned()
    }

    /// State and last result read together, so counters always match the result
    pub fn snapshot(&self) -> (Arc<AgentState>, Option<Arc<OptimizationResult>>) {
        let state = self.state.read();
        let last = self.last_result.read();
        (Arc::clone(&state), last.clone())
    }

    /// Store a finished cycle's result and bump the counters in one step.
    ///
    /// Lock order is state, then last_result.
    fn publish(&self, result: &Arc<OptimizationResult>) {
        let mut state = self.state.write();
        let mut last = self.last_result.write();

        let mut next = (**state).clone();
        next.last_optimization = Some(result.timestamp);
        next.optimization_count += 1;

        *last = Some(Arc::clone(result));
        *state = Arc::new(next);
    }

    /// Replace the state snapshot with a modified copy
    fn update_state<F: FnOnce(&mut AgentState)>(&self, f: F) {
        let mut guard = self.state.write();
        let mut next = (**guard).clone();
        f(&mut next);
        *guard = Arc::new(next);
    }

    fn pipeline(&self) -> Result<Arc<Pipeline>> {
        let lifecycle = self.state.read().lifecycle;
        if lifecycle != Lifecycle::Running {
            return Err(OptimizerError::state(format!(
                "Optimizer is not running ({:?})",
                lifecycle
            )));
        }
        self.pipeline
            .read()
            .clone()
            .ok_or_else(|| OptimizerError::state("Optimizer is not initialized"))
    }

    /// Record post-trade weights; rejected unless they sum to 1 within 1%
    pub fn update_allocations(&self, allocations: Allocation) -> Result<()> {
        validate_allocation(&allocations)?;

        info!(allocations = ?allocations, "Updated current allocations");
        self.update_state(|s| s.current_allocations = allocations);
        Ok(())
    }

    /// Run one full cycle and cache its result
    pub async fn run_optimization(
        &self,
        amount: f64,
        risk_tolerance: RiskTolerance,
        method: Option<OptimizationMethod>,
    ) -> Result<Arc<OptimizationResult>> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err(OptimizerError::validation(format!(
                "Amount must be positive, got {}",
                amount
            )));
        }
        self.pipeline()?;

        let _cycle = self.cycle_lock.lock().await;
        // shutdown() may have completed while this call waited for the lock
        let pipeline = self.pipeline()?;
        let method = method.unwrap_or(self.config.optimization.method);

        info!(amount, risk_tolerance = %risk_tolerance, method = %method, "Running optimization");

        match self.execute_cycle(&pipeline, amount, risk_tolerance, method).await {
            Ok(result) => {
                let result = Arc::new(result);
                self.publish(&result);

                info!(
                    run_id = %result.run_id,
                    expected_return = result.allocation.expected_return,
                    volatility = result.allocation.expected_volatility,
                    sharpe = result.allocation.sharpe_ratio,
                    risk_level = %result.risk_assessment.level,
                    "Optimization complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.update_state(|s| s.error_count += 1);
                error!(error = %e, amount, "Optimization failed");
                Err(e)
            }
        }
    }

    async fn execute_cycle(
        &self,
        pipeline: &Pipeline,
        amount: f64,
        risk_tolerance: RiskTolerance,
        method: OptimizationMethod,
    ) -> Result<OptimizationResult> {
        let metrics = self.fetch_metrics().await?;
        let ids: Vec<String> = metrics.iter().map(|m| m.strategy_id.clone()).collect();

        let history = match self.source.fetch_return_history(&ids).await {
            Ok(history) => history,
            Err(e) => {
                warn!(error = %e, "Return history unavailable, using heuristic correlation");
                None
            }
        };
        let market = self.source.fetch_market_snapshot().await.unwrap_or_else(|e| {
            debug!(error = %e, "Market snapshot unavailable");
            None
        });

        let current = self.get_state().current_allocations.clone();
        let limits = RiskEngine::get_risk_limits(risk_tolerance);

        let input = pipeline.normalizer.prepare(
            &metrics,
            &current,
            amount,
            history,
            Some(limits.max_single_allocation),
        );
        if input.strategies.is_empty() {
            return Err(OptimizerError::data_unavailable("No eligible strategies after filtering"));
        }

        let (predictions, training) = self.forecast(pipeline, &input, market.as_ref()).await?;

        let allocation = pipeline.allocator.optimize(&input, method)?;
        let weights = input.weights_for(&allocation.allocations);

        let risk_assessment = pipeline.risk.assess_portfolio(&input, &weights, Some(risk_tolerance));
        let risk_adjusted = pipeline
            .risk
            .calculate_risk_adjusted_return(allocation.expected_return, allocation.expected_volatility);

        let rebalance = if current.values().sum::<f64>() > 0.0 {
            Some(pipeline.allocator.recommend_rebalance(&current, &input, method)?)
        } else {
            None
        };

        Ok(OptimizationResult {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            total_amount: amount,
            risk_tolerance,
            allocation,
            predictions,
            training,
            risk_assessment,
            risk_adjusted,
            rebalance,
            strategy_metrics: metrics,
            input,
        })
    }

    /// Fetch metrics, falling back to the last result's metrics when the source is down
    async fn fetch_metrics(&self) -> Result<Vec<StrategyMetrics>> {
        let fetched = match self.source.fetch_strategy_metrics().await {
            Ok(metrics) if !metrics.is_empty() => {
                self.update_state(|s| s.last_data_fetch = Some(Utc::now()));
                return Ok(metrics);
            }
            Ok(_) => OptimizerError::data_unavailable("Metrics source returned no strategies"),
            Err(e) => OptimizerError::from(e),
        };

        if !fetched.is_data_unavailable() {
            return Err(fetched);
        }

        match self.get_last_result() {
            Some(last) => {
                warn!(
                    error = %fetched,
                    cached_at = %last.timestamp,
                    "Metrics unavailable, reusing metrics from the last result"
                );
                Ok(last.strategy_metrics.clone())
            }
            None => Err(fetched),
        }
    }

    /// Train and predict for every eligible strategy
    async fn forecast(
        &self,
        pipeline: &Pipeline,
        input: &OptimizationInput,
        market: Option<&MarketSnapshot>,
    ) -> Result<(Vec<YieldPrediction>, Vec<TrainingReport>)> {
        let settings = &self.config.optimization;
        let mut predictions = Vec::with_capacity(input.strategies.len());
        let mut training = Vec::new();

        for s in &input.strategies {
            let history = match self.source.fetch_yield_history(&s.strategy_id).await {
                Ok(Some(h)) if !h.is_empty() => h,
                Ok(_) => pipeline
                    .forecaster
                    .generate_synthetic_history(s.expected_return, s.volatility, settings.history_days),
                Err(e) => {
                    warn!(strategy = %s.strategy_id, error = %e, "Yield history unavailable, using synthetic series");
                    pipeline
                        .forecaster
                        .generate_synthetic_history(s.expected_return, s.volatility, settings.history_days)
                }
            };

            match pipeline.forecaster.train(&s.strategy_id, &history, market) {
                Ok(report) => training.push(report),
                Err(e @ OptimizerError::InsufficientData { .. }) => {
                    debug!(strategy = %s.strategy_id, error = %e, "Using heuristic prediction");
                }
                Err(e) => return Err(e),
            }

            let window = &history[history.len().saturating_sub(settings.forecast_window)..];
            predictions.push(pipeline.forecaster.predict(&s.strategy_id, window, market));
        }

        Ok((predictions, training))
    }

    /// Run a cycle and shape it for display
    pub async fn get_recommendation(&self, amount: f64, risk_tolerance: RiskTolerance) -> Result<Recommendation> {
        let result = self.run_optimization(amount, risk_tolerance, None).await?;

        let allocation: BTreeMap<String, AllocationAmount> = result
            .allocation
            .allocations
            .iter()
            .map(|(id, w)| {
                (
                    id.clone(),
                    AllocationAmount {
                        weight: *w,
                        amount: w * amount,
                    },
                )
            })
            .collect();

        Ok(Recommendation {
            timestamp: result.timestamp,
            investment_amount: amount,
            risk_tolerance,
            allocation,
            expected_metrics: ExpectedMetrics {
                annual_return: result.allocation.expected_return,
                annual_volatility: result.allocation.expected_volatility,
                sharpe_ratio: result.allocation.sharpe_ratio,
            },
            risk: RiskSummary {
                level: result.risk_assessment.level,
                score: result.risk_assessment.score,
                warnings: result.risk_assessment.warnings.clone(),
                recommendations: result.risk_assessment.recommendations.clone(),
            },
            predictions: result.predictions.clone(),
            strategies: result.strategy_metrics.clone(),
        })
    }

    /// Frontier over freshly fetched metrics, without the tolerance cap
    pub async fn generate_efficient_frontier(&self, points: usize) -> Result<Vec<FrontierPoint>> {
        if !(MIN_FRONTIER_POINTS..=MAX_FRONTIER_POINTS).contains(&points) {
            return Err(OptimizerError::validation(format!(
                "Frontier points must be within [{}, {}], got {}",
                MIN_FRONTIER_POINTS, MAX_FRONTIER_POINTS, points
            )));
        }
        let pipeline = self.pipeline()?;

        let metrics = self.fetch_metrics().await?;
        let current = self.get_state().current_allocations.clone();
        let input = pipeline
            .normalizer
            .prepare(&metrics, &current, DEFAULT_AMOUNT, None, None);

        Ok(pipeline.allocator.generate_efficient_frontier(&input, points))
    }

    /// Project a fixed allocation over `days`, using the last result's strategies
    pub async fn simulate_portfolio(&self, allocations: &Allocation, days: u32) -> Result<SimulationResult> {
        if days == 0 || days > MAX_SIMULATION_DAYS {
            return Err(OptimizerError::validation(format!(
                "Simulation days must be within [1, {}], got {}",
                MAX_SIMULATION_DAYS, days
            )));
        }
        validate_allocation(allocations)?;

        let result = match self.get_last_result() {
            Some(result) => result,
            None => {
                self.run_optimization(DEFAULT_AMOUNT, RiskTolerance::default(), None)
                    .await?
            }
        };

        let input = &result.input;
        let mut annualized_return = 0.0;
        let mut uncorrelated_variance = 0.0;

        for (id, weight) in allocations {
            if input.strategies.iter().any(|s| &s.strategy_id == id) {
                continue;
            }
            let metrics = result
                .strategy_metrics
                .iter()
                .find(|m| &m.strategy_id == id)
                .ok_or_else(|| OptimizerError::validation(format!("Unknown strategy: {}", id)))?;
            // Excluded strategies carry no correlation estimate
            annualized_return += weight * metrics.current_apy;
            uncorrelated_variance += (weight * metrics.volatility).powi(2);
        }

        let weights = input.weights_for(allocations);
        let included = portfolio_metrics(input, &weights, input.risk_free_rate);
        annualized_return += included.expected_return;
        let annualized_volatility = (included.volatility.powi(2) + uncorrelated_variance).sqrt();

        let horizon = days as f64 / 365.0;
        let period_return = annualized_return * horizon;
        let period_volatility = annualized_volatility * horizon.sqrt();
        let initial_value = result.total_amount;

        Ok(SimulationResult {
            allocations: allocations.clone(),
            days,
            annualized_return,
            period_return,
            annualized_volatility,
            period_volatility,
            initial_value,
            projected: ProjectedValue {
                optimistic: initial_value * (1.0 + period_return + period_volatility),
                expected: initial_value * (1.0 + period_return),
                pessimistic: initial_value * (1.0 + period_return - period_volatility),
            },
        })
    }

    /// Repeat cycles until shutdown, with backoff and a circuit breaker on failures.
    ///
    /// Cancellation is only observed between cycles.
    pub async fn run_continuous(
        &self,
        amount: f64,
        risk_tolerance: RiskTolerance,
        interval: Duration,
    ) -> Result<()> {
        self.pipeline()?;
        let settings = self.config.continuous.clone();

        info!(interval_secs = interval.as_secs(), "Starting continuous optimization");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let delay = match self.run_optimization(amount, risk_tolerance, None).await {
                Ok(_) => {
                    self.update_state(|s| {
                        s.consecutive_failures = 0;
                        s.circuit_state = CircuitState::Closed;
                    });
                    info!(next_in_secs = interval.as_secs(), "Next optimization scheduled");
                    interval
                }
                Err(e) => {
                    let state = self.get_state();
                    let failures = state.consecutive_failures + 1;
                    let trip = state.circuit_state == CircuitState::HalfOpen
                        || failures >= settings.max_consecutive_failures;

                    if trip {
                        self.update_state(|s| {
                            s.consecutive_failures = failures;
                            s.circuit_state = CircuitState::Open;
                        });
                        error!(
                            error = %e,
                            failures,
                            cooldown_secs = settings.circuit_cooldown_secs,
                            "Circuit breaker opened"
                        );
                        settings.circuit_cooldown()
                    } else {
                        self.update_state(|s| s.consecutive_failures = failures);
                        let delay = backoff_delay(
                            settings.initial_backoff(),
                            settings.backoff_multiplier,
                            settings.max_backoff(),
                            settings.jitter_factor,
                            failures,
                        );
                        warn!(
                            error = %e,
                            failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Optimization cycle failed, backing off"
                        );
                        delay
                    }
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if self.get_state().circuit_state == CircuitState::Open {
                self.update_state(|s| s.circuit_state = CircuitState::HalfOpen);
                info!("Circuit breaker half-open, probing with one cycle");
            }
        }

        info!("Continuous optimization cancelled");
        Ok(())
    }
}

/// Weights must be finite, non-negative and sum to 1 within 1%
fn validate_allocation(allocations: &Allocation) -> Result<()> {
    if let Some((id, w)) = allocations.iter().find(|(_, w)| !w.is_finite() || **w < 0.0) {
        return Err(OptimizerError::validation(format!(
            "Invalid weight {} for {}",
            w, id
        )));
    }

    let total: f64 = allocations.values().sum();
    if !ALLOCATION_SUM_RANGE.contains(&total) {
        return Err(OptimizerError::validation(format!(
            "Allocations must sum to 1.0, got {:.4}",
            total
        )));
    }
    Ok(())
}

/// Exponential delay for the nth consecutive failure, capped, with ± jitter
pub fn backoff_delay(initial: Duration, multiplier: f64, max: Duration, jitter: f64, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(64) as i32;
    let base = initial.as_secs_f64() * multiplier.powi(exponent);
    let capped = base.min(max.as_secs_f64());

    let spread = if jitter > 0.0 {
        rand::thread_rng().gen_range(-jitter..=jitter)
    } else {
        0.0
    };
    Duration::from_secs_f64((capped * (1.0 + spread)).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use yieldflow_dataplane::StaticMetricsSource;

    fn orchestrator() -> OptimizationOrchestrator {
        OptimizationOrchestrator::new(
            OptimizerConfig::default(),
            Arc::new(StaticMetricsSource::with_default_strategies()),
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let initial = Duration::from_secs(60);
        let max = Duration::from_secs(3600);

        assert_eq!(backoff_delay(initial, 2.0, max, 0.0, 1), Duration::from_secs(60));
        assert_eq!(backoff_delay(initial, 2.0, max, 0.0, 3), Duration::from_secs(240));
        assert_eq!(backoff_delay(initial, 2.0, max, 0.0, 20), max);

        let jittered = backoff_delay(initial, 2.0, max, 0.1, 1);
        assert!(jittered >= Duration::from_secs(54) && jittered <= Duration::from_secs(66));
    }

    #[test]
    fn test_validate_allocation() {
        let ok: Allocation = [("a".to_string(), 0.6), ("b".to_string(), 0.395)].into_iter().collect();
        assert!(validate_allocation(&ok).is_ok());

        let half: Allocation = [("a".to_string(), 0.5)].into_iter().collect();
        assert!(matches!(validate_allocation(&half), Err(OptimizerError::Validation { .. })));

        let negative: Allocation = [("a".to_string(), 1.5), ("b".to_string(), -0.5)].into_iter().collect();
        assert!(validate_allocation(&negative).is_err());
    }

    #[test]
    fn test_initialize_requires_valid_config() {
        let mut config = OptimizerConfig::default();
        config.dataplane.contracts.oracle.clear();
        let orchestrator = OptimizationOrchestrator::new(
            config,
            Arc::new(StaticMetricsSource::with_default_strategies()),
        );

        assert!(matches!(
            orchestrator.initialize(),
            Err(OptimizerError::Configuration { .. })
        ));
        assert_eq!(orchestrator.get_state().lifecycle, Lifecycle::NotInitialized);
    }

    #[tokio::test]
    async fn test_cycle_requires_initialize() {
        let orchestrator = orchestrator();
        let err = orchestrator
            .run_optimization(1000.0, RiskTolerance::Moderate, None)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::State { .. }));
    }

    #[tokio::test]
    async fn test_invalid_amount_does_not_count_as_error() {
        let orchestrator = orchestrator();
        orchestrator.initialize().unwrap();

        assert!(orchestrator
            .run_optimization(0.0, RiskTolerance::Moderate, None)
            .await
            .is_err());
        assert_eq!(orchestrator.get_state().error_count, 0);
    }

    #[tokio::test]
    async fn test_frontier_point_range() {
        let orchestrator = orchestrator();
        orchestrator.initialize().unwrap();

        assert!(orchestrator.generate_efficient_frontier(4).await.is_err());
        assert!(orchestrator.generate_efficient_frontier(51).await.is_err());
        assert!(orchestrator.generate_efficient_frontier(5).await.unwrap().len() <= 5);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_token() {
        let orchestrator = orchestrator();
        orchestrator.initialize().unwrap();
        let token = orchestrator.cancellation_token();

        orchestrator.shutdown().await;
        assert!(token.is_cancelled());
        let state = orchestrator.get_state();
        assert_eq!(state.lifecycle, Lifecycle::Stopped);
        assert!(!state.is_running);
        assert!(orchestrator.initialize().is_err());
    }

    #[tokio::test]
    async fn test_cycle_queued_behind_shutdown_does_not_run() {
        let orchestrator = Arc::new(orchestrator());
        orchestrator.initialize().unwrap();

        // Stand in for an in-flight cycle
        let in_flight = orchestrator.cycle_lock.lock().await;

        let queued = {
            let o = Arc::clone(&orchestrator);
            tokio::spawn(async move { o.run_optimization(1000.0, RiskTolerance::Moderate, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stopping = {
            let o = Arc::clone(&orchestrator);
            tokio::spawn(async move { o.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(orchestrator.get_state().lifecycle, Lifecycle::ShuttingDown);

        drop(in_flight);
        let err = queued.await.unwrap().unwrap_err();
        stopping.await.unwrap();

        assert!(matches!(err, OptimizerError::State { .. }));
        let (state, last) = orchestrator.snapshot();
        assert_eq!(state.lifecycle, Lifecycle::Stopped);
        assert_eq!(state.optimization_count, 0);
        assert_eq!(state.error_count, 0);
        assert!(last.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_matches_published_result() {
        let orchestrator = orchestrator();
        orchestrator.initialize().unwrap();

        let (state, last) = orchestrator.snapshot();
        assert!(last.is_none());
        assert_eq!(state.last_optimization, None);

        let result = orchestrator
            .run_optimization(1000.0, RiskTolerance::Moderate, None)
            .await
            .unwrap();

        let (state, last) = orchestrator.snapshot();
        let last = last.unwrap();
        assert_eq!(last.run_id, result.run_id);
        assert_eq!(state.last_optimization, Some(last.timestamp));
        assert_eq!(state.optimization_count, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_readers_never_see_result_without_counters() {
        let orchestrator = Arc::new(orchestrator());
        orchestrator.initialize().unwrap();

        let reader = {
            let o = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let mut checks = 0u32;
                loop {
                    let (state, last) = o.snapshot();
                    match last {
                        Some(last) => assert_eq!(state.last_optimization, Some(last.timestamp)),
                        None => assert_eq!(state.optimization_count, 0),
                    }
                    checks += 1;
                    if state.optimization_count >= 3 {
                        return checks;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..3 {
            orchestrator
                .run_optimization(1000.0, RiskTolerance::Moderate, None)
                .await
                .unwrap();
        }

        let checks = tokio::time::timeout(Duration::from_secs(10), reader)
            .await
            .expect("reader exits once three cycles are published")
            .unwrap();
        assert!(checks >= 1);
    }
}
