//! Core types for the optimizer

use chrono::{DateTime, Utc};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;
use yieldflow_dataplane::{ReturnHistory, StrategyMetrics, StrategyType};

use crate::error::OptimizerError;

/// Strategy id to allocation weight
pub type Allocation = BTreeMap<String, f64>;

/// Allocation objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    /// Maximize (return - rf) / volatility
    MaxSharpe,
    /// Minimize w·Σ·w
    MinVariance,
    /// Equalize each position's contribution to portfolio volatility
    RiskParity,
    /// Minimize variance at the mean single-strategy return
    MeanVariance,
}

impl OptimizationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationMethod::MaxSharpe => "max_sharpe",
            OptimizationMethod::MinVariance => "min_variance",
            OptimizationMethod::RiskParity => "risk_parity",
            OptimizationMethod::MeanVariance => "mean_variance",
        }
    }
}

impl std::fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for OptimizationMethod {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "max_sharpe" => Ok(OptimizationMethod::MaxSharpe),
            "min_variance" => Ok(OptimizationMethod::MinVariance),
            "risk_parity" => Ok(OptimizationMethod::RiskParity),
            "mean_variance" => Ok(OptimizationMethod::MeanVariance),
            _ => Err(OptimizerError::InvalidInput(format!(
                "Unknown optimization method: {}",
                s
            ))),
        }
    }
}

/// Caller's appetite for risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
}

impl RiskTolerance {
    pub fn name(&self) -> &'static str {
        match self {
            RiskTolerance::Conservative => "conservative",
            RiskTolerance::Moderate => "moderate",
            RiskTolerance::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for RiskTolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for RiskTolerance {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" => Ok(RiskTolerance::Conservative),
            "moderate" => Ok(RiskTolerance::Moderate),
            "aggressive" => Ok(RiskTolerance::Aggressive),
            _ => Err(OptimizerError::InvalidInput(format!(
                "Unknown risk tolerance: {}",
                s
            ))),
        }
    }
}

/// Limits implied by a risk tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_volatility: f64,
    pub max_single_allocation: f64,
    pub max_risk_score: f64,
    pub min_sharpe: f64,
    pub max_drawdown: f64,
}

/// A strategy with bounded, comparable features, rebuilt every cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedStrategy {
    pub strategy_id: String,
    pub name: String,
    pub strategy_type: StrategyType,
    /// Annualized expected return
    pub expected_return: f64,
    /// Annualized volatility
    pub volatility: f64,
    /// Risk score scaled to [0, 1]
    pub risk: f64,
    /// Log-scaled TVL score in [0, 1]
    pub tvl_score: f64,
    /// Protocol maturity score in [0, 1]
    pub age_score: f64,
    pub sharpe_ratio: f64,
    pub current_weight: f64,
    pub min_allocation: f64,
    pub max_allocation: f64,
}

/// How a correlation matrix was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationSource {
    /// Sample correlation of aligned return series
    Historical,
    /// Fixed same-type / cross-type placeholder values
    Heuristic,
}

/// Symmetric correlation matrix with unit diagonal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    values: DMatrix<f64>,
    source: CorrelationSource,
}

impl CorrelationMatrix {
    /// Build from raw values, forcing a square shape, symmetry, unit diagonal and [-1, 1] entries
    pub fn new(values: DMatrix<f64>, source: CorrelationSource) -> Self {
        let n = values.nrows();
        let mut values = values.resize(n, n, 0.0);
        for i in 0..n {
            values[(i, i)] = 1.0;
            for j in (i + 1)..n {
                let v = 0.5 * (values[(i, j)] + values[(j, i)]);
                let v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
                values[(i, j)] = v;
                values[(j, i)] = v;
            }
        }
        Self { values, source }
    }

    pub fn identity(n: usize) -> Self {
        Self::new(DMatrix::identity(n, n), CorrelationSource::Heuristic)
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[(i, j)]
    }

    pub fn source(&self) -> CorrelationSource {
        self.source
    }

    /// Covariance = outer(vol, vol) ⊙ correlation
    pub fn covariance(&self, volatilities: &[f64]) -> DMatrix<f64> {
        let vol = DVector::from_column_slice(volatilities);
        (&vol * vol.transpose()).component_mul(&self.values)
    }
}

/// Everything the allocation step needs for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationInput {
    /// Eligible strategies, in metrics order
    pub strategies: Vec<NormalizedStrategy>,
    pub correlation: CorrelationMatrix,
    pub risk_free_rate: f64,
    pub total_amount: f64,
    /// Strategies filtered out this cycle
    pub excluded: Vec<String>,
    /// Real return series, when the data layer supplied them
    pub return_history: Option<ReturnHistory>,
}

impl OptimizationInput {
    pub fn returns(&self) -> Vec<f64> {
        self.strategies.iter().map(|s| s.expected_return).collect()
    }

    pub fn volatilities(&self) -> Vec<f64> {
        self.strategies.iter().map(|s| s.volatility).collect()
    }

    pub fn covariance(&self) -> DMatrix<f64> {
        self.correlation.covariance(&self.volatilities())
    }

    /// Weight vector aligned with `strategies`, missing ids count as 0
    pub fn weights_for(&self, allocation: &Allocation) -> Vec<f64> {
        self.strategies
            .iter()
            .map(|s| allocation.get(&s.strategy_id).copied().unwrap_or(0.0))
            .collect()
    }
}

/// Output of one allocation solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
    /// Included strategies at their weight, excluded ones at 0
    pub allocations: Allocation,
    pub expected_return: f64,
    pub expected_volatility: f64,
    pub sharpe_ratio: f64,
    pub method: OptimizationMethod,
    /// False when the solver fell back to its starting point
    pub converged: bool,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate metrics of a weighted portfolio
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub weighted_risk_score: f64,
    pub diversification_ratio: f64,
}

/// One point of the efficient frontier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
    pub target_return: f64,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub weights: Allocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeAction {
    Increase,
    Decrease,
}

/// A single rebalancing move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub strategy_id: String,
    pub action: TradeAction,
    pub current_weight: f64,
    pub target_weight: f64,
    pub weight_change: f64,
    /// Value moved, in the portfolio's unit
    pub amount: f64,
}

/// Target minus current portfolio metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Improvement {
    pub return_improvement: f64,
    pub volatility_change: f64,
    pub sharpe_improvement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceRecommendation {
    pub current_allocations: Allocation,
    pub target_allocations: Allocation,
    /// Decreases first, then by descending magnitude
    pub trades: Vec<Trade>,
    pub expected_improvement: Improvement,
    pub should_rebalance: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    /// Fixed thresholds at 25, 50 and 75
    pub fn from_score(score: f64) -> Self {
        if score < 25.0 {
            RiskLevel::Low
        } else if score < 50.0 {
            RiskLevel::Medium
        } else if score < 75.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The four sub-scores, each in [0, 25]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskComponents {
    pub volatility_risk: f64,
    pub contract_risk: f64,
    pub liquidity_risk: f64,
    pub specific_risk: f64,
}

impl RiskComponents {
    pub fn total(&self) -> f64 {
        self.volatility_risk + self.contract_risk + self.liquidity_risk + self.specific_risk
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRiskAssessment {
    pub strategy_id: String,
    pub score: f64,
    pub level: RiskLevel,
    pub components: RiskComponents,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
    pub var_95: f64,
    pub expected_shortfall: f64,
    pub max_drawdown: f64,
    /// Herfindahl index of the weights
    pub concentration_risk: f64,
    pub correlation_risk: f64,
    pub strategy_risks: Vec<StrategyRiskAssessment>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAdjustedReturn {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub return_per_risk: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

/// Which path produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionModel {
    Trained,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YieldPrediction {
    pub strategy_id: String,
    pub current_value: f64,
    pub predicted_7d: f64,
    pub predicted_30d: f64,
    /// In [0, 1]
    pub confidence: f64,
    pub trend: Trend,
    /// Feature importances of the short-horizon model
    pub factors: BTreeMap<String, f64>,
    pub model: PredictionModel,
}

/// In-sample fit quality of a trained forecaster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub strategy_id: String,
    pub r2_7d: f64,
    pub r2_30d: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    #[default]
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    NotInitialized,
    Running,
    ShuttingDown,
    Stopped,
}

/// Process-wide run state, published as whole snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub lifecycle: Lifecycle,
    pub is_running: bool,
    pub last_optimization: Option<DateTime<Utc>>,
    pub last_data_fetch: Option<DateTime<Utc>>,
    pub current_allocations: Allocation,
    pub optimization_count: u64,
    pub error_count: u64,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
}

/// Complete output of one optimization cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub total_amount: f64,
    pub risk_tolerance: RiskTolerance,
    pub allocation: AllocationResult,
    pub predictions: Vec<YieldPrediction>,
    pub training: Vec<TrainingReport>,
    pub risk_assessment: PortfolioRiskAssessment,
    pub risk_adjusted: RiskAdjustedReturn,
    pub rebalance: Option<RebalanceRecommendation>,
    pub strategy_metrics: Vec<StrategyMetrics>,
    pub input: OptimizationInput,
}

/// Weight and value of one recommended position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationAmount {
    pub weight: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedMetrics {
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub level: RiskLevel,
    pub score: f64,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// User-facing recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub timestamp: DateTime<Utc>,
    pub investment_amount: f64,
    pub risk_tolerance: RiskTolerance,
    pub allocation: BTreeMap<String, AllocationAmount>,
    pub expected_metrics: ExpectedMetrics,
    pub risk: RiskSummary,
    pub predictions: Vec<YieldPrediction>,
    pub strategies: Vec<StrategyMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedValue {
    pub optimistic: f64,
    pub expected: f64,
    pub pessimistic: f64,
}

/// Projection of a fixed allocation over a horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub allocations: Allocation,
    pub days: u32,
    pub annualized_return: f64,
    pub period_return: f64,
    pub annualized_volatility: f64,
    pub period_volatility: f64,
    pub initial_value: f64,
    pub projected: ProjectedValue,
}
