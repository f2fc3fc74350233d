//! Multi-factor risk scoring for strategies and portfolios

use tracing::{debug, info};
use yieldflow_dataplane::{ReturnHistory, StrategyType};

use crate::config::RiskConfig;
use crate::linalg::{dot, quad_form};
use crate::types::{
    NormalizedStrategy, OptimizationInput, PortfolioRiskAssessment, RiskAdjustedReturn,
    RiskComponents, RiskLevel, RiskLimits, RiskTolerance, StrategyRiskAssessment,
};

/// One-sided 95% normal quantile
const VAR_95_Z: f64 = 1.645;

/// Expected shortfall multiplier at 95% under a normal approximation
const ES_95_Z: f64 = 2.063;

const MAX_COMPONENT: f64 = 25.0;

/// Risk engine
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: &RiskConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Contract risk scaling by strategy type
    pub fn type_multiplier(strategy_type: StrategyType) -> f64 {
        match strategy_type {
            StrategyType::Staking => 0.6,
            StrategyType::Lending => 0.8,
            StrategyType::Liquidity | StrategyType::Other => 1.0,
        }
    }

    pub fn components(strategy: &NormalizedStrategy) -> RiskComponents {
        let volatility_risk = strategy.volatility * 50.0;
        let contract_risk =
            MAX_COMPONENT * (1.0 - strategy.age_score) * Self::type_multiplier(strategy.strategy_type);
        let liquidity_risk = MAX_COMPONENT * (1.0 - strategy.tvl_score);

        let bonus = if strategy.expected_return > 0.50 {
            5.0
        } else if strategy.expected_return > 0.30 {
            2.0
        } else {
            0.0
        };
        let specific_risk = strategy.risk * MAX_COMPONENT + bonus;

        RiskComponents {
            volatility_risk: clamp_component(volatility_risk),
            contract_risk: clamp_component(contract_risk),
            liquidity_risk: clamp_component(liquidity_risk),
            specific_risk: clamp_component(specific_risk),
        }
    }

    /// Score one strategy and collect its warnings
    pub fn assess_strategy(&self, strategy: &NormalizedStrategy) -> StrategyRiskAssessment {
        let components = Self::components(strategy);
        let score = components.total();
        let level = RiskLevel::from_score(score);

        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        if strategy.volatility > self.config.max_volatility {
            warnings.push(format!(
                "High volatility ({}) exceeds threshold",
                percent(strategy.volatility)
            ));
        }

        if strategy.age_score < 0.5 {
            warnings.push("Protocol is relatively new".to_string());
            recommendations.push("Consider reducing allocation until protocol matures".to_string());
        }

        if strategy.tvl_score < 0.5 {
            warnings.push("Lower TVL may indicate liquidity concerns".to_string());
        }

        if level >= RiskLevel::High {
            recommendations.push("Consider diversifying across multiple strategies".to_string());
            recommendations.push("Set stop-loss or maximum allocation limits".to_string());
        }

        debug!(strategy = %strategy.strategy_id, score, level = %level, "Strategy risk assessed");

        StrategyRiskAssessment {
            strategy_id: strategy.strategy_id.clone(),
            score,
            level,
            components,
            warnings,
            recommendations,
        }
    }

    /// Score a weighted portfolio of `input.strategies`.
    ///
    /// With a tolerance, breaches of its limits are added to the warnings.
    pub fn assess_portfolio(
        &self,
        input: &OptimizationInput,
        weights: &[f64],
        tolerance: Option<RiskTolerance>,
    ) -> PortfolioRiskAssessment {
        let strategy_risks: Vec<StrategyRiskAssessment> =
            input.strategies.iter().map(|s| self.assess_strategy(s)).collect();

        let mut warnings = Vec::new();
        let mut recommendations = Vec::new();

        let cov = input.covariance();
        let volatility = quad_form(&cov, weights).max(0.0).sqrt();
        let var_95 = volatility * VAR_95_Z;
        let expected_shortfall = volatility * ES_95_Z;

        let concentration_risk: f64 = weights.iter().map(|w| w * w).sum();
        if concentration_risk > 0.5 {
            warnings.push("High concentration risk - portfolio is not well diversified".to_string());
            recommendations.push("Consider spreading allocation across more strategies".to_string());
        }

        let correlation_risk = correlation_risk(input, weights, concentration_risk);
        if correlation_risk > 0.6 {
            warnings.push("High correlation between strategies reduces diversification benefits".to_string());
        }

        let history = input.return_history.as_ref().map(|h| {
            input
                .strategies
                .iter()
                .filter_map(|s| h.get(&s.strategy_id).map(|r| (s.strategy_id.clone(), r.clone())))
                .collect::<ReturnHistory>()
        });
        let max_drawdown = self.estimate_max_drawdown(volatility, history.as_ref());
        if max_drawdown > self.config.max_drawdown {
            warnings.push(format!(
                "Estimated max drawdown ({}) exceeds threshold",
                percent(max_drawdown)
            ));
        }

        let weighted_score: f64 = weights
            .iter()
            .zip(strategy_risks.iter())
            .map(|(w, r)| w * r.score)
            .sum();
        let score = (weighted_score + concentration_risk * 20.0 + correlation_risk * 10.0).clamp(0.0, 100.0);
        let level = RiskLevel::from_score(score);

        if let Some(tolerance) = tolerance {
            let expected_return = dot(weights, &input.returns());
            let sharpe = if volatility > 0.0 {
                (expected_return - input.risk_free_rate) / volatility
            } else {
                0.0
            };
            warnings.extend(limit_breaches(
                tolerance,
                &Self::get_risk_limits(tolerance),
                volatility,
                score,
                max_drawdown,
                sharpe,
            ));
        }

        match level {
            RiskLevel::Low => recommendations.push("Portfolio risk is well managed".to_string()),
            RiskLevel::Medium => recommendations
                .push("Consider risk-reward balance is appropriate for your goals".to_string()),
            RiskLevel::High | RiskLevel::VeryHigh => {
                recommendations.push("High risk portfolio - ensure this aligns with your risk tolerance".to_string());
                recommendations.push("Consider reducing exposure to highest-risk strategies".to_string());
            }
        }

        info!(
            score,
            level = %level,
            volatility,
            concentration = concentration_risk,
            warnings = warnings.len(),
            "Portfolio risk assessed"
        );

        PortfolioRiskAssessment {
            score,
            level,
            var_95,
            expected_shortfall,
            max_drawdown,
            concentration_risk,
            correlation_risk,
            strategy_risks,
            warnings,
            recommendations,
        }
    }

    /// Peak-to-trough drawdown of the pooled return series, or `min(0.5, 2.5σ)` without history
    pub fn estimate_max_drawdown(&self, volatility: f64, history: Option<&ReturnHistory>) -> f64 {
        if let Some(history) = history {
            let mut cumulative = 1.0;
            let mut peak = f64::NEG_INFINITY;
            let mut worst: Option<f64> = None;

            // Pool in id order so the result does not depend on map ordering
            let mut ids: Vec<&String> = history.keys().collect();
            ids.sort();
            for id in ids {
                for r in &history[id] {
                    cumulative *= 1.0 + r;
                    peak = peak.max(cumulative);
                    let drawdown = if peak > 0.0 { (peak - cumulative) / peak } else { 0.0 };
                    worst = Some(worst.map_or(drawdown, |w: f64| w.max(drawdown)));
                }
            }

            if let Some(worst) = worst {
                return worst;
            }
        }

        (volatility * 2.5).min(0.5)
    }

    /// Sharpe, Sortino, Calmar and return per unit of volatility
    pub fn calculate_risk_adjusted_return(&self, expected_return: f64, volatility: f64) -> RiskAdjustedReturn {
        let rf = self.config.risk_free_rate;
        let excess = expected_return - rf;

        let downside = volatility * 0.7;
        let drawdown = self.estimate_max_drawdown(volatility, None);

        RiskAdjustedReturn {
            sharpe_ratio: if volatility > 0.0 { excess / volatility } else { 0.0 },
            sortino_ratio: if downside > 0.0 { excess / downside } else { 0.0 },
            calmar_ratio: if drawdown > 0.0 { expected_return / drawdown } else { 0.0 },
            return_per_risk: if volatility > 0.0 { expected_return / volatility } else { 0.0 },
        }
    }

    /// Fixed limits for each tolerance profile
    pub fn get_risk_limits(tolerance: RiskTolerance) -> RiskLimits {
        match tolerance {
            RiskTolerance::Conservative => RiskLimits {
                max_volatility: 0.15,
                max_single_allocation: 0.40,
                max_risk_score: 40.0,
                min_sharpe: 1.0,
                max_drawdown: 0.10,
            },
            RiskTolerance::Moderate => RiskLimits {
                max_volatility: 0.25,
                max_single_allocation: 0.50,
                max_risk_score: 60.0,
                min_sharpe: 0.5,
                max_drawdown: 0.20,
            },
            RiskTolerance::Aggressive => RiskLimits {
                max_volatility: 0.40,
                max_single_allocation: 0.70,
                max_risk_score: 80.0,
                min_sharpe: 0.0,
                max_drawdown: 0.35,
            },
        }
    }
}

fn clamp_component(value: f64) -> f64 {
    value.clamp(0.0, MAX_COMPONENT)
}

/// Format a fraction as a percentage with one decimal
fn percent(value: f64) -> String {
    format!("{:.1}%", value * 100.0)
}

/// Position-weighted average pairwise correlation
fn correlation_risk(input: &OptimizationInput, weights: &[f64], concentration: f64) -> f64 {
    let n = weights.len();
    if n <= 1 || concentration >= 1.0 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            total += weights[i] * weights[j] * input.correlation.get(i, j);
        }
    }
    total / (1.0 - concentration)
}

fn limit_breaches(
    tolerance: RiskTolerance,
    limits: &RiskLimits,
    volatility: f64,
    score: f64,
    max_drawdown: f64,
    sharpe: f64,
) -> Vec<String> {
    let mut warnings = Vec::new();

    if volatility > limits.max_volatility {
        warnings.push(format!(
            "Portfolio volatility ({}) exceeds the {} limit of {}",
            percent(volatility),
            tolerance,
            percent(limits.max_volatility)
        ));
    }
    if score > limits.max_risk_score {
        warnings.push(format!(
            "Risk score {:.1} exceeds the {} limit of {:.0}",
            score, tolerance, limits.max_risk_score
        ));
    }
    if max_drawdown > limits.max_drawdown {
        warnings.push(format!(
            "Estimated max drawdown ({}) exceeds the {} limit of {}",
            percent(max_drawdown),
            tolerance,
            percent(limits.max_drawdown)
        ));
    }
    if sharpe < limits.min_sharpe {
        warnings.push(format!(
            "Sharpe ratio {:.2} is below the {} minimum of {:.1}",
            sharpe, tolerance, limits.min_sharpe
        ));
    }

    warnings
}
