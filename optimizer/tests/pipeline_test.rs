//! Pipeline integration tests
//!
//! Normalizer → allocation → risk, on the reference strategies and on
//! randomly generated strategy sets.

mod common;

use common::*;
use proptest::prelude::*;
use yieldflow_dataplane::StrategyType;
use yieldflow_optimizer::*;

const METHODS: [OptimizationMethod; 4] = [
    OptimizationMethod::MaxSharpe,
    OptimizationMethod::MinVariance,
    OptimizationMethod::RiskParity,
    OptimizationMethod::MeanVariance,
];

fn optimizer() -> AllocationOptimizer {
    AllocationOptimizer::new(&OptimizerConfig::default().optimization)
}

#[test]
fn test_min_variance_keeps_staking_within_bounds() {
    let input = reference_input();
    let result = optimizer().optimize(&input, OptimizationMethod::MinVariance).unwrap();

    let staking = result.allocations["staking"];
    assert!(staking >= 0.1 - 1e-9, "staking below its floor: {}", staking);
    assert!(staking <= 0.5 + 1e-9, "staking above its cap: {}", staking);
    assert!((result.allocations.values().sum::<f64>() - 1.0).abs() < 1e-6);
}

#[test]
fn test_frontier_with_five_points() {
    let input = reference_input();
    let frontier = optimizer().generate_efficient_frontier(&input, 5);

    assert!(frontier.len() <= 5);
    for point in &frontier {
        assert!(point.expected_return >= 0.08 - 1e-6 && point.expected_return <= 0.25 + 1e-6);
        let expected_sharpe = if point.volatility > 0.0 {
            (point.expected_return - RISK_FREE_RATE) / point.volatility
        } else {
            0.0
        };
        assert!((point.sharpe_ratio - expected_sharpe).abs() < 1e-9);
    }
}

#[test]
fn test_rebalance_trades_free_capital_first() {
    let current = allocation(&[("staking", 1.0)]);
    let target = allocation(&[("staking", 0.5), ("lending", 0.5)]);

    let trades = plan_trades(&current, &target, 10_000.0, 0.05);

    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0].strategy_id, "staking");
    assert_eq!(trades[0].action, TradeAction::Decrease);
    assert!((trades[0].weight_change.abs() - 0.5).abs() < 1e-12);
    assert_eq!(trades[1].strategy_id, "lending");
    assert_eq!(trades[1].action, TradeAction::Increase);
    assert!((trades[1].weight_change - 0.5).abs() < 1e-12);
}

#[test]
fn test_excluded_strategy_is_never_a_trade_target() {
    let config = OptimizerConfig::default();
    let mut metrics = reference_metrics();
    metrics[1].volatility = 0.6;

    let current = allocation(&[("staking", 0.5), ("lending", 0.5)]);
    let input = MetricsNormalizer::new(&config).prepare(&metrics, &current, 10_000.0, None, None);
    assert_eq!(input.excluded, vec!["lending".to_string()]);

    let rec = optimizer()
        .recommend_rebalance(&current, &input, OptimizationMethod::MaxSharpe)
        .unwrap();

    let lending: Vec<&Trade> = rec.trades.iter().filter(|t| t.strategy_id == "lending").collect();
    assert_eq!(lending.len(), 1);
    assert_eq!(lending[0].action, TradeAction::Decrease);
    assert_eq!(rec.target_allocations["lending"], 0.0);
}

#[test]
fn test_tolerance_cap_flows_into_allocation() {
    let config = OptimizerConfig::default();
    let cap = RiskEngine::get_risk_limits(RiskTolerance::Conservative).max_single_allocation;
    let input = MetricsNormalizer::new(&config).prepare(
        &reference_metrics(),
        &Allocation::new(),
        10_000.0,
        None,
        Some(cap),
    );

    let result = optimizer().optimize(&input, OptimizationMethod::MaxSharpe).unwrap();
    assert!(result.allocations.values().all(|w| *w <= cap + 1e-9));
}

#[test]
fn test_risk_assessment_of_optimal_portfolio() {
    let config = OptimizerConfig::default();
    let input = reference_input();
    let result = optimizer().optimize(&input, OptimizationMethod::MaxSharpe).unwrap();
    let weights = input.weights_for(&result.allocations);

    let assessment = RiskEngine::new(&config.risk).assess_portfolio(&input, &weights, Some(RiskTolerance::Moderate));

    assert!((0.0..=100.0).contains(&assessment.score));
    assert!((assessment.var_95 - result.expected_volatility * 1.645).abs() < 1e-9);
    assert!((assessment.expected_shortfall - result.expected_volatility * 2.063).abs() < 1e-9);
    assert!(!assessment.recommendations.is_empty());
}

#[test]
fn test_historical_correlation_used_when_complete() {
    let config = OptimizerConfig::default();
    let normalizer = MetricsNormalizer::new(&config);
    let base = normalizer.prepare(&reference_metrics(), &Allocation::new(), 1.0, None, None);
    let history = normalizer.generate_historical_returns(&base.strategies, 90);

    let input = normalizer.prepare(&reference_metrics(), &Allocation::new(), 1.0, Some(history), None);
    assert_eq!(input.correlation.source(), CorrelationSource::Historical);
}

fn arb_strategies() -> impl Strategy<Value = Vec<(f64, f64, u8, usize)>> {
    prop::collection::vec((0.01f64..0.45, 0.01f64..0.29, 0u8..=100, 0usize..3), 2..6)
}

fn build_input(specs: &[(f64, f64, u8, usize)]) -> OptimizationInput {
    let types = [StrategyType::Staking, StrategyType::Lending, StrategyType::Liquidity];
    let metrics: Vec<_> = specs
        .iter()
        .enumerate()
        .map(|(i, (apy, vol, risk, t))| strategy(&format!("s{}", i), types[*t], *apy, *vol, *risk))
        .collect();

    let mut config = OptimizerConfig::default();
    config.strategies.clear();
    MetricsNormalizer::new(&config).prepare(&metrics, &Allocation::new(), 1000.0, None, Some(0.7))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_weights_within_bounds_and_sum_to_one(specs in arb_strategies()) {
        let input = build_input(&specs);
        let optimizer = optimizer();

        for method in METHODS {
            let result = optimizer.optimize(&input, method).unwrap();
            let total: f64 = result.allocations.values().sum();
            prop_assert!((total - 1.0).abs() < 1e-6, "{} weights sum to {}", method, total);

            for s in &input.strategies {
                let w = result.allocations[&s.strategy_id];
                prop_assert!(w >= s.min_allocation - 1e-9 && w <= s.max_allocation + 1e-9);
            }
        }
    }

    #[test]
    fn prop_correlation_is_symmetric_with_unit_diagonal(specs in arb_strategies()) {
        let input = build_input(&specs);
        let corr = &input.correlation;

        for i in 0..corr.len() {
            prop_assert_eq!(corr.get(i, i), 1.0);
            for j in 0..corr.len() {
                prop_assert_eq!(corr.get(i, j), corr.get(j, i));
                prop_assert!((-1.0..=1.0).contains(&corr.get(i, j)));
            }
        }
    }

    #[test]
    fn prop_risk_scores_are_bounded(
        volatility in 0.0f64..2.0,
        age_score in 0.0f64..=1.0,
        tvl_score in 0.0f64..=1.0,
        risk in 0.0f64..=1.0,
        expected_return in 0.0f64..1.5,
    ) {
        let mut s = reference_input().strategies.remove(2);
        s.volatility = volatility;
        s.age_score = age_score;
        s.tvl_score = tvl_score;
        s.risk = risk;
        s.expected_return = expected_return;

        let c = RiskEngine::components(&s);
        for v in [c.volatility_risk, c.contract_risk, c.liquidity_risk, c.specific_risk] {
            prop_assert!((0.0..=25.0).contains(&v));
        }
        prop_assert!((0.0..=100.0).contains(&c.total()));
    }

    #[test]
    fn prop_optimize_is_deterministic(specs in arb_strategies()) {
        let input = build_input(&specs);
        let optimizer = optimizer();
        let a = optimizer.optimize(&input, OptimizationMethod::RiskParity).unwrap();
        let b = optimizer.optimize(&input, OptimizationMethod::RiskParity).unwrap();
        prop_assert_eq!(a.allocations, b.allocations);
    }
}
