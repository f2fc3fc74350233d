//! Per-strategy yield forecasting
//!
//! Each strategy gets two models: gradient boosting for the 7-day horizon and
//! a random forest for the 30-day horizon, each with its own scaler. Without
//! a trained model the forecaster falls back to a mean-reversion heuristic.

pub mod features;
pub mod synthetic;
pub mod trees;

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use yieldflow_dataplane::{MarketSnapshot, YieldHistory, YieldObservation};

use crate::config::ForecastConfig;
use crate::error::{OptimizerError, Result};
use crate::linalg::{mean, sample_std};
use crate::types::{PredictionModel, TrainingReport, Trend, YieldPrediction};

use features::build_features;
use trees::{r2_score, GradientBoostingRegressor, RandomForestRegressor, StandardScaler};

pub const SHORT_HORIZON: usize = 7;
pub const LONG_HORIZON: usize = 30;

/// Minimum series length regardless of the configured lookback
const MIN_SERIES_LEN: usize = 14;

/// Relative change separating a trend from noise
const TREND_THRESHOLD: f64 = 0.005;

const MIN_CONFIDENCE: f64 = 0.3;
const HEURISTIC_CONFIDENCE: f64 = 0.5;

struct TrainedModels {
    feature_names: Vec<&'static str>,
    short_scaler: StandardScaler,
    short_model: GradientBoostingRegressor,
    long_scaler: StandardScaler,
    long_model: RandomForestRegressor,
}

/// Yield forecaster
pub struct YieldForecaster {
    config: ForecastConfig,
    lookback_days: usize,
    models: DashMap<String, Arc<TrainedModels>>,
}

impl YieldForecaster {
    pub fn new(config: &ForecastConfig, lookback_days: usize) -> Self {
        Self {
            config: config.clone(),
            lookback_days,
            models: DashMap::new(),
        }
    }

    pub fn is_trained(&self, strategy_id: &str) -> bool {
        self.models.contains_key(strategy_id)
    }

    /// Fit both horizons on `series`.
    ///
    /// Too little data leaves the strategy untrained and returns
    /// `InsufficientData`; predictions then use the heuristic.
    pub fn train(
        &self,
        strategy_id: &str,
        series: &[YieldObservation],
        market: Option<&MarketSnapshot>,
    ) -> Result<TrainingReport> {
        info!(strategy = %strategy_id, observations = series.len(), "Training yield forecaster");

        let required = self.lookback_days.max(MIN_SERIES_LEN);
        if series.len() < required {
            self.models.remove(strategy_id);
            warn!(
                strategy = %strategy_id,
                samples = series.len(),
                required,
                "Insufficient data for training"
            );
            return Err(OptimizerError::insufficient_data(strategy_id, series.len(), required));
        }

        let frame = build_features(series, market);

        // Rows need both targets
        let usable = series.len().saturating_sub(LONG_HORIZON);
        let x: Vec<Vec<f64>> = frame.rows[..usable].to_vec();
        let y_short: Vec<f64> = (0..usable).map(|i| series[i + SHORT_HORIZON].apy).collect();
        let y_long: Vec<f64> = (0..usable).map(|i| series[i + LONG_HORIZON].apy).collect();

        if usable < self.config.min_training_rows {
            self.models.remove(strategy_id);
            warn!(
                strategy = %strategy_id,
                samples = usable,
                required = self.config.min_training_rows,
                "Not enough samples after target creation"
            );
            return Err(OptimizerError::insufficient_data(
                strategy_id,
                usable,
                self.config.min_training_rows,
            ));
        }

        let short_scaler = StandardScaler::fit(&x);
        let long_scaler = StandardScaler::fit(&x);
        let x_short = short_scaler.transform(&x);
        let x_long = long_scaler.transform(&x);

        let mut short_model = GradientBoostingRegressor::new(
            self.config.boosting_estimators,
            self.config.boosting_max_depth,
            self.config.learning_rate,
        );
        short_model.fit(&x_short, &y_short);

        let mut long_model = RandomForestRegressor::new(
            self.config.forest_estimators,
            self.config.forest_max_depth,
            self.config.random_seed,
        );
        long_model.fit(&x_long, &y_long);

        let report = TrainingReport {
            strategy_id: strategy_id.to_string(),
            r2_7d: r2_score(&y_short, &short_model.predict(&x_short)),
            r2_30d: r2_score(&y_long, &long_model.predict(&x_long)),
            samples: usable,
        };

        self.models.insert(
            strategy_id.to_string(),
            Arc::new(TrainedModels {
                feature_names: frame.names,
                short_scaler,
                short_model,
                long_scaler,
                long_model,
            }),
        );

        info!(
            strategy = %strategy_id,
            r2_7d = report.r2_7d,
            r2_30d = report.r2_30d,
            samples = report.samples,
            "Training complete"
        );

        Ok(report)
    }

    /// Forecast both horizons from the most recent observations
    pub fn predict(
        &self,
        strategy_id: &str,
        recent: &[YieldObservation],
        market: Option<&MarketSnapshot>,
    ) -> YieldPrediction {
        let models = self.models.get(strategy_id).map(|m| Arc::clone(m.value()));

        let (Some(models), Some(last)) = (models, recent.last()) else {
            return heuristic_prediction(strategy_id, recent);
        };

        let frame = build_features(recent, market);
        if frame.names != models.feature_names {
            debug!(
                strategy = %strategy_id,
                "Feature set differs from training, using heuristic prediction"
            );
            return heuristic_prediction(strategy_id, recent);
        }

        let Some(row) = frame.rows.last() else {
            return heuristic_prediction(strategy_id, recent);
        };

        let predicted_7d = models
            .short_model
            .predict_row(&models.short_scaler.transform_row(row))
            .max(0.0);
        let predicted_30d = models
            .long_model
            .predict_row(&models.long_scaler.transform_row(row))
            .max(0.0);

        let tail: Vec<f64> = recent
            .iter()
            .rev()
            .take(SHORT_HORIZON)
            .map(|o| o.apy)
            .collect();
        let confidence = if tail.len() < 2 {
            MIN_CONFIDENCE
        } else {
            (1.0 - sample_std(&tail) * 10.0).clamp(MIN_CONFIDENCE, 1.0)
        };

        let factors: BTreeMap<String, f64> = models
            .feature_names
            .iter()
            .zip(models.short_model.feature_importances())
            .map(|(name, importance)| (name.to_string(), importance))
            .collect();

        YieldPrediction {
            strategy_id: strategy_id.to_string(),
            current_value: last.apy,
            predicted_7d,
            predicted_30d,
            confidence,
            trend: determine_trend(last.apy, predicted_7d, predicted_30d),
            factors,
            model: PredictionModel::Trained,
        }
    }

    /// Seeded synthetic history for a strategy without real observations
    pub fn generate_synthetic_history(&self, base_apy: f64, volatility: f64, days: usize) -> YieldHistory {
        synthetic::generate_history(base_apy, volatility, days, self.config.random_seed)
    }
}

/// Mean-reversion forecast toward the 7-day and full-window averages
pub fn heuristic_prediction(strategy_id: &str, recent: &[YieldObservation]) -> YieldPrediction {
    let Some(last) = recent.last() else {
        return YieldPrediction {
            strategy_id: strategy_id.to_string(),
            current_value: 0.0,
            predicted_7d: 0.0,
            predicted_30d: 0.0,
            confidence: 0.0,
            trend: Trend::Stable,
            factors: BTreeMap::new(),
            model: PredictionModel::Heuristic,
        };
    };

    let apy: Vec<f64> = recent.iter().map(|o| o.apy).collect();
    let current = last.apy;
    let ma_short = mean(&apy[apy.len().saturating_sub(SHORT_HORIZON)..]);
    let ma_all = mean(&apy);

    let predicted_7d = (current + ma_short) / 2.0;
    let predicted_30d = (current + ma_all) / 2.0;

    YieldPrediction {
        strategy_id: strategy_id.to_string(),
        current_value: current,
        predicted_7d,
        predicted_30d,
        confidence: HEURISTIC_CONFIDENCE,
        trend: determine_trend(current, predicted_7d, predicted_30d),
        factors: BTreeMap::from([("moving_average".to_string(), 1.0)]),
        model: PredictionModel::Heuristic,
    }
}

/// Up or down only when both horizons move past the threshold together
pub fn determine_trend(current: f64, predicted_7d: f64, predicted_30d: f64) -> Trend {
    let change = |p: f64| if current > 0.0 { (p - current) / current } else { 0.0 };
    let short = change(predicted_7d);
    let long = change(predicted_30d);

    if short > TREND_THRESHOLD && long > TREND_THRESHOLD {
        Trend::Up
    } else if short < -TREND_THRESHOLD && long < -TREND_THRESHOLD {
        Trend::Down
    } else {
        Trend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OptimizerConfig;
    use chrono::Utc;

    fn forecaster() -> YieldForecaster {
        let config = OptimizerConfig::default();
        YieldForecaster::new(&config.forecast, config.optimization.lookback_days)
    }

    fn flat(values: &[f64]) -> Vec<YieldObservation> {
        values
            .iter()
            .map(|v| YieldObservation {
                timestamp: Utc::now(),
                apy: *v,
                tvl: None,
            })
            .collect()
    }

    #[test]
    fn test_train_on_synthetic_history() {
        let f = forecaster();
        let history = f.generate_synthetic_history(0.12, 0.1, 60);

        let report = f.train("lending", &history, None).unwrap();
        assert_eq!(report.samples, 30);
        assert!(report.r2_7d <= 1.0);
        assert!(f.is_trained("lending"));

        let prediction = f.predict("lending", &history[30..], None);
        assert_eq!(prediction.model, PredictionModel::Trained);
        assert!(prediction.predicted_7d >= 0.0 && prediction.predicted_30d >= 0.0);
        assert!((0.3..=1.0).contains(&prediction.confidence));
        assert_eq!(prediction.factors.len(), 7);
        let total: f64 = prediction.factors.values().sum();
        assert!(total == 0.0 || (total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_series_is_insufficient() {
        let f = forecaster();
        let history = f.generate_synthetic_history(0.12, 0.1, 20);

        let err = f.train("lending", &history, None).unwrap_err();
        assert!(matches!(
            err,
            OptimizerError::InsufficientData { samples: 20, required: 30, .. }
        ));
        assert!(!f.is_trained("lending"));
        assert_eq!(f.predict("lending", &history, None).model, PredictionModel::Heuristic);
    }

    #[test]
    fn test_too_few_rows_after_targets() {
        let f = forecaster();
        let history = f.generate_synthetic_history(0.12, 0.1, 35);

        let err = f.train("lending", &history, None).unwrap_err();
        assert!(matches!(err, OptimizerError::InsufficientData { samples: 5, required: 10, .. }));
    }

    #[test]
    fn test_heuristic_prediction() {
        let prediction = heuristic_prediction("x", &flat(&[0.10, 0.10, 0.10, 0.20]));

        assert_eq!(prediction.current_value, 0.20);
        assert!((prediction.predicted_7d - 0.1625).abs() < 1e-12);
        assert!((prediction.predicted_30d - 0.1625).abs() < 1e-12);
        assert_eq!(prediction.confidence, 0.5);
        assert_eq!(prediction.trend, Trend::Down);
        assert_eq!(prediction.factors["moving_average"], 1.0);
    }

    #[test]
    fn test_heuristic_on_empty_series() {
        let prediction = heuristic_prediction("x", &[]);
        assert_eq!(prediction.current_value, 0.0);
        assert_eq!(prediction.confidence, 0.0);
        assert_eq!(prediction.trend, Trend::Stable);
        assert!(prediction.factors.is_empty());
    }

    #[test]
    fn test_trend_thresholds() {
        assert_eq!(determine_trend(0.1, 0.101, 0.102), Trend::Up);
        assert_eq!(determine_trend(0.1, 0.1004, 0.102), Trend::Stable);
        assert_eq!(determine_trend(0.1, 0.09, 0.08), Trend::Down);
        assert_eq!(determine_trend(0.0, 0.5, 0.5), Trend::Stable);
    }
}
