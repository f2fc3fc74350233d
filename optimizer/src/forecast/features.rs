//! Feature construction over a time-ordered yield series

use yieldflow_dataplane::{MarketSnapshot, YieldObservation};

use crate::linalg::{mean, sample_std};

pub const APY_FEATURES: [&str; 5] = ["apy_ma_7", "apy_ma_14", "apy_std_7", "apy_change_1d", "apy_change_7d"];
pub const TVL_FEATURES: [&str; 2] = ["tvl_ma_7", "tvl_change_7d"];
pub const MARKET_FEATURES: [&str; 2] = ["price_change", "volume"];

/// Feature rows aligned with the input series
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub names: Vec<&'static str>,
    pub rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Which optional feature groups a series supports
pub fn feature_names(series: &[YieldObservation], market: Option<&MarketSnapshot>) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = APY_FEATURES.to_vec();
    if has_tvl(series) {
        names.extend(TVL_FEATURES);
    }
    if market.is_some() {
        names.extend(MARKET_FEATURES);
    }
    names
}

fn has_tvl(series: &[YieldObservation]) -> bool {
    !series.is_empty() && series.iter().all(|o| o.tvl.is_some())
}

/// Trailing window ending at `i`, at most `window` long
fn trailing(values: &[f64], i: usize, window: usize) -> &[f64] {
    &values[(i + 1).saturating_sub(window)..=i]
}

/// Build features for every row; values that cannot be computed are 0
pub fn build_features(series: &[YieldObservation], market: Option<&MarketSnapshot>) -> FeatureFrame {
    let names = feature_names(series, market);
    let with_tvl = has_tvl(series);

    let apy: Vec<f64> = series.iter().map(|o| o.apy).collect();
    let tvl: Vec<f64> = series.iter().map(|o| o.tvl.unwrap_or(0.0)).collect();

    let rows = (0..series.len())
        .map(|i| {
            let mut row = vec![
                mean(trailing(&apy, i, 7)),
                mean(trailing(&apy, i, 14)),
                sample_std(trailing(&apy, i, 7)),
                if i >= 1 { apy[i] - apy[i - 1] } else { 0.0 },
                if i >= 7 { apy[i] - apy[i - 7] } else { 0.0 },
            ];

            if with_tvl {
                row.push(mean(trailing(&tvl, i, 7)));
                let change = if i >= 7 && tvl[i - 7] != 0.0 {
                    tvl[i] / tvl[i - 7] - 1.0
                } else {
                    0.0
                };
                row.push(change);
            }

            if let Some(m) = market {
                row.push(m.price_change_24h);
                row.push(m.volume_24h);
            }

            row.into_iter().map(|v| if v.is_finite() { v } else { 0.0 }).collect()
        })
        .collect();

    FeatureFrame { names, rows }
}
