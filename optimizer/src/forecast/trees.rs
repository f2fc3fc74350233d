//! Regression tree ensembles and feature scaling
//!
//! CART trees split on squared error. Gradient boosting fits trees to the
//! residuals of a mean baseline; the random forest averages trees grown on
//! bootstrap resamples drawn from a seeded generator.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use statrs::statistics::Statistics;

use crate::linalg::mean;

/// Column-wise standardization to zero mean and unit variance
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map_or(0, |r| r.len());

        let (mean, scale) = (0..width)
            .map(|j| {
                let column: Vec<f64> = rows.iter().map(|r| r[j]).collect();
                let std = column.iter().population_std_dev();
                // Constant columns pass through centred
                (column.iter().mean(), if std > 0.0 { std } else { 1.0 })
            })
            .unzip();

        Self { mean, scale }
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(self.scale.iter()))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Squared-error CART regression tree
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total squared-error reduction per feature
    impurity_decrease: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit on the rows of `x` selected by `indices` (repeats allowed)
    pub fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], max_depth: usize) -> Self {
        let width = x.first().map_or(0, |r| r.len());
        let mut tree = Self {
            nodes: Vec::new(),
            impurity_decrease: vec![0.0; width],
        };
        tree.grow(x, y, indices.to_vec(), 0, max_depth);
        tree
    }

    fn grow(&mut self, x: &[Vec<f64>], y: &[f64], indices: Vec<usize>, depth: usize, max_depth: usize) -> usize {
        let values: Vec<f64> = indices.iter().map(|&i| y[i]).collect();
        let node_mean = mean(&values);

        let split = if depth < max_depth && indices.len() >= 2 {
            best_split(x, y, &indices)
        } else {
            None
        };

        let Some(split) = split else {
            self.nodes.push(Node::Leaf { value: node_mean });
            return self.nodes.len() - 1;
        };

        self.impurity_decrease[split.feature] += split.gain;

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x[i][split.feature] <= split.threshold);

        // Reserve the slot so children land after their parent
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { value: node_mean });
        let left = self.grow(x, y, left_idx, depth + 1, max_depth);
        let right = self.grow(x, y, right_idx, depth + 1, max_depth);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    /// Impurity decrease per feature, normalized to sum to 1 (all zero for a stump)
    pub fn feature_importances(&self) -> Vec<f64> {
        normalize(&self.impurity_decrease)
    }
}

fn sse(sum: f64, sum_sq: f64, count: f64) -> f64 {
    if count == 0.0 {
        0.0
    } else {
        sum_sq - sum * sum / count
    }
}

fn best_split(x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> Option<BestSplit> {
    let width = x.first().map_or(0, |r| r.len());
    let n = indices.len() as f64;
    let total: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();
    let parent = sse(total, total_sq, n);

    let mut best: Option<BestSplit> = None;
    let mut order = indices.to_vec();

    for feature in 0..width {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..order.len() - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if here == next {
                continue;
            }

            let left_n = (k + 1) as f64;
            let children = sse(left_sum, left_sq, left_n) + sse(total - left_sum, total_sq - left_sq, n - left_n);
            let gain = parent - children;

            if gain > 1e-15 && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(BestSplit {
                    feature,
                    threshold: 0.5 * (here + next),
                    gain,
                });
            }
        }
    }

    best
}

fn normalize(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total > 0.0 {
        values.iter().map(|v| v / total).collect()
    } else {
        vec![0.0; values.len()]
    }
}

/// Average per-tree importances over trees that split at least once
fn ensemble_importances(trees: &[RegressionTree], width: usize) -> Vec<f64> {
    let mut sum = vec![0.0; width];
    for tree in trees {
        let imp = tree.feature_importances();
        if imp.iter().sum::<f64>() > 0.0 {
            for (s, v) in sum.iter_mut().zip(imp) {
                *s += v;
            }
        }
    }
    normalize(&sum)
}

/// Least-squares gradient boosting
#[derive(Debug, Clone)]
pub struct GradientBoostingRegressor {
    n_estimators: usize,
    max_depth: usize,
    learning_rate: f64,
    init: f64,
    trees: Vec<RegressionTree>,
    width: usize,
}

impl GradientBoostingRegressor {
    pub fn new(n_estimators: usize, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            n_estimators,
            max_depth,
            learning_rate,
            init: 0.0,
            trees: Vec::new(),
            width: 0,
        }
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) {
        self.width = x.first().map_or(0, |r| r.len());
        self.init = mean(y);
        self.trees.clear();

        let indices: Vec<usize> = (0..y.len()).collect();
        let mut prediction = vec![self.init; y.len()];

        for _ in 0..self.n_estimators {
            let residual: Vec<f64> = y.iter().zip(prediction.iter()).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::fit(x, &residual, &indices, self.max_depth);
            for (p, row) in prediction.iter_mut().zip(x.iter()) {
                *p += self.learning_rate * tree.predict_row(row);
            }
            self.trees.push(tree);
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        self.init
            + self
                .trees
                .iter()
                .map(|t| self.learning_rate * t.predict_row(row))
                .sum::<f64>()
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|r| self.predict_row(r)).collect()
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        ensemble_importances(&self.trees, self.width)
    }
}

/// Bagged regression trees
#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    n_estimators: usize,
    max_depth: usize,
    seed: u64,
    trees: Vec<RegressionTree>,
    width: usize,
}

impl RandomForestRegressor {
    pub fn new(n_estimators: usize, max_depth: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            max_depth,
            seed,
            trees: Vec::new(),
            width: 0,
        }
    }

    pub fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) {
        self.width = x.first().map_or(0, |r| r.len());
        self.trees.clear();
        if y.is_empty() {
            return;
        }

        let mut rng = ChaCha20Rng::seed_from_u64(self.seed);
        let n = y.len();
        for _ in 0..self.n_estimators {
            let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            self.trees.push(RegressionTree::fit(x, y, &sample, self.max_depth));
        }
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|r| self.predict_row(r)).collect()
    }

    pub fn feature_importances(&self) -> Vec<f64> {
        ensemble_importances(&self.trees, self.width)
    }
}

/// Coefficient of determination
pub fn r2_score(y: &[f64], predicted: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let ss_res: f64 = y.iter().zip(predicted.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot = y.iter().population_variance() * y.len() as f64;
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
