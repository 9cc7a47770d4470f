/*!
 * # Regression Forest
 *
 * Bagged CART regression trees. Each tree is grown on a bootstrap sample
 * (seeded, so fits are reproducible) by greedily choosing the split that
 * most reduces squared error. The forest prediction is the mean over trees;
 * the spread across trees is returned alongside it as a dispersion measure.
 */

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;

const MIN_GAIN: f64 = 1e-12;

/// Hyper-parameters for one forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ForestConfig {
    /// Number of trees in the ensemble
    #[validate(custom = "validate_at_least_one")]
    pub n_trees: usize,
    /// Maximum depth of each tree (root is depth 0)
    #[validate(custom = "validate_at_least_one")]
    pub max_depth: usize,
    /// Nodes with fewer samples are not split
    #[validate(custom = "validate_min_split")]
    pub min_samples_split: usize,
    /// Every leaf keeps at least this many samples
    #[validate(custom = "validate_at_least_one")]
    pub min_samples_leaf: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl ForestConfig {
    pub fn daily() -> Self {
        Self {
            n_trees: 300,
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
            seed: default_seed(),
        }
    }

    pub fn monthly() -> Self {
        Self {
            n_trees: 200,
            max_depth: 8,
            min_samples_split: 3,
            min_samples_leaf: 1,
            seed: default_seed(),
        }
    }
}

fn default_seed() -> u64 {
    42
}

fn validate_at_least_one(value: usize) -> Result<(), ValidationError> {
    if value == 0 {
        let mut err = ValidationError::new("at_least_one");
        err.message = Some("must be at least 1".into());
        return Err(err);
    }
    Ok(())
}

fn validate_min_split(value: usize) -> Result<(), ValidationError> {
    if value < 2 {
        let mut err = ValidationError::new("min_samples_split");
        err.message = Some("min_samples_split must be at least 2".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
        samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Arena-backed regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value, .. }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct Grower<'a> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    n_features: usize,
    config: &'a ForestConfig,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<'a> Grower<'a> {
    fn grow(&mut self, indices: Vec<usize>, depth: usize) -> usize {
        let n = indices.len();
        let (sum, sum_sq) = indices.iter().fold((0.0, 0.0), |(s, sq), &i| {
            (s + self.y[i], sq + self.y[i] * self.y[i])
        });
        let mean = if n == 0 { 0.0 } else { sum / n as f64 };
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean,
            samples: n,
        });

        if n == 0 || depth >= self.config.max_depth || n < self.config.min_samples_split {
            return node;
        }
        let sse = sum_sq - sum * sum / n as f64;
        if sse <= MIN_GAIN {
            return node;
        }

        if let Some(split) = self.best_split(&indices, sum, sum_sq, sse) {
            let (left, right): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| self.x[i][split.feature] <= split.threshold);
            self.importances[split.feature] += split.gain;
            let left = self.grow(left, depth + 1);
            let right = self.grow(right, depth + 1);
            self.nodes[node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
        }
        node
    }

    fn best_split(&self, indices: &[usize], sum: f64, sum_sq: f64, sse: f64) -> Option<Split> {
        let n = indices.len();
        let min_leaf = self.config.min_samples_leaf.max(1);
        let mut best: Option<Split> = None;

        for feature in 0..self.n_features {
            let mut order = indices.to_vec();
            order.sort_by(|&a, &b| {
                self.x[a][feature]
                    .partial_cmp(&self.x[b][feature])
                    .unwrap_or(Ordering::Equal)
            });

            let (mut left_sum, mut left_sq) = (0.0, 0.0);
            for pos in 0..n - 1 {
                let i = order[pos];
                left_sum += self.y[i];
                left_sq += self.y[i] * self.y[i];

                let here = self.x[i][feature];
                let next = self.x[order[pos + 1]][feature];
                if here >= next {
                    continue;
                }
                let left_n = pos + 1;
                let right_n = n - left_n;
                if left_n < min_leaf || right_n < min_leaf {
                    continue;
                }

                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let child_sse = (left_sq - left_sum * left_sum / left_n as f64)
                    + (right_sq - right_sum * right_sum / right_n as f64);
                let gain = sse - child_sse;
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Split {
                        feature,
                        threshold: (here + next) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

/// Mean and spread of the per-tree predictions for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsemblePrediction {
    pub mean: f64,
    pub std: f64,
    pub n_trees: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<RegressionTree>,
    feature_importances: Vec<f64>,
}

impl RandomForest {
    /// Fits a forest on rows of width `n_features`. An empty training set
    /// yields a forest without trees that predicts 0.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        n_features: usize,
        config: &ForestConfig,
    ) -> Result<Self, ServiceError> {
        if x.len() != y.len() {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "{} rows but {} targets",
                x.len(),
                y.len()
            )));
        }
        if let Some(row) = x.iter().find(|row| row.len() != n_features) {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "expected {} features per row, got {}",
                n_features,
                row.len()
            )));
        }

        let n = x.len();
        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::new();
        if n > 0 {
            trees.reserve(config.n_trees);
            for t in 0..config.n_trees {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                let mut grower = Grower {
                    x,
                    y,
                    n_features,
                    config,
                    nodes: Vec::new(),
                    importances: vec![0.0; n_features],
                };
                grower.grow(sample, 0);
                for (total, gained) in importances.iter_mut().zip(grower.importances) {
                    *total += gained;
                }
                trees.push(RegressionTree {
                    nodes: grower.nodes,
                });
            }
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            n_features,
            trees,
            feature_importances: importances,
        })
    }

    pub fn predict(&self, row: &[f64]) -> Result<EnsemblePrediction, ServiceError> {
        if row.len() != self.n_features {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "model expects {} features, got {}",
                self.n_features,
                row.len()
            )));
        }
        if self.trees.is_empty() {
            return Ok(EnsemblePrediction {
                mean: 0.0,
                std: 0.0,
                n_trees: 0,
            });
        }

        let outputs: Vec<f64> = self.trees.iter().map(|tree| tree.predict(row)).collect();
        let n = outputs.len() as f64;
        let mean = outputs.iter().sum::<f64>() / n;
        let variance = outputs.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Ok(EnsemblePrediction {
            mean,
            std: variance.sqrt(),
            n_trees: outputs.len(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalised impurity decrease per feature (all zero if no split was made).
    pub fn feature_importances(&self) -> &[f64] {
        &self.feature_importances
    }

    pub fn trees(&self) -> &[RegressionTree] {
        &self.trees
    }
}
