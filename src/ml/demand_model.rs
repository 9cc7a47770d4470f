/*!
 * # Demand Model
 *
 * One regression forest per granularity, trained on `(FeatureVector, actual)`
 * rows and serialised as a versioned artifact. Sparse data is expected: any
 * training set, even an empty one, produces a model; small sets simply yield
 * low confidence. A model with no samples refuses to infer, so callers fall
 * back to the heuristic.
 */

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;
use utoipa::ToSchema;

use super::features::{FeatureSchema, FeatureVector, TrainingSet};
use super::random_forest::{ForestConfig, RandomForest};
use crate::errors::ServiceError;
use crate::models::Granularity;

/// Bumped whenever the serialised layout changes; older artifacts are rejected.
pub const ARTIFACT_SCHEMA_VERSION: u32 = 1;

const CV_FOLDS: usize = 3;

/// Point estimate from a model call. `quantity` is raw: the caller rounds and floors it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelOutput {
    pub quantity: f64,
    pub confidence: f64,
    pub raw_details: ModelDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelDetails {
    pub ensemble_size: usize,
    pub ensemble_std: f64,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RegressionMetrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return Self {
                mae: 0.0,
                rmse: 0.0,
                r2: 0.0,
            };
        }
        let pairs = actual.iter().zip(predicted.iter()).take(n);
        let (abs_sum, sq_sum) = pairs.fold((0.0, 0.0), |(a, s), (y, p)| {
            (a + (y - p).abs(), s + (y - p).powi(2))
        });
        let mean = actual[..n].iter().sum::<f64>() / n as f64;
        let ss_tot: f64 = actual[..n].iter().map(|y| (y - mean).powi(2)).sum();
        let r2 = if ss_tot > 0.0 {
            1.0 - sq_sum / ss_tot
        } else if sq_sum == 0.0 {
            1.0
        } else {
            0.0
        };
        Self {
            mae: abs_sum / n as f64,
            rmse: (sq_sum / n as f64).sqrt(),
            r2,
        }
    }

    fn mean_of(folds: &[RegressionMetrics]) -> Self {
        let n = folds.len().max(1) as f64;
        Self {
            mae: folds.iter().map(|m| m.mae).sum::<f64>() / n,
            rmse: folds.iter().map(|m| m.rmse).sum::<f64>() / n,
            r2: folds.iter().map(|m| m.r2).sum::<f64>() / n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrainingMetrics {
    /// In-sample fit
    pub training: RegressionMetrics,
    /// Mean over expanding-window time-series folds, when there was enough data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<RegressionMetrics>,
    #[serde(default)]
    pub cv_folds: usize,
}

/// Descriptive view of a trained artifact, returned by training calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelSummary {
    pub granularity: Granularity,
    pub schema_version: u32,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub metrics: TrainingMetrics,
    pub feature_importances: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    pub schema_version: u32,
    pub granularity: Granularity,
    pub feature_names: Vec<String>,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub min_training_samples: usize,
    pub metrics: TrainingMetrics,
    forest: RandomForest,
}

impl TrainedModel {
    pub fn fit(
        set: &TrainingSet,
        config: &ForestConfig,
        min_training_samples: usize,
    ) -> Result<Self, ServiceError> {
        let granularity = set.granularity;
        let schema = FeatureSchema::for_granularity(granularity);
        for example in &set.examples {
            example.features.check_shape(granularity)?;
        }

        let x: Vec<Vec<f64>> = set
            .examples
            .iter()
            .map(|e| e.features.values.clone())
            .collect();
        let y: Vec<f64> = set.examples.iter().map(|e| e.target).collect();

        let forest = RandomForest::fit(&x, &y, schema.width(), config)?;
        let fitted: Vec<f64> = x
            .iter()
            .map(|row| forest.predict(row).map(|p| p.mean))
            .collect::<Result<_, _>>()?;
        let training = RegressionMetrics::compute(&y, &fitted);
        let (cross_validation, cv_folds) = match time_series_cv(&x, &y, schema.width(), config)? {
            Some((metrics, folds)) => (Some(metrics), folds),
            None => (None, 0),
        };

        debug!(
            %granularity,
            samples = y.len(),
            mae = training.mae,
            r2 = training.r2,
            "fitted demand model"
        );

        Ok(Self {
            schema_version: ARTIFACT_SCHEMA_VERSION,
            granularity,
            feature_names: schema.names().iter().map(|s| s.to_string()).collect(),
            trained_at: Utc::now(),
            sample_count: y.len(),
            min_training_samples,
            metrics: TrainingMetrics {
                training,
                cross_validation,
                cv_folds,
            },
            forest,
        })
    }

    /// Raw forest estimate plus a confidence in `[0, 1]`.
    ///
    /// Confidence multiplies tree agreement, `1 / (1 + std / (|mean| + 1))`,
    /// by how well the training set covered the minimum sample count.
    pub fn infer(&self, features: &FeatureVector) -> Result<ModelOutput, ServiceError> {
        features.check_shape(self.granularity)?;
        if self.sample_count == 0 {
            return Err(ServiceError::ModelUntrained(self.granularity));
        }
        let ensemble = self.forest.predict(&features.values)?;
        if ensemble.n_trees == 0 {
            return Err(ServiceError::ModelUntrained(self.granularity));
        }

        let agreement = 1.0 / (1.0 + ensemble.std / (ensemble.mean.abs() + 1.0));
        let coverage = if self.min_training_samples == 0 {
            1.0
        } else {
            (self.sample_count as f64 / self.min_training_samples as f64).min(1.0)
        };
        let raw = agreement * coverage;
        let confidence = if raw.is_finite() {
            raw.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(ModelOutput {
            quantity: ensemble.mean,
            confidence,
            raw_details: ModelDetails {
                ensemble_size: ensemble.n_trees,
                ensemble_std: ensemble.std,
                trained_at: self.trained_at,
                sample_count: self.sample_count,
            },
        })
    }

    pub fn feature_importances(&self) -> BTreeMap<String, f64> {
        self.feature_names
            .iter()
            .cloned()
            .zip(self.forest.feature_importances().iter().copied())
            .collect()
    }

    pub fn summary(&self, artifact_path: Option<String>) -> ModelSummary {
        ModelSummary {
            granularity: self.granularity,
            schema_version: self.schema_version,
            feature_names: self.feature_names.clone(),
            trained_at: self.trained_at,
            sample_count: self.sample_count,
            metrics: self.metrics.clone(),
            feature_importances: self.feature_importances(),
            artifact_path,
        }
    }
}

/// Expanding-window folds: each fold trains on everything before its test slice.
fn time_series_cv(
    x: &[Vec<f64>],
    y: &[f64],
    width: usize,
    config: &ForestConfig,
) -> Result<Option<(RegressionMetrics, usize)>, ServiceError> {
    let n = y.len();
    if n < 2 * CV_FOLDS {
        return Ok(None);
    }
    let test_size = n / (CV_FOLDS + 1);
    let mut folds = Vec::with_capacity(CV_FOLDS);
    for fold in 0..CV_FOLDS {
        let test_start = n - (CV_FOLDS - fold) * test_size;
        let test_end = test_start + test_size;
        let forest = RandomForest::fit(&x[..test_start], &y[..test_start], width, config)?;
        let predicted: Vec<f64> = x[test_start..test_end]
            .iter()
            .map(|row| forest.predict(row).map(|p| p.mean))
            .collect::<Result<_, _>>()?;
        folds.push(RegressionMetrics::compute(&y[test_start..test_end], &predicted));
    }
    Ok(Some((RegressionMetrics::mean_of(&folds), folds.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::TrainingExample;
    use crate::models::ItemId;
    use chrono::NaiveDate;

    fn config() -> ForestConfig {
        ForestConfig {
            n_trees: 20,
            ..ForestConfig::daily()
        }
    }

    fn daily_set(rows: &[([f64; 3], f64)]) -> TrainingSet {
        let mut set = TrainingSet::new(Granularity::Daily);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        set.extend(rows.iter().enumerate().map(|(i, (lags, target))| TrainingExample {
            item_id: ItemId(1),
            period: start + chrono::Days::new(i as u64),
            features: FeatureVector::new(FeatureSchema::Daily, lags.to_vec()).unwrap(),
            target: *target,
        }));
        set
    }

    #[test]
    fn empty_set_trains_but_refuses_to_infer() {
        let model = TrainedModel::fit(&TrainingSet::new(Granularity::Monthly), &config(), 5).unwrap();
        assert_eq!(model.sample_count, 0);
        let err = model
            .infer(&FeatureVector::zeros(FeatureSchema::Monthly))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ModelUntrained(Granularity::Monthly)));
        assert!(err.is_model_unavailable());
    }

    #[test]
    fn sparse_data_lowers_confidence() {
        let rows = [([10.0, 8.0, 12.0], 10.0), ([10.0, 10.0, 8.0], 10.0)];
        let sparse = TrainedModel::fit(&daily_set(&rows), &config(), 5).unwrap();
        let dense = TrainedModel::fit(&daily_set(&rows), &config(), 1).unwrap();
        let features = FeatureVector::new(FeatureSchema::Daily, vec![10.0, 8.0, 12.0]).unwrap();

        let sparse_out = sparse.infer(&features).unwrap();
        let dense_out = dense.infer(&features).unwrap();
        assert!((sparse_out.confidence - dense_out.confidence * 0.4).abs() < 1e-9);
        assert!((dense_out.quantity - 10.0).abs() < 1e-9);
    }

    #[test]
    fn wrong_schema_is_rejected_at_inference() {
        let model = TrainedModel::fit(&daily_set(&[([1.0, 1.0, 1.0], 1.0)]), &config(), 1).unwrap();
        let err = model
            .infer(&FeatureVector::zeros(FeatureSchema::Monthly))
            .unwrap_err();
        assert!(matches!(err, ServiceError::ModelShapeMismatch(_)));
    }

    #[test]
    fn cross_validation_runs_with_enough_rows() {
        let rows: Vec<([f64; 3], f64)> = (0..12)
            .map(|i| ([i as f64, (i + 1) as f64, (i + 2) as f64], (i + 1) as f64))
            .collect();
        let model = TrainedModel::fit(&daily_set(&rows), &config(), 5).unwrap();
        assert_eq!(model.metrics.cv_folds, 3);
        assert!(model.metrics.cross_validation.is_some());
        assert_eq!(model.summary(None).feature_names, vec!["lag1", "lag2", "lag3"]);
    }

    #[test]
    fn metrics_on_perfect_fit() {
        let m = RegressionMetrics::compute(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.r2, 1.0);
    }
}
