use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Granularity, ItemId};
use crate::ml::features::FeatureVector;

/// Which predictor produced the number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PredictionSource {
    Model,
    Heuristic,
}

/// Why the heuristic was used instead of the trained model.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FallbackReason {
    /// Artifact missing, corrupt or of the wrong shape
    ModelUnavailable,
    /// Model call failed at runtime
    ModelFailed,
    /// Nothing sold in the lookback window
    InsufficientHistory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Prediction {
    pub item_id: ItemId,
    pub product_label: String,
    pub period_type: Granularity,
    pub period_start: NaiveDate,
    pub predicted_quantity: u64,
    /// In `[0, 1]`
    pub confidence: f64,
    pub input_features: FeatureVector,
    pub generated_at: DateTime<Utc>,
    /// Realised demand, filled once the period has elapsed
    pub actual_quantity: Option<u64>,
    /// Percentage accuracy, present together with `actual_quantity`
    #[serde(default)]
    pub accuracy: Option<f64>,
    pub source: PredictionSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    pub execution_time_ms: f64,
}

/// Direction of the miss once the actual is known.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Bias {
    Over,
    Under,
    Exact,
}

impl Prediction {
    /// Percentage accuracy against the realised quantity, if known.
    pub fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Records the realised quantity and recomputes `accuracy`.
    pub fn set_actual(&mut self, actual: Option<u64>) {
        self.actual_quantity = actual;
        self.accuracy = actual.map(|actual| accuracy_percent(self.predicted_quantity, actual));
    }

    pub fn bias(&self) -> Option<Bias> {
        self.actual_quantity
            .map(|actual| match self.predicted_quantity.cmp(&actual) {
                std::cmp::Ordering::Greater => Bias::Over,
                std::cmp::Ordering::Less => Bias::Under,
                std::cmp::Ordering::Equal => Bias::Exact,
            })
    }

    pub fn is_fallback(&self) -> bool {
        self.source == PredictionSource::Heuristic
    }
}

/// `(1 - |predicted - actual| / max(actual, 1)) * 100`, clamped to `[0, 100]`.
pub fn accuracy_percent(predicted: u64, actual: u64) -> f64 {
    let error = (predicted as f64 - actual as f64).abs();
    let denom = actual.max(1) as f64;
    ((1.0 - error / denom) * 100.0).clamp(0.0, 100.0)
}
