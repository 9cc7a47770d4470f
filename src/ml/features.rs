/*!
 * # Feature Builder
 *
 * Turns an aggregated item series into fixed-width feature vectors. The same
 * `FeatureBuilder::build` call produces both the training rows and the
 * inference row, so the two can never drift apart.
 *
 * - daily: `lag1`, `lag2`, `lag3` (totals of the three preceding days)
 * - monthly: `prev_month_total` (total of the preceding calendar month)
 *
 * History before the first known transaction reads as zero.
 */

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::{Granularity, ItemId, ItemSeries};

const DAILY_FEATURES: [&str; 3] = ["lag1", "lag2", "lag3"];
const MONTHLY_FEATURES: [&str; 1] = ["prev_month_total"];

/// Feature layout a vector (and a model) was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeatureSchema {
    Daily,
    Monthly,
}

impl FeatureSchema {
    pub fn for_granularity(granularity: Granularity) -> Self {
        match granularity {
            Granularity::Daily => FeatureSchema::Daily,
            Granularity::Monthly => FeatureSchema::Monthly,
        }
    }

    pub fn granularity(self) -> Granularity {
        match self {
            FeatureSchema::Daily => Granularity::Daily,
            FeatureSchema::Monthly => Granularity::Monthly,
        }
    }

    pub fn names(self) -> &'static [&'static str] {
        match self {
            FeatureSchema::Daily => &DAILY_FEATURES,
            FeatureSchema::Monthly => &MONTHLY_FEATURES,
        }
    }

    pub fn width(self) -> usize {
        self.names().len()
    }
}

/// Ordered, non-negative feature values for one (item, target period) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FeatureVector {
    pub schema: FeatureSchema,
    pub values: Vec<f64>,
}

impl FeatureVector {
    pub fn new(schema: FeatureSchema, values: Vec<f64>) -> Result<Self, ServiceError> {
        let vector = Self { schema, values };
        vector.check_shape(schema.granularity())?;
        Ok(vector)
    }

    pub fn zeros(schema: FeatureSchema) -> Self {
        Self {
            schema,
            values: vec![0.0; schema.width()],
        }
    }

    /// Rejects vectors that do not match the layout expected for `granularity`.
    pub fn check_shape(&self, granularity: Granularity) -> Result<(), ServiceError> {
        let expected = FeatureSchema::for_granularity(granularity);
        if self.schema != expected {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "expected {:?} features, got {:?}",
                expected, self.schema
            )));
        }
        if self.values.len() != expected.width() {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "expected {} feature values, got {}",
                expected.width(),
                self.values.len()
            )));
        }
        if let Some(bad) = self.values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "feature values must be finite and non-negative, got {}",
                bad
            )));
        }
        Ok(())
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    pub fn as_map(&self) -> BTreeMap<String, f64> {
        self.schema
            .names()
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}

/// One supervised row: features known before `period`, and the realised total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub item_id: ItemId,
    pub period: NaiveDate,
    pub features: FeatureVector,
    pub target: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    pub granularity: Granularity,
    pub examples: Vec<TrainingExample>,
}

impl TrainingSet {
    pub fn new(granularity: Granularity) -> Self {
        Self {
            granularity,
            examples: Vec::new(),
        }
    }

    pub fn extend(&mut self, examples: impl IntoIterator<Item = TrainingExample>) {
        self.examples.extend(examples);
    }

    /// Orders rows by period so time-series validation never trains on the future.
    pub fn sort_chronologically(&mut self) {
        self.examples
            .sort_by(|a, b| a.period.cmp(&b.period).then(a.item_id.cmp(&b.item_id)));
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

pub struct FeatureBuilder;

impl FeatureBuilder {
    /// Feature vector for predicting `target_period` from `series`.
    pub fn build(series: &ItemSeries, target_period: NaiveDate) -> FeatureVector {
        let granularity = series.granularity;
        let target = granularity.period_start(target_period);
        let schema = FeatureSchema::for_granularity(granularity);
        let values = (1..=schema.width() as u32)
            .map(|lag| series.total_at(granularity.shift_back(target, lag)) as f64)
            .collect();
        FeatureVector { schema, values }
    }

    /// Rows for every completed period from the item's first sale up to `until`.
    pub fn training_examples(series: &ItemSeries, until: NaiveDate) -> Vec<TrainingExample> {
        let granularity = series.granularity;
        let Some(mut period) = series.first_active_period() else {
            return Vec::new();
        };

        let mut examples = Vec::new();
        let end = series.end();
        while period < end && granularity.period_end(period) <= until {
            examples.push(TrainingExample {
                item_id: series.item_id,
                period,
                features: Self::build(series, period),
                target: series.total_at(period) as f64,
            });
            period = granularity.next(period);
        }
        examples
    }
}
