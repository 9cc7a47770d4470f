//! Accuracy reporting over stored predictions that have a realised quantity.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::{Bias, Granularity, ItemId, Prediction};
use crate::repositories::PredictionStore;

const DEFAULT_REPORT_LIMIT: usize = 20;

/// Lower bounds (percent) of the accuracy buckets, best first.
const ACCURACY_BUCKETS: [(f64, &str); 6] = [
    (90.0, "90-100%"),
    (80.0, "80-89%"),
    (70.0, "70-79%"),
    (60.0, "60-69%"),
    (50.0, "50-59%"),
    (f64::NEG_INFINITY, "below 50%"),
];

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReportSort {
    /// Most accurate first
    #[default]
    Accuracy,
    /// Product label, then period
    Product,
    /// Oldest period first
    #[serde(alias = "month")]
    Period,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportQuery {
    pub granularity: Option<Granularity>,
    /// Calendar year of the period start
    pub year: Option<i32>,
    /// Month of the period start (1-12); needs `year`
    #[validate(range(min = 1, max = 12, message = "must be between 1 and 12"))]
    pub month: Option<u32>,
    /// Case-insensitive part of the product label
    pub product: Option<String>,
    #[serde(default)]
    pub sort: ReportSort,
    /// Rows returned. Summary and distribution cover every match.
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 1000, message = "between 1 and 1000 rows"))]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_REPORT_LIMIT
}

impl Default for ReportQuery {
    fn default() -> Self {
        Self {
            granularity: None,
            year: None,
            month: None,
            product: None,
            sort: ReportSort::default(),
            limit: DEFAULT_REPORT_LIMIT,
        }
    }
}

impl ReportQuery {
    fn matches(&self, prediction: &Prediction, product: Option<&str>) -> bool {
        let period = prediction.period_start;
        self.granularity.map_or(true, |g| prediction.period_type == g)
            && self.year.map_or(true, |y| period.year() == y)
            && self.month.map_or(true, |m| period.month() == m)
            && product.map_or(true, |needle| {
                prediction.product_label.to_lowercase().contains(needle)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReportRow {
    pub item_id: ItemId,
    pub product_label: String,
    pub period_type: Granularity,
    pub period_start: NaiveDate,
    pub predicted_quantity: u64,
    pub actual_quantity: u64,
    pub accuracy: f64,
    pub bias: Bias,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ReportSummary {
    pub total: usize,
    pub total_predicted: u64,
    pub total_actual: u64,
    /// `total_predicted - total_actual`
    pub difference: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worst_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AccuracyBucket {
    pub range: String,
    pub count: usize,
    /// Share of all matching predictions, in percent
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ProductPerformance {
    pub item_id: ItemId,
    pub product_label: String,
    pub predictions: usize,
    pub average_accuracy: f64,
    pub total_predicted: u64,
    pub total_actual: u64,
    pub difference: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct PredictionReport {
    pub summary: ReportSummary,
    pub distribution: Vec<AccuracyBucket>,
    /// Best average accuracy first
    pub products: Vec<ProductPerformance>,
    pub rows: Vec<ReportRow>,
}

fn signed_difference(predicted: u64, actual: u64) -> i64 {
    let diff = i128::from(predicted) - i128::from(actual);
    i64::try_from(diff).unwrap_or(if diff > 0 { i64::MAX } else { i64::MIN })
}

fn by_accuracy_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

/// Builds the report from stored predictions; only those with an actual count.
pub fn build_report(
    predictions: impl IntoIterator<Item = Prediction>,
    query: &ReportQuery,
) -> PredictionReport {
    let product = query.product.as_ref().map(|p| p.trim().to_lowercase());
    let product = product.as_deref().filter(|p| !p.is_empty());

    let mut rows: Vec<ReportRow> = predictions
        .into_iter()
        .filter(|p| query.matches(p, product))
        .filter_map(|p| {
            let (Some(actual_quantity), Some(accuracy), Some(bias)) =
                (p.actual_quantity, p.accuracy(), p.bias())
            else {
                return None;
            };
            Some(ReportRow {
                item_id: p.item_id,
                product_label: p.product_label,
                period_type: p.period_type,
                period_start: p.period_start,
                predicted_quantity: p.predicted_quantity,
                actual_quantity,
                accuracy,
                bias,
            })
        })
        .collect();

    let summary = summarize(&rows);
    let distribution = distribution(&rows);
    let products = product_performance(&rows);

    rows.sort_by(|a, b| match query.sort {
        ReportSort::Accuracy => by_accuracy_desc(a.accuracy, b.accuracy)
            .then_with(|| a.product_label.cmp(&b.product_label))
            .then_with(|| a.period_start.cmp(&b.period_start)),
        ReportSort::Product => a
            .product_label
            .cmp(&b.product_label)
            .then_with(|| a.period_start.cmp(&b.period_start)),
        ReportSort::Period => a
            .period_start
            .cmp(&b.period_start)
            .then_with(|| a.product_label.cmp(&b.product_label)),
    });
    rows.truncate(query.limit);

    PredictionReport {
        summary,
        distribution,
        products,
        rows,
    }
}

fn summarize(rows: &[ReportRow]) -> ReportSummary {
    let total_predicted: u64 = rows.iter().map(|r| r.predicted_quantity).sum();
    let total_actual: u64 = rows.iter().map(|r| r.actual_quantity).sum();
    let accuracies = rows.iter().map(|r| r.accuracy);
    let average_accuracy =
        (!rows.is_empty()).then(|| accuracies.clone().sum::<f64>() / rows.len() as f64);

    ReportSummary {
        total: rows.len(),
        total_predicted,
        total_actual,
        difference: signed_difference(total_predicted, total_actual),
        average_accuracy,
        best_accuracy: accuracies.clone().reduce(f64::max),
        worst_accuracy: accuracies.reduce(f64::min),
    }
}

fn distribution(rows: &[ReportRow]) -> Vec<AccuracyBucket> {
    let mut counts = [0usize; ACCURACY_BUCKETS.len()];
    for row in rows {
        if let Some(idx) = ACCURACY_BUCKETS
            .iter()
            .position(|(floor, _)| row.accuracy >= *floor)
        {
            counts[idx] += 1;
        }
    }
    ACCURACY_BUCKETS
        .iter()
        .zip(counts)
        .map(|((_, range), count)| AccuracyBucket {
            range: range.to_string(),
            count,
            percentage: if rows.is_empty() {
                0.0
            } else {
                count as f64 / rows.len() as f64 * 100.0
            },
        })
        .collect()
}

fn product_performance(rows: &[ReportRow]) -> Vec<ProductPerformance> {
    let mut grouped: BTreeMap<ItemId, Vec<&ReportRow>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.item_id).or_default().push(row);
    }

    let mut products: Vec<ProductPerformance> = grouped
        .into_iter()
        .map(|(item_id, rows)| {
            let total_predicted = rows.iter().map(|r| r.predicted_quantity).sum();
            let total_actual = rows.iter().map(|r| r.actual_quantity).sum();
            ProductPerformance {
                item_id,
                product_label: rows
                    .first()
                    .map(|r| r.product_label.clone())
                    .unwrap_or_default(),
                predictions: rows.len(),
                average_accuracy: rows.iter().map(|r| r.accuracy).sum::<f64>() / rows.len() as f64,
                total_predicted,
                total_actual,
                difference: signed_difference(total_predicted, total_actual),
            }
        })
        .collect();
    products.sort_by(|a, b| {
        by_accuracy_desc(a.average_accuracy, b.average_accuracy)
            .then_with(|| a.product_label.cmp(&b.product_label))
    });
    products
}

/// Reads the prediction store and reports how predictions compared with reality.
#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn PredictionStore>,
}

impl ReportService {
    pub fn new(store: Arc<dyn PredictionStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn report(&self, query: &ReportQuery) -> Result<PredictionReport, ServiceError> {
        query.validate()?;
        if query.month.is_some() && query.year.is_none() {
            return Err(ServiceError::InvalidInput(
                "month filter requires a year".to_string(),
            ));
        }

        let predictions = self.store.list(query.granularity).await?;
        let report = build_report(predictions, query);
        info!(
            matched = report.summary.total,
            rows = report.rows.len(),
            sort = %query.sort,
            "prediction report built"
        );
        Ok(report)
    }
}
