use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

use super::aggregation::TransactionAggregator;
use super::prediction::PredictionService;
use super::training::assemble_training_set;
use crate::errors::ServiceError;
use crate::ml::runner::TrainerSettings;
use crate::models::{DateRange, Granularity, Item, ItemId};
use crate::repositories::{ItemRegistry, PredictionStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackfillRequest {
    /// Any day in the first month swept
    pub start_month: NaiveDate,
    /// Any day in the last month swept (inclusive)
    pub end_month: NaiveDate,
    pub granularity: Granularity,
    /// Recompute and overwrite existing predictions
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MonthBreakdown {
    pub month: NaiveDate,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct BackfillSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub months: Vec<MonthBreakdown>,
    /// Mean accuracy (percent) of swept predictions that have an actual
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_accuracy: Option<f64>,
}

enum Outcome {
    Processed(Option<f64>),
    Skipped(Option<f64>),
}

/// Replays history month by month: predict each period with a model that
/// only saw earlier data, then record what really happened.
#[derive(Clone)]
pub struct BackfillService {
    items: Arc<dyn ItemRegistry>,
    aggregator: TransactionAggregator,
    predictions: PredictionService,
    store: Arc<dyn PredictionStore>,
    settings: TrainerSettings,
}

impl BackfillService {
    pub fn new(
        items: Arc<dyn ItemRegistry>,
        aggregator: TransactionAggregator,
        predictions: PredictionService,
        store: Arc<dyn PredictionStore>,
        settings: TrainerSettings,
    ) -> Self {
        Self {
            items,
            aggregator,
            predictions,
            store,
            settings,
        }
    }

    pub async fn backfill(&self, request: BackfillRequest) -> Result<BackfillSummary, ServiceError> {
        self.backfill_as_of(request, Utc::now().date_naive()).await
    }

    /// Sweeps the requested months, never past `today`.
    #[instrument(skip(self), fields(granularity = %request.granularity, force = request.force))]
    pub async fn backfill_as_of(
        &self,
        request: BackfillRequest,
        today: NaiveDate,
    ) -> Result<BackfillSummary, ServiceError> {
        let first = Granularity::Monthly.period_start(request.start_month);
        let last = Granularity::Monthly.period_start(request.end_month);
        if first > last {
            return Err(ServiceError::InvalidInput(format!(
                "start_month {} is after end_month {}",
                first, last
            )));
        }
        let sweep_end = Granularity::Monthly.next(last).min(today.succ_opt().unwrap_or(today));
        let months = Granularity::Monthly.periods_in(&DateRange::new(first, sweep_end.max(first))?);

        let items = self.items.list_items().await?;
        let mut summary = BackfillSummary::default();
        let mut accuracies = Vec::new();

        for month in months {
            let breakdown = self
                .backfill_month(&request, month, today, &items, &mut accuracies)
                .await?;
            summary.processed += breakdown.processed;
            summary.skipped += breakdown.skipped;
            summary.failed += breakdown.failed;
            summary.months.push(breakdown);
        }

        if !accuracies.is_empty() {
            summary.average_accuracy =
                Some(accuracies.iter().sum::<f64>() / accuracies.len() as f64);
        }
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            "backfill finished"
        );
        Ok(summary)
    }

    async fn backfill_month(
        &self,
        request: &BackfillRequest,
        month: NaiveDate,
        today: NaiveDate,
        items: &[Item],
        accuracies: &mut Vec<f64>,
    ) -> Result<MonthBreakdown, ServiceError> {
        let granularity = request.granularity;
        let month_end = Granularity::Monthly.next(month);
        let periods: Vec<NaiveDate> = granularity
            .periods_in(&DateRange::new(month, month_end)?)
            .into_iter()
            .filter(|p| *p <= today)
            .collect();
        let mut breakdown = MonthBreakdown {
            month,
            processed: 0,
            skipped: 0,
            failed: 0,
        };

        // Point-in-time model: nothing on or after `month` is visible to it
        let set = assemble_training_set(&self.aggregator, granularity, month).await?;
        let predictions = match self.settings.fit(set).await {
            Ok(model) => self.predictions.with_predictor(Arc::new(model)),
            Err(err) => {
                warn!(%month, error = %err, "point-in-time model failed, month skipped");
                breakdown.failed = periods.len() * items.len();
                return Ok(breakdown);
            }
        };

        for item in items {
            let actuals = self
                .aggregator
                .series_for_item(item.id, granularity, DateRange::new(month, month_end)?)
                .await?;
            for &period in &periods {
                let elapsed = granularity.period_end(period) <= today;
                let actual = elapsed.then(|| actuals.total_at(period));
                match self
                    .backfill_one(&predictions, request, item.id, period, actual)
                    .await
                {
                    Ok(Outcome::Processed(accuracy)) => {
                        breakdown.processed += 1;
                        accuracies.extend(accuracy);
                    }
                    Ok(Outcome::Skipped(accuracy)) => {
                        breakdown.skipped += 1;
                        accuracies.extend(accuracy);
                    }
                    Err(err) => {
                        warn!(item_id = %item.id, %period, error = %err, "backfill failed");
                        breakdown.failed += 1;
                    }
                }
            }
        }
        Ok(breakdown)
    }

    async fn backfill_one(
        &self,
        predictions: &PredictionService,
        request: &BackfillRequest,
        item_id: ItemId,
        period: NaiveDate,
        actual: Option<u64>,
    ) -> Result<Outcome, ServiceError> {
        let granularity = request.granularity;
        let existing = self.store.find(item_id, granularity, period).await?;

        if let (Some(mut prediction), false) = (existing, request.force) {
            return match (prediction.actual_quantity, actual) {
                (None, Some(actual)) => {
                    prediction.set_actual(Some(actual));
                    let accuracy = prediction.accuracy();
                    self.store.upsert(prediction).await?;
                    Ok(Outcome::Processed(accuracy))
                }
                _ => Ok(Outcome::Skipped(prediction.accuracy())),
            };
        }

        let mut prediction = predictions
            .predict_for_period(item_id, granularity, period)
            .await?;
        prediction.set_actual(actual);
        let accuracy = prediction.accuracy();
        self.store.upsert(prediction).await?;
        Ok(Outcome::Processed(accuracy))
    }
}
