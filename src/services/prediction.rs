use chrono::{Datelike, NaiveDate, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use super::aggregation::TransactionAggregator;
use crate::config::HeuristicConfig;
use crate::errors::ServiceError;
use crate::ml::{DemandPredictor, FeatureBuilder, FeatureSchema, FeatureVector};
use crate::models::{
    DateRange, FallbackReason, Granularity, ItemId, ItemSeries, Prediction, PredictionSource,
};
use crate::repositories::{ItemRegistry, PredictionStore};

/// Ask for one item's demand. Without `period` the current one is predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PredictionRequest {
    pub item_id: ItemId,
    pub granularity: Granularity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchItemResult {
    pub item_id: ItemId,
    pub granularity: Granularity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of requests that produced a prediction
    pub success_rate: f64,
    pub total_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BatchPredictionResponse {
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

/// Output of the fallback predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeuristicEstimate {
    pub quantity: u64,
    pub confidence: f64,
}

/// Mean of the non-zero totals in `recent`, scaled by the seasonal factor
/// for `month`. No non-zero totals yields the cold-start quantity.
pub fn heuristic_estimate(recent: &[u64], month: u32, config: &HeuristicConfig) -> HeuristicEstimate {
    let active: Vec<f64> = recent
        .iter()
        .filter(|&&total| total > 0)
        .map(|&total| total as f64)
        .collect();
    if active.is_empty() {
        return HeuristicEstimate {
            quantity: config.cold_start_quantity,
            confidence: config.confidence_floor,
        };
    }

    let n = active.len() as f64;
    let mean = active.iter().sum::<f64>() / n;
    let std = (active.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    let quantity = (mean * config.seasonal_factor(month)).max(0.0).round() as u64;
    let confidence = (1.0 - std / (mean + 1.0))
        .max(config.confidence_floor)
        .min(config.confidence_ceiling);

    HeuristicEstimate {
        quantity,
        confidence,
    }
}

/// Persists a live prediction for a period that is still open. Elapsed
/// periods are left to backfill, so their stored records and actuals come
/// only from point-in-time models. Returns whether the prediction was stored.
pub async fn store_live_prediction(
    store: &dyn PredictionStore,
    prediction: &Prediction,
    today: NaiveDate,
) -> Result<bool, ServiceError> {
    if prediction.period_type.period_end(prediction.period_start) <= today {
        debug!(
            item_id = %prediction.item_id,
            period = %prediction.period_start,
            "period elapsed, live prediction not stored"
        );
        return Ok(false);
    }
    store.upsert(prediction.clone()).await?;
    Ok(true)
}

struct Estimate {
    quantity: u64,
    confidence: f64,
    source: PredictionSource,
    fallback_reason: Option<FallbackReason>,
}

/// Answers "how much of this item will leave in that period". Always returns
/// a number for a known item: model failures degrade to the heuristic.
#[derive(Clone)]
pub struct PredictionService {
    items: Arc<dyn ItemRegistry>,
    aggregator: TransactionAggregator,
    predictor: Arc<dyn DemandPredictor>,
    heuristic: HeuristicConfig,
}

impl PredictionService {
    pub fn new(
        items: Arc<dyn ItemRegistry>,
        aggregator: TransactionAggregator,
        predictor: Arc<dyn DemandPredictor>,
        heuristic: HeuristicConfig,
    ) -> Self {
        Self {
            items,
            aggregator,
            predictor,
            heuristic,
        }
    }

    /// Same service, different model (e.g. a point-in-time model for backfill).
    pub fn with_predictor(&self, predictor: Arc<dyn DemandPredictor>) -> Self {
        Self {
            predictor,
            ..self.clone()
        }
    }

    pub fn heuristic(&self) -> &HeuristicConfig {
        &self.heuristic
    }

    /// Predicts the period containing today.
    pub async fn predict(
        &self,
        item_id: ItemId,
        granularity: Granularity,
    ) -> Result<Prediction, ServiceError> {
        self.predict_for_period(item_id, granularity, Utc::now().date_naive())
            .await
    }

    #[instrument(skip(self), fields(item_id = %item_id, granularity = %granularity))]
    pub async fn predict_for_period(
        &self,
        item_id: ItemId,
        granularity: Granularity,
        period: NaiveDate,
    ) -> Result<Prediction, ServiceError> {
        let started = Instant::now();
        let item = self.items.get_item(item_id).await?;

        let target = granularity.period_start(period);
        let schema = FeatureSchema::for_granularity(granularity);
        let lookback = (self.heuristic.window as usize).max(schema.width());
        let lookback = u32::try_from(lookback).unwrap_or(u32::MAX);
        let range = DateRange::new(granularity.shift_back(target, lookback), target)?;

        let series = match self
            .aggregator
            .series_for_item(item_id, granularity, range)
            .await
        {
            Ok(series) => series,
            Err(err) => {
                warn!(error = %err, "history lookup failed, treating it as empty");
                ItemSeries::zeros(item_id, granularity, &range)
            }
        };
        let features = FeatureBuilder::build(&series, target);

        let estimate = if series.totals.iter().all(|&total| total == 0) {
            info!("no demand in lookback window, using cold-start estimate");
            self.fallback(&series, target, FallbackReason::InsufficientHistory)
        } else {
            match self.model_estimate(granularity, &features).await {
                Ok(estimate) => estimate,
                Err(err) => {
                    let reason = if err.is_model_unavailable() {
                        FallbackReason::ModelUnavailable
                    } else {
                        FallbackReason::ModelFailed
                    };
                    warn!(error = %err, %reason, "model inference failed, using heuristic");
                    self.fallback(&series, target, reason)
                }
            }
        };

        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;
        counter!(
            "demand.predictions.total",
            1,
            "granularity" => granularity.to_string(),
            "source" => estimate.source.to_string(),
        );
        if let Some(reason) = estimate.fallback_reason {
            counter!("demand.predictions.fallback", 1, "reason" => reason.to_string());
        }
        histogram!("demand.prediction.execution_ms", execution_time_ms);

        Ok(Prediction {
            item_id,
            product_label: item.label,
            period_type: granularity,
            period_start: target,
            predicted_quantity: estimate.quantity,
            confidence: estimate.confidence,
            input_features: features,
            generated_at: Utc::now(),
            actual_quantity: None,
            accuracy: None,
            source: estimate.source,
            fallback_reason: estimate.fallback_reason,
            execution_time_ms,
        })
    }

    /// Runs every request; a failing item is reported, never fatal.
    #[instrument(skip(self, requests), fields(total = requests.len()))]
    pub async fn predict_batch(&self, requests: Vec<PredictionRequest>) -> BatchPredictionResponse {
        let started = Instant::now();
        let outcomes = join_all(requests.iter().map(|request| async move {
            match request.period {
                Some(period) => {
                    self.predict_for_period(request.item_id, request.granularity, period)
                        .await
                }
                None => self.predict(request.item_id, request.granularity).await,
            }
        }))
        .await;

        let results: Vec<BatchItemResult> = requests
            .iter()
            .zip(outcomes)
            .map(|(request, outcome)| match outcome {
                Ok(prediction) => BatchItemResult {
                    item_id: request.item_id,
                    granularity: request.granularity,
                    prediction: Some(prediction),
                    error: None,
                },
                Err(err) => BatchItemResult {
                    item_id: request.item_id,
                    granularity: request.granularity,
                    prediction: None,
                    error: Some(err.response_message()),
                },
            })
            .collect();

        let total = results.len();
        let successful = results.iter().filter(|r| r.prediction.is_some()).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            successful as f64 / total as f64 * 100.0
        };
        info!(total, successful, "batch prediction finished");

        BatchPredictionResponse {
            results,
            summary: BatchSummary {
                total,
                successful,
                failed: total - successful,
                success_rate,
                total_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            },
        }
    }

    async fn model_estimate(
        &self,
        granularity: Granularity,
        features: &FeatureVector,
    ) -> Result<Estimate, ServiceError> {
        let output = self.predictor.predict(granularity, features).await?;
        if !output.quantity.is_finite() || !output.confidence.is_finite() {
            return Err(ServiceError::InternalError(format!(
                "model returned non-finite output ({}, {})",
                output.quantity, output.confidence
            )));
        }
        Ok(Estimate {
            quantity: output.quantity.max(0.0).round() as u64,
            confidence: output.confidence.clamp(0.0, 1.0),
            source: PredictionSource::Model,
            fallback_reason: None,
        })
    }

    fn fallback(&self, series: &ItemSeries, target: NaiveDate, reason: FallbackReason) -> Estimate {
        let window = self.heuristic.window as usize;
        let recent: Vec<u64> = series.totals.iter().rev().take(window).copied().collect();
        let estimate = heuristic_estimate(&recent, target.month(), &self.heuristic);
        Estimate {
            quantity: estimate.quantity,
            confidence: estimate.confidence,
            source: PredictionSource::Heuristic,
            fallback_reason: Some(reason),
        }
    }
}
