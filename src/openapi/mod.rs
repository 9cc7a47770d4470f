use axum::response::Json;
use utoipa::OpenApi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "StateSet Demand API",
        version = "0.1.0",
        description = r#"
# StateSet Demand API

Per-item demand forecasting and basket analysis for an inventory system.

## Features

- **Predictions**: daily or monthly demand per item, with a seasonal heuristic fallback whenever no trained model is usable
- **Models**: background retraining per granularity with a pollable status
- **Backfill**: point-in-time predictions over past months, completed with actual demand for accuracy tracking
- **Reports**: accuracy summary, distribution and per-product ranking over stored predictions
- **Associations**: Apriori / FP-Growth rule mining over outgoing baskets

## Error Handling

Errors use a consistent body:

```json
{
  "error": "Conflict",
  "message": "Training already in progress for daily model",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
"#
    ),
    paths(
        handlers::health::health,
        handlers::predictions::create_prediction,
        handlers::predictions::create_batch,
        handlers::predictions::list_predictions,
        handlers::predictions::prediction_report,
        handlers::models::start_training,
        handlers::models::training_status,
        handlers::associations::mine_associations,
        handlers::associations::compare_algorithms,
        handlers::associations::active_rules,
        handlers::backfill::run_backfill,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::models::Prediction,
        crate::models::TrainingStatus,
        crate::models::AssociationRule,
        crate::services::prediction::PredictionRequest,
        crate::services::prediction::BatchPredictionResponse,
        crate::services::report::PredictionReport,
        crate::services::report::ReportSort,
        crate::services::backfill::BackfillRequest,
        crate::services::backfill::BackfillSummary,
        crate::services::associations::MiningReport,
        crate::services::associations::AlgorithmComparison,
        handlers::predictions::BatchPredictionRequest,
        handlers::associations::MiningRequest,
    )),
    tags(
        (name = "health", description = "Liveness"),
        (name = "predictions", description = "Demand predictions"),
        (name = "models", description = "Model training"),
        (name = "backfill", description = "Historical predictions and accuracy"),
        (name = "associations", description = "Association rule mining")
    )
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/api/v1/predictions",
            "/api/v1/predictions/batch",
            "/api/v1/predictions/report",
            "/api/v1/models/{granularity}/train",
            "/api/v1/models/{granularity}/status",
            "/api/v1/associations",
            "/api/v1/backfill",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
