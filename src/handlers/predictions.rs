use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    errors::ServiceError,
    handlers::{validation_messages, AppState},
    models::{Granularity, Prediction},
    services::prediction::{store_live_prediction, BatchPredictionResponse, PredictionRequest},
    services::report::{PredictionReport, ReportQuery},
    ApiResponse, ApiResult,
};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BatchPredictionRequest {
    #[validate(length(min = 1, max = 1000, message = "between 1 and 1000 requests per batch"))]
    pub requests: Vec<PredictionRequest>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PredictionListQuery {
    /// Only predictions of this granularity
    pub granularity: Option<Granularity>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/predictions", post(create_prediction).get(list_predictions))
        .route("/predictions/batch", post(create_batch))
        .route("/predictions/report", get(prediction_report))
}

#[utoipa::path(
    post,
    path = "/api/v1/predictions",
    summary = "Predict demand",
    description = "Predict one item's demand for the current (or given) period. Falls back to a seasonal heuristic when no model is usable. Predictions for periods that are still open are stored; elapsed periods keep their backfilled records.",
    request_body = PredictionRequest,
    responses(
        (status = 200, description = "Prediction produced", body = ApiResponse<Prediction>),
        (status = 404, description = "Unknown item", body = crate::errors::ErrorResponse)
    ),
    tag = "predictions"
)]
pub async fn create_prediction(
    State(state): State<AppState>,
    Json(request): Json<PredictionRequest>,
) -> ApiResult<Prediction> {
    let prediction = match request.period {
        Some(period) => {
            state
                .predictions
                .predict_for_period(request.item_id, request.granularity, period)
                .await?
        }
        None => {
            state
                .predictions
                .predict(request.item_id, request.granularity)
                .await?
        }
    };
    store_live_prediction(
        state.prediction_store.as_ref(),
        &prediction,
        Utc::now().date_naive(),
    )
    .await?;
    Ok(Json(ApiResponse::success(prediction)))
}

#[utoipa::path(
    post,
    path = "/api/v1/predictions/batch",
    summary = "Predict demand for many items",
    request_body = BatchPredictionRequest,
    responses(
        (status = 200, description = "Per-item results with a summary", body = ApiResponse<BatchPredictionResponse>),
        (status = 400, description = "Empty or oversized batch", body = ApiResponse<BatchPredictionResponse>)
    ),
    tag = "predictions"
)]
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchPredictionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<BatchPredictionResponse>>), ServiceError> {
    if let Err(errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(&errors))),
        ));
    }

    let response = state.predictions.predict_batch(request.requests).await;
    let today = Utc::now().date_naive();
    let mut stored = 0;
    for prediction in response.results.iter().filter_map(|r| r.prediction.as_ref()) {
        if store_live_prediction(state.prediction_store.as_ref(), prediction, today).await? {
            stored += 1;
        }
    }
    info!(
        successful = response.summary.successful,
        failed = response.summary.failed,
        stored,
        "batch predictions finished"
    );
    Ok((StatusCode::OK, Json(ApiResponse::success(response))))
}

#[utoipa::path(
    get,
    path = "/api/v1/predictions",
    summary = "List stored predictions",
    params(PredictionListQuery),
    responses(
        (status = 200, description = "Stored predictions", body = ApiResponse<Vec<Prediction>>)
    ),
    tag = "predictions"
)]
pub async fn list_predictions(
    State(state): State<AppState>,
    Query(query): Query<PredictionListQuery>,
) -> ApiResult<Vec<Prediction>> {
    let predictions = state.prediction_store.list(query.granularity).await?;
    Ok(Json(ApiResponse::success(predictions)))
}

#[utoipa::path(
    get,
    path = "/api/v1/predictions/report",
    summary = "Prediction accuracy report",
    description = "Accuracy of stored predictions that have an actual: summary totals, an accuracy distribution, per-product ranking and the matching rows.",
    params(ReportQuery),
    responses(
        (status = 200, description = "Report", body = ApiResponse<PredictionReport>),
        (status = 400, description = "Invalid filter", body = ApiResponse<PredictionReport>)
    ),
    tag = "predictions"
)]
pub async fn prediction_report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<(StatusCode, Json<ApiResponse<PredictionReport>>), ServiceError> {
    if let Err(errors) = query.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(&errors))),
        ));
    }
    let report = state.reports.report(&query).await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))))
}
