use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};

use crate::{
    errors::ServiceError,
    handlers::AppState,
    models::{Granularity, TrainingStatus},
    ApiResponse, ApiResult,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/models/:granularity/train", post(start_training))
        .route("/models/:granularity/status", get(training_status))
}

#[utoipa::path(
    post,
    path = "/api/v1/models/{granularity}/train",
    summary = "Start model training",
    description = "Retrain the model for a granularity in the background. Poll the status endpoint for the outcome.",
    params(("granularity" = Granularity, Path, description = "daily or monthly")),
    responses(
        (status = 202, description = "Training started", body = ApiResponse<TrainingStatus>),
        (status = 409, description = "A run is already in progress", body = crate::errors::ErrorResponse)
    ),
    tag = "models"
)]
pub async fn start_training(
    State(state): State<AppState>,
    Path(granularity): Path<Granularity>,
) -> Result<(StatusCode, Json<ApiResponse<TrainingStatus>>), ServiceError> {
    let status = state.training.start_background(granularity).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(status).with_message(format!("{} training started", granularity))),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/models/{granularity}/status",
    summary = "Training status",
    params(("granularity" = Granularity, Path, description = "daily or monthly")),
    responses(
        (status = 200, description = "Current training status", body = ApiResponse<TrainingStatus>)
    ),
    tag = "models"
)]
pub async fn training_status(
    State(state): State<AppState>,
    Path(granularity): Path<Granularity>,
) -> ApiResult<TrainingStatus> {
    let status = state.training.status(granularity).await?;
    Ok(Json(ApiResponse::success(status)))
}
