use axum::{extract::State, response::Json};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use crate::{
    handlers::AppState,
    models::{Granularity, TrainingState},
    ApiResponse, ApiResult,
};

/// Liveness plus the training state of each model
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub timestamp: String,
    pub models: BTreeMap<String, TrainingState>,
}

#[utoipa::path(
    get,
    path = "/health",
    summary = "Health check",
    responses(
        (status = 200, description = "Service is up", body = ApiResponse<HealthResponse>),
        (status = 500, description = "Status sink unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> ApiResult<HealthResponse> {
    let mut models = BTreeMap::new();
    for granularity in Granularity::ALL {
        let status = state.training.status(granularity).await?;
        models.insert(granularity.to_string(), status.state);
    }

    Ok(Json(ApiResponse::success(HealthResponse {
        status: "up".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        models,
    })))
}
