use axum::{extract::State, response::Json, routing::post, Router};

use crate::{
    handlers::AppState,
    services::backfill::{BackfillRequest, BackfillSummary},
    ApiResponse, ApiResult,
};

pub fn routes() -> Router<AppState> {
    Router::new().route("/backfill", post(run_backfill))
}

#[utoipa::path(
    post,
    path = "/api/v1/backfill",
    summary = "Backfill historical predictions",
    description = "Predict each period of the month range with a model trained only on earlier data, then record the actual demand of elapsed periods.",
    request_body = BackfillRequest,
    responses(
        (status = 200, description = "Sweep finished", body = ApiResponse<BackfillSummary>),
        (status = 400, description = "Inverted month range", body = crate::errors::ErrorResponse)
    ),
    tag = "backfill"
)]
pub async fn run_backfill(
    State(state): State<AppState>,
    Json(request): Json<BackfillRequest>,
) -> ApiResult<BackfillSummary> {
    let summary = state.backfill.backfill(request).await?;
    Ok(Json(ApiResponse::success(summary)))
}
