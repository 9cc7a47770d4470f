use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    errors::ServiceError,
    handlers::{validation_messages, AppState},
    ml::association::{Algorithm, MiningThresholds},
    models::{AssociationRule, DateRange},
    services::associations::{AlgorithmComparison, MiningReport},
    ApiResponse, ApiResult,
};

/// Thresholds default to the configured ones. `end_date` is inclusive.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct MiningRequest {
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_support: Option<f64>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl MiningRequest {
    fn thresholds(&self, defaults: MiningThresholds) -> MiningThresholds {
        MiningThresholds {
            min_support: self.min_support.unwrap_or(defaults.min_support),
            min_confidence: self.min_confidence.unwrap_or(defaults.min_confidence),
        }
    }

    fn date_filter(&self) -> Result<Option<DateRange>, ServiceError> {
        if self.start_date.is_none() && self.end_date.is_none() {
            return Ok(None);
        }
        let start = self.start_date.unwrap_or(NaiveDate::MIN);
        let end = self
            .end_date
            .map(|d| d.succ_opt().unwrap_or(NaiveDate::MAX))
            .unwrap_or(NaiveDate::MAX);
        DateRange::new(start, end).map(Some)
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/associations", post(mine_associations))
        .route("/associations/compare", post(compare_algorithms))
        .route("/associations/rules", get(active_rules))
}

#[utoipa::path(
    post,
    path = "/api/v1/associations",
    summary = "Mine association rules",
    description = "Mine frequent itemsets from outgoing baskets and replace the active rule set.",
    request_body = MiningRequest,
    responses(
        (status = 200, description = "Rules replaced", body = ApiResponse<MiningReport>),
        (status = 400, description = "Invalid thresholds or dates", body = crate::errors::ErrorResponse)
    ),
    tag = "associations"
)]
pub async fn mine_associations(
    State(state): State<AppState>,
    Json(request): Json<MiningRequest>,
) -> Result<(StatusCode, Json<ApiResponse<MiningReport>>), ServiceError> {
    if let Err(errors) = request.validate() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::validation_errors(validation_messages(&errors))),
        ));
    }

    let thresholds = request.thresholds(state.associations.defaults());
    let report = state
        .associations
        .mine_associations(
            thresholds.min_support,
            thresholds.min_confidence,
            request.date_filter()?,
            request.algorithm,
        )
        .await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(report))))
}

#[utoipa::path(
    post,
    path = "/api/v1/associations/compare",
    summary = "Compare Apriori and FP-Growth",
    request_body = MiningRequest,
    responses(
        (status = 200, description = "Timings and agreement of both miners", body = ApiResponse<AlgorithmComparison>),
        (status = 400, description = "Invalid thresholds or dates", body = crate::errors::ErrorResponse)
    ),
    tag = "associations"
)]
pub async fn compare_algorithms(
    State(state): State<AppState>,
    Json(request): Json<MiningRequest>,
) -> ApiResult<AlgorithmComparison> {
    request.validate()?;
    let thresholds = request.thresholds(state.associations.defaults());
    let comparison = state
        .associations
        .compare_algorithms(thresholds, request.date_filter()?)
        .await?;
    Ok(Json(ApiResponse::success(comparison)))
}

#[utoipa::path(
    get,
    path = "/api/v1/associations/rules",
    summary = "Active association rules",
    responses(
        (status = 200, description = "Rules from the latest mining run", body = ApiResponse<Vec<AssociationRule>>)
    ),
    tag = "associations"
)]
pub async fn active_rules(State(state): State<AppState>) -> ApiResult<Vec<AssociationRule>> {
    let rules = state.associations.active_rules().await?;
    Ok(Json(ApiResponse::success(rules)))
}
