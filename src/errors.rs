use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::models::{Granularity, ItemId};

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Item 42 not found",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    #[schema(example = "Item 42 not found")]
    pub message: String,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// ISO 8601 timestamp when error occurred
    #[schema(example = "2024-12-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Model artifact missing: {0}")]
    ModelArtifactMissing(String),

    #[error("{0} model has no training samples")]
    ModelUntrained(Granularity),

    #[error("Model artifact corrupt: {0}")]
    ModelArtifactCorrupt(String),

    #[error("Feature shape mismatch: {0}")]
    ModelShapeMismatch(String),

    #[error("Training already in progress for {0} model")]
    TrainingInProgress(Granularity),

    #[error("Training timed out after {0}s")]
    TrainingTimedOut(u64),

    #[error("Training failed: {0}")]
    TrainingFailed(String),

    #[error("Model worker error: {0}")]
    WorkerError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(
        #[from]
        #[serde(skip)]
        std::io::Error,
    ),

    #[error(transparent)]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::InternalError(format!("background task failed: {}", err))
    }
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ItemNotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::TrainingInProgress(_) => StatusCode::CONFLICT,
            Self::ModelArtifactMissing(_) | Self::ModelUntrained(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::TrainingTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::WorkerError(_) => StatusCode::BAD_GATEWAY,
            Self::ModelArtifactCorrupt(_)
            | Self::ModelShapeMismatch(_)
            | Self::TrainingFailed(_)
            | Self::RepositoryError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Io(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn response_message(&self) -> String {
        match self {
            // Internal failures never leak their details to callers
            Self::RepositoryError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Io(_)
            | Self::Other(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Errors that mean "no usable model" and route inference to the heuristic.
    pub fn is_model_unavailable(&self) -> bool {
        matches!(
            self,
            Self::ModelArtifactMissing(_)
                | Self::ModelUntrained(_)
                | Self::ModelArtifactCorrupt(_)
                | Self::ModelShapeMismatch(_)
                | Self::WorkerError(_)
                | Self::Io(_)
        )
    }

    /// A concurrent training request; callers treat this as "busy", not a failure.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::TrainingInProgress(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

pub trait ResultExt<T> {
    fn map_err_to_service(self) -> Result<T, ServiceError>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: Into<ServiceError>,
{
    fn map_err_to_service(self) -> Result<T, ServiceError> {
        self.map_err(|e| e.into())
    }
}
