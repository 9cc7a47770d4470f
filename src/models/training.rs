use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Granularity;
use crate::errors::ServiceError;
use crate::ml::demand_model::ModelSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Idle,
    InProgress,
    Completed,
    Failed,
}

/// Status register for one granularity's training runs.
///
/// Transitions: `idle -> in_progress -> {completed | failed} -> idle`. A
/// finished run may also start a new one directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrainingStatus {
    pub granularity: Granularity,
    pub state: TrainingState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ModelSummary>,
}

impl TrainingStatus {
    pub fn idle(granularity: Granularity) -> Self {
        Self {
            granularity,
            state: TrainingState::Idle,
            detail: None,
            run_id: None,
            started_at: None,
            finished_at: None,
            summary: None,
        }
    }

    pub fn start(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<Self, ServiceError> {
        match self.state {
            TrainingState::InProgress => Err(ServiceError::TrainingInProgress(self.granularity)),
            _ => Ok(Self {
                state: TrainingState::InProgress,
                detail: Some("Training started".to_string()),
                run_id: Some(run_id),
                started_at: Some(now),
                ..Self::idle(self.granularity)
            }),
        }
    }

    pub fn complete(
        &self,
        summary: ModelSummary,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        self.require(TrainingState::InProgress, "complete")?;
        Ok(Self {
            state: TrainingState::Completed,
            detail: Some(format!(
                "Trained on {} samples",
                summary.sample_count
            )),
            finished_at: Some(now),
            summary: Some(summary),
            ..self.clone()
        })
    }

    pub fn fail(&self, detail: impl Into<String>, now: DateTime<Utc>) -> Result<Self, ServiceError> {
        self.require(TrainingState::InProgress, "fail")?;
        Ok(Self {
            state: TrainingState::Failed,
            detail: Some(detail.into()),
            finished_at: Some(now),
            ..self.clone()
        })
    }

    pub fn reset(&self) -> Result<Self, ServiceError> {
        match self.state {
            TrainingState::InProgress => Err(ServiceError::TrainingInProgress(self.granularity)),
            _ => Ok(Self::idle(self.granularity)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == TrainingState::InProgress
    }

    fn require(&self, expected: TrainingState, action: &str) -> Result<(), ServiceError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ServiceError::InternalError(format!(
                "cannot {} a {:?} training run",
                action, self.state
            )))
        }
    }
}
