//! Subprocess contract for the model worker.
//!
//! The caller runs `demand-worker [opts] <predict|fit>`, writes one JSON
//! request to stdin and reads stdout for exactly one line of the form
//! `RESULT:<json>`, where the JSON is a tagged [`WorkerResponse`]. Any other
//! stdout line is ignored. A non-zero exit status means failure. `fit`
//! returns the whole model and never writes an artifact.

use serde::{Deserialize, Serialize};

use super::demand_model::{ModelOutput, TrainedModel};
use super::features::{FeatureVector, TrainingSet};
use super::runner::{DemandPredictor, DemandTrainer};
use crate::errors::ServiceError;
use crate::models::Granularity;

pub const RESULT_PREFIX: &str = "RESULT:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum WorkerCommand {
    Predict,
    Fit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictRequest {
    pub granularity: Granularity,
    pub features: FeatureVector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerResponse {
    Prediction { output: ModelOutput },
    Fitted { model: Box<TrainedModel> },
    Error { message: String },
}

impl WorkerResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, WorkerResponse::Error { .. })
    }

    pub fn to_result_line(&self) -> Result<String, ServiceError> {
        Ok(format!("{}{}", RESULT_PREFIX, serde_json::to_string(self)?))
    }
}

/// Extracts the single `RESULT:` line from worker stdout.
pub fn parse_result_line(stdout: &str) -> Result<WorkerResponse, ServiceError> {
    let mut results = stdout
        .lines()
        .filter_map(|line| line.trim().strip_prefix(RESULT_PREFIX));
    let payload = results
        .next()
        .ok_or_else(|| ServiceError::WorkerError("worker produced no RESULT line".into()))?;
    if results.next().is_some() {
        return Err(ServiceError::WorkerError(
            "worker produced more than one RESULT line".into(),
        ));
    }
    serde_json::from_str(payload)
        .map_err(|e| ServiceError::WorkerError(format!("malformed RESULT payload: {}", e)))
}

/// Worker-side dispatch: decodes `input` for `command` and runs it.
pub async fn execute<R>(runner: &R, command: WorkerCommand, input: &str) -> WorkerResponse
where
    R: DemandPredictor + DemandTrainer,
{
    let outcome = match command {
        WorkerCommand::Predict => match serde_json::from_str::<PredictRequest>(input) {
            Ok(request) => runner
                .predict(request.granularity, &request.features)
                .await
                .map(|output| WorkerResponse::Prediction { output }),
            Err(e) => Err(ServiceError::from(e)),
        },
        WorkerCommand::Fit => match serde_json::from_str::<TrainingSet>(input) {
            Ok(set) => runner.fit(set).await.map(|model| WorkerResponse::Fitted {
                model: Box::new(model),
            }),
            Err(e) => Err(ServiceError::from(e)),
        },
    };

    outcome.unwrap_or_else(|err| WorkerResponse::Error {
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::artifact::{ArtifactStore, ModelRegistry};
    use crate::ml::features::FeatureSchema;
    use crate::ml::runner::{InProcessRunner, TrainerSettings};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn result_line_is_found_among_log_noise() {
        let stdout = "loading model\nRESULT:{\"status\":\"error\",\"message\":\"boom\"}\ndone\n";
        assert_eq!(
            parse_result_line(stdout).unwrap(),
            WorkerResponse::Error {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn missing_or_duplicate_result_lines_fail() {
        assert!(parse_result_line("nothing here").is_err());
        let twice = "RESULT:{\"status\":\"error\",\"message\":\"a\"}\nRESULT:{\"status\":\"error\",\"message\":\"b\"}";
        assert!(parse_result_line(twice).is_err());
        assert!(parse_result_line("RESULT:{oops").is_err());
    }

    #[test]
    fn commands_use_lowercase_names() {
        assert_eq!(WorkerCommand::Predict.to_string(), "predict");
        assert_eq!("fit".parse::<WorkerCommand>().unwrap(), WorkerCommand::Fit);
    }

    #[tokio::test]
    async fn execute_reports_failures_as_error_responses() {
        let dir = TempDir::new().unwrap();
        let runner = InProcessRunner::new(
            Arc::new(ModelRegistry::new(ArtifactStore::new(dir.path()))),
            TrainerSettings::default(),
        );

        let request = PredictRequest {
            granularity: Granularity::Daily,
            features: FeatureVector::zeros(FeatureSchema::Daily),
        };
        let input = serde_json::to_string(&request).unwrap();
        let response = execute(&runner, WorkerCommand::Predict, &input).await;
        assert!(response.is_error());

        let garbage = execute(&runner, WorkerCommand::Fit, "not json").await;
        assert!(garbage.is_error());

        let line = garbage.to_result_line().unwrap();
        assert_eq!(parse_result_line(&line).unwrap(), garbage);
    }

    #[tokio::test]
    async fn fit_returns_the_model_without_writing_it() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let runner = InProcessRunner::new(
            Arc::new(ModelRegistry::new(store.clone())),
            TrainerSettings::default(),
        );

        let set = TrainingSet::new(Granularity::Monthly);
        let input = serde_json::to_string(&set).unwrap();
        let response = execute(&runner, WorkerCommand::Fit, &input).await;
        match parse_result_line(&response.to_result_line().unwrap()).unwrap() {
            WorkerResponse::Fitted { model } => {
                assert_eq!(model.granularity, Granularity::Monthly);
                assert_eq!(model.sample_count, 0);
            }
            other => panic!("expected a fitted model, got {:?}", other),
        }
        assert!(!store.path_for(Granularity::Monthly).exists());
    }
}
