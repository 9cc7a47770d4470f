/*!
 * # Model Runners
 *
 * The prediction and training services talk to models through two narrow
 * traits. `InProcessRunner` serves artifacts from a local `ModelRegistry`;
 * `SubprocessRunner` delegates each call to the `demand-worker` binary over
 * the stdin / `RESULT:` line contract in [`super::worker`].
 *
 * Training is two steps. `fit` produces a model without touching the
 * artifact directory; `publish` persists it and makes it the served one.
 * Only the caller decides whether a fitted model gets published.
 */

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::artifact::{ArtifactStore, ModelRegistry};
use super::demand_model::{ModelOutput, ModelSummary, TrainedModel};
use super::features::{FeatureVector, TrainingSet};
use super::random_forest::ForestConfig;
use super::worker::{parse_result_line, PredictRequest, WorkerCommand, WorkerResponse};
use crate::errors::ServiceError;
use crate::models::Granularity;

#[async_trait]
pub trait DemandPredictor: Send + Sync {
    async fn predict(
        &self,
        granularity: Granularity,
        features: &FeatureVector,
    ) -> Result<ModelOutput, ServiceError>;
}

#[async_trait]
pub trait DemandTrainer: Send + Sync {
    /// Fits a model on `set`. Nothing is persisted or served yet.
    async fn fit(&self, set: TrainingSet) -> Result<TrainedModel, ServiceError>;

    /// Persists `model` and makes it the one served for its granularity.
    async fn publish(&self, model: TrainedModel) -> Result<ModelSummary, ServiceError>;

    async fn train(&self, set: TrainingSet) -> Result<ModelSummary, ServiceError> {
        let model = self.fit(set).await?;
        self.publish(model).await
    }
}

/// Hyper-parameters used when fitting models.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerSettings {
    pub daily_forest: ForestConfig,
    pub monthly_forest: ForestConfig,
    pub min_training_samples: usize,
}

impl Default for TrainerSettings {
    fn default() -> Self {
        Self {
            daily_forest: ForestConfig::daily(),
            monthly_forest: ForestConfig::monthly(),
            min_training_samples: 5,
        }
    }
}

impl TrainerSettings {
    pub fn forest_for(&self, granularity: Granularity) -> &ForestConfig {
        match granularity {
            Granularity::Daily => &self.daily_forest,
            Granularity::Monthly => &self.monthly_forest,
        }
    }

    /// Fits a model without publishing it.
    pub async fn fit(&self, set: TrainingSet) -> Result<TrainedModel, ServiceError> {
        let forest = self.forest_for(set.granularity).clone();
        let min_samples = self.min_training_samples;
        tokio::task::spawn_blocking(move || TrainedModel::fit(&set, &forest, min_samples)).await?
    }
}

#[async_trait]
impl DemandPredictor for TrainedModel {
    async fn predict(
        &self,
        granularity: Granularity,
        features: &FeatureVector,
    ) -> Result<ModelOutput, ServiceError> {
        if granularity != self.granularity {
            return Err(ServiceError::ModelShapeMismatch(format!(
                "{} model asked for a {} prediction",
                self.granularity, granularity
            )));
        }
        self.infer(features)
    }
}

#[derive(Clone)]
pub struct InProcessRunner {
    registry: Arc<ModelRegistry>,
    settings: TrainerSettings,
}

impl InProcessRunner {
    pub fn new(registry: Arc<ModelRegistry>, settings: TrainerSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &TrainerSettings {
        &self.settings
    }
}

#[async_trait]
impl DemandPredictor for InProcessRunner {
    async fn predict(
        &self,
        granularity: Granularity,
        features: &FeatureVector,
    ) -> Result<ModelOutput, ServiceError> {
        let model = self.registry.get(granularity).await?;
        model.predict(granularity, features).await
    }
}

#[async_trait]
impl DemandTrainer for InProcessRunner {
    #[instrument(skip(self, set), fields(granularity = %set.granularity, samples = set.len()))]
    async fn fit(&self, set: TrainingSet) -> Result<TrainedModel, ServiceError> {
        self.settings.fit(set).await
    }

    async fn publish(&self, model: TrainedModel) -> Result<ModelSummary, ServiceError> {
        let granularity = model.granularity;
        let published = self.registry.publish(model).await?;
        let path = self.registry.store().path_for(granularity);
        Ok(published.summary(Some(path.display().to_string())))
    }
}

/// Runs each call in a fresh `demand-worker` process. The worker reads and
/// fits; publishing happens here, in the calling process.
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: PathBuf,
    store: ArtifactStore,
    timeout: Duration,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>, store: ArtifactStore, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            store,
            timeout,
        }
    }

    #[instrument(skip(self, payload), fields(program = %self.program.display()))]
    async fn call(
        &self,
        command: WorkerCommand,
        payload: Vec<u8>,
    ) -> Result<WorkerResponse, ServiceError> {
        let mut child = Command::new(&self.program)
            .arg("--artifact-dir")
            .arg(self.store.dir())
            .arg(command.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ServiceError::WorkerError(format!(
                    "failed to start {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ServiceError::WorkerError(format!(
                    "{} did not finish within {}s",
                    command,
                    self.timeout.as_secs()
                ))
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // Prefer the structured error when the worker managed to emit one
            if let Ok(WorkerResponse::Error { message }) = parse_result_line(&stdout) {
                return Err(ServiceError::WorkerError(message));
            }
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ServiceError::WorkerError(format!(
                "{} exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        debug!(%command, "worker call finished");
        parse_result_line(&stdout)
    }
}

#[async_trait]
impl DemandPredictor for SubprocessRunner {
    async fn predict(
        &self,
        granularity: Granularity,
        features: &FeatureVector,
    ) -> Result<ModelOutput, ServiceError> {
        let request = PredictRequest {
            granularity,
            features: features.clone(),
        };
        match self
            .call(WorkerCommand::Predict, serde_json::to_vec(&request)?)
            .await?
        {
            WorkerResponse::Prediction { output } => Ok(output),
            WorkerResponse::Error { message } => Err(ServiceError::WorkerError(message)),
            other => Err(ServiceError::WorkerError(format!(
                "unexpected worker response to predict: {:?}",
                other
            ))),
        }
    }
}

#[async_trait]
impl DemandTrainer for SubprocessRunner {
    async fn fit(&self, set: TrainingSet) -> Result<TrainedModel, ServiceError> {
        match self
            .call(WorkerCommand::Fit, serde_json::to_vec(&set)?)
            .await?
        {
            WorkerResponse::Fitted { model } => Ok(*model),
            WorkerResponse::Error { message } => Err(ServiceError::TrainingFailed(message)),
            other => Err(ServiceError::WorkerError(format!(
                "unexpected worker response to fit: {:?}",
                other
            ))),
        }
    }

    async fn publish(&self, model: TrainedModel) -> Result<ModelSummary, ServiceError> {
        let store = self.store.clone();
        let (model, path) = tokio::task::spawn_blocking(move || {
            store.save(&model).map(|path| (model, path))
        })
        .await??;
        Ok(model.summary(Some(path.display().to_string())))
    }
}
