/*!
 * # Model Artifacts
 *
 * One JSON artifact per granularity at
 * `<dir>/demand-<granularity>.v<schema>.json`. Writes go to a temp file in
 * the same directory which is then renamed over the old artifact, so a
 * reader sees either the previous model or the new one, never a partial
 * file. `ModelRegistry` keeps the currently published models in memory.
 */

use dashmap::DashMap;
use serde::Deserialize;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::demand_model::{TrainedModel, ARTIFACT_SCHEMA_VERSION};
use crate::errors::ServiceError;
use crate::models::Granularity;

#[derive(Deserialize)]
struct ArtifactHeader {
    schema_version: u32,
    granularity: Granularity,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, granularity: Granularity) -> PathBuf {
        self.dir.join(format!(
            "demand-{}.v{}.json",
            granularity, ARTIFACT_SCHEMA_VERSION
        ))
    }

    pub fn load(&self, granularity: Granularity) -> Result<TrainedModel, ServiceError> {
        let path = self.path_for(granularity);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ServiceError::ModelArtifactMissing(path.display().to_string()))
            }
            Err(err) => return Err(ServiceError::Io(err)),
        };

        let header: ArtifactHeader = serde_json::from_slice(&bytes).map_err(|e| {
            ServiceError::ModelArtifactCorrupt(format!("{}: {}", path.display(), e))
        })?;
        if header.schema_version != ARTIFACT_SCHEMA_VERSION {
            return Err(ServiceError::ModelArtifactCorrupt(format!(
                "{}: schema version {} is not supported (expected {})",
                path.display(),
                header.schema_version,
                ARTIFACT_SCHEMA_VERSION
            )));
        }
        if header.granularity != granularity {
            return Err(ServiceError::ModelArtifactCorrupt(format!(
                "{}: holds a {} model",
                path.display(),
                header.granularity
            )));
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| ServiceError::ModelArtifactCorrupt(format!("{}: {}", path.display(), e)))
    }

    /// Atomically replaces the artifact for the model's granularity.
    pub fn save(&self, model: &TrainedModel) -> Result<PathBuf, ServiceError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(model.granularity);

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, model)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| ServiceError::Io(e.error))?;

        info!(path = %path.display(), granularity = %model.granularity, "model artifact written");
        Ok(path)
    }
}

/// Published models, loaded lazily from the store and swapped on retrain.
#[derive(Debug)]
pub struct ModelRegistry {
    store: ArtifactStore,
    models: DashMap<Granularity, Arc<TrainedModel>>,
}

impl ModelRegistry {
    pub fn new(store: ArtifactStore) -> Self {
        Self {
            store,
            models: DashMap::new(),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub async fn get(&self, granularity: Granularity) -> Result<Arc<TrainedModel>, ServiceError> {
        if let Some(model) = self.models.get(&granularity) {
            return Ok(Arc::clone(model.value()));
        }

        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load(granularity)).await?;
        match loaded {
            Ok(model) => {
                let model = Arc::new(model);
                self.models.insert(granularity, Arc::clone(&model));
                Ok(model)
            }
            Err(err) => {
                warn!(%granularity, error = %err, "model artifact unavailable");
                Err(err)
            }
        }
    }

    /// Persists `model` and makes it the one served for its granularity.
    pub async fn publish(&self, model: TrainedModel) -> Result<Arc<TrainedModel>, ServiceError> {
        let store = self.store.clone();
        let model = Arc::new(model);
        let to_save = Arc::clone(&model);
        tokio::task::spawn_blocking(move || store.save(&to_save)).await??;
        self.models.insert(model.granularity, Arc::clone(&model));
        Ok(model)
    }

    pub fn invalidate(&self, granularity: Granularity) {
        self.models.remove(&granularity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::TrainingSet;
    use crate::ml::random_forest::ForestConfig;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn model(granularity: Granularity) -> TrainedModel {
        TrainedModel::fit(&TrainingSet::new(granularity), &ForestConfig::monthly(), 5).unwrap()
    }

    #[test]
    fn save_then_load_returns_the_same_model() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let original = model(Granularity::Monthly);
        let path = store.save(&original).unwrap();
        assert!(path.ends_with("demand-monthly.v1.json"));
        assert_eq!(store.load(Granularity::Monthly).unwrap(), original);
    }

    #[test]
    fn missing_and_corrupt_artifacts_are_distinguished() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert_matches!(
            store.load(Granularity::Daily),
            Err(ServiceError::ModelArtifactMissing(_))
        );

        std::fs::write(store.path_for(Granularity::Daily), b"{not json").unwrap();
        assert_matches!(
            store.load(Granularity::Daily),
            Err(ServiceError::ModelArtifactCorrupt(_))
        );
    }

    #[test]
    fn incompatible_schema_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let mut stale = serde_json::to_value(model(Granularity::Daily)).unwrap();
        stale["schema_version"] = serde_json::json!(0);
        std::fs::write(
            store.path_for(Granularity::Daily),
            serde_json::to_vec(&stale).unwrap(),
        )
        .unwrap();

        let err = store.load(Granularity::Daily).unwrap_err();
        assert!(err.to_string().contains("schema version 0"));
    }

    #[test]
    fn artifact_of_other_granularity_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store.save(&model(Granularity::Monthly)).unwrap();
        std::fs::copy(
            store.path_for(Granularity::Monthly),
            store.path_for(Granularity::Daily),
        )
        .unwrap();
        assert_matches!(
            store.load(Granularity::Daily),
            Err(ServiceError::ModelArtifactCorrupt(_))
        );
    }

    #[tokio::test]
    async fn registry_serves_published_model_without_reloading() {
        let dir = TempDir::new().unwrap();
        let registry = ModelRegistry::new(ArtifactStore::new(dir.path()));
        assert!(registry.get(Granularity::Monthly).await.is_err());

        let published = registry.publish(model(Granularity::Monthly)).await.unwrap();
        std::fs::remove_file(registry.store().path_for(Granularity::Monthly)).unwrap();

        let served = registry.get(Granularity::Monthly).await.unwrap();
        assert!(Arc::ptr_eq(&published, &served));

        registry.invalidate(Granularity::Monthly);
        assert!(registry.get(Granularity::Monthly).await.is_err());
    }
}
