use chrono::{NaiveDate, Utc};
use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::aggregation::TransactionAggregator;
use crate::errors::ServiceError;
use crate::ml::{DemandTrainer, FeatureBuilder, ModelSummary, TrainedModel, TrainingSet};
use crate::models::{Granularity, TrainingStatus};
use crate::repositories::TrainingStatusSink;

/// One "run in progress" flag per granularity.
#[derive(Debug, Default)]
struct RunFlags {
    daily: AtomicBool,
    monthly: AtomicBool,
}

impl RunFlags {
    fn slot(&self, granularity: Granularity) -> &AtomicBool {
        match granularity {
            Granularity::Daily => &self.daily,
            Granularity::Monthly => &self.monthly,
        }
    }
}

/// Held for the lifetime of a run; releases the flag on drop.
struct RunGuard {
    flags: Arc<RunFlags>,
    granularity: Granularity,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flags.slot(self.granularity).store(false, Ordering::Release);
    }
}

/// Retrains the per-granularity demand models, one run per granularity at a time.
#[derive(Clone)]
pub struct TrainingService {
    aggregator: TransactionAggregator,
    trainer: Arc<dyn DemandTrainer>,
    status: Arc<dyn TrainingStatusSink>,
    timeout: Duration,
    flags: Arc<RunFlags>,
}

impl TrainingService {
    pub fn new(
        aggregator: TransactionAggregator,
        trainer: Arc<dyn DemandTrainer>,
        status: Arc<dyn TrainingStatusSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            trainer,
            status,
            timeout,
            flags: Arc::new(RunFlags::default()),
        }
    }

    pub async fn status(&self, granularity: Granularity) -> Result<TrainingStatus, ServiceError> {
        self.status.current(granularity).await
    }

    /// Trains on every completed period before the current one and waits.
    pub async fn train(&self, granularity: Granularity) -> Result<ModelSummary, ServiceError> {
        self.train_as_of(granularity, Utc::now().date_naive()).await
    }

    /// Trains on periods strictly before the one containing `as_of`.
    pub async fn train_as_of(
        &self,
        granularity: Granularity,
        as_of: NaiveDate,
    ) -> Result<ModelSummary, ServiceError> {
        let guard = self.acquire(granularity)?;
        let started = self.begin(granularity).await?;
        self.finish(started, as_of, guard).await
    }

    /// Starts a run and returns once it is recorded as in progress. The run
    /// itself continues on a spawned task.
    pub async fn start_background(
        &self,
        granularity: Granularity,
    ) -> Result<TrainingStatus, ServiceError> {
        let guard = self.acquire(granularity)?;
        let started = self.begin(granularity).await?;

        let service = self.clone();
        let status = started.clone();
        let as_of = Utc::now().date_naive();
        tokio::spawn(async move {
            // Outcome is already recorded in the status sink
            let _ = service.finish(started, as_of, guard).await;
        });
        Ok(status)
    }

    fn acquire(&self, granularity: Granularity) -> Result<RunGuard, ServiceError> {
        self.flags
            .slot(granularity)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ServiceError::TrainingInProgress(granularity))?;
        Ok(RunGuard {
            flags: Arc::clone(&self.flags),
            granularity,
        })
    }

    async fn begin(&self, granularity: Granularity) -> Result<TrainingStatus, ServiceError> {
        let mut current = self.status.current(granularity).await?;
        if current.is_running() {
            // Left over from a run that never reported back
            warn!(%granularity, run_id = ?current.run_id, "discarding stale in-progress status");
            current = TrainingStatus::idle(granularity);
        }
        let started = current.start(Uuid::new_v4(), Utc::now())?;
        self.status.record(started.clone()).await?;
        info!(%granularity, run_id = ?started.run_id, "training started");
        Ok(started)
    }

    #[instrument(skip(self, started, _guard), fields(granularity = %started.granularity, run_id = ?started.run_id))]
    async fn finish(
        &self,
        started: TrainingStatus,
        as_of: NaiveDate,
        _guard: RunGuard,
    ) -> Result<ModelSummary, ServiceError> {
        let granularity = started.granularity;
        let fitted = match tokio::time::timeout(self.timeout, self.fit(granularity, as_of)).await {
            Ok(fitted) => fitted,
            Err(_) => Err(ServiceError::TrainingTimedOut(self.timeout.as_secs())),
        };
        // Only a fit that met the deadline reaches the artifact directory
        let result = match fitted {
            Ok(model) => self.trainer.publish(model).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(summary) => {
                self.status
                    .record(started.complete(summary.clone(), Utc::now())?)
                    .await?;
                counter!("demand.training.completed", 1, "granularity" => granularity.to_string());
                info!(samples = summary.sample_count, "training completed");
                Ok(summary)
            }
            Err(err) => {
                error!(error = %err, "training failed");
                counter!("demand.training.failed", 1, "granularity" => granularity.to_string());
                self.status
                    .record(started.fail(err.to_string(), Utc::now())?)
                    .await?;
                Err(err)
            }
        }
    }

    async fn fit(&self, granularity: Granularity, as_of: NaiveDate) -> Result<TrainedModel, ServiceError> {
        let cutoff = granularity.period_start(as_of);
        let set = self.training_set(granularity, cutoff).await?;
        info!(samples = set.len(), %cutoff, "training set assembled");
        self.trainer.fit(set).await
    }

    pub async fn training_set(
        &self,
        granularity: Granularity,
        cutoff: NaiveDate,
    ) -> Result<TrainingSet, ServiceError> {
        assemble_training_set(&self.aggregator, granularity, cutoff).await
    }
}

/// Rows for every complete period before `cutoff`, across all items.
pub async fn assemble_training_set(
    aggregator: &TransactionAggregator,
    granularity: Granularity,
    cutoff: NaiveDate,
) -> Result<TrainingSet, ServiceError> {
    let history = aggregator.history(granularity, cutoff).await?;
    let mut set = TrainingSet::new(granularity);
    for series in history.values() {
        set.extend(FeatureBuilder::training_examples(series, cutoff));
    }
    set.sort_chronologically();
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::artifact::{ArtifactStore, ModelRegistry};
    use crate::ml::random_forest::ForestConfig;
    use crate::ml::runner::{InProcessRunner, TrainerSettings};
    use crate::models::{TrainingState, TransactionRecord};
    use crate::repositories::{InMemoryLedger, InMemoryStatusSink};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ledger() -> Arc<InMemoryLedger> {
        let ledger = InMemoryLedger::new();
        for month in 1..=8 {
            ledger.record(TransactionRecord::outbound(1, 10 + u64::from(month), d(2024, month, 3)));
            ledger.record(TransactionRecord::outbound(2, 4, d(2024, month, 9)));
        }
        Arc::new(ledger)
    }

    fn settings() -> TrainerSettings {
        TrainerSettings {
            monthly_forest: ForestConfig {
                n_trees: 8,
                ..ForestConfig::monthly()
            },
            ..TrainerSettings::default()
        }
    }

    struct SlowTrainer;

    #[async_trait]
    impl DemandTrainer for SlowTrainer {
        async fn fit(&self, _set: TrainingSet) -> Result<TrainedModel, ServiceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(ServiceError::TrainingFailed("unreachable".into()))
        }

        async fn publish(&self, _model: TrainedModel) -> Result<ModelSummary, ServiceError> {
            Err(ServiceError::TrainingFailed("unreachable".into()))
        }
    }

    /// Real fitting and publishing, each delayed, with publish calls counted.
    struct DelayedTrainer {
        inner: InProcessRunner,
        fit_delay: Duration,
        publish_delay: Duration,
        publishes: AtomicUsize,
    }

    impl DelayedTrainer {
        fn new(registry: Arc<ModelRegistry>, fit_delay: Duration, publish_delay: Duration) -> Self {
            Self {
                inner: InProcessRunner::new(registry, settings()),
                fit_delay,
                publish_delay,
                publishes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DemandTrainer for DelayedTrainer {
        async fn fit(&self, set: TrainingSet) -> Result<TrainedModel, ServiceError> {
            let model = self.inner.fit(set).await?;
            tokio::time::sleep(self.fit_delay).await;
            Ok(model)
        }

        async fn publish(&self, model: TrainedModel) -> Result<ModelSummary, ServiceError> {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.publish_delay).await;
            self.inner.publish(model).await
        }
    }

    #[tokio::test]
    async fn training_uses_only_completed_periods() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(dir.path())));
        let sink = Arc::new(InMemoryStatusSink::new());
        let service = TrainingService::new(
            TransactionAggregator::new(ledger()),
            Arc::new(InProcessRunner::new(registry.clone(), settings())),
            sink.clone(),
            Duration::from_secs(60),
        );

        let set = service
            .training_set(Granularity::Monthly, d(2024, 6, 1))
            .await
            .unwrap();
        assert_eq!(set.len(), 10);
        assert!(set.examples.iter().all(|e| e.period < d(2024, 6, 1)));

        let summary = service
            .train_as_of(Granularity::Monthly, d(2024, 6, 20))
            .await
            .unwrap();
        assert_eq!(summary.sample_count, 10);
        assert!(registry.get(Granularity::Monthly).await.is_ok());

        let states: Vec<TrainingState> = sink.history().iter().map(|s| s.state).collect();
        assert_eq!(states, vec![TrainingState::InProgress, TrainingState::Completed]);
        let status = service.status(Granularity::Monthly).await.unwrap();
        assert_eq!(status.summary.map(|s| s.sample_count), Some(10));
    }

    #[tokio::test]
    async fn overlapping_runs_are_rejected_and_timeouts_fail() {
        let sink = Arc::new(InMemoryStatusSink::new());
        let service = TrainingService::new(
            TransactionAggregator::new(ledger()),
            Arc::new(SlowTrainer),
            sink.clone(),
            Duration::from_millis(50),
        );

        let started = service.start_background(Granularity::Daily).await.unwrap();
        assert_eq!(started.state, TrainingState::InProgress);
        assert_matches!(
            service.train(Granularity::Daily).await,
            Err(ServiceError::TrainingInProgress(Granularity::Daily))
        );

        // Other granularities are independent
        assert_matches!(
            service.train(Granularity::Monthly).await,
            Err(ServiceError::TrainingTimedOut(0))
        );

        for _ in 0..100 {
            if !service.status(Granularity::Daily).await.unwrap().is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let daily = service.status(Granularity::Daily).await.unwrap();
        assert_eq!(daily.state, TrainingState::Failed);
        assert!(daily.detail.unwrap().contains("timed out"));

        // The lock goes away with the finished run
        let mut retry = service.train(Granularity::Daily).await;
        for _ in 0..100 {
            if !matches!(retry, Err(ServiceError::TrainingInProgress(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            retry = service.train(Granularity::Daily).await;
        }
        assert_matches!(retry, Err(ServiceError::TrainingTimedOut(_)));
    }

    #[tokio::test]
    async fn fit_past_the_deadline_is_never_published() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(dir.path())));
        let trainer = Arc::new(DelayedTrainer::new(
            registry.clone(),
            Duration::from_millis(300),
            Duration::ZERO,
        ));
        let sink = Arc::new(InMemoryStatusSink::new());
        let service = TrainingService::new(
            TransactionAggregator::new(ledger()),
            trainer.clone(),
            sink.clone(),
            Duration::from_millis(50),
        );

        assert_matches!(
            service.train_as_of(Granularity::Monthly, d(2024, 6, 20)).await,
            Err(ServiceError::TrainingTimedOut(_))
        );
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(trainer.publishes.load(Ordering::SeqCst), 0);
        assert!(!registry.store().path_for(Granularity::Monthly).exists());
        let status = service.status(Granularity::Monthly).await.unwrap();
        assert_eq!(status.state, TrainingState::Failed);
    }

    #[tokio::test]
    async fn slow_publish_after_a_timely_fit_completes() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(dir.path())));
        let trainer = Arc::new(DelayedTrainer::new(
            registry.clone(),
            Duration::ZERO,
            Duration::from_millis(500),
        ));
        // The deadline covers fitting only
        let service = TrainingService::new(
            TransactionAggregator::new(ledger()),
            trainer.clone(),
            Arc::new(InMemoryStatusSink::new()),
            Duration::from_millis(250),
        );

        let summary = service
            .train_as_of(Granularity::Monthly, d(2024, 6, 20))
            .await
            .unwrap();
        assert_eq!(summary.sample_count, 10);
        assert_eq!(trainer.publishes.load(Ordering::SeqCst), 1);
        // Status and disk agree
        assert!(registry.store().path_for(Granularity::Monthly).exists());
        let status = service.status(Granularity::Monthly).await.unwrap();
        assert_eq!(status.state, TrainingState::Completed);
    }
}
