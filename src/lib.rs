//! StateSet Demand Library
//!
//! Stock-demand prediction (per-item, per-period forecasts with a heuristic
//! fallback), model training and backfill, and association-rule mining over
//! outgoing baskets.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod errors;
pub mod handlers;
pub mod ml;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;

use axum::{response::Json, routing::get, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::config::DemandConfig;
use crate::ml::artifact::{ArtifactStore, ModelRegistry};
use crate::ml::{DemandPredictor, DemandTrainer, InProcessRunner, SubprocessRunner};
use crate::repositories::{
    BasketSource, InMemoryLedger, InMemoryPredictionStore, InMemoryRuleStore, InMemoryStatusSink,
    ItemRegistry, PredictionStore, RuleStore, TrainingStatusSink, TransactionSource,
};
use crate::services::{
    AssociationService, BackfillService, PredictionService, ReportService, TrainingService,
    TransactionAggregator,
};

/// Host-side dependencies the services read from and write to.
#[derive(Clone)]
pub struct Repositories {
    pub transactions: Arc<dyn TransactionSource>,
    pub items: Arc<dyn ItemRegistry>,
    pub baskets: Arc<dyn BasketSource>,
    pub predictions: Arc<dyn PredictionStore>,
    pub rules: Arc<dyn RuleStore>,
    pub status: Arc<dyn TrainingStatusSink>,
}

impl Repositories {
    /// Everything backed by one in-memory ledger and in-memory stores.
    pub fn in_memory(ledger: InMemoryLedger) -> Self {
        let ledger = Arc::new(ledger);
        Self {
            transactions: ledger.clone(),
            items: ledger.clone(),
            baskets: ledger,
            predictions: Arc::new(InMemoryPredictionStore::new()),
            rules: Arc::new(InMemoryRuleStore::new()),
            status: Arc::new(InMemoryStatusSink::new()),
        }
    }
}

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<DemandConfig>,
    pub predictions: PredictionService,
    pub training: TrainingService,
    pub backfill: BackfillService,
    pub associations: AssociationService,
    pub reports: ReportService,
    pub prediction_store: Arc<dyn PredictionStore>,
}

impl AppState {
    pub fn new<R>(config: DemandConfig, repos: Repositories, runner: Arc<R>) -> Self
    where
        R: DemandPredictor + DemandTrainer + 'static,
    {
        let aggregator = TransactionAggregator::new(repos.transactions.clone());
        let predictions = PredictionService::new(
            repos.items.clone(),
            aggregator.clone(),
            runner.clone(),
            config.heuristic.clone(),
        );
        let training = TrainingService::new(
            aggregator.clone(),
            runner,
            repos.status.clone(),
            config.training_timeout(),
        );
        let backfill = BackfillService::new(
            repos.items.clone(),
            aggregator,
            predictions.clone(),
            repos.predictions.clone(),
            config.trainer_settings(),
        );
        let associations = AssociationService::new(
            repos.baskets.clone(),
            repos.items.clone(),
            repos.rules.clone(),
            config.default_thresholds(),
        );

        Self {
            config: Arc::new(config),
            predictions,
            training,
            backfill,
            associations,
            reports: ReportService::new(repos.predictions.clone()),
            prediction_store: repos.predictions,
        }
    }

    /// Model calls go through the worker binary when `model_worker_path` is
    /// set, otherwise artifacts under `artifact_dir` are served in-process.
    pub fn from_config(config: DemandConfig, repos: Repositories) -> Self {
        match config.model_worker_path.clone() {
            Some(worker) => {
                let runner = SubprocessRunner::new(
                    worker,
                    ArtifactStore::new(config.artifact_dir.clone()),
                    config.training_timeout(),
                );
                Self::new(config, repos, Arc::new(runner))
            }
            None => {
                let registry = Arc::new(ModelRegistry::new(ArtifactStore::new(
                    config.artifact_dir.clone(),
                )));
                let runner = InProcessRunner::new(registry, config.trainer_settings());
                Self::new(config, repos, Arc::new(runner))
            }
        }
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize, ToSchema)]
pub struct ResponseMeta {
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn validation_errors(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some("Validation failed".to_string()),
            errors: Some(errors),
            meta: Some(ResponseMeta::capture()),
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(handlers::predictions::routes())
        .merge(handlers::models::routes())
        .merge(handlers::associations::routes())
        .merge(handlers::backfill::routes())
}

/// Full application router.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}
