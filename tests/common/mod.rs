#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use stateset_demand::{
    config::DemandConfig,
    ml::artifact::ArtifactStore,
    models::{Item, TransactionRecord},
    repositories::InMemoryLedger,
    AppState, Repositories,
};

pub fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

/// Ledger with a fixed catalogue and nothing recorded yet.
pub fn ledger_with_items(items: &[(u64, &str)]) -> InMemoryLedger {
    let ledger = InMemoryLedger::new();
    for (id, label) in items {
        ledger.add_item(Item::new(*id, *label));
    }
    ledger
}

/// Records an outbound line per `(item, quantity, date)`.
pub fn record_sales(ledger: &InMemoryLedger, sales: &[(u64, u64, NaiveDate)]) {
    ledger.record_all(
        sales
            .iter()
            .map(|(item, quantity, date)| TransactionRecord::outbound(*item, *quantity, *date)),
    );
}

/// Router over an in-memory ledger with models served in-process from a
/// scratch artifact directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub artifacts: TempDir,
}

impl TestApp {
    pub fn new(ledger: InMemoryLedger) -> Self {
        Self::with_config(ledger, DemandConfig::default())
    }

    pub fn with_config(ledger: InMemoryLedger, mut config: DemandConfig) -> Self {
        let artifacts = TempDir::new().expect("artifact dir");
        config.artifact_dir = artifacts.path().to_path_buf();
        let state = AppState::from_config(config, Repositories::in_memory(ledger));
        let router = stateset_demand::app_router(state.clone());
        Self {
            router,
            state,
            artifacts,
        }
    }

    pub fn artifact_store(&self) -> ArtifactStore {
        ArtifactStore::new(self.artifacts.path())
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, None).await
    }
}
