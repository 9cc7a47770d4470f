//! Interfaces the demand core consumes from (and writes back to) its host.
//!
//! The host owns the ledger, the item registry and wherever predictions,
//! rules and training status are persisted. `memory` provides in-process
//! implementations used by the demo server, the worker and the tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use crate::errors::ServiceError;
use crate::models::{
    AssociationRule, Basket, DateRange, Direction, Granularity, Item, ItemId, Prediction,
    TrainingStatus, TransactionRecord,
};
use chrono::NaiveDate;

pub mod memory;

pub use memory::{
    InMemoryLedger, InMemoryPredictionStore, InMemoryRuleStore, InMemoryStatusSink,
    LedgerSnapshot,
};

#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn list_transactions(
        &self,
        item_id: Option<ItemId>,
        range: Option<DateRange>,
        direction: Direction,
    ) -> Result<Vec<TransactionRecord>, ServiceError>;
}

#[async_trait]
pub trait ItemRegistry: Send + Sync {
    /// Fails with `ItemNotFound` for unknown ids.
    async fn get_item(&self, item_id: ItemId) -> Result<Item, ServiceError>;

    async fn list_items(&self) -> Result<Vec<Item>, ServiceError>;
}

#[async_trait]
pub trait BasketSource: Send + Sync {
    async fn list_outgoing_baskets(
        &self,
        range: Option<DateRange>,
    ) -> Result<Vec<Basket>, ServiceError>;
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    async fn find(
        &self,
        item_id: ItemId,
        granularity: Granularity,
        period_start: NaiveDate,
    ) -> Result<Option<Prediction>, ServiceError>;

    /// Inserts or replaces the prediction for its (item, granularity, period).
    async fn upsert(&self, prediction: Prediction) -> Result<(), ServiceError>;

    async fn list(&self, granularity: Option<Granularity>) -> Result<Vec<Prediction>, ServiceError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Replaces the whole active rule set.
    async fn replace(&self, rules: Vec<AssociationRule>) -> Result<(), ServiceError>;

    async fn active(&self) -> Result<Vec<AssociationRule>, ServiceError>;
}

/// Where training status transitions are published for pollers.
#[async_trait]
pub trait TrainingStatusSink: Send + Sync {
    async fn record(&self, status: TrainingStatus) -> Result<(), ServiceError>;

    async fn current(&self, granularity: Granularity) -> Result<TrainingStatus, ServiceError>;
}

/// Groups outbound lines into baskets by transaction id, or by day when a
/// line has none. Repeated items within a basket collapse.
pub fn group_baskets<'a>(records: impl IntoIterator<Item = &'a TransactionRecord>) -> Vec<Basket> {
    let mut groups: BTreeMap<String, BTreeSet<ItemId>> = BTreeMap::new();
    for record in records
        .into_iter()
        .filter(|r| r.direction == Direction::Outbound)
    {
        let key = record
            .transaction_group
            .clone()
            .unwrap_or_else(|| format!("DATE_{}", record.occurred_on));
        groups.entry(key).or_default().insert(record.item_id);
    }
    groups
        .into_iter()
        .map(|(transaction_group_id, items)| Basket {
            transaction_group_id,
            items,
        })
        .collect()
}
