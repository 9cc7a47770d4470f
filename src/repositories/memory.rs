use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{
    group_baskets, BasketSource, ItemRegistry, PredictionStore, RuleStore, TrainingStatusSink,
    TransactionSource,
};
use crate::errors::ServiceError;
use crate::models::{
    AssociationRule, Basket, DateRange, Direction, Granularity, Item, ItemId, Prediction,
    TrainingStatus, TransactionRecord,
};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // Recover from poisoned lock
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Items and ledger lines loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub transactions: Vec<TransactionRecord>,
}

impl LedgerSnapshot {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Item registry plus transaction ledger held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    items: Arc<RwLock<BTreeMap<ItemId, Item>>>,
    transactions: Arc<RwLock<Vec<TransactionRecord>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Self {
        let ledger = Self::new();
        for item in snapshot.items {
            ledger.add_item(item);
        }
        ledger.record_all(snapshot.transactions);
        ledger
    }

    pub fn add_item(&self, item: Item) {
        write(&self.items).insert(item.id, item);
    }

    pub fn record(&self, transaction: TransactionRecord) {
        write(&self.transactions).push(transaction);
    }

    pub fn record_all(&self, transactions: impl IntoIterator<Item = TransactionRecord>) {
        write(&self.transactions).extend(transactions);
    }

    pub fn transaction_count(&self) -> usize {
        read(&self.transactions).len()
    }
}

#[async_trait]
impl TransactionSource for InMemoryLedger {
    async fn list_transactions(
        &self,
        item_id: Option<ItemId>,
        range: Option<DateRange>,
        direction: Direction,
    ) -> Result<Vec<TransactionRecord>, ServiceError> {
        let transactions = read(&self.transactions);
        Ok(transactions
            .iter()
            .filter(|t| t.direction == direction)
            .filter(|t| item_id.map_or(true, |id| t.item_id == id))
            .filter(|t| range.map_or(true, |r| r.contains(t.occurred_on)))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ItemRegistry for InMemoryLedger {
    async fn get_item(&self, item_id: ItemId) -> Result<Item, ServiceError> {
        read(&self.items)
            .get(&item_id)
            .cloned()
            .ok_or(ServiceError::ItemNotFound(item_id))
    }

    async fn list_items(&self) -> Result<Vec<Item>, ServiceError> {
        Ok(read(&self.items).values().cloned().collect())
    }
}

#[async_trait]
impl BasketSource for InMemoryLedger {
    async fn list_outgoing_baskets(
        &self,
        range: Option<DateRange>,
    ) -> Result<Vec<Basket>, ServiceError> {
        let transactions = read(&self.transactions);
        Ok(group_baskets(
            transactions
                .iter()
                .filter(|t| range.map_or(true, |r| r.contains(t.occurred_on))),
        ))
    }
}

type PredictionKey = (ItemId, Granularity, NaiveDate);

#[derive(Debug, Clone, Default)]
pub struct InMemoryPredictionStore {
    predictions: Arc<RwLock<BTreeMap<PredictionKey, Prediction>>>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.predictions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn find(
        &self,
        item_id: ItemId,
        granularity: Granularity,
        period_start: NaiveDate,
    ) -> Result<Option<Prediction>, ServiceError> {
        Ok(read(&self.predictions)
            .get(&(item_id, granularity, period_start))
            .cloned())
    }

    async fn upsert(&self, prediction: Prediction) -> Result<(), ServiceError> {
        let key = (
            prediction.item_id,
            prediction.period_type,
            prediction.period_start,
        );
        write(&self.predictions).insert(key, prediction);
        Ok(())
    }

    async fn list(&self, granularity: Option<Granularity>) -> Result<Vec<Prediction>, ServiceError> {
        Ok(read(&self.predictions)
            .values()
            .filter(|p| granularity.map_or(true, |g| p.period_type == g))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    rules: Arc<RwLock<Vec<AssociationRule>>>,
    generation: Arc<RwLock<u64>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed replacements.
    pub fn generation(&self) -> u64 {
        *read(&self.generation)
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn replace(&self, rules: Vec<AssociationRule>) -> Result<(), ServiceError> {
        *write(&self.rules) = rules;
        *write(&self.generation) += 1;
        Ok(())
    }

    async fn active(&self) -> Result<Vec<AssociationRule>, ServiceError> {
        Ok(read(&self.rules).clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStatusSink {
    statuses: Arc<RwLock<BTreeMap<Granularity, TrainingStatus>>>,
    history: Arc<RwLock<Vec<TrainingStatus>>>,
}

impl InMemoryStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every status ever recorded, oldest first.
    pub fn history(&self) -> Vec<TrainingStatus> {
        read(&self.history).clone()
    }
}

#[async_trait]
impl TrainingStatusSink for InMemoryStatusSink {
    async fn record(&self, status: TrainingStatus) -> Result<(), ServiceError> {
        write(&self.history).push(status.clone());
        write(&self.statuses).insert(status.granularity, status);
        Ok(())
    }

    async fn current(&self, granularity: Granularity) -> Result<TrainingStatus, ServiceError> {
        Ok(read(&self.statuses)
            .get(&granularity)
            .cloned()
            .unwrap_or_else(|| TrainingStatus::idle(granularity)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TrainingState;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[tokio::test]
    async fn ledger_filters_by_item_range_and_direction() {
        let ledger = InMemoryLedger::new();
        ledger.record_all(vec![
            TransactionRecord::outbound(1, 3, d(1)),
            TransactionRecord::outbound(1, 4, d(5)),
            TransactionRecord::outbound(2, 9, d(2)),
            TransactionRecord::inbound(1, 50, d(2)),
        ]);

        let range = DateRange::new(d(1), d(5)).unwrap();
        let rows = ledger
            .list_transactions(Some(ItemId(1)), Some(range), Direction::Outbound)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].quantity, 3);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let ledger = InMemoryLedger::new();
        ledger.add_item(Item::new(1, "Widget"));
        assert_eq!(ledger.get_item(ItemId(1)).await.unwrap().label, "Widget");
        assert!(matches!(
            ledger.get_item(ItemId(2)).await,
            Err(ServiceError::ItemNotFound(ItemId(2)))
        ));
    }

    #[tokio::test]
    async fn status_sink_defaults_to_idle() {
        let sink = InMemoryStatusSink::new();
        let status = sink.current(Granularity::Daily).await.unwrap();
        assert_eq!(status.state, TrainingState::Idle);
        assert!(sink.history().is_empty());
    }

    #[tokio::test]
    async fn rule_store_replaces_wholesale() {
        let store = InMemoryRuleStore::new();
        let rule = AssociationRule {
            antecedent: vec!["A".into()],
            consequent: vec!["B".into()],
            support: 0.5,
            confidence: 0.8,
            lift: 1.2,
            description: AssociationRule::describe(&["A".to_string()], &["B".to_string()]),
        };
        store.replace(vec![rule.clone(), rule]).await.unwrap();
        store.replace(Vec::new()).await.unwrap();
        assert!(store.active().await.unwrap().is_empty());
        assert_eq!(store.generation(), 2);
    }
}
