use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Identifier of an item in the host inventory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(value: u64) -> Self {
        ItemId(value)
    }
}

/// Stock movement direction. Outbound movements are demand.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A single ledger line as read from the host. Never mutated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TransactionRecord {
    pub item_id: ItemId,
    pub quantity: u64,
    pub occurred_on: NaiveDate,
    pub direction: Direction,
    /// Shared identifier of the order/transaction this line belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_group: Option<String>,
}

impl TransactionRecord {
    pub fn outbound(item_id: impl Into<ItemId>, quantity: u64, occurred_on: NaiveDate) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            occurred_on,
            direction: Direction::Outbound,
            transaction_group: None,
        }
    }

    pub fn inbound(item_id: impl Into<ItemId>, quantity: u64, occurred_on: NaiveDate) -> Self {
        Self {
            direction: Direction::Inbound,
            ..Self::outbound(item_id, quantity, occurred_on)
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.transaction_group = Some(group.into());
        self
    }
}

/// Item registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Item {
    pub id: ItemId,
    pub label: String,
    #[serde(default)]
    pub current_stock: u64,
}

impl Item {
    pub fn new(id: impl Into<ItemId>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            current_stock: 0,
        }
    }
}
