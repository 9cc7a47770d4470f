use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use utoipa::ToSchema;

use super::ItemId;

/// Distinct items that left the warehouse together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    pub transaction_group_id: String,
    pub items: BTreeSet<ItemId>,
}

impl Basket {
    pub fn new(
        transaction_group_id: impl Into<String>,
        items: impl IntoIterator<Item = ItemId>,
    ) -> Self {
        Self {
            transaction_group_id: transaction_group_id.into(),
            items: items.into_iter().collect(),
        }
    }
}

/// `antecedent -> consequent`, both sorted label sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssociationRule {
    pub antecedent: Vec<String>,
    pub consequent: Vec<String>,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
    pub description: String,
}

impl AssociationRule {
    pub fn describe(antecedent: &[String], consequent: &[String]) -> String {
        format!(
            "If customers buy {}, they are likely to also buy {}",
            antecedent.join(", "),
            consequent.join(", ")
        )
    }
}
