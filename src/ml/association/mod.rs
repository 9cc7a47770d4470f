/*!
 * # Association Mining
 *
 * Frequent-itemset discovery over transaction baskets, with two
 * interchangeable miners:
 *
 * - [`apriori`]: level-wise candidate generation with subset pruning
 * - [`fp_growth`]: recursive conditional FP-trees, no candidate generation
 *
 * Both return the same [`FrequentItemsets`] for the same input and feed a
 * single rule derivation step in [`rules`]. Everything is generic over the
 * item type so mining runs on ids and labels are attached afterwards.
 */

pub mod apriori;
pub mod fp_growth;
pub mod rules;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::{Basket, ItemId};

pub use rules::{compare_rules, derive_rules, Rule};

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Algorithm {
    #[default]
    Apriori,
    FpGrowth,
}

impl Algorithm {
    pub fn frequent_itemsets<I: Ord + Clone>(
        self,
        transactions: &[BTreeSet<I>],
        min_support: f64,
    ) -> FrequentItemsets<I> {
        match self {
            Algorithm::Apriori => apriori::frequent_itemsets(transactions, min_support),
            Algorithm::FpGrowth => fp_growth::frequent_itemsets(transactions, min_support),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MiningThresholds {
    pub min_support: f64,
    pub min_confidence: f64,
}

impl MiningThresholds {
    pub fn new(min_support: f64, min_confidence: f64) -> Result<Self, ServiceError> {
        let thresholds = Self {
            min_support,
            min_confidence,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if !self.min_support.is_finite() || self.min_support <= 0.0 || self.min_support > 1.0 {
            return Err(ServiceError::ValidationError(format!(
                "min_support must be in (0, 1], got {}",
                self.min_support
            )));
        }
        if !self.min_confidence.is_finite()
            || self.min_confidence < 0.0
            || self.min_confidence > 1.0
        {
            return Err(ServiceError::ValidationError(format!(
                "min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        Ok(())
    }
}

/// Smallest absolute count meeting `min_support` over `n` transactions (at least 1).
pub fn min_count(min_support: f64, n: usize) -> usize {
    let raw = (min_support * n as f64 - 1e-9).ceil();
    if raw < 1.0 {
        1
    } else {
        raw as usize
    }
}

/// Every itemset meeting the minimum count, keyed by its sorted items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequentItemsets<I: Ord> {
    pub transaction_count: usize,
    pub min_count: usize,
    pub counts: BTreeMap<Vec<I>, usize>,
}

impl<I: Ord + Clone> FrequentItemsets<I> {
    pub fn empty(transaction_count: usize, min_count: usize) -> Self {
        Self {
            transaction_count,
            min_count,
            counts: BTreeMap::new(),
        }
    }

    pub fn count(&self, itemset: &[I]) -> Option<usize> {
        self.counts.get(itemset).copied()
    }

    pub fn support(&self, itemset: &[I]) -> Option<f64> {
        if self.transaction_count == 0 {
            return None;
        }
        self.count(itemset)
            .map(|c| c as f64 / self.transaction_count as f64)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.counts.keys().map(Vec::len).max().unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct MiningOutcome<I: Ord> {
    pub frequent: FrequentItemsets<I>,
    pub rules: Vec<Rule<I>>,
}

/// Frequent itemsets plus rules, sorted by confidence then support.
pub fn mine<I: Ord + Clone>(
    transactions: &[BTreeSet<I>],
    thresholds: &MiningThresholds,
    algorithm: Algorithm,
) -> Result<MiningOutcome<I>, ServiceError> {
    thresholds.validate()?;
    let frequent = algorithm.frequent_itemsets(transactions, thresholds.min_support);
    let rules = derive_rules(&frequent, thresholds.min_confidence);
    Ok(MiningOutcome { frequent, rules })
}

pub fn mine_baskets(
    baskets: &[Basket],
    thresholds: &MiningThresholds,
    algorithm: Algorithm,
) -> Result<MiningOutcome<ItemId>, ServiceError> {
    let transactions: Vec<BTreeSet<ItemId>> = baskets.iter().map(|b| b.items.clone()).collect();
    mine(&transactions, thresholds, algorithm)
}
