use metrics::counter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::ml::association::{compare_rules, mine_baskets, Algorithm, MiningThresholds, Rule};
use crate::models::{AssociationRule, Basket, DateRange, ItemId};
use crate::repositories::{BasketSource, ItemRegistry, RuleStore};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MiningSummary {
    pub baskets: usize,
    pub frequent_itemsets: usize,
    pub rules: usize,
    pub algorithm: Algorithm,
    pub min_support: f64,
    pub min_confidence: f64,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct MiningReport {
    pub rules: Vec<AssociationRule>,
    pub summary: MiningSummary,
}

/// Both miners over the same baskets.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AlgorithmComparison {
    pub apriori: MiningSummary,
    pub fp_growth: MiningSummary,
    /// Identical frequent itemsets and rules
    pub agree: bool,
}

/// Mines association rules from outgoing baskets and publishes them as the
/// active rule set.
#[derive(Clone)]
pub struct AssociationService {
    baskets: Arc<dyn BasketSource>,
    items: Arc<dyn ItemRegistry>,
    rules: Arc<dyn RuleStore>,
    defaults: MiningThresholds,
}

impl AssociationService {
    pub fn new(
        baskets: Arc<dyn BasketSource>,
        items: Arc<dyn ItemRegistry>,
        rules: Arc<dyn RuleStore>,
        defaults: MiningThresholds,
    ) -> Self {
        Self {
            baskets,
            items,
            rules,
            defaults,
        }
    }

    pub fn defaults(&self) -> MiningThresholds {
        self.defaults
    }

    /// Replaces the active rule set with a fresh mining run, even when the
    /// run finds nothing.
    #[instrument(skip(self))]
    pub async fn mine_associations(
        &self,
        min_support: f64,
        min_confidence: f64,
        date_filter: Option<DateRange>,
        algorithm: Algorithm,
    ) -> Result<MiningReport, ServiceError> {
        let thresholds = MiningThresholds::new(min_support, min_confidence)?;
        let started = Instant::now();

        let baskets = self.baskets.list_outgoing_baskets(date_filter).await?;
        let basket_count = baskets.len();
        let (frequent_itemsets, id_rules) = run_miner(baskets, thresholds, algorithm).await?;

        let labels = self.labels().await?;
        let rules = label_rules(id_rules, &labels);
        self.rules.replace(rules.clone()).await?;

        let summary = MiningSummary {
            baskets: basket_count,
            frequent_itemsets,
            rules: rules.len(),
            algorithm,
            min_support,
            min_confidence,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        };
        counter!("demand.mining.rules", rules.len() as u64, "algorithm" => algorithm.to_string());
        info!(
            baskets = summary.baskets,
            itemsets = summary.frequent_itemsets,
            rules = summary.rules,
            "association rules replaced"
        );
        Ok(MiningReport { rules, summary })
    }

    /// Runs both algorithms without touching the active rule set.
    #[instrument(skip(self))]
    pub async fn compare_algorithms(
        &self,
        thresholds: MiningThresholds,
        date_filter: Option<DateRange>,
    ) -> Result<AlgorithmComparison, ServiceError> {
        thresholds.validate()?;
        let baskets = self.baskets.list_outgoing_baskets(date_filter).await?;
        let basket_count = baskets.len();

        let timed = |algorithm: Algorithm, baskets: Vec<Basket>| async move {
            let started = Instant::now();
            let outcome = tokio::task::spawn_blocking(move || {
                mine_baskets(&baskets, &thresholds, algorithm)
            })
            .await??;
            Ok::<_, ServiceError>((outcome, started.elapsed().as_secs_f64() * 1000.0))
        };
        let (apriori, apriori_ms) = timed(Algorithm::Apriori, baskets.clone()).await?;
        let (fp_growth, fp_growth_ms) = timed(Algorithm::FpGrowth, baskets).await?;

        let summarize = |algorithm, frequent_itemsets, rules, elapsed_ms| MiningSummary {
            baskets: basket_count,
            frequent_itemsets,
            rules,
            algorithm,
            min_support: thresholds.min_support,
            min_confidence: thresholds.min_confidence,
            elapsed_ms,
        };
        let agree = apriori.frequent == fp_growth.frequent && apriori.rules == fp_growth.rules;
        Ok(AlgorithmComparison {
            apriori: summarize(
                Algorithm::Apriori,
                apriori.frequent.len(),
                apriori.rules.len(),
                apriori_ms,
            ),
            fp_growth: summarize(
                Algorithm::FpGrowth,
                fp_growth.frequent.len(),
                fp_growth.rules.len(),
                fp_growth_ms,
            ),
            agree,
        })
    }

    pub async fn active_rules(&self) -> Result<Vec<AssociationRule>, ServiceError> {
        self.rules.active().await
    }

    async fn labels(&self) -> Result<HashMap<ItemId, String>, ServiceError> {
        Ok(self
            .items
            .list_items()
            .await?
            .into_iter()
            .map(|item| (item.id, item.label))
            .collect())
    }
}

async fn run_miner(
    baskets: Vec<Basket>,
    thresholds: MiningThresholds,
    algorithm: Algorithm,
) -> Result<(usize, Vec<Rule<ItemId>>), ServiceError> {
    tokio::task::spawn_blocking(move || {
        mine_baskets(&baskets, &thresholds, algorithm)
            .map(|outcome| (outcome.frequent.len(), outcome.rules))
    })
    .await?
}

/// Swaps ids for labels (`item-<id>` when unknown), sorts each side and
/// re-orders the rules on the labelled form.
fn label_rules(rules: Vec<Rule<ItemId>>, labels: &HashMap<ItemId, String>) -> Vec<AssociationRule> {
    let mut labelled: Vec<Rule<String>> = rules
        .into_iter()
        .map(|rule| {
            let mut rule = rule.map(|id| {
                labels
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("item-{}", id))
            });
            rule.antecedent.sort();
            rule.consequent.sort();
            rule
        })
        .collect();
    labelled.sort_by(compare_rules);

    labelled
        .into_iter()
        .map(|rule| AssociationRule {
            description: AssociationRule::describe(&rule.antecedent, &rule.consequent),
            antecedent: rule.antecedent,
            consequent: rule.consequent,
            support: rule.support,
            confidence: rule.confidence,
            lift: rule.lift,
        })
        .collect()
}
