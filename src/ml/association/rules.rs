use std::cmp::Ordering;
use tracing::warn;

use super::FrequentItemsets;

/// Largest itemset for which every split is enumerated.
const MAX_RULE_ITEMSET: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Rule<I> {
    pub antecedent: Vec<I>,
    pub consequent: Vec<I>,
    pub support: f64,
    pub confidence: f64,
    pub lift: f64,
}

impl<I> Rule<I> {
    pub fn map<J, F>(self, mut f: F) -> Rule<J>
    where
        F: FnMut(I) -> J,
    {
        Rule {
            antecedent: self.antecedent.into_iter().map(&mut f).collect(),
            consequent: self.consequent.into_iter().map(&mut f).collect(),
            support: self.support,
            confidence: self.confidence,
            lift: self.lift,
        }
    }
}

/// Confidence desc, support desc, lift desc, then antecedent and consequent ascending.
pub fn compare_rules<I: Ord>(a: &Rule<I>, b: &Rule<I>) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.support.partial_cmp(&a.support).unwrap_or(Ordering::Equal))
        .then_with(|| b.lift.partial_cmp(&a.lift).unwrap_or(Ordering::Equal))
        .then_with(|| a.antecedent.cmp(&b.antecedent))
        .then_with(|| a.consequent.cmp(&b.consequent))
}

/// Every antecedent/consequent split of every frequent itemset of size >= 2
/// whose confidence reaches `min_confidence`.
pub fn derive_rules<I: Ord + Clone>(
    frequent: &FrequentItemsets<I>,
    min_confidence: f64,
) -> Vec<Rule<I>> {
    let n = frequent.transaction_count as f64;
    let mut rules = Vec::new();
    if frequent.transaction_count == 0 {
        return rules;
    }

    for (itemset, &count) in &frequent.counts {
        let size = itemset.len();
        if size < 2 {
            continue;
        }
        if size > MAX_RULE_ITEMSET {
            warn!(
                size,
                count,
                limit = MAX_RULE_ITEMSET,
                "frequent itemset too large to split into rules, skipped"
            );
            continue;
        }
        let full_mask = (1u32 << size) - 1;
        for mask in 1..full_mask {
            let (antecedent, consequent): (Vec<(usize, &I)>, Vec<(usize, &I)>) = itemset
                .iter()
                .enumerate()
                .partition(|(idx, _)| mask & (1u32 << *idx) != 0);
            let antecedent: Vec<I> = antecedent.into_iter().map(|(_, i)| i.clone()).collect();
            let consequent: Vec<I> = consequent.into_iter().map(|(_, i)| i.clone()).collect();

            // Subsets of a frequent itemset are always frequent
            let (Some(ante_count), Some(cons_count)) =
                (frequent.count(&antecedent), frequent.count(&consequent))
            else {
                continue;
            };

            let confidence = count as f64 / ante_count as f64;
            if confidence + 1e-12 < min_confidence {
                continue;
            }
            let consequent_support = cons_count as f64 / n;
            rules.push(Rule {
                antecedent,
                consequent,
                support: count as f64 / n,
                confidence,
                lift: confidence / consequent_support,
            });
        }
    }

    rules.sort_by(compare_rules);
    rules
}
