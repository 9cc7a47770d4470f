//! Property-based tests for the mining and forecasting cores.
//!
//! These check invariants across random baskets and sales histories that
//! the example-based tests only touch at a few points.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use proptest::prelude::*;

use stateset_demand::config::HeuristicConfig;
use stateset_demand::ml::association::{apriori, derive_rules, fp_growth, min_count};
use stateset_demand::ml::FeatureBuilder;
use stateset_demand::models::{accuracy_percent, DateRange, Granularity, ItemId, TransactionRecord};
use stateset_demand::services::aggregation::aggregate_records;
use stateset_demand::services::prediction::heuristic_estimate;

fn baskets_strategy() -> impl Strategy<Value = Vec<BTreeSet<u8>>> {
    prop::collection::vec(prop::collection::btree_set(0u8..8, 1..5), 0..24)
}

fn support_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![Just(0.1), Just(0.25), Just(0.34), Just(0.5), 0.05f64..1.0]
}

fn sales_strategy() -> impl Strategy<Value = Vec<(u32, u64)>> {
    // (day offset within 60 days, quantity)
    prop::collection::vec((0u32..60, 0u64..50), 0..40)
}

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn apriori_and_fp_growth_agree(baskets in baskets_strategy(), support in support_strategy()) {
        let a = apriori::frequent_itemsets(&baskets, support);
        let f = fp_growth::frequent_itemsets(&baskets, support);
        prop_assert_eq!(&a.counts, &f.counts);
        prop_assert_eq!(derive_rules(&a, 0.3), derive_rules(&f, 0.3));
    }

    #[test]
    fn frequent_itemsets_are_downward_closed(baskets in baskets_strategy(), support in support_strategy()) {
        let frequent = apriori::frequent_itemsets(&baskets, support);
        let threshold = min_count(support, baskets.len());
        for (itemset, &count) in &frequent.counts {
            prop_assert!(count >= threshold);
            let actual = baskets
                .iter()
                .filter(|b| itemset.iter().all(|i| b.contains(i)))
                .count();
            prop_assert_eq!(count, actual);
            for skip in 0..itemset.len() {
                let subset: Vec<u8> = itemset
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, i)| *i)
                    .collect();
                if subset.is_empty() {
                    continue;
                }
                let subset_count = frequent.count(&subset);
                prop_assert!(subset_count.is_some(), "subset {:?} of {:?} missing", subset, itemset);
                prop_assert!(subset_count.unwrap_or(0) >= count);
            }
        }
    }

    #[test]
    fn rule_metrics_follow_their_definitions(baskets in baskets_strategy(), support in support_strategy()) {
        let frequent = fp_growth::frequent_itemsets(&baskets, support);
        let n = baskets.len() as f64;
        for rule in derive_rules(&frequent, 0.0) {
            let mut union: Vec<u8> = rule.antecedent.iter().chain(&rule.consequent).copied().collect();
            union.sort_unstable();
            let joint = frequent.count(&union).unwrap() as f64;
            let ante = frequent.count(&rule.antecedent).unwrap() as f64;
            let cons = frequent.count(&rule.consequent).unwrap() as f64;

            prop_assert!((rule.support - joint / n).abs() < 1e-9);
            prop_assert!((rule.confidence - joint / ante).abs() < 1e-9);
            prop_assert!((rule.lift - rule.confidence / (cons / n)).abs() < 1e-9);
            prop_assert!(rule.confidence <= 1.0 + 1e-12);
            prop_assert!(rule.antecedent.iter().all(|i| !rule.consequent.contains(i)));
        }
    }

    #[test]
    fn feature_building_is_deterministic(sales in sales_strategy(), target in 0u32..70) {
        let records: Vec<TransactionRecord> = sales
            .iter()
            .map(|(offset, qty)| TransactionRecord::outbound(1, *qty, start() + chrono::Days::new(u64::from(*offset))))
            .collect();
        let range = DateRange::new(start(), start() + chrono::Days::new(70)).unwrap();
        let target = start() + chrono::Days::new(u64::from(target));

        for granularity in Granularity::ALL {
            let series = aggregate_records(&records, [ItemId(1)], granularity, &range);
            let series = &series[&ItemId(1)];
            let first = FeatureBuilder::build(series, target);
            let second = FeatureBuilder::build(series, target);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.values.iter().all(|v| *v >= 0.0));
            prop_assert!(first.check_shape(granularity).is_ok());
        }
    }

    #[test]
    fn heuristic_is_bounded(recent in prop::collection::vec(0u64..10_000, 0..6), month in 1u32..=12) {
        let config = HeuristicConfig::default();
        let estimate = heuristic_estimate(&recent, month, &config);
        prop_assert!(estimate.confidence >= config.confidence_floor);
        prop_assert!(estimate.confidence <= config.confidence_ceiling);
        if recent.iter().all(|&q| q == 0) {
            prop_assert_eq!(estimate.quantity, config.cold_start_quantity);
        } else {
            let max = *recent.iter().max().unwrap() as f64;
            let factor = config.seasonal_factor(month);
            prop_assert!(estimate.quantity as f64 <= (max * factor).ceil());
        }
    }

    #[test]
    fn accuracy_stays_in_percent_range(predicted in 0u64..100_000, actual in 0u64..100_000) {
        let accuracy = accuracy_percent(predicted, actual);
        prop_assert!((0.0..=100.0).contains(&accuracy));
        if predicted == actual {
            prop_assert!((accuracy - 100.0).abs() < 1e-9);
        }
    }
}
