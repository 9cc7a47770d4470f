//! Level-wise Apriori: grow k-itemsets from frequent (k-1)-itemsets, dropping
//! any candidate with an infrequent subset before counting it.

use std::collections::{BTreeMap, BTreeSet};

use super::{min_count, FrequentItemsets};

pub fn frequent_itemsets<I: Ord + Clone>(
    transactions: &[BTreeSet<I>],
    min_support: f64,
) -> FrequentItemsets<I> {
    let n = transactions.len();
    let threshold = min_count(min_support, n);
    let mut result = FrequentItemsets::empty(n, threshold);
    if n == 0 {
        return result;
    }

    let mut singles: BTreeMap<Vec<I>, usize> = BTreeMap::new();
    for transaction in transactions {
        for item in transaction {
            *singles.entry(vec![item.clone()]).or_insert(0) += 1;
        }
    }
    let mut level = keep_frequent(singles, threshold, &mut result.counts);

    while !level.is_empty() {
        let candidates = generate_candidates(&level);
        if candidates.is_empty() {
            break;
        }
        let size = candidates[0].len();
        let mut counts: BTreeMap<Vec<I>, usize> = BTreeMap::new();
        for transaction in transactions.iter().filter(|t| t.len() >= size) {
            for candidate in &candidates {
                if candidate.iter().all(|item| transaction.contains(item)) {
                    *counts.entry(candidate.clone()).or_insert(0) += 1;
                }
            }
        }
        level = keep_frequent(counts, threshold, &mut result.counts);
    }

    result
}

fn keep_frequent<I: Ord + Clone>(
    counts: BTreeMap<Vec<I>, usize>,
    threshold: usize,
    into: &mut BTreeMap<Vec<I>, usize>,
) -> Vec<Vec<I>> {
    counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold)
        .map(|(itemset, count)| {
            into.insert(itemset.clone(), count);
            itemset
        })
        .collect()
}

/// Joins itemsets sharing a (k-1)-prefix, then prunes by the Apriori property.
/// `level` must be sorted, as produced by `keep_frequent`.
fn generate_candidates<I: Ord + Clone>(level: &[Vec<I>]) -> Vec<Vec<I>> {
    let known: BTreeSet<&[I]> = level.iter().map(Vec::as_slice).collect();
    let mut candidates = Vec::new();

    for (i, a) in level.iter().enumerate() {
        let k = a.len();
        for b in &level[i + 1..] {
            if a[..k - 1] != b[..k - 1] {
                break;
            }
            let mut candidate = a.clone();
            candidate.push(b[k - 1].clone());

            let all_subsets_frequent = (0..candidate.len()).all(|skip| {
                let subset: Vec<I> = candidate
                    .iter()
                    .enumerate()
                    .filter(|(idx, _)| *idx != skip)
                    .map(|(_, item)| item.clone())
                    .collect();
                known.contains(subset.as_slice())
            });
            if all_subsets_frequent {
                candidates.push(candidate);
            }
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baskets(raw: &[&[&'static str]]) -> Vec<BTreeSet<&'static str>> {
        raw.iter().map(|b| b.iter().copied().collect()).collect()
    }

    #[test]
    fn counts_levels_and_prunes_infrequent_supersets() {
        let data = baskets(&[&["A", "B"], &["A", "B"], &["A", "C"], &["A", "B", "C"]]);
        let frequent = frequent_itemsets(&data, 0.5);

        assert_eq!(frequent.min_count, 2);
        assert_eq!(frequent.count(&["A"]), Some(4));
        assert_eq!(frequent.count(&["A", "B"]), Some(3));
        assert_eq!(frequent.count(&["A", "C"]), Some(2));
        assert_eq!(frequent.count(&["B", "C"]), None);
        assert_eq!(frequent.count(&["A", "B", "C"]), None);
    }

    #[test]
    fn candidate_join_requires_shared_prefix() {
        let level = vec![vec![1, 2], vec![1, 3], vec![2, 3], vec![2, 4]];
        let candidates = generate_candidates(&level);
        assert_eq!(candidates, vec![vec![1, 2, 3]]);
    }

    #[test]
    fn single_item_baskets_only_count_as_singletons() {
        let data = baskets(&[&["A"], &["A"], &["B"]]);
        let frequent = frequent_itemsets(&data, 0.3);
        assert_eq!(frequent.max_size(), 1);
        assert_eq!(frequent.len(), 2);
    }
}
