//! FP-Growth over an arena-allocated FP-tree.
//!
//! Transactions are inserted with their frequent items ordered by descending
//! frequency, so shared prefixes collapse into shared paths. Each frequent
//! item is then mined from its conditional pattern base (the prefix paths
//! leading to it) by building a smaller tree and recursing.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use super::{min_count, FrequentItemsets};

struct FpNode<I> {
    item: Option<I>,
    count: usize,
    parent: Option<usize>,
    children: BTreeMap<I, usize>,
}

struct FpTree<I> {
    nodes: Vec<FpNode<I>>,
    /// Every node carrying a given item
    header: BTreeMap<I, Vec<usize>>,
    /// Support of each frequent item within this (conditional) database
    item_counts: BTreeMap<I, usize>,
}

impl<I: Ord + Clone> FpTree<I> {
    fn build(transactions: &[(Vec<I>, usize)], threshold: usize) -> Self {
        let mut item_counts: BTreeMap<I, usize> = BTreeMap::new();
        for (items, count) in transactions {
            for item in items {
                *item_counts.entry(item.clone()).or_insert(0) += count;
            }
        }
        item_counts.retain(|_, count| *count >= threshold);

        let mut tree = FpTree {
            nodes: vec![FpNode {
                item: None,
                count: 0,
                parent: None,
                children: BTreeMap::new(),
            }],
            header: BTreeMap::new(),
            item_counts,
        };

        for (items, count) in transactions {
            let mut ordered: Vec<I> = items
                .iter()
                .filter(|item| tree.item_counts.contains_key(*item))
                .cloned()
                .collect();
            ordered.sort_by_key(|item| {
                (
                    Reverse(tree.item_counts.get(item).copied().unwrap_or(0)),
                    item.clone(),
                )
            });
            ordered.dedup();
            tree.insert(&ordered, *count);
        }
        tree
    }

    fn insert(&mut self, items: &[I], count: usize) {
        let mut current = 0;
        for item in items {
            let next = match self.nodes[current].children.get(item) {
                Some(&child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(FpNode {
                        item: Some(item.clone()),
                        count: 0,
                        parent: Some(current),
                        children: BTreeMap::new(),
                    });
                    self.nodes[current].children.insert(item.clone(), child);
                    self.header.entry(item.clone()).or_default().push(child);
                    child
                }
            };
            self.nodes[next].count += count;
            current = next;
        }
    }

    /// Items on the path from the root down to (excluding) `node`.
    fn prefix_path(&self, node: usize) -> Vec<I> {
        let mut path = Vec::new();
        let mut cursor = self.nodes[node].parent;
        while let Some(idx) = cursor {
            if let Some(item) = &self.nodes[idx].item {
                path.push(item.clone());
            }
            cursor = self.nodes[idx].parent;
        }
        path.reverse();
        path
    }

    fn conditional_base(&self, item: &I) -> Vec<(Vec<I>, usize)> {
        self.header
            .get(item)
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|&node| (self.prefix_path(node), self.nodes[node].count))
                    .filter(|(path, _)| !path.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

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

    let weighted: Vec<(Vec<I>, usize)> = transactions
        .iter()
        .map(|t| (t.iter().cloned().collect(), 1))
        .collect();
    let tree = FpTree::build(&weighted, threshold);
    grow(&tree, &[], threshold, &mut result.counts);
    result
}

fn grow<I: Ord + Clone>(
    tree: &FpTree<I>,
    suffix: &[I],
    threshold: usize,
    out: &mut BTreeMap<Vec<I>, usize>,
) {
    for (item, &count) in &tree.item_counts {
        let mut itemset = suffix.to_vec();
        itemset.push(item.clone());
        itemset.sort();
        out.insert(itemset.clone(), count);

        let base = tree.conditional_base(item);
        if base.is_empty() {
            continue;
        }
        let conditional = FpTree::build(&base, threshold);
        if !conditional.item_counts.is_empty() {
            grow(&conditional, &itemset, threshold, out);
        }
    }
}
