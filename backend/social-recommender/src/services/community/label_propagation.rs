use super::{CommunityDetector, CommunityIndex};
use crate::error::Result;
use crate::models::{CommunityId, ItemId};
use crate::services::dataset::InteractionTable;
use std::collections::BTreeMap;
use tracing::debug;

/// Deterministic label propagation over the user–item bipartite graph.
///
/// Users and items share one node space (users first, then items, each
/// ascending by id). Every node starts with its own label and nodes are
/// updated in place, in node order, to the most frequent label among their
/// neighbours. Ties keep the current label if it is among the winners,
/// otherwise take the smallest. Item labels are finally renumbered densely
/// in ascending item order.
#[derive(Debug, Clone)]
pub struct LabelPropagation {
    max_iterations: usize,
}

impl Default for LabelPropagation {
    fn default() -> Self {
        Self { max_iterations: 50 }
    }
}

impl LabelPropagation {
    fn propagate(&self, adjacency: &[Vec<usize>]) -> Vec<usize> {
        let mut labels: Vec<usize> = (0..adjacency.len()).collect();
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();

        for iteration in 0..self.max_iterations {
            let mut changed = 0usize;
            for node in 0..adjacency.len() {
                if adjacency[node].is_empty() {
                    continue;
                }
                counts.clear();
                for &n in &adjacency[node] {
                    *counts.entry(labels[n]).or_default() += 1;
                }
                let best = counts.values().copied().max().unwrap_or(0);
                let current = labels[node];
                if counts.get(&current) == Some(&best) {
                    continue;
                }
                // BTreeMap iterates ascending, so the first winner is the smallest label
                if let Some((&label, _)) = counts.iter().find(|(_, c)| **c == best) {
                    labels[node] = label;
                    changed += 1;
                }
            }
            debug!(iteration, changed, "Label propagation sweep");
            if changed == 0 {
                break;
            }
        }
        labels
    }
}

impl CommunityDetector for LabelPropagation {
    fn detect(&self, history_by_user: &InteractionTable) -> Result<CommunityIndex> {
        let users: Vec<_> = history_by_user.sources().collect();
        let mut item_node: BTreeMap<ItemId, usize> = BTreeMap::new();
        for (_, item, _) in history_by_user.edges() {
            item_node.entry(item).or_default();
        }
        for (offset, node) in item_node.values_mut().enumerate() {
            *node = users.len() + offset;
        }

        let mut adjacency = vec![Vec::new(); users.len() + item_node.len()];
        for (user_node, &user) in users.iter().enumerate() {
            if let Some(row) = history_by_user.row(user) {
                for item in row.keys() {
                    if let Some(&i) = item_node.get(item) {
                        adjacency[user_node].push(i);
                        adjacency[i].push(user_node);
                    }
                }
            }
        }

        let labels = self.propagate(&adjacency);

        let mut dense: BTreeMap<usize, CommunityId> = BTreeMap::new();
        let mut item_community = BTreeMap::new();
        for (&item, &node) in &item_node {
            let next = dense.len() as CommunityId;
            let id = *dense.entry(labels[node]).or_insert(next);
            item_community.insert(item, id);
        }

        Ok(CommunityIndex::from_item_labels(item_community, history_by_user))
    }
}
