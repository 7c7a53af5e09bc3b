use crate::models::{ItemId, RatingEdge, UserId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Adjacency map for one side of the user–item bipartite graph.
///
/// Keys are unique: a (source, target) pair holds exactly one rating and a
/// repeated insert replaces it. Callers must not rely on iteration order for
/// correctness; it is ascending by id only to keep output reproducible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionTable {
    rows: BTreeMap<u32, BTreeMap<u32, f32>>,
}

impl InteractionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge, returning the rating it replaced.
    pub fn insert(&mut self, source: u32, target: u32, rating: f32) -> Option<f32> {
        self.rows.entry(source).or_default().insert(target, rating)
    }

    pub fn contains_source(&self, source: u32) -> bool {
        self.rows.contains_key(&source)
    }

    pub fn contains(&self, source: u32, target: u32) -> bool {
        self.rows
            .get(&source)
            .is_some_and(|row| row.contains_key(&target))
    }

    pub fn rating(&self, source: u32, target: u32) -> Option<f32> {
        self.rows.get(&source).and_then(|row| row.get(&target)).copied()
    }

    pub fn row(&self, source: u32) -> Option<&BTreeMap<u32, f32>> {
        self.rows.get(&source)
    }

    pub fn sources(&self) -> impl Iterator<Item = u32> + '_ {
        self.rows.keys().copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        self.rows
            .iter()
            .flat_map(|(&s, row)| row.iter().map(move |(&t, &r)| (s, t, r)))
    }

    /// Number of distinct sources.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_edges(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    /// Merge `other` into `self`; ratings in `other` win on conflict.
    pub fn merge(&mut self, other: &InteractionTable) {
        for (s, t, r) in other.edges() {
            self.insert(s, t, r);
        }
    }
}

impl FromIterator<RatingEdge> for InteractionTable {
    /// Builds a user-keyed table.
    fn from_iter<I: IntoIterator<Item = RatingEdge>>(iter: I) -> Self {
        let mut table = InteractionTable::new();
        for edge in iter {
            table.insert(edge.user, edge.item, edge.rating);
        }
        table
    }
}

/// Training-time interaction history, indexed from both sides.
#[derive(Debug, Clone, Default)]
pub struct HistoryTables {
    /// user -> item -> rating
    pub by_user: InteractionTable,
    /// item -> user -> rating
    pub by_item: InteractionTable,
}

impl HistoryTables {
    pub fn from_edges(edges: &[RatingEdge]) -> Self {
        let mut tables = HistoryTables::default();
        for e in edges {
            tables.by_user.insert(e.user, e.item, e.rating);
            tables.by_item.insert(e.item, e.user, e.rating);
        }
        tables
    }

    pub fn has_user(&self, user: UserId) -> bool {
        self.by_user.contains_source(user)
    }

    pub fn has_interacted(&self, user: UserId, item: ItemId) -> bool {
        self.by_user.contains(user, item)
    }

    /// Items the user rated during training, ascending.
    pub fn items_of(&self, user: UserId) -> Vec<ItemId> {
        self.by_user
            .row(user)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Every item with at least one training interaction.
    pub fn all_items(&self) -> BTreeSet<ItemId> {
        self.by_item.sources().collect()
    }
}
