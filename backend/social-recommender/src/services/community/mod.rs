//! Community labels for the user–item bipartite graph.
mod label_propagation;

pub use label_propagation::LabelPropagation;

use crate::error::Result;
use crate::models::{CommunityId, ItemId, UserId};
use crate::services::dataset::InteractionTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read-only community lookup built once per dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityIndex {
    /// item -> community
    pub item_community: BTreeMap<ItemId, CommunityId>,
    /// user -> (community -> number of the user's interactions in it)
    pub user_communities: BTreeMap<UserId, BTreeMap<CommunityId, usize>>,
}

impl CommunityIndex {
    pub fn community_of(&self, item: ItemId) -> Option<CommunityId> {
        self.item_community.get(&item).copied()
    }

    /// Labels of `items`, skipping items without one.
    pub fn labels_of<'a, I>(&'a self, items: I) -> impl Iterator<Item = CommunityId> + 'a
    where
        I: IntoIterator<Item = ItemId>,
        I::IntoIter: 'a,
    {
        items.into_iter().filter_map(|item| self.community_of(item))
    }

    /// Interaction distribution of `user`; empty when the user is unknown.
    pub fn distribution_of(&self, user: UserId) -> BTreeMap<CommunityId, usize> {
        self.user_communities.get(&user).cloned().unwrap_or_default()
    }

    pub fn num_communities(&self) -> usize {
        let mut ids: Vec<_> = self.item_community.values().copied().collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Derive per-user distributions from item labels and a user-keyed history.
    pub fn from_item_labels(
        item_community: BTreeMap<ItemId, CommunityId>,
        history_by_user: &InteractionTable,
    ) -> Self {
        let mut user_communities = BTreeMap::new();
        for user in history_by_user.sources() {
            let mut counts: BTreeMap<CommunityId, usize> = BTreeMap::new();
            if let Some(row) = history_by_user.row(user) {
                for item in row.keys() {
                    if let Some(&c) = item_community.get(item) {
                        *counts.entry(c).or_default() += 1;
                    }
                }
            }
            user_communities.insert(user, counts);
        }
        Self {
            item_community,
            user_communities,
        }
    }
}

/// Partitions the user–item bipartite graph into communities.
pub trait CommunityDetector {
    /// Every item present in `history_by_user` must receive a label.
    fn detect(&self, history_by_user: &InteractionTable) -> Result<CommunityIndex>;
}
