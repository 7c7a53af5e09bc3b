use crate::models::{ItemId, UserId};
use crate::services::dataset::HistoryTables;
use std::collections::BTreeSet;
use tracing::debug;

/// Items a candidate set is drawn from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateUniverse {
    /// Every item with a training interaction.
    All(BTreeSet<ItemId>),
    /// Only items observed in a reference partition (deduplicated).
    Restricted(BTreeSet<ItemId>),
}

impl CandidateUniverse {
    pub fn all(history: &HistoryTables) -> Self {
        CandidateUniverse::All(history.all_items())
    }

    pub fn restricted<I: IntoIterator<Item = ItemId>>(reference: I) -> Self {
        CandidateUniverse::Restricted(reference.into_iter().collect())
    }

    pub fn items(&self) -> &BTreeSet<ItemId> {
        match self {
            CandidateUniverse::All(items) | CandidateUniverse::Restricted(items) => items,
        }
    }
}

/// Recall layer: the universe minus what the user already rated.
pub struct CandidateGenerator<'a> {
    history: &'a HistoryTables,
    universe: CandidateUniverse,
}

impl<'a> CandidateGenerator<'a> {
    pub fn new(history: &'a HistoryTables, universe: CandidateUniverse) -> Self {
        Self { history, universe }
    }

    pub fn universe(&self) -> &CandidateUniverse {
        &self.universe
    }

    /// Candidate items for `user`, ascending by id.
    ///
    /// Returns `None` for users with no training history (cold start).
    pub fn generate(&self, user: UserId) -> Option<Vec<ItemId>> {
        let seen = match self.history.by_user.row(user) {
            Some(row) => row,
            None => {
                debug!(user, "Skipping user without history");
                return None;
            }
        };

        let candidates: Vec<ItemId> = self
            .universe
            .items()
            .iter()
            .copied()
            .filter(|item| !seen.contains_key(item))
            .collect();

        debug!(
            user,
            history = seen.len(),
            candidates = candidates.len(),
            "Candidates generated"
        );
        Some(candidates)
    }
}
