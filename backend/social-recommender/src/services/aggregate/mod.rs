use crate::models::{CorpusStats, ItemId, RecommendationReport, UserId, UserRecommendation};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

/// Round to `places` decimals, half away from zero.
pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

/// Collects per-user results and derives corpus coverage.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    num_users: usize,
    num_items: usize,
    results: BTreeMap<UserId, UserRecommendation>,
}

impl ResultAggregator {
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Self {
            num_users,
            num_items,
            results: BTreeMap::new(),
        }
    }

    pub fn push(&mut self, user: UserId, result: UserRecommendation) {
        self.results.insert(user, result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Distinct items recommended to at least one user.
    pub fn recommended_items(&self) -> BTreeSet<ItemId> {
        self.results
            .values()
            .flat_map(|r| r.recommendations.iter().copied())
            .collect()
    }

    /// Unrounded coverage ratio.
    pub fn coverage(&self) -> f64 {
        if self.num_items == 0 {
            return 0.0;
        }
        self.recommended_items().len() as f64 / self.num_items as f64
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            num_users: self.num_users,
            num_items: self.num_items,
            num_recommended_items: self.recommended_items().len(),
            item_coverage: round_to(self.coverage(), 2),
        }
    }

    pub fn finish(self) -> RecommendationReport {
        let stats = self.stats();
        info!(
            users = self.results.len(),
            num_recommended_items = stats.num_recommended_items,
            item_coverage = stats.item_coverage,
            "Recommendations aggregated"
        );
        RecommendationReport {
            results: self.results,
            stats,
        }
    }
}
