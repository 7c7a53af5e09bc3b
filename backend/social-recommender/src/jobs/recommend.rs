// ============================================
// Recommendation Job
// ============================================
//
// One evaluation pass over the target users:
// 1. Generate candidates (universe minus the user's history)
// 2. Rank them with the trained model, keep the top K
// 3. Score community diversity of history and recommendations
// 4. Aggregate per-user results and corpus coverage

use crate::error::Result;
use crate::models::{RecommendationReport, UserId, UserRecommendation};
use crate::services::aggregate::ResultAggregator;
use crate::services::community::CommunityIndex;
use crate::services::dataset::Dataset;
use crate::services::diversity::DiversityEvaluator;
use crate::services::ranking::Ranker;
use crate::services::recall::{CandidateGenerator, CandidateUniverse};
use crate::services::scoring::Scorer;
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct RecommendationJobConfig {
    pub k: usize,
    /// Draw candidates only from items of the test partition.
    pub use_test_set_candidates: bool,
}

pub struct RecommendationJob<'a> {
    config: RecommendationJobConfig,
    dataset: &'a Dataset,
    communities: &'a CommunityIndex,
}

impl<'a> RecommendationJob<'a> {
    pub fn new(
        config: RecommendationJobConfig,
        dataset: &'a Dataset,
        communities: &'a CommunityIndex,
    ) -> Self {
        Self {
            config,
            dataset,
            communities,
        }
    }

    pub fn run<S: Scorer + ?Sized>(
        &self,
        scorer: &S,
        target_users: &[UserId],
    ) -> Result<RecommendationReport> {
        let start = Instant::now();
        let history = &self.dataset.history;

        let universe = if self.config.use_test_set_candidates {
            CandidateUniverse::restricted(self.dataset.test_items())
        } else {
            CandidateUniverse::all(history)
        };
        info!(
            users = target_users.len(),
            universe = universe.items().len(),
            restricted = self.config.use_test_set_candidates,
            k = self.config.k,
            "Generating recommendations"
        );

        let generator = CandidateGenerator::new(history, universe);
        let ranker = Ranker::new(self.config.k)?;
        let diversity = DiversityEvaluator::new(self.communities, history);
        let mut aggregator = ResultAggregator::new(self.dataset.num_users, self.dataset.num_items);

        let mut skipped = 0usize;
        for &user in target_users {
            let candidates = match generator.generate(user) {
                Some(c) => c,
                None => {
                    skipped += 1;
                    continue;
                }
            };

            let recommendations = ranker.rank(user, &candidates, scorer)?;
            let scores = diversity.evaluate(user, &recommendations);
            aggregator.push(
                user,
                UserRecommendation {
                    recommendations,
                    user_diversity: scores.user_diversity,
                    entropy_item_diversity: scores.entropy_item_diversity,
                    weighted_average_item_diversity: scores.weighted_average_item_diversity,
                },
            );
        }

        info!(
            recommended_users = aggregator.len(),
            skipped_users = skipped,
            duration_ms = start.elapsed().as_millis() as u64,
            "Recommendation pass completed"
        );
        Ok(aggregator.finish())
    }
}
