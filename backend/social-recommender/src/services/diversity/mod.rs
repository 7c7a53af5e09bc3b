use crate::models::{CommunityId, ItemId, UserId};
use crate::services::community::CommunityIndex;
use crate::services::dataset::HistoryTables;
use std::collections::BTreeMap;

/// Shannon entropy (nats) of the empirical label distribution.
///
/// Empty input yields 0.0.
pub fn entropy_label_distribution<I>(labels: I) -> f64
where
    I: IntoIterator<Item = CommunityId>,
{
    let mut counts: BTreeMap<CommunityId, usize> = BTreeMap::new();
    let mut total = 0usize;
    for label in labels {
        *counts.entry(label).or_default() += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }

    let n = total as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

/// Gini–Simpson index of a community → interaction-count distribution:
/// `Σ p_c (1 - p_c)`. Empty or all-zero input yields 0.0.
pub fn weighted_average_diversity(distribution: &BTreeMap<CommunityId, usize>) -> f64 {
    let total: usize = distribution.values().sum();
    if total == 0 {
        return 0.0;
    }
    let n = total as f64;
    distribution
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            p * (1.0 - p)
        })
        .sum()
}

/// Diversity scores for one user's recommendation list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiversityScores {
    /// Entropy of the communities of the user's history.
    pub user_diversity: f64,
    /// Entropy of the communities of the recommended items.
    pub entropy_item_diversity: f64,
    pub weighted_average_item_diversity: f64,
}

/// Computes community diversity metrics against a fixed index.
pub struct DiversityEvaluator<'a> {
    communities: &'a CommunityIndex,
    history: &'a HistoryTables,
}

impl<'a> DiversityEvaluator<'a> {
    pub fn new(communities: &'a CommunityIndex, history: &'a HistoryTables) -> Self {
        Self {
            communities,
            history,
        }
    }

    pub fn user_diversity(&self, user: UserId) -> f64 {
        entropy_label_distribution(self.communities.labels_of(self.history.items_of(user)))
    }

    /// Items without a community label are left out of the distribution.
    pub fn item_diversity(&self, recommended: &[ItemId]) -> f64 {
        entropy_label_distribution(self.communities.labels_of(recommended.iter().copied()))
    }

    pub fn weighted_diversity(&self, user: UserId) -> f64 {
        self.communities
            .user_communities
            .get(&user)
            .map(weighted_average_diversity)
            .unwrap_or(0.0)
    }

    pub fn evaluate(&self, user: UserId, recommended: &[ItemId]) -> DiversityScores {
        DiversityScores {
            user_diversity: self.user_diversity(user),
            entropy_item_diversity: self.item_diversity(recommended),
            weighted_average_item_diversity: self.weighted_diversity(user),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RatingEdge;

    const EPS: f64 = 1e-12;

    #[test]
    fn test_entropy_of_empty_sequence_is_zero() {
        assert_eq!(entropy_label_distribution(Vec::new()), 0.0);
    }

    #[test]
    fn test_entropy_of_single_label_is_zero() {
        assert!(entropy_label_distribution(vec![3, 3, 3]).abs() < EPS);
    }

    #[test]
    fn test_entropy_of_uniform_labels_is_ln_n() {
        let h = entropy_label_distribution(vec![0, 1, 2, 3]);
        assert!((h - 4.0_f64.ln()).abs() < EPS);
    }

    #[test]
    fn test_entropy_is_order_independent() {
        let a = entropy_label_distribution(vec![1, 1, 2, 5, 5, 5]);
        let b = entropy_label_distribution(vec![5, 2, 5, 1, 5, 1]);
        assert!((a - b).abs() < EPS);
    }

    #[test]
    fn test_gini_simpson() {
        assert_eq!(weighted_average_diversity(&BTreeMap::new()), 0.0);
        assert!(weighted_average_diversity(&BTreeMap::from([(0, 5)])).abs() < EPS);
        let two = BTreeMap::from([(0, 1), (1, 1)]);
        assert!((weighted_average_diversity(&two) - 0.5).abs() < EPS);
        let skewed = BTreeMap::from([(0, 3), (1, 1)]);
        // 0.75 * 0.25 + 0.25 * 0.75
        assert!((weighted_average_diversity(&skewed) - 0.375).abs() < EPS);
    }

    #[test]
    fn test_evaluator_skips_unlabelled_recommendations() {
        let history = HistoryTables::from_edges(&[
            RatingEdge::new(0, 1, 1.0),
            RatingEdge::new(0, 2, 1.0),
        ]);
        let index = CommunityIndex::from_item_labels(
            BTreeMap::from([(1, 0), (2, 1), (3, 0), (4, 1)]),
            &history.by_user,
        );
        let evaluator = DiversityEvaluator::new(&index, &history);

        let scores = evaluator.evaluate(0, &[3, 4, 99]);

        assert!((scores.user_diversity - 2.0_f64.ln()).abs() < EPS);
        assert!((scores.entropy_item_diversity - 2.0_f64.ln()).abs() < EPS);
        assert!((scores.weighted_average_item_diversity - 0.5).abs() < EPS);
        assert_eq!(evaluator.item_diversity(&[99]), 0.0);
        assert_eq!(evaluator.weighted_diversity(7), 0.0);
    }
}
