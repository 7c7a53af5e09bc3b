use super::{RankingError, Result};
use crate::models::{ItemId, UserId};
use crate::services::scoring::Scorer;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredItem {
    pub item: ItemId,
    pub score: f32,
}

/// Ranking order: higher score first, NaN after every number, then lower
/// item id first. Total as long as item ids are distinct.
pub fn compare_scored(a: &ScoredItem, b: &ScoredItem) -> Ordering {
    let by_score = match (a.score.is_nan(), b.score.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
    };
    by_score.then_with(|| a.item.cmp(&b.item))
}

/// Top-K ranker.
#[derive(Debug, Clone, Copy)]
pub struct Ranker {
    k: usize,
}

impl Ranker {
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(RankingError::InvalidInput("k must be positive".to_string()));
        }
        Ok(Self { k })
    }

    /// The `k` best candidates for `user`, best first. Fewer when there are
    /// fewer candidates.
    pub fn rank<S: Scorer + ?Sized>(
        &self,
        user: UserId,
        candidates: &[ItemId],
        scorer: &S,
    ) -> Result<Vec<ItemId>> {
        Ok(self
            .rank_scored(user, candidates, scorer)?
            .into_iter()
            .map(|s| s.item)
            .collect())
    }

    pub fn rank_scored<S: Scorer + ?Sized>(
        &self,
        user: UserId,
        candidates: &[ItemId],
        scorer: &S,
    ) -> Result<Vec<ScoredItem>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let users = vec![user; candidates.len()];
        let scores = scorer
            .forward(&users, candidates)
            .map_err(|e| RankingError::InferenceError(e.to_string()))?;
        if scores.len() != candidates.len() {
            return Err(RankingError::InferenceError(format!(
                "{} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        let mut scored: Vec<ScoredItem> = candidates
            .iter()
            .zip(scores.iter())
            .map(|(&item, &score)| ScoredItem { item, score })
            .collect();

        Ok(select_top_k(&mut scored, self.k).to_vec())
    }
}

/// Partition `scored` so its first `k` entries are the best, sort them, and
/// return that prefix.
fn select_top_k(scored: &mut [ScoredItem], k: usize) -> &[ScoredItem] {
    let k = k.min(scored.len());
    if k == 0 {
        return &[];
    }
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, compare_scored);
    }
    let top = &mut scored[..k];
    top.sort_unstable_by(compare_scored);
    top
}
