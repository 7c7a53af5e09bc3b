/// Ranking Module
///
/// Orders a user's candidate set by model score and keeps the best K.
///
/// # Workflow
/// 1. Score every candidate in a single batched `forward` call
/// 2. Partition-select the K best indices (expected linear time)
/// 3. Sort only those K by score descending, item id ascending on ties
mod top_k;

pub use top_k::{compare_scored, Ranker, ScoredItem};

use crate::error::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RankingError {
    #[error("Model inference failed: {0}")]
    InferenceError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, RankingError>;

impl From<RankingError> for AppError {
    fn from(err: RankingError) -> Self {
        AppError::Ranking(err.to_string())
    }
}
