use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type UserId = u32;
pub type ItemId = u32;
pub type CommunityId = u32;

/// Dense parameter matrix. Vectors are stored as `n × 1`.
pub type Tensor = Array2<f32>;

/// Named parameter collection; iteration order is by name.
pub type ParamStore = BTreeMap<String, Tensor>;

/// One observed (user, item, rating) interaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingEdge {
    pub user: UserId,
    pub item: ItemId,
    pub rating: f32,
}

impl RatingEdge {
    pub fn new(user: UserId, item: ItemId, rating: f32) -> Self {
        Self { user, item, rating }
    }
}

/// Undirected trust relation between two users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SocialEdge {
    pub a: UserId,
    pub b: UserId,
}

/// Error of a model over one evaluation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub rmse: f64,
    pub mae: f64,
}

/// Best-so-far metrics, persisted after every improving epoch.
///
/// With a validation split both `val_*` and `test_*` are set; otherwise only
/// `test_*` is present and holds the metrics the stopping rule used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub epoch: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub val_rmse: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub val_mae: Option<f64>,
    pub test_rmse: f64,
    pub test_mae: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Serializable optimizer state: step counter plus named moment buffers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub step: u64,
    pub buffers: BTreeMap<String, Tensor>,
}

/// Snapshot written whenever validation RMSE strictly improves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub model_state: ParamStore,
    pub optimizer_state: OptimizerState,
}

/// Per-user output of the recommendation pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecommendation {
    pub recommendations: Vec<ItemId>,
    pub user_diversity: f64,
    pub entropy_item_diversity: f64,
    pub weighted_average_item_diversity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorpusStats {
    pub num_users: usize,
    pub num_items: usize,
    pub num_recommended_items: usize,
    /// Rounded to two decimals for reporting.
    pub item_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationReport {
    pub results: BTreeMap<UserId, UserRecommendation>,
    pub stats: CorpusStats,
}
