// ============================================
// Batch Jobs
// ============================================
//
// - pipeline: load, train or restore, recommend, persist
// - recommend: one recommendation + diversity pass over target users

pub mod pipeline;
pub mod recommend;

pub use pipeline::{PipelineJob, PipelineSummary};
pub use recommend::{RecommendationJob, RecommendationJobConfig};
