pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
pub use jobs::{PipelineJob, RecommendationJob};
pub use services::{
    ArtifactStore, CandidateGenerator, DiversityEvaluator, Ranker, ResultAggregator,
    TrainingController,
};
