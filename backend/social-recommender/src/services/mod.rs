pub mod aggregate;
pub mod community;
pub mod dataset;
pub mod diversity;
pub mod ranking;
pub mod recall;
pub mod scoring;
pub mod storage;
pub mod training;

pub use aggregate::ResultAggregator;
pub use community::{CommunityDetector, CommunityIndex, LabelPropagation};
pub use dataset::{Dataset, HistoryTables, RatingStream};
pub use diversity::DiversityEvaluator;
pub use ranking::{Ranker, RankingError};
pub use recall::{CandidateGenerator, CandidateUniverse};
pub use scoring::{Adam, Optimizer, RatingModel, Scorer, SocialMf};
pub use storage::ArtifactStore;
pub use training::{TrainingController, TrainingSink};
