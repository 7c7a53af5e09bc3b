//! Interaction data: history tables, partitions, trust graph and batching.
mod history;
mod loader;
mod social;
mod stream;

pub use history::{HistoryTables, InteractionTable};
pub use loader::{
    parse_ratings, parse_social, read_rating_table, read_social_graph, Dataset, RawSplits,
    SOCIAL_FILE, TEST_FILE, TRAIN_FILE, VAL_FILE,
};
pub use social::SocialGraph;
pub use stream::{Batch, BatchIter, RatingStream};
