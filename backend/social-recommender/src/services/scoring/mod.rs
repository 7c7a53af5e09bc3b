/// Scoring Module
///
/// The rating model is an external capability: anything that can score
/// (user, item) pairs, report a loss with gradients, and expose its named
/// parameters can be trained and ranked with.
///
/// # Seams
/// - [`Scorer`]: batched forward pass, all the ranking pipeline needs
/// - [`RatingModel`]: loss, gradients and parameter access for training
/// - [`Optimizer`]: parameter update rule with serializable state
mod optimizer;
mod social_mf;

pub use optimizer::{Adam, AdamConfig};
pub use social_mf::{SocialMf, GLOBAL_BIAS, ITEM_BIAS, ITEM_EMBEDDING, USER_BIAS, USER_EMBEDDING};

use crate::error::Result;
use crate::models::{ItemId, OptimizerState, ParamStore, UserId};
use crate::services::dataset::Batch;
use ndarray::Array1;

/// Batched relevance scoring.
#[cfg_attr(test, mockall::automock)]
pub trait Scorer {
    /// Predicted rating for each aligned (user, item) pair.
    fn forward(&self, users: &[UserId], items: &[ItemId]) -> Result<Array1<f32>>;
}

/// A trainable rating model.
pub trait RatingModel: Scorer {
    /// Scalar training loss over a batch.
    fn loss(&self, batch: &Batch) -> Result<f32>;

    /// Loss plus the gradient of every parameter, keyed like [`RatingModel::parameters`].
    fn loss_and_gradients(&self, batch: &Batch) -> Result<(f32, ParamStore)>;

    fn parameters(&self) -> &ParamStore;

    fn parameters_mut(&mut self) -> &mut ParamStore;

    /// Replace every parameter. Names and shapes must match the current set.
    fn load_parameters(&mut self, state: ParamStore) -> Result<()>;
}

/// Parameter update rule.
pub trait Optimizer {
    fn step(&mut self, params: &mut ParamStore, grads: &ParamStore) -> Result<()>;

    fn state(&self) -> OptimizerState;

    fn load_state(&mut self, state: OptimizerState) -> Result<()>;
}
