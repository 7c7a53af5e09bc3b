//! Training lifecycle: epoch loop, evaluation and checkpoint-gated early stopping.
mod controller;
mod evaluation;

pub use controller::{
    BestMetrics, ControllerConfig, EarlyStopState, EarlyStopper, EpochReport, StopReason,
    TrainingController, TrainingOutcome, TrainingSink, TrainingStreams,
};
#[cfg(test)]
pub use controller::MockTrainingSink;
pub use evaluation::{error_metrics, evaluate};
