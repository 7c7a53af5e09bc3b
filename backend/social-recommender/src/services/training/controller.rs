use super::evaluation::evaluate;
use crate::error::Result;
use crate::models::{Checkpoint, EvalMetrics, MetricsRecord};
use crate::services::dataset::RatingStream;
use crate::services::scoring::{Optimizer, RatingModel};
use chrono::Utc;
use tracing::{debug, info};

/// Where the controller persists its progress.
#[cfg_attr(test, mockall::automock)]
pub trait TrainingSink {
    /// Replace the stored checkpoint. Must be atomic.
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Replace the stored best-metrics record.
    fn save_metrics(&self, record: &MetricsRecord) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The endurance counter exceeded the patience.
    Patience,
    MaxEpochs,
}

/// Early-stopping state after an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopState {
    Improving,
    /// Consecutive non-improving epochs so far.
    Enduring(usize),
    Stopped(StopReason),
}

/// Endurance counter with a patience threshold.
#[derive(Debug, Clone)]
pub struct EarlyStopper {
    patience: usize,
    max_epochs: usize,
    endure_count: usize,
    state: EarlyStopState,
}

impl EarlyStopper {
    pub fn new(patience: usize, max_epochs: usize) -> Self {
        Self {
            patience,
            max_epochs,
            endure_count: 0,
            state: EarlyStopState::Improving,
        }
    }

    /// Record the outcome of `epoch` (1-based) and return the new state.
    pub fn observe(&mut self, epoch: usize, improved: bool) -> EarlyStopState {
        if matches!(self.state, EarlyStopState::Stopped(_)) {
            return self.state;
        }

        if improved {
            self.endure_count = 0;
            self.state = EarlyStopState::Improving;
        } else {
            self.endure_count += 1;
            self.state = EarlyStopState::Enduring(self.endure_count);
        }

        if self.endure_count > self.patience {
            self.state = EarlyStopState::Stopped(StopReason::Patience);
        } else if epoch >= self.max_epochs {
            self.state = EarlyStopState::Stopped(StopReason::MaxEpochs);
        }
        self.state
    }

    pub fn endure_count(&self) -> usize {
        self.endure_count
    }
}

/// Best validation error seen so far. Starts at +inf so the first epoch
/// always improves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestMetrics {
    pub rmse: f64,
    pub mae: f64,
}

impl Default for BestMetrics {
    fn default() -> Self {
        Self {
            rmse: f64::INFINITY,
            mae: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerConfig {
    pub max_epochs: usize,
    pub patience: usize,
    /// Batches between progress reports.
    pub log_interval: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 100,
            patience: 5,
            log_interval: 100,
        }
    }
}

/// The three partitions the controller consumes.
///
/// `eval` drives the stopping rule: the validation split when one exists,
/// else the test split. `held_out` is the test split, evaluated for
/// reporting only, and is set only alongside a validation split.
pub struct TrainingStreams<'a> {
    pub train: &'a RatingStream,
    pub eval: &'a RatingStream,
    pub held_out: Option<&'a RatingStream>,
}

impl<'a> TrainingStreams<'a> {
    pub fn new(
        train: &'a RatingStream,
        test: &'a RatingStream,
        validation: Option<&'a RatingStream>,
    ) -> Self {
        match validation {
            Some(val) => Self {
                train,
                eval: val,
                held_out: Some(test),
            },
            None => Self {
                train,
                eval: test,
                held_out: None,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f64,
    pub eval: EvalMetrics,
    pub held_out: Option<EvalMetrics>,
    pub improved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingOutcome {
    pub best: BestMetrics,
    /// Held-out metrics of the best epoch, when a validation split drove training.
    pub best_held_out: Option<EvalMetrics>,
    pub best_epoch: usize,
    pub epochs_run: usize,
    pub stop_reason: StopReason,
    pub history: Vec<EpochReport>,
}

/// Epoch loop with checkpoint-gated early stopping.
///
/// Best-so-far metrics live on the controller, not in shared state; a
/// controller drives exactly one run.
pub struct TrainingController {
    config: ControllerConfig,
    best: BestMetrics,
    best_held_out: Option<EvalMetrics>,
    best_epoch: usize,
    stopper: EarlyStopper,
}

impl TrainingController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            best: BestMetrics::default(),
            best_held_out: None,
            best_epoch: 0,
            stopper: EarlyStopper::new(config.patience, config.max_epochs),
        }
    }

    pub fn run<M, O>(
        mut self,
        model: &mut M,
        optimizer: &mut O,
        streams: &TrainingStreams<'_>,
        sink: &dyn TrainingSink,
    ) -> Result<TrainingOutcome>
    where
        M: RatingModel + ?Sized,
        O: Optimizer + ?Sized,
    {
        let mut history = Vec::new();
        let mut stop_reason = StopReason::MaxEpochs;

        for epoch in 1..=self.config.max_epochs {
            let train_loss = self.train_epoch(model, optimizer, streams.train, epoch)?;

            let eval = evaluate(&*model, streams.eval)?;
            let improved = eval.rmse < self.best.rmse;
            if improved {
                self.best = BestMetrics {
                    rmse: eval.rmse,
                    mae: eval.mae,
                };
                self.best_epoch = epoch;
                sink.save_checkpoint(&Checkpoint {
                    epoch,
                    model_state: model.parameters().clone(),
                    optimizer_state: optimizer.state(),
                })?;
                info!(epoch, rmse = eval.rmse, mae = eval.mae, "Checkpoint saved");
            }

            let held_out = match streams.held_out {
                Some(test) => {
                    let test_metrics = evaluate(&*model, test)?;
                    info!(
                        epoch,
                        val_rmse = eval.rmse,
                        val_mae = eval.mae,
                        test_rmse = test_metrics.rmse,
                        test_mae = test_metrics.mae,
                        "Epoch evaluated"
                    );
                    Some(test_metrics)
                }
                None => {
                    info!(
                        epoch,
                        test_rmse = eval.rmse,
                        test_mae = eval.mae,
                        "Epoch evaluated"
                    );
                    None
                }
            };

            if improved {
                self.best_held_out = held_out;
                sink.save_metrics(&metrics_record(epoch, eval, held_out))?;
            }

            history.push(EpochReport {
                epoch,
                train_loss,
                eval,
                held_out,
                improved,
            });

            match self.stopper.observe(epoch, improved) {
                EarlyStopState::Stopped(reason) => {
                    stop_reason = reason;
                    info!(
                        epoch,
                        ?reason,
                        best_epoch = self.best_epoch,
                        best_rmse = self.best.rmse,
                        "Training stopped"
                    );
                    break;
                }
                state => debug!(epoch, ?state, "Early-stop state"),
            }
        }

        Ok(TrainingOutcome {
            best: self.best,
            best_held_out: self.best_held_out,
            best_epoch: self.best_epoch,
            epochs_run: history.len(),
            stop_reason,
            history,
        })
    }

    /// One pass over the training stream. Returns the mean batch loss.
    fn train_epoch<M, O>(
        &self,
        model: &mut M,
        optimizer: &mut O,
        train: &RatingStream,
        epoch: usize,
    ) -> Result<f64>
    where
        M: RatingModel + ?Sized,
        O: Optimizer + ?Sized,
    {
        let interval = self.config.log_interval.max(1);
        let mut running_loss = 0.0_f64;
        let mut total_loss = 0.0_f64;
        let mut batches = 0usize;

        for (i, batch) in train.batches(epoch).enumerate() {
            let (loss, grads) = model.loss_and_gradients(&batch)?;
            optimizer.step(model.parameters_mut(), &grads)?;

            running_loss += loss as f64;
            total_loss += loss as f64;
            batches += 1;
            if i % interval == 0 {
                info!(
                    epoch,
                    batch = i,
                    loss = running_loss / interval as f64,
                    best_rmse = self.best.rmse,
                    best_mae = self.best.mae,
                    "Training progress"
                );
                running_loss = 0.0;
            }
        }

        Ok(if batches == 0 {
            0.0
        } else {
            total_loss / batches as f64
        })
    }
}

fn metrics_record(epoch: usize, eval: EvalMetrics, held_out: Option<EvalMetrics>) -> MetricsRecord {
    match held_out {
        Some(test) => MetricsRecord {
            epoch,
            val_rmse: Some(eval.rmse),
            val_mae: Some(eval.mae),
            test_rmse: test.rmse,
            test_mae: test.mae,
            recorded_at: Utc::now(),
        },
        None => MetricsRecord {
            epoch,
            val_rmse: None,
            val_mae: None,
            test_rmse: eval.rmse,
            test_mae: eval.mae,
            recorded_at: Utc::now(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{ItemId, OptimizerState, ParamStore, RatingEdge, Tensor, UserId};
    use crate::services::dataset::Batch;
    use crate::services::scoring::Scorer;
    use ndarray::Array1;
    use std::cell::{Cell, RefCell};

    /// Rows of this user make up the test stream.
    const TEST_USER: UserId = 9;

    /// Predicts a scripted constant per epoch; with all-zero labels the
    /// epoch's RMSE equals the scripted value. Test-stream rows follow
    /// `test_script` when one is set.
    struct ScriptedModel {
        script: Vec<f32>,
        test_script: Option<Vec<f32>>,
        epoch: Cell<usize>,
        params: ParamStore,
    }

    impl ScriptedModel {
        fn new(script: &[f32]) -> Self {
            let mut params = ParamStore::new();
            params.insert("w".to_string(), Tensor::zeros((1, 1)));
            Self {
                script: script.to_vec(),
                test_script: None,
                epoch: Cell::new(0),
                params,
            }
        }

        fn with_test_script(mut self, script: &[f32]) -> Self {
            self.test_script = Some(script.to_vec());
            self
        }
    }

    impl Scorer for ScriptedModel {
        fn forward(&self, users: &[UserId], _items: &[ItemId]) -> Result<Array1<f32>> {
            let script = match &self.test_script {
                Some(test) if users.first() == Some(&TEST_USER) => test,
                _ => &self.script,
            };
            let idx = self.epoch.get().saturating_sub(1).min(script.len() - 1);
            Ok(Array1::from_elem(users.len(), script[idx]))
        }
    }

    impl RatingModel for ScriptedModel {
        fn loss(&self, _batch: &Batch) -> Result<f32> {
            Ok(1.0)
        }

        fn loss_and_gradients(&self, _batch: &Batch) -> Result<(f32, ParamStore)> {
            self.epoch.set(self.epoch.get() + 1);
            let mut grads = ParamStore::new();
            grads.insert("w".to_string(), Tensor::from_elem((1, 1), 1.0));
            Ok((1.0, grads))
        }

        fn parameters(&self) -> &ParamStore {
            &self.params
        }

        fn parameters_mut(&mut self) -> &mut ParamStore {
            &mut self.params
        }

        fn load_parameters(&mut self, state: ParamStore) -> Result<()> {
            self.params = state;
            Ok(())
        }
    }

    /// Adds the gradient, so each checkpoint carries the epoch it was taken at.
    struct CountingOptimizer {
        steps: u64,
    }

    impl Optimizer for CountingOptimizer {
        fn step(&mut self, params: &mut ParamStore, grads: &ParamStore) -> Result<()> {
            self.steps += 1;
            for (k, g) in grads {
                if let Some(p) = params.get_mut(k) {
                    *p += g;
                }
            }
            Ok(())
        }

        fn state(&self) -> OptimizerState {
            OptimizerState {
                step: self.steps,
                buffers: Default::default(),
            }
        }

        fn load_state(&mut self, state: OptimizerState) -> Result<()> {
            self.steps = state.step;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        checkpoints: RefCell<Vec<Checkpoint>>,
        records: RefCell<Vec<MetricsRecord>>,
    }

    impl TrainingSink for RecordingSink {
        fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
            self.checkpoints.borrow_mut().push(checkpoint.clone());
            Ok(())
        }

        fn save_metrics(&self, record: &MetricsRecord) -> Result<()> {
            self.records.borrow_mut().push(record.clone());
            Ok(())
        }
    }

    fn one_batch_stream() -> RatingStream {
        RatingStream::new(vec![RatingEdge::new(0, 0, 0.0)], 16)
    }

    fn test_user_stream() -> RatingStream {
        RatingStream::new(vec![RatingEdge::new(TEST_USER, 0, 0.0)], 16)
    }

    fn run_script(
        script: &[f32],
        max_epochs: usize,
        with_validation: bool,
    ) -> (TrainingOutcome, RecordingSink) {
        run_model(ScriptedModel::new(script), max_epochs, with_validation)
    }

    fn run_model(
        mut model: ScriptedModel,
        max_epochs: usize,
        with_validation: bool,
    ) -> (TrainingOutcome, RecordingSink) {
        let train = one_batch_stream();
        let test = test_user_stream();
        let val = one_batch_stream();
        let streams = TrainingStreams::new(&train, &test, with_validation.then_some(&val));
        let sink = RecordingSink::default();
        let controller = TrainingController::new(ControllerConfig {
            max_epochs,
            patience: 5,
            log_interval: 100,
        });
        let mut opt = CountingOptimizer { steps: 0 };
        let outcome = controller
            .run(&mut model, &mut opt, &streams, &sink)
            .unwrap();
        (outcome, sink)
    }

    fn checkpoint_epochs(sink: &RecordingSink) -> Vec<usize> {
        sink.checkpoints.borrow().iter().map(|c| c.epoch).collect()
    }

    #[test]
    fn test_plateau_stops_after_six_non_improving_epochs() {
        let script = [1.0, 0.9, 0.95, 0.95, 0.95, 0.95, 0.95, 0.95];
        let (outcome, sink) = run_script(&script, 8, false);

        assert_eq!(checkpoint_epochs(&sink), vec![1, 2]);
        assert_eq!(outcome.epochs_run, 8);
        assert_eq!(outcome.stop_reason, StopReason::Patience);
        assert_eq!(outcome.best_epoch, 2);
        assert!((outcome.best.rmse - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_patience_trips_before_max_epochs() {
        let mut script = vec![1.0, 0.9];
        script.extend(std::iter::repeat(0.95).take(20));
        let (outcome, sink) = run_script(&script, 50, false);

        // epochs 3..=8 do not improve; the sixth of them trips the counter
        assert_eq!(outcome.epochs_run, 8);
        assert_eq!(outcome.stop_reason, StopReason::Patience);
        assert_eq!(checkpoint_epochs(&sink), vec![1, 2]);
    }

    #[test]
    fn test_five_non_improving_epochs_do_not_stop() {
        let script = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5, 0.6];
        let (outcome, sink) = run_script(&script, 8, false);

        assert_eq!(outcome.epochs_run, 8);
        assert_eq!(outcome.stop_reason, StopReason::MaxEpochs);
        assert_eq!(checkpoint_epochs(&sink), vec![1, 7]);
    }

    #[test]
    fn test_checkpoints_follow_strict_running_minimum() {
        let script = [3.0, 2.0, 2.0, 2.5, 1.0, 1.0, 0.5, 0.7, 0.4, 0.4];
        let (outcome, sink) = run_script(&script, script.len(), false);

        let mut expected = Vec::new();
        let mut best = f32::INFINITY;
        for (i, &r) in script.iter().enumerate() {
            if r < best {
                best = r;
                expected.push(i + 1);
            }
        }
        assert_eq!(checkpoint_epochs(&sink), expected);
        assert_eq!(outcome.history.iter().filter(|e| e.improved).count(), expected.len());
    }

    #[test]
    fn test_checkpoint_carries_model_and_optimizer_state_of_its_epoch() {
        let (_, sink) = run_script(&[2.0, 1.0, 3.0], 3, false);
        let checkpoints = sink.checkpoints.borrow();
        let last = checkpoints.last().unwrap();
        assert_eq!(last.epoch, 2);
        assert_eq!(last.model_state["w"][[0, 0]], 2.0);
        assert_eq!(last.optimizer_state.step, 2);
    }

    #[test]
    fn test_metrics_record_shapes() {
        let (_, sink) = run_script(&[1.0, 0.5], 2, false);
        let records = sink.records.borrow();
        assert_eq!(records.len(), 2);
        assert!(records[1].val_rmse.is_none());
        assert!((records[1].test_rmse - 0.5).abs() < 1e-6);

        let (outcome, sink) = run_script(&[1.0, 0.5], 2, true);
        let records = sink.records.borrow();
        let last = records.last().unwrap();
        assert!((last.val_rmse.unwrap() - 0.5).abs() < 1e-6);
        assert!((last.test_rmse - 0.5).abs() < 1e-6);
        assert!(outcome.best_held_out.is_some());
    }

    #[test]
    fn test_test_metrics_never_drive_checkpoints_under_validation() {
        let val = [1.0, 0.8, 0.8, 0.9, 0.8];
        let test = [2.0, 1.5, 0.5, 0.3, 0.1];
        let model = ScriptedModel::new(&val).with_test_script(&test);

        let (outcome, sink) = run_model(model, 5, true);

        assert_eq!(checkpoint_epochs(&sink), vec![1, 2]);
        assert_eq!(outcome.best_epoch, 2);
        assert!((outcome.best.rmse - 0.8).abs() < 1e-6);
        let held_out = outcome.best_held_out.unwrap();
        assert!((held_out.rmse - 1.5).abs() < 1e-6);

        let records = sink.records.borrow();
        assert_eq!(records.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![1, 2]);
        let last = records.last().unwrap();
        assert!((last.val_rmse.unwrap() - 0.8).abs() < 1e-6);
        assert!((last.test_rmse - 1.5).abs() < 1e-6);
        // later epochs still report their own test error
        assert!((outcome.history[4].held_out.unwrap().rmse - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_without_validation_the_test_stream_drives_checkpoints() {
        let model = ScriptedModel::new(&[5.0]).with_test_script(&[1.0, 0.5, 0.7]);

        let (outcome, sink) = run_model(model, 3, false);

        assert_eq!(checkpoint_epochs(&sink), vec![1, 2]);
        assert!((outcome.best.rmse - 0.5).abs() < 1e-6);
        assert!(outcome.best_held_out.is_none());
    }

    #[test]
    fn test_checkpoint_failure_is_fatal() {
        let train = one_batch_stream();
        let test = one_batch_stream();
        let streams = TrainingStreams::new(&train, &test, None);

        let mut sink = MockTrainingSink::new();
        sink.expect_save_checkpoint().times(1).returning(|_| {
            Err(AppError::io(
                "writing checkpoint",
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ))
        });
        sink.expect_save_metrics().never();

        let mut model = ScriptedModel::new(&[1.0]);
        let mut opt = CountingOptimizer { steps: 0 };
        let result = TrainingController::new(ControllerConfig::default()).run(
            &mut model,
            &mut opt,
            &streams,
            &sink,
        );

        assert!(matches!(result, Err(AppError::Io { .. })));
    }

    #[test]
    fn test_early_stopper_transitions() {
        let mut stopper = EarlyStopper::new(5, 100);
        assert_eq!(stopper.observe(1, true), EarlyStopState::Improving);
        for n in 1..=5 {
            assert_eq!(stopper.observe(1 + n, false), EarlyStopState::Enduring(n));
        }
        assert_eq!(
            stopper.observe(7, false),
            EarlyStopState::Stopped(StopReason::Patience)
        );
        // terminal
        assert_eq!(
            stopper.observe(8, true),
            EarlyStopState::Stopped(StopReason::Patience)
        );
        assert_eq!(stopper.endure_count(), 6);
    }

    #[test]
    fn test_improvement_resets_endurance() {
        let mut stopper = EarlyStopper::new(5, 100);
        stopper.observe(1, true);
        stopper.observe(2, false);
        stopper.observe(3, false);
        assert_eq!(stopper.observe(4, true), EarlyStopState::Improving);
        assert_eq!(stopper.endure_count(), 0);
    }

    #[test]
    fn test_max_epochs_stops_while_improving() {
        let mut stopper = EarlyStopper::new(5, 2);
        stopper.observe(1, true);
        assert_eq!(
            stopper.observe(2, true),
            EarlyStopState::Stopped(StopReason::MaxEpochs)
        );
    }
}
