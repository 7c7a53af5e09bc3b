// ============================================
// Pipeline Job
// ============================================
//
// End-to-end run for one dataset:
// 1. Load partitions, history tables and the trust graph
// 2. Build the encoder and optimizer
// 3. Either restore the saved checkpoint or train with early stopping
// 4. Build (or load cached) community lookups
// 5. Recommend for every test user and persist results and coverage

use super::recommend::{RecommendationJob, RecommendationJobConfig};
use crate::config::{Config, Device};
use crate::error::{AppError, Result};
use crate::models::{Checkpoint, RecommendationReport};
use crate::services::community::{CommunityDetector, LabelPropagation};
use crate::services::dataset::{Dataset, RatingStream};
use crate::services::scoring::{Adam, AdamConfig, Optimizer, RatingModel, SocialMf};
use crate::services::storage::ArtifactStore;
use crate::services::training::{
    ControllerConfig, TrainingController, TrainingOutcome, TrainingStreams,
};
use tracing::{info, warn};

/// Result of a full pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSummary {
    /// `None` when the model was restored from a checkpoint.
    pub training: Option<TrainingOutcome>,
    /// Epoch of the checkpoint the recommendations were made with.
    pub model_epoch: Option<usize>,
    pub report: RecommendationReport,
}

pub struct PipelineJob {
    config: Config,
    store: ArtifactStore,
    detector: Box<dyn CommunityDetector>,
}

impl PipelineJob {
    pub fn new(config: Config) -> Self {
        let store = ArtifactStore::new(&config.paths, &config.dataset.name);
        Self {
            config,
            store,
            detector: Box::new(LabelPropagation::default()),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn run(&self) -> Result<PipelineSummary> {
        if let Device::Cuda(_) = self.config.training.device {
            warn!(
                device = %self.config.training.device,
                gpu_id = %self.config.training.gpu_id,
                "CUDA requested but the numeric backend is CPU-only, running on CPU"
            );
        }

        let dataset = Dataset::load(&self.config.dataset)?;
        self.run_with_dataset(&dataset)
    }

    /// Run every stage after loading, on an already-built dataset.
    fn run_with_dataset(&self, dataset: &Dataset) -> Result<PipelineSummary> {
        let mut model = SocialMf::new(
            dataset.num_users,
            dataset.num_items,
            &self.config.model,
            &dataset.social,
            dataset.mean_train_rating(),
        );
        let mut optimizer = Adam::new(AdamConfig::new(
            self.config.training.lr,
            self.config.training.weight_decay,
        ));

        let (training, model_epoch) = if self.config.recommend.load_model {
            let checkpoint = self.store.load_checkpoint()?;
            model.load_parameters(checkpoint.model_state)?;
            optimizer.load_state(checkpoint.optimizer_state)?;
            (None, Some(checkpoint.epoch))
        } else {
            let outcome = self.train(dataset, &mut model, &mut optimizer)?;
            // recommend with the accepted (best) parameters, not the last epoch's
            let checkpoint = self.accepted_checkpoint(&outcome)?;
            model.load_parameters(checkpoint.model_state)?;
            let epoch = Some(checkpoint.epoch);
            (Some(outcome), epoch)
        };

        let communities = self
            .store
            .load_or_compute_communities(self.detector.as_ref(), &dataset.history.by_user)?;

        let job = RecommendationJob::new(
            RecommendationJobConfig {
                k: self.config.recommend.k,
                use_test_set_candidates: self.config.recommend.use_test_set_candidates,
            },
            dataset,
            &communities,
        );
        let report = job.run(&model, &dataset.test_users())?;
        self.store.save_recommendations(&report)?;

        info!(
            dataset = %dataset.name,
            users = report.results.len(),
            num_recommended_items = report.stats.num_recommended_items,
            item_coverage = report.stats.item_coverage,
            "Pipeline completed"
        );

        Ok(PipelineSummary {
            training,
            model_epoch,
            report,
        })
    }

    /// Checkpoint written by this run's best epoch. A run with no improving
    /// epoch never wrote one, so whatever is on disk belongs to another run.
    fn accepted_checkpoint(&self, outcome: &TrainingOutcome) -> Result<Checkpoint> {
        if outcome.best_epoch == 0 {
            return Err(AppError::Model(
                "no epoch produced a finite validation error".to_string(),
            ));
        }
        self.store.load_checkpoint()
    }

    fn train<M, O>(&self, dataset: &Dataset, model: &mut M, optimizer: &mut O) -> Result<TrainingOutcome>
    where
        M: RatingModel + ?Sized,
        O: Optimizer + ?Sized,
    {
        let training = &self.config.training;
        let train = RatingStream::new(dataset.train.clone(), training.batch_size)
            .shuffled(self.config.model.seed);
        let test = RatingStream::new(dataset.test.clone(), training.test_batch_size);
        let val = dataset
            .val
            .as_ref()
            .map(|edges| RatingStream::new(edges.clone(), training.test_batch_size));

        info!(
            epochs = training.epochs,
            batch_size = training.batch_size,
            lr = training.lr,
            weight_decay = training.weight_decay,
            validate = val.is_some(),
            "Starting training"
        );

        let streams = TrainingStreams::new(&train, &test, val.as_ref());
        let controller = TrainingController::new(ControllerConfig {
            max_epochs: training.epochs,
            patience: training.patience,
            log_interval: training.log_interval,
        });
        let outcome = controller.run(model, optimizer, &streams, &self.store)?;

        info!(
            best_epoch = outcome.best_epoch,
            best_rmse = outcome.best.rmse,
            best_mae = outcome.best.mae,
            epochs_run = outcome.epochs_run,
            stop_reason = ?outcome.stop_reason,
            "Training finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatasetConfig, ModelConfig, PathsConfig, RecommendConfig, TrainingConfig,
    };
    use crate::models::{OptimizerState, ParamStore};
    use crate::services::training::{BestMetrics, StopReason, TrainingSink};
    use std::path::Path;
    use tempfile::TempDir;

    fn config(root: &Path) -> Config {
        Config {
            dataset: DatasetConfig {
                name: "toy".to_string(),
                data_dir: root.join("data"),
                validate: true,
            },
            model: ModelConfig {
                embed_dim: 4,
                percent: 0.5,
                seed: 7,
            },
            training: TrainingConfig {
                batch_size: 16,
                test_batch_size: 32,
                lr: 0.01,
                weight_decay: 0.0001,
                epochs: 2,
                patience: 5,
                log_interval: 10,
                device: Device::Cpu,
                gpu_id: "0".to_string(),
            },
            recommend: RecommendConfig {
                k: 3,
                use_test_set_candidates: false,
                load_model: false,
            },
            paths: PathsConfig {
                checkpoint_root: root.join("checkpoint"),
                results_root: root.join("results"),
            },
        }
    }

    fn outcome(best_epoch: usize) -> TrainingOutcome {
        TrainingOutcome {
            best: BestMetrics::default(),
            best_held_out: None,
            best_epoch,
            epochs_run: 2,
            stop_reason: StopReason::MaxEpochs,
            history: Vec::new(),
        }
    }

    fn save_checkpoint(job: &PipelineJob, epoch: usize) {
        job.store()
            .save_checkpoint(&Checkpoint {
                epoch,
                model_state: ParamStore::new(),
                optimizer_state: OptimizerState {
                    step: 1,
                    buffers: Default::default(),
                },
            })
            .unwrap();
    }

    #[test]
    fn test_run_without_improvement_ignores_stale_checkpoint() {
        let dir = TempDir::new().unwrap();
        let job = PipelineJob::new(config(dir.path()));
        save_checkpoint(&job, 4);

        let result = job.accepted_checkpoint(&outcome(0));

        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[test]
    fn test_run_without_improvement_or_checkpoint_is_a_model_error() {
        let dir = TempDir::new().unwrap();
        let job = PipelineJob::new(config(dir.path()));

        let result = job.accepted_checkpoint(&outcome(0));

        assert!(matches!(result, Err(AppError::Model(_))));
    }

    #[test]
    fn test_accepted_checkpoint_is_the_best_epoch() {
        let dir = TempDir::new().unwrap();
        let job = PipelineJob::new(config(dir.path()));
        save_checkpoint(&job, 2);

        let checkpoint = job.accepted_checkpoint(&outcome(2)).unwrap();

        assert_eq!(checkpoint.epoch, 2);
    }
}
