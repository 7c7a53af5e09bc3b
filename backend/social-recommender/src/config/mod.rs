use crate::error::{AppError, Result};
use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Prefix for every environment variable read by [`Config::load`].
pub const ENV_PREFIX: &str = "SOCIALREC_";

#[derive(Debug, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub recommend: RecommendConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub name: String,
    pub data_dir: PathBuf,
    /// Tune on the validation split; when false it is merged into train.
    pub validate: bool,
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub embed_dim: usize,
    /// Fraction of each user's trusted neighbours used by the encoder.
    pub percent: f32,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub batch_size: usize,
    pub test_batch_size: usize,
    pub lr: f32,
    pub weight_decay: f32,
    pub epochs: usize,
    /// Training stops once this many consecutive epochs fail to improve
    /// and one more does too.
    pub patience: usize,
    pub log_interval: usize,
    pub device: Device,
    pub gpu_id: String,
}

#[derive(Debug, Clone)]
pub struct RecommendConfig {
    pub k: usize,
    pub use_test_set_candidates: bool,
    pub load_model: bool,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub checkpoint_root: PathBuf,
    pub results_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda(Option<u32>),
}

impl FromStr for Device {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(None)),
            other => match other.strip_prefix("cuda:") {
                Some(idx) => idx
                    .parse()
                    .map(|i| Device::Cuda(Some(i)))
                    .map_err(|_| AppError::Configuration(format!("invalid device: {}", s))),
                None => Err(AppError::Configuration(format!("invalid device: {}", s))),
            },
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(None) => write!(f, "cuda"),
            Device::Cuda(Some(i)) => write!(f, "cuda:{}", i),
        }
    }
}

/// Flat view of the `SOCIALREC_*` environment, deserialized with envy.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_percent")]
    pub percent: f32,
    #[serde(default = "default_embed_dim")]
    pub embed_dim: usize,
    #[serde(default = "default_lr")]
    pub lr: f32,
    #[serde(default = "default_test_batch_size")]
    pub test_batch_size: usize,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_gpu_id")]
    pub gpu_id: String,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_true")]
    pub load_model: bool,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f32,
    #[serde(default = "default_true")]
    pub use_test_set_candidates: bool,
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default = "default_patience")]
    pub patience: usize,
    #[serde(default = "default_log_interval")]
    pub log_interval: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_checkpoint_root")]
    pub checkpoint_root: PathBuf,
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,
}

fn default_batch_size() -> usize {
    128
}
fn default_percent() -> f32 {
    0.4
}
fn default_embed_dim() -> usize {
    64
}
fn default_lr() -> f32 {
    0.001
}
fn default_test_batch_size() -> usize {
    1000
}
fn default_epochs() -> usize {
    100
}
fn default_device() -> String {
    "cuda".to_string()
}
fn default_gpu_id() -> String {
    "2".to_string()
}
fn default_dataset_name() -> String {
    "toy_dataset".to_string()
}
fn default_k() -> usize {
    20
}
fn default_true() -> bool {
    true
}
fn default_weight_decay() -> f32 {
    0.0001
}
fn default_patience() -> usize {
    5
}
fn default_log_interval() -> usize {
    100
}
fn default_seed() -> u64 {
    42
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_checkpoint_root() -> PathBuf {
    PathBuf::from("./checkpoint")
}
fn default_results_root() -> PathBuf {
    PathBuf::from("./results")
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            percent: default_percent(),
            embed_dim: default_embed_dim(),
            lr: default_lr(),
            test_batch_size: default_test_batch_size(),
            epochs: default_epochs(),
            device: default_device(),
            gpu_id: default_gpu_id(),
            dataset_name: default_dataset_name(),
            k: default_k(),
            load_model: true,
            weight_decay: default_weight_decay(),
            use_test_set_candidates: true,
            validate: true,
            patience: default_patience(),
            log_interval: default_log_interval(),
            seed: default_seed(),
            data_dir: default_data_dir(),
            checkpoint_root: default_checkpoint_root(),
            results_root: default_results_root(),
        }
    }
}

/// Command-line overrides. Anything left unset keeps its environment value.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "social-recommender",
    about = "Social recommendation: train a trust-aware rating model and report top-K diversity"
)]
pub struct CliArgs {
    /// input batch size for training
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// neighbor percent
    #[arg(long)]
    pub percent: Option<f32>,
    /// embedding size
    #[arg(long)]
    pub embed_dim: Option<usize>,
    /// learning rate
    #[arg(long)]
    pub lr: Option<f32>,
    /// input batch size for testing
    #[arg(long)]
    pub test_batch_size: Option<usize>,
    /// number of epochs to train
    #[arg(long)]
    pub epochs: Option<usize>,
    /// cpu or cuda
    #[arg(long)]
    pub device: Option<String>,
    /// gpu id
    #[arg(long)]
    pub gpu_id: Option<String>,
    /// dataset name
    #[arg(long)]
    pub dataset_name: Option<String>,
    /// number of recommendations to generate per user
    #[arg(long)]
    pub k: Option<usize>,
    /// load from checkpoint instead of training
    #[arg(long)]
    pub load_model: Option<bool>,
    /// weight decay
    #[arg(long)]
    pub weight_decay: Option<f32>,
    /// draw candidate items only from the test set
    #[arg(long)]
    pub use_test_set_candidates: Option<bool>,
    /// optimize weights on the validation set
    #[arg(long)]
    pub validate: Option<bool>,
    /// consecutive non-improving epochs tolerated before stopping
    #[arg(long)]
    pub patience: Option<usize>,
    /// root directory holding <dataset>/train.tsv etc.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub checkpoint_root: Option<PathBuf>,
    #[arg(long)]
    pub results_root: Option<PathBuf>,
    #[arg(long)]
    pub seed: Option<u64>,
}

macro_rules! override_with {
    ($env:ident, $cli:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $cli.$field.clone() {
                $env.$field = v;
            }
        )+
    };
}

impl EnvConfig {
    pub fn apply(mut self, cli: &CliArgs) -> Self {
        override_with!(
            self,
            cli,
            batch_size,
            percent,
            embed_dim,
            lr,
            test_batch_size,
            epochs,
            device,
            gpu_id,
            dataset_name,
            k,
            load_model,
            weight_decay,
            use_test_set_candidates,
            validate,
            patience,
            data_dir,
            checkpoint_root,
            results_root,
            seed,
        );
        self
    }
}

impl Config {
    /// Environment first, then command-line overrides.
    pub fn load(cli: &CliArgs) -> Result<Self> {
        dotenv::dotenv().ok();

        let env = envy::prefixed(ENV_PREFIX)
            .from_env::<EnvConfig>()
            .map_err(|e| AppError::Configuration(e.to_string()))?;
        Self::try_from(env.apply(cli))
    }

    pub fn validate(&self) -> Result<()> {
        if self.recommend.k == 0 {
            return Err(AppError::Configuration("k must be at least 1".to_string()));
        }
        if self.training.batch_size == 0 || self.training.test_batch_size == 0 {
            return Err(AppError::Configuration(
                "batch sizes must be positive".to_string(),
            ));
        }
        if !(self.training.lr > 0.0) {
            return Err(AppError::Configuration(format!(
                "learning rate must be positive, got {}",
                self.training.lr
            )));
        }
        if self.training.weight_decay < 0.0 {
            return Err(AppError::Configuration(format!(
                "weight decay must be non-negative, got {}",
                self.training.weight_decay
            )));
        }
        if !(0.0..=1.0).contains(&self.model.percent) {
            return Err(AppError::Configuration(format!(
                "percent must lie in [0, 1], got {}",
                self.model.percent
            )));
        }
        if self.model.embed_dim == 0 {
            return Err(AppError::Configuration(
                "embed_dim must be positive".to_string(),
            ));
        }
        if self.training.epochs == 0 {
            return Err(AppError::Configuration(
                "epochs must be at least 1".to_string(),
            ));
        }
        if self.dataset.name.trim().is_empty() {
            return Err(AppError::Configuration(
                "dataset name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl TryFrom<EnvConfig> for Config {
    type Error = AppError;

    fn try_from(env: EnvConfig) -> Result<Self> {
        let config = Config {
            dataset: DatasetConfig {
                name: env.dataset_name,
                data_dir: env.data_dir,
                validate: env.validate,
            },
            model: ModelConfig {
                embed_dim: env.embed_dim,
                percent: env.percent,
                seed: env.seed,
            },
            training: TrainingConfig {
                batch_size: env.batch_size,
                test_batch_size: env.test_batch_size,
                lr: env.lr,
                weight_decay: env.weight_decay,
                epochs: env.epochs,
                patience: env.patience,
                log_interval: env.log_interval.max(1),
                device: env.device.parse()?,
                gpu_id: env.gpu_id,
            },
            recommend: RecommendConfig {
                k: env.k,
                use_test_set_candidates: env.use_test_set_candidates,
                load_model: env.load_model,
            },
            paths: PathsConfig {
                checkpoint_root: env.checkpoint_root,
                results_root: env.results_root,
            },
        };
        config.validate()?;
        Ok(config)
    }
}
