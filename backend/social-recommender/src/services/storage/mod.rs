//! Per-dataset artifact persistence.
//!
//! Every write goes to a temporary file in the destination directory and is
//! then renamed over the target, so readers never observe a partial file.
//! Missing directories are created on demand.

use crate::config::PathsConfig;
use crate::error::{AppError, Result};
use crate::models::{Checkpoint, CorpusStats, MetricsRecord, RecommendationReport};
use crate::services::community::{CommunityDetector, CommunityIndex};
use crate::services::dataset::InteractionTable;
use crate::services::training::TrainingSink;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

pub const CHECKPOINT_FILE: &str = "model.bin";
pub const METRICS_FILE: &str = "rmse_mae.json";
pub const RECOMMENDATIONS_FILE: &str = "recommendations.json";
pub const STATS_FILE: &str = "users_items_stats.json";
pub const USER_COMMUNITIES_FILE: &str = "user_communities_interactions.json";
pub const ITEM_COMMUNITY_FILE: &str = "item_community.json";

/// File-system store for one dataset's checkpoint and results.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    checkpoint_dir: PathBuf,
    results_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(paths: &PathsConfig, dataset: &str) -> Self {
        Self {
            checkpoint_dir: paths.checkpoint_root.join(dataset),
            results_dir: paths.results_root.join(dataset),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_dir.join(CHECKPOINT_FILE)
    }

    pub fn results_path(&self, file: &str) -> PathBuf {
        self.results_dir.join(file)
    }

    pub fn load_checkpoint(&self) -> Result<Checkpoint> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Err(AppError::CheckpointNotFound(path));
        }
        let file = File::open(&path)
            .map_err(|e| AppError::io(format!("opening {}", path.display()), e))?;
        let checkpoint: Checkpoint = bincode::deserialize_from(BufReader::new(file))?;
        info!(epoch = checkpoint.epoch, path = %path.display(), "Checkpoint loaded");
        Ok(checkpoint)
    }

    pub fn load_metrics(&self) -> Result<MetricsRecord> {
        read_json(&self.results_path(METRICS_FILE))
    }

    pub fn save_recommendations(&self, report: &RecommendationReport) -> Result<()> {
        write_json(&self.results_path(RECOMMENDATIONS_FILE), &report.results)?;
        self.save_stats(&report.stats)
    }

    pub fn save_stats(&self, stats: &CorpusStats) -> Result<()> {
        write_json(&self.results_path(STATS_FILE), stats)
    }

    /// Return the cached community index, or compute and cache it.
    ///
    /// Both lookup files must be present for a cache hit.
    pub fn load_or_compute_communities<D: CommunityDetector + ?Sized>(
        &self,
        detector: &D,
        history_by_user: &InteractionTable,
    ) -> Result<CommunityIndex> {
        let users_path = self.results_path(USER_COMMUNITIES_FILE);
        let items_path = self.results_path(ITEM_COMMUNITY_FILE);

        if users_path.exists() && items_path.exists() {
            let index = CommunityIndex {
                user_communities: read_json(&users_path)?,
                item_community: read_json(&items_path)?,
            };
            info!(
                items = index.item_community.len(),
                communities = index.num_communities(),
                "Community lookup loaded from cache"
            );
            return Ok(index);
        }

        info!("Community lookup not cached, detecting communities");
        let index = detector.detect(history_by_user)?;
        write_json(&users_path, &index.user_communities)?;
        write_json(&items_path, &index.item_community)?;
        info!(
            items = index.item_community.len(),
            communities = index.num_communities(),
            "Community lookup cached"
        );
        Ok(index)
    }
}

impl TrainingSink for ArtifactStore {
    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let path = self.checkpoint_path();
        write_atomic(&path, |w| {
            bincode::serialize_into(w, checkpoint)?;
            Ok(())
        })
    }

    fn save_metrics(&self, record: &MetricsRecord) -> Result<()> {
        write_json(&self.results_path(METRICS_FILE), record)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    write_atomic(path, |w| {
        serde_json::to_writer_pretty(w, value)?;
        Ok(())
    })
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file =
        File::open(path).map_err(|e| AppError::io(format!("opening {}", path.display()), e))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// Write through `encode` into a temp file next to `path`, then rename over it.
fn write_atomic<F>(path: &Path, encode: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut NamedTempFile>) -> Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)
        .map_err(|e| AppError::io(format!("creating directory {}", dir.display()), e))?;

    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| AppError::io(format!("creating temp file in {}", dir.display()), e))?;
    {
        let mut writer = BufWriter::new(&mut tmp);
        encode(&mut writer)?;
        writer
            .flush()
            .map_err(|e| AppError::io(format!("writing {}", path.display()), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| AppError::io(format!("syncing {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| AppError::io(format!("replacing {}", path.display()), e.error))?;
    debug!(path = %path.display(), "Artifact written");
    Ok(())
}
