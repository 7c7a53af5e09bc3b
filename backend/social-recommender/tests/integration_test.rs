use social_recommender::config::{
    Config, DatasetConfig, Device, ModelConfig, PathsConfig, RecommendConfig, TrainingConfig,
};
use social_recommender::models::{CorpusStats, ItemId, MetricsRecord, UserId, UserRecommendation};
use social_recommender::services::dataset::Dataset;
use social_recommender::services::storage::{
    ITEM_COMMUNITY_FILE, METRICS_FILE, RECOMMENDATIONS_FILE, STATS_FILE, USER_COMMUNITIES_FILE,
};
use social_recommender::{AppError, PipelineJob};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const DATASET: &str = "toy";
const NUM_USERS: u32 = 12;
const NUM_ITEMS: u32 = 10;

/// Writes a small deterministic dataset under `<root>/data/toy`.
fn write_dataset(root: &Path) {
    let dir = root.join("data").join(DATASET);
    fs::create_dir_all(&dir).unwrap();

    let mut train = String::from("user_id\titem_id\trating\n");
    let mut test = String::new();
    let mut val = String::new();
    for u in 0..NUM_USERS {
        for i in 0..NUM_ITEMS {
            if (u * i) % 4 == 1 {
                continue;
            }
            let rating = ((u * 7 + i * 3) % 5 + 1) as f32;
            let row = format!("{}\t{}\t{}\n", u, i, rating);
            match (u + 2 * i) % 6 {
                4 => test.push_str(&row),
                5 => val.push_str(&row),
                _ => train.push_str(&row),
            }
        }
    }

    let mut social = String::new();
    for u in (0..NUM_USERS - 1).step_by(2) {
        writeln!(social, "{}\t{}", u, u + 1).unwrap();
    }

    fs::write(dir.join("train.tsv"), train).unwrap();
    fs::write(dir.join("test.tsv"), test).unwrap();
    fs::write(dir.join("val.tsv"), val).unwrap();
    fs::write(dir.join("filtered_social_connections.tsv"), social).unwrap();
}

fn config(root: &Path, load_model: bool, validate: bool, k: usize, restricted: bool) -> Config {
    Config {
        dataset: DatasetConfig {
            name: DATASET.to_string(),
            data_dir: root.join("data"),
            validate,
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
            epochs: 3,
            patience: 5,
            log_interval: 2,
            device: Device::Cpu,
            gpu_id: "0".to_string(),
        },
        recommend: RecommendConfig {
            k,
            use_test_set_candidates: restricted,
            load_model,
        },
        paths: PathsConfig {
            checkpoint_root: root.join("checkpoint"),
            results_root: root.join("results"),
        },
    }
}

#[test]
fn test_train_then_recommend_writes_every_artifact() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());
    let cfg = config(dir.path(), false, true, 3, false);
    let dataset = Dataset::load(&cfg.dataset).unwrap();
    let job = PipelineJob::new(cfg);

    let summary = job.run().unwrap();

    let training = summary.training.as_ref().unwrap();
    assert!(training.epochs_run >= 1 && training.epochs_run <= 3);
    assert_eq!(summary.model_epoch, Some(training.best_epoch));
    assert!(training.best.rmse.is_finite());

    let results = dir.path().join("results").join(DATASET);
    assert!(dir.path().join("checkpoint/toy/model.bin").exists());
    for file in [
        METRICS_FILE,
        RECOMMENDATIONS_FILE,
        STATS_FILE,
        USER_COMMUNITIES_FILE,
        ITEM_COMMUNITY_FILE,
    ] {
        assert!(results.join(file).exists(), "{} missing", file);
    }

    let metrics: MetricsRecord =
        serde_json::from_str(&fs::read_to_string(results.join(METRICS_FILE)).unwrap()).unwrap();
    assert_eq!(metrics.epoch, training.best_epoch);
    assert!(metrics.val_rmse.is_some());

    let stored: BTreeMap<UserId, UserRecommendation> =
        serde_json::from_str(&fs::read_to_string(results.join(RECOMMENDATIONS_FILE)).unwrap())
            .unwrap();
    assert_eq!(
        stored.keys().collect::<Vec<_>>(),
        summary.report.results.keys().collect::<Vec<_>>()
    );
    for (user, rec) in &stored {
        let expected = &summary.report.results[user];
        assert_eq!(rec.recommendations, expected.recommendations);
        assert!((rec.user_diversity - expected.user_diversity).abs() < 1e-9);
        assert!((rec.entropy_item_diversity - expected.entropy_item_diversity).abs() < 1e-9);
    }

    let stats: CorpusStats =
        serde_json::from_str(&fs::read_to_string(results.join(STATS_FILE)).unwrap()).unwrap();
    assert_eq!(stats.num_recommended_items, summary.report.stats.num_recommended_items);
    assert!((stats.item_coverage - summary.report.stats.item_coverage).abs() < 1e-9);
    assert_eq!(stats.num_users, dataset.num_users);
    assert_eq!(stats.num_items, dataset.num_items);
    assert!(stats.num_recommended_items <= stats.num_items);
    assert!((0.0..=1.0).contains(&stats.item_coverage));
}

#[test]
fn test_recommendations_never_repeat_history() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());
    let cfg = config(dir.path(), false, false, 4, false);
    let dataset = Dataset::load(&cfg.dataset).unwrap();

    let summary = PipelineJob::new(cfg).run().unwrap();

    assert!(!summary.report.results.is_empty());
    for (user, rec) in &summary.report.results {
        assert!(rec.recommendations.len() <= 4);
        for item in &rec.recommendations {
            assert!(
                !dataset.history.has_interacted(*user, *item),
                "user {} was recommended already-rated item {}",
                user,
                item
            );
        }
        let mut unique: Vec<ItemId> = rec.recommendations.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), rec.recommendations.len());
        assert!(rec.user_diversity >= 0.0);
        assert!(rec.entropy_item_diversity >= 0.0);
        assert!((0.0..1.0).contains(&rec.weighted_average_item_diversity));
    }
}

#[test]
fn test_short_candidate_lists_are_not_padded() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());
    let cfg = config(dir.path(), false, true, 50, true);
    let dataset = Dataset::load(&cfg.dataset).unwrap();
    let mut test_items: Vec<ItemId> = dataset.test_items();
    test_items.sort_unstable();
    test_items.dedup();

    let summary = PipelineJob::new(cfg).run().unwrap();

    for (user, rec) in &summary.report.results {
        let eligible = test_items
            .iter()
            .filter(|&&i| !dataset.history.has_interacted(*user, i))
            .count();
        assert_eq!(rec.recommendations.len(), eligible);
        assert!(rec.recommendations.iter().all(|i| test_items.contains(i)));
    }
}

#[test]
fn test_load_mode_restores_the_trained_model() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let trained = PipelineJob::new(config(dir.path(), false, true, 3, false))
        .run()
        .unwrap();
    let restored = PipelineJob::new(config(dir.path(), true, true, 3, false))
        .run()
        .unwrap();

    assert!(restored.training.is_none());
    assert_eq!(restored.model_epoch, trained.model_epoch);
    for (user, rec) in &trained.report.results {
        assert_eq!(restored.report.results[user].recommendations, rec.recommendations);
    }
    assert_eq!(restored.report.results.len(), trained.report.results.len());
}

#[test]
fn test_load_mode_without_checkpoint_fails() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());

    let result = PipelineJob::new(config(dir.path(), true, true, 3, false)).run();

    match result {
        Err(AppError::CheckpointNotFound(path)) => assert!(path.ends_with("toy/model.bin")),
        other => panic!("expected CheckpointNotFound, got {:?}", other.map(|s| s.model_epoch)),
    }
    assert!(!dir.path().join("results/toy").join(RECOMMENDATIONS_FILE).exists());
}

#[test]
fn test_malformed_rating_row_is_fatal() {
    let dir = TempDir::new().unwrap();
    write_dataset(dir.path());
    fs::write(
        dir.path().join("data/toy/test.tsv"),
        "0\t1\t4\n1\tnot-an-item\t3\n",
    )
    .unwrap();

    let result = PipelineJob::new(config(dir.path(), false, true, 3, false)).run();

    assert!(matches!(result, Err(AppError::MalformedData(_))));
}
