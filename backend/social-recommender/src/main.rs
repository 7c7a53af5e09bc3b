use anyhow::{Context, Result};
use clap::Parser;
use social_recommender::config::CliArgs;
use social_recommender::{Config, PipelineJob};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Initialize tracing; LOG_FORMAT=json for log aggregation
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "social_recommender=info".into());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }

    let cli = CliArgs::parse();
    let config = Config::load(&cli).context("Failed to load configuration")?;

    info!(
        dataset = %config.dataset.name,
        device = %config.training.device,
        load_model = config.recommend.load_model,
        validate = config.dataset.validate,
        k = config.recommend.k,
        "Starting social recommender"
    );

    let job = PipelineJob::new(config);
    let summary = job.run().with_context(|| {
        format!(
            "Pipeline failed (checkpoint: {}, results: {})",
            job.store().checkpoint_path().display(),
            job.store().results_path("").display()
        )
    })?;

    if let Some(training) = &summary.training {
        info!(
            best_epoch = training.best_epoch,
            best_rmse = training.best.rmse,
            best_mae = training.best.mae,
            "Best model"
        );
    }
    info!(
        num_users = summary.report.stats.num_users,
        num_items = summary.report.stats.num_items,
        num_recommended_items = summary.report.stats.num_recommended_items,
        item_coverage = summary.report.stats.item_coverage,
        "Done"
    );
    Ok(())
}
