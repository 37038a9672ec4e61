//! Catalog Ingest - bulk CSV loader for the product catalog

use anyhow::{bail, Context, Result};
use catalog_common::logging::{init_logging, LogConfig, LogLevel};
use catalog_ingest::{DocumentSink, Loader, LoaderConfig, MemoryStore, Stage};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog-ingest")]
#[command(author, version, about = "Load the product catalog CSV exports into the document store")]
struct Cli {
    /// Directory holding product.csv, features.csv, related.csv, styles.csv, photos.csv and skus.csv
    #[arg(long, env = "CATALOG_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Only run these stages (still in load order)
    #[arg(long = "stage", value_enum)]
    stages: Vec<Stage>,

    /// Load into an in-memory store instead of MongoDB
    #[arg(long)]
    dry_run: bool,

    /// With --dry-run, write each collection to <DIR>/<collection>.jsonl
    #[arg(long, requires = "dry_run")]
    export_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Hide progress spinners
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("catalog-ingest")
        .build()
        .merge_lookup(|key| std::env::var(key).ok())
        .context("Invalid logging configuration")?;

    let _guard = init_logging(&log_config)?;

    let mut config = LoaderConfig::from_env().context("Invalid loader configuration")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if !cli.stages.is_empty() {
        config.stages = cli.stages;
    }
    config.show_progress = !cli.quiet;
    config.validate()?;

    if !config.data_dir.is_dir() {
        bail!("Data directory {} does not exist", config.data_dir.display());
    }

    info!(
        data_dir = %config.data_dir.display(),
        stages = ?config.ordered_stages(),
        dry_run = cli.dry_run,
        "Starting catalog load"
    );

    let summary = if cli.dry_run {
        let store = Arc::new(MemoryStore::new());
        let summary = Loader::new(config, store.clone()).run().await?;

        if let Some(dir) = cli.export_dir {
            let written = store
                .export_jsonl(&dir)
                .with_context(|| format!("Failed to export to {}", dir.display()))?;
            info!(files = written.len(), dir = %dir.display(), "Exported collections");
        }
        summary
    } else {
        let sink = connect(&config).await?;
        Loader::new(config, sink).run().await?
    };

    summary.log();
    Ok(())
}

#[cfg(feature = "mongodb")]
async fn connect(config: &LoaderConfig) -> Result<Arc<dyn DocumentSink>> {
    let sink = catalog_ingest::MongoSink::connect(&config.mongodb_uri, &config.database)
        .await
        .context("Failed to connect to MongoDB")?;
    Ok(Arc::new(sink))
}

#[cfg(not(feature = "mongodb"))]
async fn connect(_config: &LoaderConfig) -> Result<Arc<dyn DocumentSink>> {
    bail!("Built without the `mongodb` feature; use --dry-run")
}
