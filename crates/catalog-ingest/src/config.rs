//! Loader configuration
//!
//! Settings come from `CATALOG_*` environment variables (a `.env` file is
//! honored by the binary), with CLI flags layered on top.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::stage::Stage;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE: &str = "SDC";
pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

/// How a stage hands full batches to the sink
///
/// `Awaited` suspends the stage until the sink acknowledges each batch, so
/// a slow store slows the reader down and a failed batch stops the stage.
/// `FireAndForget` keeps reading while up to `max_in_flight` batches are
/// written in the background. It is faster on a healthy store, but a failed
/// batch is only logged and its documents are lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    #[default]
    Awaited,
    FireAndForget,
}

impl std::str::FromStr for FlushMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "awaited" | "await" | "sync" => Ok(FlushMode::Awaited),
            "fire_and_forget" | "background" | "async" => Ok(FlushMode::FireAndForget),
            _ => Err(anyhow::anyhow!("Invalid flush mode: {}", s)),
        }
    }
}

impl std::fmt::Display for FlushMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushMode::Awaited => write!(f, "awaited"),
            FlushMode::FireAndForget => write!(f, "fire-and-forget"),
        }
    }
}

/// Batching settings for a single stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageConfig {
    /// Flush once this many operations are buffered
    pub batch_size: usize,
    pub flush_mode: FlushMode,
    /// Cap on background flushes (fire-and-forget only)
    pub max_in_flight: usize,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_mode: FlushMode::Awaited,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Main loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding the six CSV files
    pub data_dir: PathBuf,
    pub mongodb_uri: String,
    pub database: String,
    pub batch_size: usize,
    /// Flush mode for stages without an override
    pub flush_mode: FlushMode,
    pub stage_flush_modes: BTreeMap<Stage, FlushMode>,
    pub max_in_flight: usize,
    /// Stages to run; always executed in canonical order
    pub stages: Vec<Stage>,
    /// Draw a progress spinner per stage
    pub show_progress: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            mongodb_uri: DEFAULT_MONGODB_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_mode: FlushMode::Awaited,
            stage_flush_modes: BTreeMap::new(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            stages: Stage::ALL.to_vec(),
            show_progress: false,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from environment variables
    ///
    /// - `CATALOG_DATA_DIR`: directory with the CSV files (default `./data`)
    /// - `CATALOG_MONGODB_URI`: document store URI
    /// - `CATALOG_DATABASE`: database name (default `SDC`)
    /// - `CATALOG_BATCH_SIZE`: flush threshold (default 500)
    /// - `CATALOG_FLUSH_MODE`: `awaited` or `fire-and-forget`
    /// - `CATALOG_<STAGE>_FLUSH_MODE`: per-stage override, e.g. `CATALOG_PHOTOS_FLUSH_MODE`
    /// - `CATALOG_MAX_IN_FLIGHT`: background flush cap (default 4)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`LoaderConfig::from_env`], reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("CATALOG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(uri) = lookup("CATALOG_MONGODB_URI") {
            config.mongodb_uri = uri;
        }

        if let Some(database) = lookup("CATALOG_DATABASE") {
            config.database = database;
        }

        if let Some(size) = lookup("CATALOG_BATCH_SIZE") {
            config.batch_size = size
                .trim()
                .parse()
                .with_context(|| format!("CATALOG_BATCH_SIZE must be a number, got {size:?}"))?;
        }

        if let Some(mode) = lookup("CATALOG_FLUSH_MODE") {
            config.flush_mode = mode.parse()?;
        }

        for stage in Stage::ALL {
            let key = format!("CATALOG_{}_FLUSH_MODE", stage.env_name());
            if let Some(mode) = lookup(&key) {
                let mode = mode.parse().with_context(|| format!("Invalid {key}"))?;
                config.stage_flush_modes.insert(stage, mode);
            }
        }

        if let Some(cap) = lookup("CATALOG_MAX_IN_FLIGHT") {
            config.max_in_flight = cap
                .trim()
                .parse()
                .with_context(|| format!("CATALOG_MAX_IN_FLIGHT must be a number, got {cap:?}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("Batch size must be greater than 0");
        }
        if self.max_in_flight == 0 {
            bail!("Max in-flight flushes must be greater than 0");
        }
        if self.mongodb_uri.trim().is_empty() {
            bail!("MongoDB URI must not be empty");
        }
        if self.database.trim().is_empty() {
            bail!("Database name must not be empty");
        }
        if self.stages.is_empty() {
            bail!("At least one stage must be selected");
        }
        Ok(())
    }

    /// Batching settings for `stage`
    pub fn stage_config(&self, stage: Stage) -> StageConfig {
        StageConfig {
            batch_size: self.batch_size,
            flush_mode: self
                .stage_flush_modes
                .get(&stage)
                .copied()
                .unwrap_or(self.flush_mode),
            max_in_flight: self.max_in_flight,
        }
    }

    /// Selected stages, deduplicated, in canonical order
    pub fn ordered_stages(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.stages.contains(s))
            .collect()
    }
}
