//! Pipeline orchestrator
//!
//! Runs the selected stages strictly one after another. Each stage drains
//! its source and its writer before the next begins, so by the time Photos
//! and SKUs run every style document is already persisted. The sink is
//! closed when the run ends, whether it succeeded or not.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::LoaderConfig;
use crate::error::Result;
use crate::progress::stage_spinner;
use crate::sink::DocumentSink;
use crate::source::{CsvRowSource, RowSource};
use crate::stage::{run_stage as drive_stage, Stage, StageReport};

/// Opens the row source for a stage
#[async_trait]
pub trait SourceProvider: Send {
    async fn open(&mut self, stage: Stage) -> Result<Box<dyn RowSource>>;
}

/// Reads each stage's CSV file from one directory
#[derive(Debug, Clone)]
pub struct CsvDirectory {
    dir: PathBuf,
}

impl CsvDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SourceProvider for CsvDirectory {
    async fn open(&mut self, stage: Stage) -> Result<Box<dyn RowSource>> {
        let path = self.dir.join(stage.file_name());
        info!(stage = %stage, path = %path.display(), "Opening source");
        Ok(Box::new(CsvRowSource::open(path).await?))
    }
}

/// Reports of every stage that ran
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub stages: Vec<StageReport>,
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn report(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn rows(&self) -> u64 {
        self.stages.iter().map(|r| r.rows).sum()
    }

    pub fn operations(&self) -> u64 {
        self.stages.iter().map(|r| r.writes.submitted).sum()
    }

    pub fn failed_batches(&self) -> u64 {
        self.stages.iter().map(|r| r.writes.failed_batches).sum()
    }

    pub fn lost_operations(&self) -> u64 {
        self.stages.iter().map(|r| r.writes.lost_operations).sum()
    }

    pub fn unmatched(&self) -> u64 {
        self.stages.iter().map(|r| r.writes.unmatched).sum()
    }

    /// Log one line per stage and a total
    pub fn log(&self) {
        for report in &self.stages {
            report.log();
        }

        info!(
            stages = self.stages.len(),
            rows = self.rows(),
            operations = self.operations(),
            failed_batches = self.failed_batches(),
            lost_operations = self.lost_operations(),
            unmatched = self.unmatched(),
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Load complete"
        );
        if self.lost_operations() > 0 {
            warn!(
                lost_operations = self.lost_operations(),
                "Some documents were not written; see the batch errors above"
            );
        }
    }
}

/// Sequential stage runner over one sink
pub struct Loader {
    config: LoaderConfig,
    sink: Arc<dyn DocumentSink>,
}

impl Loader {
    pub fn new(config: LoaderConfig, sink: Arc<dyn DocumentSink>) -> Self {
        Self { config, sink }
    }

    /// Load every selected stage from the configured data directory
    pub async fn run(&self) -> Result<LoadSummary> {
        let mut sources = CsvDirectory::new(&self.config.data_dir);
        self.run_from(&mut sources).await
    }

    /// Load every selected stage from `sources`, then close the sink
    pub async fn run_from(&self, sources: &mut dyn SourceProvider) -> Result<LoadSummary> {
        let outcome = self.run_stages(sources).await;
        let closed = self.sink.close().await;

        match (outcome, closed) {
            (Ok(summary), Ok(())) => Ok(summary),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "Failed to close sink after aborted run");
                }
                Err(e)
            },
        }
    }

    /// Run a single stage against an already open source
    ///
    /// The sink is left open.
    pub async fn run_stage(&self, stage: Stage, source: &mut dyn RowSource) -> Result<StageReport> {
        let progress = stage_spinner(&stage.to_string(), self.config.show_progress);
        let result = drive_stage(
            stage,
            source,
            Arc::clone(&self.sink),
            self.config.stage_config(stage),
            &progress,
        )
        .instrument(info_span!("stage", stage = %stage))
        .await;
        progress.finish_and_clear();
        result
    }

    async fn run_stages(&self, sources: &mut dyn SourceProvider) -> Result<LoadSummary> {
        let started = Instant::now();
        let mut summary = LoadSummary::default();

        for stage in self.config.ordered_stages() {
            let config = self.config.stage_config(stage);
            info!(
                stage = %stage,
                collection = stage.collection(),
                batch_size = config.batch_size,
                flush_mode = %config.flush_mode,
                "Starting stage"
            );

            let report = async {
                let mut source = sources.open(stage).await?;
                self.run_stage(stage, source.as_mut()).await
            }
            .await
            .inspect_err(|e| error!(stage = %stage, error = %e, "Stage failed"))?;

            summary.stages.push(report);
        }

        summary.elapsed = started.elapsed();
        Ok(summary)
    }
}
