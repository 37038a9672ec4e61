//! Load stages
//!
//! Each stage reads one CSV file and writes one collection. Products,
//! Styles, Photos and SKUs map every row to one write. Features and Related
//! Products fold contiguous rows of the same parent into one document.
//!
//! Photos and SKUs are keyed appends onto the documents written by Styles,
//! so Styles must be fully persisted before either of them runs.

use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use catalog_common::types::{PRODUCT_FEATURES, PRODUCT_INFO, PRODUCT_STYLES, RELATED_PRODUCTS};

use crate::batch::{BatchWriter, WriterStats};
use crate::config::StageConfig;
use crate::error::{LoadError, Result};
use crate::grouping::{Group, GroupAccumulator};
use crate::sink::{DocumentSink, WriteOperation};
use crate::source::{Row, RowSource};
use crate::transform;

/// One load stage, in execution order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Products,
    Features,
    RelatedProducts,
    Styles,
    Photos,
    Skus,
}

impl Stage {
    /// Every stage in the order they must run
    pub const ALL: [Stage; 6] = [
        Stage::Products,
        Stage::Features,
        Stage::RelatedProducts,
        Stage::Styles,
        Stage::Photos,
        Stage::Skus,
    ];

    /// Collection the stage writes into
    pub fn collection(self) -> &'static str {
        match self {
            Stage::Products => PRODUCT_INFO,
            Stage::Features => PRODUCT_FEATURES,
            Stage::RelatedProducts => RELATED_PRODUCTS,
            Stage::Styles | Stage::Photos | Stage::Skus => PRODUCT_STYLES,
        }
    }

    /// Source file name inside the data directory
    pub fn file_name(self) -> &'static str {
        match self {
            Stage::Products => "product.csv",
            Stage::Features => "features.csv",
            Stage::RelatedProducts => "related.csv",
            Stage::Styles => "styles.csv",
            Stage::Photos => "photos.csv",
            Stage::Skus => "skus.csv",
        }
    }

    /// Name used in `CATALOG_<STAGE>_FLUSH_MODE`
    pub fn env_name(self) -> &'static str {
        match self {
            Stage::Products => "PRODUCTS",
            Stage::Features => "FEATURES",
            Stage::RelatedProducts => "RELATED_PRODUCTS",
            Stage::Styles => "STYLES",
            Stage::Photos => "PHOTOS",
            Stage::Skus => "SKUS",
        }
    }

    /// Single-field indexes the stage needs on its collection
    pub fn index_keys(self) -> &'static [&'static str] {
        match self {
            Stage::Products => &["id"],
            Stage::Features | Stage::RelatedProducts => &["product_id"],
            Stage::Styles => &["product_id", "style_id"],
            Stage::Photos | Stage::Skus => &["style_id"],
        }
    }

    /// Whether the stage updates documents written by an earlier stage
    pub fn is_append(self) -> bool {
        matches!(self, Stage::Photos | Stage::Skus)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Stage::Products => "products",
            Stage::Features => "features",
            Stage::RelatedProducts => "related-products",
            Stage::Styles => "styles",
            Stage::Photos => "photos",
            Stage::Skus => "skus",
        };
        f.write_str(label)
    }
}

/// What one completed stage did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: Stage,
    /// Rows read from the source
    pub rows: u64,
    pub writes: WriterStats,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn log(&self) {
        info!(
            stage = %self.stage,
            rows = self.rows,
            operations = self.writes.submitted,
            batches = self.writes.batches,
            failed_batches = self.writes.failed_batches,
            lost_operations = self.writes.lost_operations,
            unmatched = self.writes.unmatched,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Stage complete"
        );
    }
}

/// Run one stage to completion
///
/// Ensures the collection's indexes, drains `source` through the matching
/// transform into a [`BatchWriter`], and waits for every write to land. On
/// error the writer is aborted: buffered operations are dropped and
/// background flushes are awaited before the error is returned.
pub async fn run_stage(
    stage: Stage,
    source: &mut dyn RowSource,
    sink: Arc<dyn DocumentSink>,
    config: StageConfig,
    progress: &ProgressBar,
) -> Result<StageReport> {
    let started = Instant::now();
    let collection = stage.collection();

    for &field in stage.index_keys() {
        sink.ensure_index(collection, &[field]).await?;
    }

    let mut writer = BatchWriter::new(Arc::clone(&sink), collection, config);
    let driven = match stage {
        Stage::Products => drive_flat(source, &mut writer, progress, transform::product_insert).await,
        Stage::Styles => drive_flat(source, &mut writer, progress, transform::style_insert).await,
        Stage::Photos => drive_flat(source, &mut writer, progress, transform::photo_append).await,
        Stage::Skus => drive_flat(source, &mut writer, progress, transform::sku_append).await,
        Stage::Features => {
            drive_grouped(
                source,
                &mut writer,
                progress,
                transform::feature,
                transform::feature_set_insert,
            )
            .await
        },
        Stage::RelatedProducts => {
            drive_grouped(
                source,
                &mut writer,
                progress,
                transform::related,
                transform::related_set_insert,
            )
            .await
        },
    };

    let rows = match driven {
        Ok(rows) => rows,
        Err(e) => {
            let stats = writer.abort().await;
            warn!(
                stage = %stage,
                flushed = stats.flushed,
                lost_operations = stats.lost_operations,
                "Stage aborted"
            );
            return Err(e);
        },
    };

    let writes = writer.finish().await?;

    if writes.unmatched > 0 {
        warn!(
            stage = %stage,
            unmatched = writes.unmatched,
            "Updates matched no {} document; was the styles stage loaded?",
            collection
        );
    }
    if writes.failed_batches > 0 {
        warn!(
            stage = %stage,
            failed_batches = writes.failed_batches,
            lost_operations = writes.lost_operations,
            "Background batches failed; their documents were not written"
        );
    }

    Ok(StageReport {
        stage,
        rows,
        writes,
        elapsed: started.elapsed(),
    })
}

/// One write per row
async fn drive_flat<F>(
    source: &mut dyn RowSource,
    writer: &mut BatchWriter,
    progress: &ProgressBar,
    to_operation: F,
) -> Result<u64>
where
    F: Fn(&Row) -> Result<WriteOperation>,
{
    let mut rows = 0u64;
    while let Some(row) = source.next_row().await? {
        rows += 1;
        progress.inc(1);
        writer.submit(to_operation(&row)?).await?;
    }
    Ok(rows)
}

/// One write per run of rows sharing a parent key
async fn drive_grouped<T, F, G>(
    source: &mut dyn RowSource,
    writer: &mut BatchWriter,
    progress: &ProgressBar,
    fragment: F,
    assemble: G,
) -> Result<u64>
where
    F: Fn(&Row) -> Result<(i64, Option<T>)>,
    G: Fn(Group<T>) -> Result<WriteOperation>,
{
    let mut accumulator = GroupAccumulator::new();
    let mut rows = 0u64;

    while let Some(row) = source.next_row().await? {
        rows += 1;
        progress.inc(1);

        let (key, item) = fragment(&row)?;
        let closed = accumulator.push(key, item).inspect_err(|e| {
            if let LoadError::OrderingViolation { .. } = e {
                warn!(line = row.line(), key, "Rows for one parent are not contiguous");
            }
        })?;

        if let Some(group) = closed {
            writer.submit(assemble(group)?).await?;
        }
    }

    if let Some(group) = accumulator.finish() {
        writer.submit(assemble(group)?).await?;
    }

    Ok(rows)
}
