//! Bounded batch writer
//!
//! Buffers [`WriteOperation`]s for one collection and hands them to the
//! sink `batch_size` at a time, so no more than `batch_size` operations are
//! ever pending. How full batches are flushed depends on [`FlushMode`]:
//!
//! - `Awaited`: the caller waits for the sink. A failed batch is returned
//!   as an error and should abort the stage.
//! - `FireAndForget`: the batch is written by a background task while the
//!   caller keeps going. At most `max_in_flight` such tasks exist at once.
//!   A failure is logged and counted as lost operations, never returned.
//!   When the store says how many operations it rejected, only those count
//!   as lost; a flush task that panics or is cancelled loses its whole batch.
//!
//! [`BatchWriter::finish`] always awaits the trailing partial batch and then
//! waits for every background flush, so a stage is complete once it returns.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::config::{FlushMode, StageConfig};
use crate::error::Result;
use crate::sink::{BulkOutcome, DocumentSink, WriteOperation};

/// Counters for everything a writer did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// Operations passed to `submit`
    pub submitted: u64,
    /// Operations handed to the sink
    pub flushed: u64,
    pub batches: u64,
    pub failed_batches: u64,
    /// Operations rejected by the store, in failed flush tasks, or dropped
    /// on abort
    pub lost_operations: u64,
    pub inserted: u64,
    pub matched: u64,
    /// Update operations that found no document
    pub unmatched: u64,
}

/// Result of one background flush
struct Flushed {
    batch: u64,
    operations: usize,
    updates: usize,
    result: Result<BulkOutcome>,
}

/// Batches writes for a single collection
pub struct BatchWriter {
    sink: Arc<dyn DocumentSink>,
    collection: &'static str,
    config: StageConfig,
    buffer: Vec<WriteOperation>,
    in_flight: JoinSet<Flushed>,
    /// Batch number and size of each background flush, by task
    tasks: HashMap<Id, (u64, usize)>,
    stats: WriterStats,
}

impl BatchWriter {
    pub fn new(sink: Arc<dyn DocumentSink>, collection: &'static str, config: StageConfig) -> Self {
        Self {
            sink,
            collection,
            buffer: Vec::with_capacity(config.batch_size),
            config,
            in_flight: JoinSet::new(),
            tasks: HashMap::new(),
            stats: WriterStats::default(),
        }
    }

    /// Operations buffered and not yet flushed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Background flushes not yet collected
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats
    }

    /// Buffer one operation, flushing when the batch is full
    pub async fn submit(&mut self, operation: WriteOperation) -> Result<()> {
        self.buffer.push(operation);
        self.stats.submitted += 1;

        if self.buffer.len() >= self.config.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flush whatever is buffered using the configured mode
    pub async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.batch_size));
        match self.config.flush_mode {
            FlushMode::Awaited => self.flush_awaited(batch).await,
            FlushMode::FireAndForget => {
                self.spawn_flush(batch).await;
                Ok(())
            },
        }
    }

    /// Flush the remainder, wait for background flushes, and report
    ///
    /// The trailing batch is always awaited; its failure is returned even in
    /// fire-and-forget mode.
    pub async fn finish(mut self) -> Result<WriterStats> {
        let tail = std::mem::take(&mut self.buffer);
        let tail_result = if tail.is_empty() {
            Ok(())
        } else {
            self.flush_awaited(tail).await
        };

        self.drain().await;
        tail_result?;

        debug!(
            collection = self.collection,
            batches = self.stats.batches,
            flushed = self.stats.flushed,
            "Writer finished"
        );
        Ok(self.stats)
    }

    /// Drop unflushed operations and wait for background flushes
    ///
    /// Used when a stage fails part way; writes already handed to the sink
    /// are allowed to land.
    pub async fn abort(mut self) -> WriterStats {
        let dropped = self.buffer.len() as u64;
        if dropped > 0 {
            warn!(
                collection = self.collection,
                dropped, "Discarding unflushed operations"
            );
            self.stats.lost_operations += dropped;
            self.buffer.clear();
        }

        self.drain().await;
        self.stats
    }

    fn next_batch(&mut self, operations: usize) -> u64 {
        self.stats.batches += 1;
        self.stats.flushed += operations as u64;
        self.stats.batches
    }

    async fn flush_awaited(&mut self, batch: Vec<WriteOperation>) -> Result<()> {
        let operations = batch.len();
        let updates = batch.iter().filter(|op| op.is_update()).count();
        let number = self.next_batch(operations);

        let result = self.sink.bulk_apply(self.collection, batch).await;
        self.settle(Flushed {
            batch: number,
            operations,
            updates,
            result,
        })
    }

    async fn spawn_flush(&mut self, batch: Vec<WriteOperation>) {
        // Bound memory: wait for room before starting another flush
        while self.in_flight.len() >= self.config.max_in_flight {
            match self.in_flight.join_next_with_id().await {
                Some(joined) => self.collect(joined),
                None => break,
            }
        }

        let operations = batch.len();
        let updates = batch.iter().filter(|op| op.is_update()).count();
        let number = self.next_batch(operations);
        let sink = Arc::clone(&self.sink);
        let collection = self.collection;

        let handle = self.in_flight.spawn(async move {
            let result = sink.bulk_apply(collection, batch).await;
            Flushed {
                batch: number,
                operations,
                updates,
                result,
            }
        });
        self.tasks.insert(handle.id(), (number, operations));
    }

    async fn drain(&mut self) {
        while let Some(joined) = self.in_flight.join_next_with_id().await {
            self.collect(joined);
        }
    }

    /// Record a background flush; failures are logged, never returned
    fn collect(&mut self, joined: std::result::Result<(Id, Flushed), JoinError>) {
        match joined {
            // Already logged and counted by settle
            Ok((id, flushed)) => {
                self.tasks.remove(&id);
                let _ = self.settle(flushed);
            },
            Err(join_error) => {
                let (batch, operations) = self.tasks.remove(&join_error.id()).unwrap_or_default();
                self.stats.failed_batches += 1;
                self.stats.lost_operations += operations as u64;
                error!(
                    collection = self.collection,
                    batch,
                    operations,
                    error = %join_error,
                    "Background flush task did not complete"
                );
            },
        }
    }

    fn settle(&mut self, flushed: Flushed) -> Result<()> {
        match flushed.result {
            Ok(outcome) => {
                self.stats.inserted += outcome.inserted;
                self.stats.matched += outcome.matched;
                let unmatched = (flushed.updates as u64).saturating_sub(outcome.matched);
                self.stats.unmatched += unmatched;

                debug!(
                    collection = self.collection,
                    batch = flushed.batch,
                    operations = flushed.operations,
                    inserted = outcome.inserted,
                    matched = outcome.matched,
                    unmatched,
                    "Batch written"
                );
                Ok(())
            },
            Err(e) => {
                let lost = e.lost_of(flushed.operations as u64);
                self.stats.failed_batches += 1;
                self.stats.lost_operations += lost;
                error!(
                    collection = self.collection,
                    batch = flushed.batch,
                    operations = flushed.operations,
                    lost,
                    error = %e,
                    "Batch write failed"
                );
                Err(e)
            },
        }
    }
}
