//! Document sinks
//!
//! A sink is the document store the loader writes into. It accepts whole
//! batches of [`WriteOperation`]s per collection and reports how many
//! documents each batch inserted and matched.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "mongodb")]
pub mod mongo;

pub use memory::MemoryStore;
#[cfg(feature = "mongodb")]
pub use mongo::MongoSink;

/// Where an appended value goes inside the matched document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendField {
    /// Push onto the array stored under this field
    Array(&'static str),
    /// Set `key` inside the mapping stored under `field`
    MapEntry { field: &'static str, key: String },
}

impl AppendField {
    /// Dotted path of the value inside the document
    pub fn path(&self) -> String {
        match self {
            AppendField::Array(field) => (*field).to_string(),
            AppendField::MapEntry { field, key } => format!("{field}.{key}"),
        }
    }
}

/// One write against a collection
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Insert a new document
    Insert(Value),
    /// Append `value` to the first document whose `style_id` matches
    UpdateAppend {
        style_id: i64,
        field: AppendField,
        value: Value,
    },
}

impl WriteOperation {
    pub fn is_update(&self) -> bool {
        matches!(self, WriteOperation::UpdateAppend { .. })
    }
}

/// Counts reported by the sink for one bulk call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub inserted: u64,
    /// Update operations that found a document
    pub matched: u64,
    pub modified: u64,
}

impl BulkOutcome {
    pub fn absorb(&mut self, other: BulkOutcome) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
    }
}

/// A document store accepting batched writes
///
/// Implementations must be usable from spawned tasks, since fire-and-forget
/// flushes run in the background.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Ensure an index on `fields` exists; calling it again is a no-op
    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> Result<()>;

    /// Apply `operations` as one bulk call
    ///
    /// An error means some or all of the batch was rejected.
    async fn bulk_apply(
        &self,
        collection: &str,
        operations: Vec<WriteOperation>,
    ) -> Result<BulkOutcome>;

    /// Release the connection. No further calls are made afterwards.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
