//! Error types for catalog loading

use thiserror::Error;

/// Result type alias for load operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Everything that can stop a load stage
#[derive(Error, Debug)]
pub enum LoadError {
    /// A field could not be coerced, or a required column is absent
    #[error("Malformed row at line {line}: column '{column}' {reason}")]
    MalformedRow {
        line: u64,
        column: String,
        reason: String,
    },

    /// A grouping key came back after its group was already emitted
    #[error("Ordering violation: key {key} reappeared after its group was closed; input must be sorted by key")]
    OrderingViolation { key: i64 },

    /// The document store rejected all or part of a bulk write
    ///
    /// `rejected` is set when the store reported exactly how many operations
    /// it refused; the rest of the batch was applied. `None` means the whole
    /// batch is in doubt.
    #[error("Bulk write to '{collection}' failed: {message}")]
    SinkWrite {
        collection: String,
        rejected: Option<u64>,
        message: String,
    },

    /// Connecting to or closing the document store failed
    #[error("Document store connection error: {0}")]
    Connection(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LoadError {
    pub fn malformed(line: u64, column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRow {
            line,
            column: column.into(),
            reason: reason.into(),
        }
    }

    pub fn sink_write(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            collection: collection.into(),
            rejected: None,
            message: message.into(),
        }
    }

    /// A bulk write where only `rejected` operations failed
    pub fn partial_write(
        collection: impl Into<String>,
        rejected: u64,
        message: impl Into<String>,
    ) -> Self {
        Self::SinkWrite {
            collection: collection.into(),
            rejected: Some(rejected),
            message: message.into(),
        }
    }

    /// How many operations of `batch_size` this error accounts as not written
    pub fn lost_of(&self, batch_size: u64) -> u64 {
        match self {
            Self::SinkWrite {
                rejected: Some(rejected),
                ..
            } => (*rejected).min(batch_size),
            _ => batch_size,
        }
    }
}
