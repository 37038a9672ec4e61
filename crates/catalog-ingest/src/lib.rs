//! Catalog Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Bulk loader for the product catalog. Six CSV exports are streamed into a
//! document store in a fixed order:
//!
//! 1. **Products** → `product_info`, one document per row
//! 2. **Features** → `product_features`, one document per product
//! 3. **Related products** → `related_products`, one document per product
//! 4. **Styles** → `product_styles`, one document per row with empty photos and SKUs
//! 5. **Photos** → pushed onto the matching style's `photos`
//! 6. **SKUs** → set under the matching style's `skus`, keyed by SKU id
//!
//! Features and related products must arrive with each parent's rows
//! contiguous; a parent key that reappears later fails the stage.
//!
//! # Example
//!
//! ```no_run
//! use catalog_ingest::{Loader, LoaderConfig, MemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = LoaderConfig::from_env()?;
//!     let store = Arc::new(MemoryStore::new());
//!     let summary = Loader::new(config, store.clone()).run().await?;
//!     summary.log();
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod grouping;
pub mod loader;
pub mod progress;
pub mod sink;
pub mod source;
pub mod stage;
pub mod transform;

pub use batch::{BatchWriter, WriterStats};
pub use config::{FlushMode, LoaderConfig, StageConfig};
pub use error::{LoadError, Result};
pub use loader::{CsvDirectory, LoadSummary, Loader, SourceProvider};
pub use sink::{BulkOutcome, DocumentSink, MemoryStore, WriteOperation};
#[cfg(feature = "mongodb")]
pub use sink::MongoSink;
pub use source::{CsvRowSource, Row, RowSource, VecRowSource};
pub use stage::{Stage, StageReport};
