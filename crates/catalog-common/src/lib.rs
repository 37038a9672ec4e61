//! Catalog Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and logging for the catalog workspace.
//!
//! # Overview
//!
//! - **Types**: the documents stored in the catalog collections
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use catalog_common::logging::{init_logging, LogConfig};
//! use catalog_common::types::{Product, PRODUCT_INFO};
//! use tracing::info;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     info!(collection = PRODUCT_INFO, "Logging ready");
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod types;

pub use types::{Feature, FeatureSet, Photo, Product, RelatedSet, Sku, StyleVariant};
