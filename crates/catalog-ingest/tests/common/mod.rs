//! Shared helpers for catalog-ingest integration tests
//!
//! - [`CatalogFixture`]: a temporary data directory holding the six CSV files
//! - [`FailingSink`]: wraps a [`MemoryStore`] and rejects chosen batches

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_ingest::{
    BulkOutcome, DocumentSink, LoadError, LoaderConfig, MemoryStore, Stage, WriteOperation,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,catalog_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub const PRODUCTS_CSV: &str = "\
id,name,slogan,description,category,default_price
1,Camo Onesie,Blend in to your crowd,The So Fatigues will wake you up,Jackets, 140
2,Bright Future Sunglasses,You've got to see it,Where you're going you might not need roads,Accessories,69
3,Heir Force Ones,A sneaker dynasty,\"Now where da boxes, at?\",Kicks,99
";

pub const FEATURES_CSV: &str = "\
id,product_id,feature,value
1,1,Fabric,\"Canvas\"
2,1,Buttons,null
3,2,Lenses,Ultrasheen
4,3,Sole,null
";

pub const RELATED_CSV: &str = "\
id,current_product_id,related_product_id
1,1,2
2,1,3
3,2,1
";

pub const STYLES_CSV: &str = "\
id,productId,name,sale_price,original_price,default_style
1,1,Forest Green & Black,null,140,1
2,1,Desert Brown & Tan,100,140,0
3,2,Black Lenses,null,69,1
";

pub const PHOTOS_CSV: &str = "\
id, styleId, url, thumbnail_url
1,1,https://img.example/1.jpg,https://img.example/1t.jpg
2,1,https://img.example/2.jpg,https://img.example/2t.jpg
3,3,https://img.example/3.jpg,https://img.example/3t.jpg
";

pub const SKUS_CSV: &str = "\
id, styleId, size, quantity
1,1,XS,8
2,1,S,16
3,2,M,17
";

/// Temporary data directory
pub struct CatalogFixture {
    dir: TempDir,
}

impl CatalogFixture {
    /// Empty directory
    pub fn empty() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Directory with a small, consistent catalog
    pub fn standard() -> Self {
        let fixture = Self::empty();
        fixture.write(Stage::Products, PRODUCTS_CSV);
        fixture.write(Stage::Features, FEATURES_CSV);
        fixture.write(Stage::RelatedProducts, RELATED_CSV);
        fixture.write(Stage::Styles, STYLES_CSV);
        fixture.write(Stage::Photos, PHOTOS_CSV);
        fixture.write(Stage::Skus, SKUS_CSV);
        fixture
    }

    /// Replace one stage's file
    pub fn write(&self, stage: Stage, contents: &str) {
        std::fs::write(self.dir.path().join(stage.file_name()), contents)
            .expect("Failed to write fixture");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Loader settings reading from this directory
    pub fn config(&self) -> LoaderConfig {
        LoaderConfig {
            data_dir: self.dir.path().to_path_buf(),
            ..LoaderConfig::default()
        }
    }
}

type FailWhen = Box<dyn Fn(&str, &[WriteOperation]) -> bool + Send + Sync>;

/// A store that rejects every batch matching a predicate
///
/// Rejected batches are not applied at all.
pub struct FailingSink {
    inner: MemoryStore,
    fail_when: FailWhen,
    rejected: AtomicU64,
}

impl FailingSink {
    pub fn new(fail_when: impl Fn(&str, &[WriteOperation]) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_when: Box::new(fail_when),
            rejected: AtomicU64::new(0),
        }
    }

    /// Reject any `collection` batch that inserts a document with this `id`
    pub fn rejecting_id(collection: &'static str, id: i64) -> Self {
        Self::new(move |target, operations| {
            target == collection
                && operations.iter().any(|op| match op {
                    WriteOperation::Insert(doc) => doc["id"].as_i64() == Some(id),
                    WriteOperation::UpdateAppend { .. } => false,
                })
        })
    }

    pub fn store(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSink for FailingSink {
    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> catalog_ingest::Result<()> {
        self.inner.ensure_index(collection, fields).await
    }

    async fn bulk_apply(
        &self,
        collection: &str,
        operations: Vec<WriteOperation>,
    ) -> catalog_ingest::Result<BulkOutcome> {
        if (self.fail_when)(collection, &operations) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(LoadError::sink_write(collection, "injected failure"));
        }
        self.inner.bulk_apply(collection, operations).await
    }

    async fn close(&self) -> catalog_ingest::Result<()> {
        self.inner.close().await
    }
}
