//! End-to-end loader tests
//!
//! Each test writes CSV files into a temp directory, runs the full loader
//! against an in-memory store, and inspects the resulting collections:
//! - Document shapes for all four collections
//! - Grouping, null filtering and ordering violations
//! - Unmatched photo/SKU appends
//! - Batch sizing and both flush modes under injected failures
//! - Sink shutdown on success and on abort

mod common;

use catalog_common::types::{PRODUCT_FEATURES, PRODUCT_INFO, PRODUCT_STYLES, RELATED_PRODUCTS};
use catalog_ingest::{FlushMode, LoadError, Loader, MemoryStore, Stage};
use common::{init_tracing, CatalogFixture, FailingSink};
use serde_json::json;
use std::sync::Arc;

fn products_csv(count: usize) -> String {
    let mut csv = String::from("id,name,slogan,description,category,default_price\n");
    for id in 1..=count {
        csv.push_str(&format!("{id},Product {id},Slogan,Description,Category,{id}.00\n"));
    }
    csv
}

// ============================================================================
// Full load
// ============================================================================

#[tokio::test]
async fn test_full_load_builds_every_collection() {
    init_tracing();
    let fixture = CatalogFixture::standard();
    let store = Arc::new(MemoryStore::new());

    let summary = Loader::new(fixture.config(), store.clone())
        .run()
        .await
        .expect("Load failed");

    assert_eq!(summary.stages.len(), 6);
    assert_eq!(summary.unmatched(), 0);
    assert_eq!(summary.lost_operations(), 0);
    assert!(store.is_closed());

    let products = store.documents(PRODUCT_INFO);
    assert_eq!(products.len(), 3);
    assert_eq!(
        products[0],
        json!({
            "id": 1,
            "name": "Camo Onesie",
            "slogan": "Blend in to your crowd",
            "description": "The So Fatigues will wake you up",
            "category": "Jackets",
            "default_price": "140"
        })
    );
    assert_eq!(products[2]["description"], json!("Now where da boxes, at?"));

    assert_eq!(
        store.documents(PRODUCT_FEATURES),
        vec![
            json!({ "product_id": 1, "features": [{ "feature": "Fabric", "value": "Canvas" }] }),
            json!({ "product_id": 2, "features": [{ "feature": "Lenses", "value": "Ultrasheen" }] }),
            json!({ "product_id": 3, "features": [] }),
        ]
    );

    assert_eq!(
        store.documents(RELATED_PRODUCTS),
        vec![
            json!({ "product_id": 1, "related_products": [2, 3] }),
            json!({ "product_id": 2, "related_products": [1] }),
        ]
    );

    let style = store
        .find_one(PRODUCT_STYLES, "style_id", 1)
        .expect("style 1 missing");
    assert_eq!(
        style,
        json!({
            "product_id": 1,
            "style_id": 1,
            "default?": true,
            "sale_price": "0",
            "original_price": "140",
            "name": "Forest Green & Black",
            "photos": [
                { "url": "https://img.example/1.jpg", "thumbnail_url": "https://img.example/1t.jpg" },
                { "url": "https://img.example/2.jpg", "thumbnail_url": "https://img.example/2t.jpg" }
            ],
            "skus": {
                "1": { "size": "XS", "quantity": "8" },
                "2": { "size": "S", "quantity": "16" }
            }
        })
    );

    let style = store.find_one(PRODUCT_STYLES, "style_id", 2).expect("style 2 missing");
    assert_eq!(style["default?"], json!(false));
    assert_eq!(style["sale_price"], json!("100"));
    assert_eq!(style["photos"], json!([]));
    assert_eq!(style["skus"], json!({ "3": { "size": "M", "quantity": "17" } }));

    assert_eq!(
        store.indexes(PRODUCT_STYLES),
        vec![vec!["product_id".to_string()], vec!["style_id".to_string()]]
    );
}

#[tokio::test]
async fn test_summary_counts_rows_and_operations() {
    let fixture = CatalogFixture::standard();
    let store = Arc::new(MemoryStore::new());

    let summary = Loader::new(fixture.config(), store.clone()).run().await.unwrap();

    let features = summary.report(Stage::Features).unwrap();
    assert_eq!(features.rows, 4);
    assert_eq!(features.writes.submitted, 3);

    let photos = summary.report(Stage::Photos).unwrap();
    assert_eq!(photos.rows, 3);
    assert_eq!(photos.writes.matched, 3);
    assert_eq!(photos.writes.unmatched, 0);
}

#[tokio::test]
async fn test_stage_selection_runs_only_chosen_stages() {
    let fixture = CatalogFixture::standard();
    let store = Arc::new(MemoryStore::new());
    let mut config = fixture.config();
    config.stages = vec![Stage::Styles, Stage::Products];

    let summary = Loader::new(config, store.clone()).run().await.unwrap();

    let ran: Vec<Stage> = summary.stages.iter().map(|r| r.stage).collect();
    assert_eq!(ran, vec![Stage::Products, Stage::Styles]);
    assert_eq!(
        store.collection_names(),
        vec![PRODUCT_INFO.to_string(), PRODUCT_STYLES.to_string()]
    );
}

// ============================================================================
// Source edge cases
// ============================================================================

#[tokio::test]
async fn test_bom_and_padded_headers_resolve() {
    let fixture = CatalogFixture::standard();
    fixture.write(
        Stage::Products,
        "\u{feff}id , name,slogan,description,category, default_price\n7,Cap,Hi,Desc,Hats, 9.99 \n",
    );
    let store = Arc::new(MemoryStore::new());
    let mut config = fixture.config();
    config.stages = vec![Stage::Products];

    Loader::new(config, store.clone()).run().await.unwrap();

    let product = store.find_one(PRODUCT_INFO, "id", 7).unwrap();
    assert_eq!(product["default_price"], json!("9.99"));
}

#[tokio::test]
async fn test_photo_for_unknown_style_matches_nothing() {
    let fixture = CatalogFixture::standard();
    fixture.write(
        Stage::Photos,
        "id, styleId, url, thumbnail_url\n1,1,a.jpg,at.jpg\n2,999,b.jpg,bt.jpg\n",
    );
    let store = Arc::new(MemoryStore::new());

    let summary = Loader::new(fixture.config(), store.clone()).run().await.unwrap();

    let photos = summary.report(Stage::Photos).unwrap();
    assert_eq!(photos.writes.matched, 1);
    assert_eq!(photos.writes.unmatched, 1);

    let photo_count: usize = store
        .documents(PRODUCT_STYLES)
        .iter()
        .map(|style| style["photos"].as_array().map_or(0, Vec::len))
        .sum();
    assert_eq!(photo_count, 1);
}

#[tokio::test]
async fn test_empty_files_load_nothing() {
    let fixture = CatalogFixture::empty();
    for stage in Stage::ALL {
        fixture.write(stage, "id\n");
    }
    let store = Arc::new(MemoryStore::new());

    let summary = Loader::new(fixture.config(), store.clone()).run().await.unwrap();

    assert_eq!(summary.rows(), 0);
    assert!(store.documents(PRODUCT_INFO).is_empty());
    assert!(store.batch_sizes(PRODUCT_INFO).is_empty());
}

// ============================================================================
// Stage failures
// ============================================================================

#[tokio::test]
async fn test_non_contiguous_features_abort_the_run() {
    init_tracing();
    let fixture = CatalogFixture::standard();
    fixture.write(
        Stage::Features,
        "id,product_id,feature,value\n1,1,Fabric,Canvas\n2,2,Lenses,Ultrasheen\n3,1,Buttons,Brass\n",
    );
    let store = Arc::new(MemoryStore::new());

    let err = Loader::new(fixture.config(), store.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::OrderingViolation { key: 1 }));
    assert!(store.is_closed());
    // Later stages never ran
    assert!(store.documents(PRODUCT_STYLES).is_empty());
    assert!(!store.collection_names().contains(&RELATED_PRODUCTS.to_string()));
}

#[tokio::test]
async fn test_non_numeric_id_reports_line() {
    let fixture = CatalogFixture::standard();
    fixture.write(
        Stage::Products,
        "id,name,slogan,description,category,default_price\n1,A,B,C,D,1\nx2,A,B,C,D,1\n",
    );
    let store = Arc::new(MemoryStore::new());

    let err = Loader::new(fixture.config(), store.clone())
        .run()
        .await
        .unwrap_err();

    match err {
        LoadError::MalformedRow { line, column, .. } => {
            assert_eq!(line, 3);
            assert_eq!(column, "id");
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(store.is_closed());
}

#[tokio::test]
async fn test_missing_file_aborts_at_that_stage() {
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, PRODUCTS_CSV_SMALL);
    let store = Arc::new(MemoryStore::new());

    let err = Loader::new(fixture.config(), store.clone())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, LoadError::Io(_)));
    assert_eq!(store.documents(PRODUCT_INFO).len(), 1);
    assert!(store.is_closed());
}

const PRODUCTS_CSV_SMALL: &str = "id,name,slogan,description,category,default_price\n1,A,B,C,D,1\n";

// ============================================================================
// Batching and flush modes
// ============================================================================

#[tokio::test]
async fn test_batches_are_capped_and_remainder_flushed() {
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, &products_csv(1201));
    let store = Arc::new(MemoryStore::new());
    let mut config = fixture.config();
    config.stages = vec![Stage::Products];

    let summary = Loader::new(config, store.clone()).run().await.unwrap();

    assert_eq!(store.batch_sizes(PRODUCT_INFO), vec![500, 500, 201]);
    assert_eq!(summary.report(Stage::Products).unwrap().writes.flushed, 1201);
}

#[tokio::test]
async fn test_fire_and_forget_failure_is_counted_not_fatal() {
    init_tracing();
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, &products_csv(5));
    let sink = Arc::new(FailingSink::rejecting_id(PRODUCT_INFO, 3));
    let mut config = fixture.config();
    config.stages = vec![Stage::Products];
    config.batch_size = 2;
    config.flush_mode = FlushMode::FireAndForget;

    let summary = Loader::new(config, sink.clone())
        .run()
        .await
        .expect("Fire-and-forget failures must not fail the run");

    let report = summary.report(Stage::Products).unwrap();
    assert_eq!(report.writes.failed_batches, 1);
    assert_eq!(report.writes.lost_operations, 2);
    assert_eq!(sink.rejected(), 1);

    let mut ids: Vec<i64> = sink
        .store()
        .documents(PRODUCT_INFO)
        .iter()
        .filter_map(|d| d["id"].as_i64())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 5]);
    assert!(sink.store().is_closed());
}

#[tokio::test]
async fn test_awaited_failure_aborts_the_run() {
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, &products_csv(5));
    let sink = Arc::new(FailingSink::rejecting_id(PRODUCT_INFO, 3));
    let mut config = fixture.config();
    config.batch_size = 2;

    let err = Loader::new(config, sink.clone()).run().await.unwrap_err();

    assert!(matches!(err, LoadError::SinkWrite { ref collection, .. } if collection == PRODUCT_INFO));
    // Batch [1, 2] landed; nothing after the failed batch was written
    assert_eq!(sink.store().documents(PRODUCT_INFO).len(), 2);
    assert!(sink.store().is_closed());
}

#[tokio::test]
async fn test_trailing_flush_failure_propagates_in_fire_and_forget() {
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, &products_csv(5));
    let sink = Arc::new(FailingSink::rejecting_id(PRODUCT_INFO, 5));
    let mut config = fixture.config();
    config.stages = vec![Stage::Products];
    config.batch_size = 2;
    config.flush_mode = FlushMode::FireAndForget;

    let err = Loader::new(config, sink.clone()).run().await.unwrap_err();

    assert!(matches!(err, LoadError::SinkWrite { .. }));
    assert_eq!(sink.store().documents(PRODUCT_INFO).len(), 4);
}

#[tokio::test]
async fn test_per_stage_flush_mode_override() {
    let fixture = CatalogFixture::empty();
    fixture.write(Stage::Products, &products_csv(5));
    let sink = Arc::new(FailingSink::rejecting_id(PRODUCT_INFO, 1));
    let mut config = fixture.config();
    config.stages = vec![Stage::Products];
    config.batch_size = 2;
    config.flush_mode = FlushMode::Awaited;
    config
        .stage_flush_modes
        .insert(Stage::Products, FlushMode::FireAndForget);

    let summary = Loader::new(config, sink.clone()).run().await.unwrap();

    assert_eq!(summary.lost_operations(), 2);
}

// ============================================================================
// Dry-run export
// ============================================================================

#[tokio::test]
async fn test_export_after_load_writes_jsonl() {
    let fixture = CatalogFixture::standard();
    let store = Arc::new(MemoryStore::new());
    Loader::new(fixture.config(), store.clone()).run().await.unwrap();

    let out = tempfile::tempdir().unwrap();
    let written = store.export_jsonl(out.path()).unwrap();

    assert_eq!(written.len(), 4);
    let styles: Vec<serde_json::Value> =
        serde_jsonlines::json_lines(out.path().join("product_styles.jsonl"))
            .unwrap()
            .collect::<std::io::Result<_>>()
            .unwrap();
    assert_eq!(styles.len(), 3);
    assert_eq!(styles[2]["photos"].as_array().unwrap().len(), 1);
}
