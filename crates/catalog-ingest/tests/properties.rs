//! Property tests for grouping, batching and field coercion

use catalog_ingest::grouping::{Group, GroupAccumulator};
use catalog_ingest::transform;
use catalog_ingest::{BatchWriter, FlushMode, MemoryStore, Row, StageConfig, WriteOperation};
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Runs of rows with distinct keys; each row's item may be filtered out
fn keyed_runs() -> impl Strategy<Value = Vec<(i64, Vec<Option<u32>>)>> {
    prop::collection::btree_set(any::<i64>(), 0..20).prop_flat_map(|keys: BTreeSet<i64>| {
        let keys: Vec<i64> = keys.into_iter().collect();
        let n = keys.len();
        (
            Just(keys).prop_shuffle(),
            prop::collection::vec(prop::collection::vec(any::<Option<u32>>(), 1..6), n),
        )
            .prop_map(|(keys, rows)| keys.into_iter().zip(rows).collect::<Vec<_>>())
    })
}

fn style_row(default_style: &str, sale_price: &str) -> Row {
    Row::from_pairs(
        2,
        [
            ("id", "1"),
            ("productId", "1"),
            ("name", "Style"),
            ("sale_price", sale_price),
            ("original_price", "10"),
            ("default_style", default_style),
        ],
    )
}

proptest! {
    #[test]
    fn test_one_group_per_run_with_filtered_items(runs in keyed_runs()) {
        let mut accumulator = GroupAccumulator::new();
        let mut groups = Vec::new();
        for (key, items) in &runs {
            for item in items {
                if let Some(group) = accumulator.push(*key, *item).unwrap() {
                    groups.push(group);
                }
            }
        }
        groups.extend(accumulator.finish());

        let expected: Vec<Group<u32>> = runs
            .iter()
            .map(|(key, items)| Group {
                key: *key,
                items: items.iter().flatten().copied().collect(),
            })
            .collect();
        prop_assert_eq!(groups, expected);
    }

    #[test]
    fn test_batches_never_exceed_threshold(count in 0usize..1500, batch_size in 1usize..600) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let store = Arc::new(MemoryStore::new());
        let stats = runtime.block_on(async {
            let config = StageConfig {
                batch_size,
                flush_mode: FlushMode::Awaited,
                max_in_flight: 4,
            };
            let mut writer = BatchWriter::new(store.clone(), "product_info", config);
            for id in 0..count {
                writer.submit(WriteOperation::Insert(json!({ "id": id }))).await.unwrap();
                assert!(writer.pending() < batch_size);
            }
            writer.finish().await.unwrap()
        });

        let sizes = store.batch_sizes("product_info");
        prop_assert_eq!(sizes.iter().sum::<usize>(), count);
        prop_assert_eq!(stats.flushed as usize, count);
        prop_assert!(sizes.iter().all(|&size| size > 0 && size <= batch_size));
        if let Some((_, full)) = sizes.split_last() {
            prop_assert!(full.iter().all(|&size| size == batch_size));
        }
    }

    #[test]
    fn test_default_flag_is_exactly_one(flag in "[ 01a-z]{0,4}") {
        let style = transform::style(&style_row(&flag, "5")).unwrap();
        prop_assert_eq!(style.is_default, flag == "1");
    }

    #[test]
    fn test_sale_price_zero_only_for_null(price in "(null|NULL| null|[0-9.]{0,6}|[a-z]{0,5})") {
        let style = transform::style(&style_row("0", &price)).unwrap();
        if price == "null" {
            prop_assert_eq!(style.sale_price, "0");
        } else {
            prop_assert_eq!(style.sale_price, price);
        }
    }

    #[test]
    fn test_null_features_never_survive(values in prop::collection::vec("(null|[a-z]{1,4})", 1..10)) {
        let mut accumulator = GroupAccumulator::new();
        for (i, value) in values.iter().enumerate() {
            let id = (i + 1).to_string();
            let row = Row::from_pairs(
                i as u64 + 2,
                [("id", id.as_str()), ("product_id", "1"), ("feature", "f"), ("value", value.as_str())],
            );
            let (key, item) = transform::feature(&row).unwrap();
            prop_assert!(accumulator.push(key, item).unwrap().is_none());
        }

        let set = transform::feature_set(accumulator.finish().unwrap());
        prop_assert!(set.features.iter().all(|f| f.value != "null"));
        prop_assert_eq!(set.features.len(), values.iter().filter(|v| *v != "null").count());
    }
}
