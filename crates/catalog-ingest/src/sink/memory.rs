//! In-process document store
//!
//! Holds every collection in memory. Single-field indexes over integer
//! fields get a hash lookup, so keyed appends stay cheap on large loads,
//! the same as they are against an indexed collection in a real store.
//! Every bulk call's size is recorded for inspection.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::{AppendField, BulkOutcome, DocumentSink, WriteOperation};
use crate::error::{LoadError, Result};

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Value>,
    indexes: Vec<Vec<String>>,
    /// field -> integer value -> position of the first document holding it
    lookups: HashMap<String, HashMap<i64, usize>>,
    batch_sizes: Vec<usize>,
}

impl Collection {
    fn insert(&mut self, document: Value) -> std::result::Result<(), String> {
        if !document.is_object() {
            return Err(format!("document must be an object, got {document}"));
        }

        let position = self.documents.len();
        for (field, lookup) in self.lookups.iter_mut() {
            if let Some(key) = document.get(field).and_then(Value::as_i64) {
                lookup.entry(key).or_insert(position);
            }
        }
        self.documents.push(document);
        Ok(())
    }

    fn position_of(&self, field: &str, key: i64) -> Option<usize> {
        match self.lookups.get(field) {
            Some(lookup) => lookup.get(&key).copied(),
            None => self
                .documents
                .iter()
                .position(|d| d.get(field).and_then(Value::as_i64) == Some(key)),
        }
    }

    /// Returns whether a document matched
    fn append(
        &mut self,
        style_id: i64,
        field: &AppendField,
        value: Value,
    ) -> std::result::Result<bool, String> {
        let Some(position) = self.position_of("style_id", style_id) else {
            return Ok(false);
        };
        let Some(document) = self.documents[position].as_object_mut() else {
            return Err(format!("document for style {style_id} is not an object"));
        };

        match field {
            AppendField::Array(name) => {
                let slot = document
                    .entry(name.to_string())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match slot {
                    Value::Array(items) => items.push(value),
                    other => {
                        return Err(format!(
                            "cannot push onto non-array field '{name}' of style {style_id}: {other}"
                        ))
                    },
                }
            },
            AppendField::MapEntry { field: name, key } => {
                let slot = document
                    .entry(name.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                match slot {
                    Value::Object(entries) => {
                        entries.insert(key.clone(), value);
                    },
                    other => {
                        return Err(format!(
                            "cannot set '{key}' in non-object field '{name}' of style {style_id}: {other}"
                        ))
                    },
                }
            },
        }

        Ok(true)
    }
}

/// Document store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// All documents of a collection, in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// First document whose integer `field` equals `key`
    pub fn find_one(&self, collection: &str, field: &str, key: i64) -> Option<Value> {
        let collections = self.lock();
        let c = collections.get(collection)?;
        c.position_of(field, key).map(|p| c.documents[p].clone())
    }

    /// Index specs created on a collection, in creation order
    pub fn indexes(&self, collection: &str) -> Vec<Vec<String>> {
        self.lock()
            .get(collection)
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    /// Size of every bulk call made against a collection, in call order
    pub fn batch_sizes(&self, collection: &str) -> Vec<usize> {
        self.lock()
            .get(collection)
            .map(|c| c.batch_sizes.clone())
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write each collection to `<dir>/<collection>.jsonl`
    pub fn export_jsonl(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        // Snapshot first so the lock is not held during file IO
        let snapshot: BTreeMap<String, Vec<Value>> = self
            .lock()
            .iter()
            .map(|(name, c)| (name.clone(), c.documents.clone()))
            .collect();

        let mut written = Vec::with_capacity(snapshot.len());
        for (name, documents) in snapshot {
            let path = dir.join(format!("{name}.jsonl"));
            serde_jsonlines::write_json_lines(&path, &documents)?;
            debug!(collection = %name, documents = documents.len(), path = %path.display(), "Exported collection");
            written.push(path);
        }

        Ok(written)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(LoadError::Connection("memory store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentSink for MemoryStore {
    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> Result<()> {
        self.ensure_open()?;

        let index: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let mut collections = self.lock();
        let c = collections.entry(collection.to_string()).or_default();
        if c.indexes.contains(&index) {
            return Ok(());
        }

        if let [field] = fields {
            let mut lookup = HashMap::new();
            for (position, document) in c.documents.iter().enumerate() {
                if let Some(key) = document.get(*field).and_then(Value::as_i64) {
                    lookup.entry(key).or_insert(position);
                }
            }
            c.lookups.insert(field.to_string(), lookup);
        }
        c.indexes.push(index);

        Ok(())
    }

    async fn bulk_apply(
        &self,
        collection: &str,
        operations: Vec<WriteOperation>,
    ) -> Result<BulkOutcome> {
        self.ensure_open()?;

        let mut collections = self.lock();
        let c = collections.entry(collection.to_string()).or_default();
        c.batch_sizes.push(operations.len());

        let mut outcome = BulkOutcome::default();
        let mut errors = Vec::new();

        // Unordered semantics: a failed operation does not stop the rest
        for (index, operation) in operations.into_iter().enumerate() {
            let result = match operation {
                WriteOperation::Insert(document) => c.insert(document).map(|()| {
                    outcome.inserted += 1;
                }),
                WriteOperation::UpdateAppend {
                    style_id,
                    field,
                    value,
                } => c.append(style_id, &field, value).map(|matched| {
                    if matched {
                        outcome.matched += 1;
                        outcome.modified += 1;
                    }
                }),
            };

            if let Err(message) = result {
                errors.push(format!("operation {index}: {message}"));
            }
        }

        if errors.is_empty() {
            Ok(outcome)
        } else {
            Err(LoadError::partial_write(
                collection,
                errors.len() as u64,
                format!("{} of the batch rejected; first: {}", errors.len(), errors[0]),
            ))
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
