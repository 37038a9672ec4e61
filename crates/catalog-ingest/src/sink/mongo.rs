//! MongoDB sink
//!
//! Writes through database commands (`insert`, `update`, `createIndexes`)
//! rather than the typed collection API, so one bulk call maps to as few
//! round trips as possible and the server's `n`/`nModified` counts come
//! back unchanged. A batch is split into contiguous runs of inserts and
//! updates; each run is one unordered command.

use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::{Client, Database};
use serde_json::Value;
use tracing::{debug, info};

use super::{AppendField, BulkOutcome, DocumentSink, WriteOperation};
use crate::error::{LoadError, Result};

/// Document sink backed by a MongoDB database
#[derive(Clone)]
pub struct MongoSink {
    client: Client,
    database: Database,
}

impl MongoSink {
    /// Connect and verify the server answers `ping`
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| LoadError::Connection(format!("Failed to parse or resolve {uri}: {e}")))?;
        let database = client.database(database);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| LoadError::Connection(format!("Ping failed: {e}")))?;

        info!(database = database.name(), "Connected to MongoDB");
        Ok(Self { client, database })
    }

    async fn command(&self, collection: &str, command: Document) -> Result<Document> {
        self.database
            .run_command(command)
            .await
            .map_err(|e| LoadError::sink_write(collection, e.to_string()))
    }
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn ensure_index(&self, collection: &str, fields: &[&str]) -> Result<()> {
        let index = index_model(fields);
        debug!(collection, index = %index, "Ensuring index");

        // createIndexes is a no-op when an identical index exists
        self.command(
            collection,
            doc! { "createIndexes": collection, "indexes": [index] },
        )
        .await?;
        Ok(())
    }

    async fn bulk_apply(
        &self,
        collection: &str,
        operations: Vec<WriteOperation>,
    ) -> Result<BulkOutcome> {
        let mut outcome = BulkOutcome::default();
        let mut failures = Vec::new();
        let mut rejected = 0;

        for run in operations.chunk_by(|a, b| a.is_update() == b.is_update()) {
            // A run that never reached the server is rejected as a whole
            let command = if run[0].is_update() {
                update_command(collection, run)
            } else {
                insert_command(collection, run)
            };
            let reply = match command {
                Ok(command) => self.command(collection, command).await,
                Err(e) => Err(e),
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    rejected += run.len() as u64;
                    failures.push(e.to_string());
                    continue;
                },
            };

            outcome.absorb(reply_counts(&reply, run[0].is_update()));
            if let Some((count, message)) = write_errors(&reply, run.len()) {
                rejected += count;
                failures.push(message);
            }
        }

        if failures.is_empty() {
            Ok(outcome)
        } else {
            Err(LoadError::partial_write(collection, rejected, failures.join("; ")))
        }
    }

    async fn close(&self) -> Result<()> {
        self.client.clone().shutdown().await;
        debug!("MongoDB client shut down");
        Ok(())
    }
}

fn index_model(fields: &[&str]) -> Document {
    let mut key = Document::new();
    for field in fields {
        key.insert(*field, 1);
    }
    let name = fields
        .iter()
        .map(|f| format!("{f}_1"))
        .collect::<Vec<_>>()
        .join("_");

    doc! { "key": key, "name": name }
}

fn to_document(collection: &str, value: &Value) -> Result<Document> {
    bson::to_document(value)
        .map_err(|e| LoadError::sink_write(collection, format!("Document is not BSON encodable: {e}")))
}

fn to_bson(collection: &str, value: &Value) -> Result<Bson> {
    bson::to_bson(value)
        .map_err(|e| LoadError::sink_write(collection, format!("Value is not BSON encodable: {e}")))
}

fn insert_command(collection: &str, run: &[WriteOperation]) -> Result<Document> {
    let documents = run
        .iter()
        .filter_map(|op| match op {
            WriteOperation::Insert(document) => Some(to_document(collection, document)),
            WriteOperation::UpdateAppend { .. } => None,
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(doc! { "insert": collection, "documents": documents, "ordered": false })
}

fn update_command(collection: &str, run: &[WriteOperation]) -> Result<Document> {
    let updates = run
        .iter()
        .filter_map(|op| match op {
            WriteOperation::UpdateAppend {
                style_id,
                field,
                value,
            } => Some(update_statement(collection, *style_id, field, value)),
            WriteOperation::Insert(_) => None,
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(doc! { "update": collection, "updates": updates, "ordered": false })
}

/// `updateOne` against the first document with this `style_id`
fn update_statement(
    collection: &str,
    style_id: i64,
    field: &AppendField,
    value: &Value,
) -> Result<Document> {
    let mut target = Document::new();
    target.insert(field.path(), to_bson(collection, value)?);
    let change = match field {
        AppendField::Array(_) => doc! { "$push": target },
        AppendField::MapEntry { .. } => doc! { "$set": target },
    };

    Ok(doc! {
        "q": { "style_id": style_id },
        "u": change,
        "multi": false,
        "upsert": false,
    })
}

fn count(reply: &Document, key: &str) -> u64 {
    match reply.get(key) {
        Some(Bson::Int32(n)) => (*n).max(0) as u64,
        Some(Bson::Int64(n)) => (*n).max(0) as u64,
        Some(Bson::Double(n)) if *n > 0.0 => *n as u64,
        _ => 0,
    }
}

fn reply_counts(reply: &Document, is_update: bool) -> BulkOutcome {
    let n = count(reply, "n");
    if is_update {
        BulkOutcome {
            inserted: 0,
            matched: n,
            modified: count(reply, "nModified"),
        }
    } else {
        BulkOutcome {
            inserted: n,
            matched: 0,
            modified: 0,
        }
    }
}

/// Rejected count and summary of the errors in a reply to a `run_len` command
///
/// Each `writeErrors` entry is one rejected operation. A write concern error
/// leaves the whole run unconfirmed.
fn write_errors(reply: &Document, run_len: usize) -> Option<(u64, String)> {
    let mut messages = Vec::new();
    let mut rejected = 0;

    if let Ok(errors) = reply.get_array("writeErrors") {
        if let Some(Bson::Document(first)) = errors.first() {
            let detail = first.get_str("errmsg").unwrap_or("unknown error");
            messages.push(format!("{} operations rejected; first: {detail}", errors.len()));
            rejected = errors.len() as u64;
        }
    }

    if let Ok(concern) = reply.get_document("writeConcernError") {
        let detail = concern.get_str("errmsg").unwrap_or("unknown error");
        messages.push(format!("write concern error: {detail}"));
        rejected = run_len as u64;
    }

    if messages.is_empty() {
        None
    } else {
        Some((rejected, messages.join("; ")))
    }
}
