//! Row sources
//!
//! A row source yields the records of one tabular file in order, each as a
//! column-name → raw-string mapping. Sources are single pass.
//!
//! Column names are normalized on the way in: surrounding whitespace and a
//! leading byte-order mark are stripped, so a header like `id, styleId, url`
//! resolves as `styleId` and `url`.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::Path;
use tokio::io::AsyncRead;

use crate::error::{LoadError, Result};

/// One source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    line: u64,
    fields: HashMap<String, String>,
}

impl Row {
    pub fn new(line: u64, fields: HashMap<String, String>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(k, v)| (normalize_column(&k).to_string(), v))
            .collect();
        Self { line, fields }
    }

    /// Build a row from `(column, value)` pairs
    pub fn from_pairs<K, V>(line: u64, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
    {
        let fields = pairs
            .into_iter()
            .map(|(k, v)| (normalize_column(k.as_ref()).to_string(), v.into()))
            .collect();
        Self { line, fields }
    }

    /// 1-based line in the source file (the header is line 1)
    pub fn line(&self) -> u64 {
        self.line
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Value of a column that must be present
    pub fn require(&self, column: &str) -> Result<&str> {
        self.get(column)
            .ok_or_else(|| LoadError::malformed(self.line, column, "is missing"))
    }
}

fn normalize_column(name: &str) -> &str {
    name.trim_start_matches('\u{feff}').trim()
}

/// An ordered, single-pass supply of rows
#[async_trait]
pub trait RowSource: Send {
    /// Next row, or `None` at end of stream
    async fn next_row(&mut self) -> Result<Option<Row>>;
}

/// Rows read from CSV text with a header line
pub struct CsvRowSource<R> {
    reader: AsyncReader<R>,
    headers: Vec<String>,
    record: StringRecord,
    rows_read: u64,
}

impl CsvRowSource<tokio::fs::File> {
    /// Open a CSV file
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            LoadError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to open {}: {}", path.display(), e),
            ))
        })?;
        Self::from_reader(file).await
    }
}

impl<R> CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Read CSV from any async reader; consumes the header line
    pub async fn from_reader(reader: R) -> Result<Self> {
        let mut reader = AsyncReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .buffer_capacity(1 << 20)
            .create_reader(reader);

        let headers = reader
            .headers()
            .await?
            .iter()
            .map(|h| normalize_column(h).to_string())
            .collect();

        Ok(Self {
            reader,
            headers,
            record: StringRecord::new(),
            rows_read: 0,
        })
    }

    /// Normalized column names from the header line
    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

#[async_trait]
impl<R> RowSource for CsvRowSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.reader.read_record(&mut self.record).await? {
            return Ok(None);
        }
        self.rows_read += 1;

        let line = self
            .record
            .position()
            .map(|p| p.line())
            .unwrap_or(self.rows_read + 1);

        // Short rows simply lack the trailing columns; `Row::require` reports them
        let fields = self
            .headers
            .iter()
            .zip(self.record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();

        Ok(Some(Row { line, fields }))
    }
}

/// Rows held in memory
#[derive(Debug, Default)]
pub struct VecRowSource {
    rows: VecDeque<Row>,
}

impl VecRowSource {
    pub fn new(rows: impl IntoIterator<Item = Row>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
        }
    }

    /// Rows from `(column, value)` pair lists, numbered as if under a header line
    pub fn from_records<K, V, I>(records: impl IntoIterator<Item = I>) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::new(
            records
                .into_iter()
                .enumerate()
                .map(|(i, pairs)| Row::from_pairs(i as u64 + 2, pairs)),
        )
    }
}

#[async_trait]
impl RowSource for VecRowSource {
    async fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.pop_front())
    }
}
