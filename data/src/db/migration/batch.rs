//! Bounded batches and "ignore conflicts" bulk insertion
//!
//! Each batch is written in its own transaction. A duplicate key skips only
//! that row; any other failure rolls the whole batch back and is reported to
//! the caller, which carries on with the next batch.

use super::helpers::render_sample;
use crate::db::schema::TableSchema;
use crate::db::value::{FieldMap, render_value};
use crate::db::{MigrationError, Result, quote_ident};
use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};

/// A transformed row waiting for insertion
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    /// Source identifier, for error reporting
    pub key: Value,
    pub fields: FieldMap,
}

/// Rows actually written versus skipped as duplicates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Destination of flushed batches
pub trait BatchSink {
    fn write_batch(&mut self, rows: &[PendingRow]) -> Result<BatchOutcome>;
}

/// Result of one flush: how many rows were submitted and what happened
#[derive(Debug)]
pub struct FlushResult {
    /// 1-based batch number within the table
    pub batch: usize,
    pub rows: usize,
    pub result: Result<BatchOutcome>,
}

/// Accumulates rows and flushes them to a sink every `capacity` rows
pub struct BatchWriter<S: BatchSink> {
    sink: S,
    capacity: usize,
    pending: Vec<PendingRow>,
    flushed: usize,
}

impl<S: BatchSink> BatchWriter<S> {
    pub fn new(sink: S, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sink,
            capacity,
            pending: Vec::with_capacity(capacity),
            flushed: 0,
        }
    }

    /// Queue a row, flushing when the batch is full
    pub fn push(&mut self, row: PendingRow) -> Option<FlushResult> {
        self.pending.push(row);
        if self.pending.len() >= self.capacity {
            self.flush()
        } else {
            None
        }
    }

    /// Write whatever is pending; `None` when nothing was queued
    pub fn flush(&mut self) -> Option<FlushResult> {
        if self.pending.is_empty() {
            return None;
        }

        self.flushed += 1;
        let batch = self.flushed;
        let result = self.sink.write_batch(&self.pending).map_err(|e| match e {
            MigrationError::InsertionFailure {
                table,
                rows,
                reason,
                sample,
                ..
            } => MigrationError::InsertionFailure {
                table,
                batch,
                rows,
                reason,
                sample,
            },
            other => other,
        });
        let rows = self.pending.len();
        self.pending.clear();

        Some(FlushResult {
            batch,
            rows,
            result,
        })
    }

    /// Whether a queued row holds `value` in `field`
    ///
    /// Values compare by their rendered text, so `Text("10")` matches a queued
    /// `Integer(10)` the way a store comparison would.
    pub fn pending_contains(&self, field: &str, value: &Value) -> bool {
        if matches!(value, Value::Null) {
            return false;
        }
        let wanted = render_value(value);
        self.pending.iter().any(|row| match row.fields.get(field) {
            None | Some(Value::Null) => false,
            Some(queued) => queued == value || render_value(queued) == wanted,
        })
    }

    pub fn batches_flushed(&self) -> usize {
        self.flushed
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

/// Inserts batches into one target table
pub struct SqliteSink<'c> {
    conn: &'c Connection,
    table: String,
    columns: Vec<String>,
    sql: String,
}

impl<'c> SqliteSink<'c> {
    /// Writes every column of `schema` that `rows` may carry
    pub fn new(conn: &'c Connection, schema: &TableSchema) -> Self {
        Self::with_columns(conn, &schema.name, schema.field_names().map(str::to_string).collect())
    }

    pub fn with_columns(conn: &'c Connection, table: &str, columns: Vec<String>) -> Self {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            (1..=columns.len()).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
        );
        Self {
            conn,
            table: table.to_string(),
            columns,
            sql,
        }
    }

    fn insert_all(&self, rows: &[PendingRow]) -> rusqlite::Result<BatchOutcome> {
        let tx = self.conn.unchecked_transaction()?;
        let mut outcome = BatchOutcome::default();
        {
            let mut stmt = tx.prepare_cached(&self.sql)?;
            for row in rows {
                let values = self
                    .columns
                    .iter()
                    .map(|c| row.fields.get(c).unwrap_or(&Value::Null));
                match stmt.execute(params_from_iter(values))? {
                    0 => outcome.duplicates += 1,
                    n => outcome.inserted += n,
                }
            }
        }
        tx.commit()?;
        Ok(outcome)
    }
}

impl BatchSink for SqliteSink<'_> {
    fn write_batch(&mut self, rows: &[PendingRow]) -> Result<BatchOutcome> {
        self.insert_all(rows).map_err(|e| MigrationError::InsertionFailure {
            table: self.table.clone(),
            batch: 0,
            rows: rows.len(),
            reason: e.to_string(),
            sample: render_sample(rows, 3),
        })
    }
}
