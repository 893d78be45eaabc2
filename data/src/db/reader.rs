//! Table reader shared by the source (legacy) and target stores
//!
//! Every operation opens its own read-only connection. A table that cannot be
//! read is reported as empty by the non-`try_` variants, after logging a warning.

use super::schema::{FieldKind, table_columns};
use super::{MigrationError, Result, count_rows, list_tables, open_read_only, quote_ident};
use rusqlite::Connection;
use rusqlite::types::Value;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Shape and footprint of one table, computed on demand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: i64,
    pub estimated_size: u64,
}

impl TableDescriptor {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            row_count: 0,
            estimated_size: 0,
        }
    }
}

/// All rows of a table with their column names
#[derive(Debug, Clone, Default)]
pub struct TableRows {
    pub table: String,
    pub columns: Vec<String>,
    /// Index into `columns` of the primary key, when the table declares one
    pub primary_key: Option<usize>,
    pub rows: Vec<Vec<Value>>,
}

impl TableRows {
    pub fn empty(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stable identifier of row `index`: its primary key, or its 1-based position
    pub fn row_key(&self, index: usize) -> Value {
        self.primary_key
            .and_then(|pk| self.rows.get(index).and_then(|row| row.get(pk)))
            .filter(|v| !matches!(v, Value::Null))
            .cloned()
            .unwrap_or(Value::Integer(index as i64 + 1))
    }
}

/// Estimated byte footprint of one row
///
/// Fixed-width kinds contribute their width regardless of content; other
/// columns contribute the byte length of their value, with NULL as zero.
pub fn row_size(kinds: &[FieldKind], values: &[Value]) -> u64 {
    kinds
        .iter()
        .zip(values)
        .map(|(kind, value)| match kind.fixed_width() {
            Some(width) => width,
            None => variable_width(value),
        })
        .sum()
}

fn variable_width(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Integer(_) | Value::Real(_) => 8,
        Value::Text(s) => s.len() as u64,
        Value::Blob(b) => b.len() as u64,
    }
}

/// Reads tables of one SQLite store
#[derive(Debug, Clone)]
pub struct StoreReader {
    path: PathBuf,
    label: &'static str,
}

impl StoreReader {
    /// `label` names the store in log lines ("source", "target")
    pub fn new(path: impl Into<PathBuf>, label: &'static str) -> Self {
        Self {
            path: path.into(),
            label,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    fn open(&self) -> Result<Connection> {
        open_read_only(&self.path)
    }

    pub fn list_tables(
        &self,
        internal_prefixes: &[String],
        always_include: &[String],
    ) -> Result<Vec<String>> {
        let conn = self.open()?;
        list_tables(&conn, internal_prefixes, always_include)
    }

    pub fn try_describe(&self, table: &str) -> Result<TableDescriptor> {
        let conn = self.open()?;
        let columns = table_columns(&conn, table)?;
        let kinds: Vec<FieldKind> = columns.iter().map(|c| c.kind).collect();
        let row_count = count_rows(&conn, table).map_err(|e| unreadable(table, e))?;
        let estimated_size = estimate_with(&conn, table, &kinds)?;

        Ok(TableDescriptor {
            name: table.to_string(),
            columns: columns.into_iter().map(|c| c.name).collect(),
            row_count,
            estimated_size,
        })
    }

    /// Column names, row count and size estimate; empty when unreadable
    pub fn describe(&self, table: &str) -> TableDescriptor {
        self.try_describe(table).unwrap_or_else(|e| {
            log::warn!("Could not describe {} table '{}': {}", self.label, table, e);
            TableDescriptor::empty(table)
        })
    }

    pub fn try_fetch_all(&self, table: &str) -> Result<TableRows> {
        let conn = self.open()?;
        let columns = table_columns(&conn, table)?;
        let primary_key = columns.iter().position(|c| c.primary_key);
        let names: Vec<String> = columns.into_iter().map(|c| c.name).collect();

        let select = format!(
            "SELECT {} FROM {}",
            names.iter().map(|n| quote_ident(n)).collect::<Vec<_>>().join(", "),
            quote_ident(table)
        );
        let mut stmt = conn.prepare(&select).map_err(|e| unreadable(table, e))?;
        let width = names.len();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .map_err(|e| unreadable(table, e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| unreadable(table, e))?;

        log::debug!("Read {} rows from {} table '{}'", rows.len(), self.label, table);

        Ok(TableRows {
            table: table.to_string(),
            columns: names,
            primary_key,
            rows,
        })
    }

    /// All rows with their column names; empty when unreadable
    pub fn fetch_all(&self, table: &str) -> TableRows {
        self.try_fetch_all(table).unwrap_or_else(|e| {
            log::warn!("Could not read {} table '{}': {}", self.label, table, e);
            TableRows::empty(table)
        })
    }

    pub fn row_count(&self, table: &str) -> i64 {
        self.open()
            .and_then(|conn| count_rows(&conn, table))
            .unwrap_or_else(|e| {
                log::warn!("Could not count {} table '{}': {}", self.label, table, e);
                0
            })
    }

    /// Approximate byte footprint of a table; zero when unreadable
    pub fn estimate_size(&self, table: &str) -> u64 {
        let estimate = self.open().and_then(|conn| {
            let kinds: Vec<FieldKind> = table_columns(&conn, table)?
                .into_iter()
                .map(|c| c.kind)
                .collect();
            estimate_with(&conn, table, &kinds)
        });

        estimate.unwrap_or_else(|e| {
            log::warn!("Could not size {} table '{}': {}", self.label, table, e);
            0
        })
    }
}

fn estimate_with(conn: &Connection, table: &str, kinds: &[FieldKind]) -> Result<u64> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {}", quote_ident(table)))
        .map_err(|e| unreadable(table, e))?;
    let width = kinds.len();
    let mut rows = stmt.query([]).map_err(|e| unreadable(table, e))?;

    let mut total = 0u64;
    let mut values = Vec::with_capacity(width);
    while let Some(row) = rows.next().map_err(|e| unreadable(table, e))? {
        values.clear();
        for i in 0..width {
            values.push(row.get::<_, Value>(i).map_err(|e| unreadable(table, e))?);
        }
        total += row_size(kinds, &values);
    }

    Ok(total)
}

fn unreadable(table: &str, err: impl std::fmt::Display) -> MigrationError {
    MigrationError::SourceUnreadable {
        table: table.to_string(),
        reason: err.to_string(),
    }
}
