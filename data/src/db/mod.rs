//! Database infrastructure for the club migration engine
//!
//! Both stores are SQLite files. This module provides:
//! - Connection opening for the read-only source and the read/write target
//! - Table enumeration shared by the readers and the reconciler
//! - Target schema introspection ([`schema`]) and table readers ([`reader`])
//! - The migration subsystem ([`migration`])
//!
//! Connections are scoped to one logical operation; only the migration driver
//! keeps a target connection open across a whole table.

use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::Duration;

pub mod error;
pub mod migration;
pub mod reader;
pub mod schema;
pub mod value;

pub use error::{ErrorKind, MigrationError, Result};
pub use migration::{
    BackupManager, BackupMetadata, DriverState, ForeignKeyRule, ForeignKeyRuleSet,
    ForeignKeyValidator, MigrationConfig, MigrationDriver, MigrationPlan, MigrationReport,
    ProgressTracker, ReconciliationReport, ReconciliationReporter, RunLog, TableOutcome,
    TableStatus, TimestampFixer, TimestampReport,
};
pub use reader::{StoreReader, TableDescriptor, TableRows};
pub use schema::{ColumnInfo, FieldKind, SchemaRegistry, TableSchema};
pub use value::{Clock, DefaultRule, DefaultSpec, FieldMap};

/// Default time to wait on a locked database file
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings applied when opening a store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long to wait on a locked database
    pub busy_timeout: Duration,
    /// Skip fsync on the target during bulk loading
    pub fast_writes: bool,
    /// Let SQLite enforce declared foreign keys on the target
    pub enforce_foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            fast_writes: true,
            enforce_foreign_keys: false,
        }
    }
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn with_fast_writes(mut self, fast_writes: bool) -> Self {
        self.fast_writes = fast_writes;
        self
    }

    pub fn with_foreign_keys(mut self, enforce: bool) -> Self {
        self.enforce_foreign_keys = enforce;
        self
    }
}

/// Open an existing store for reading only
pub fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.exists() {
        return Err(MigrationError::Connection(format!(
            "Database not found at {}",
            path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        MigrationError::Connection(format!("Failed to open database at {}: {}", path.display(), e))
    })?;

    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Open or create a store for writing and apply `config`
pub fn open_read_write(path: &Path, config: &StoreConfig) -> Result<Connection> {
    let conn = Connection::open(path).map_err(|e| {
        MigrationError::Connection(format!("Failed to open database at {}: {}", path.display(), e))
    })?;

    conn.busy_timeout(config.busy_timeout)?;

    if config.fast_writes {
        conn.pragma_update(None, "synchronous", "OFF")?;
        log::debug!("Disabled synchronous writes for {}", path.display());
    }

    conn.pragma_update(None, "foreign_keys", config.enforce_foreign_keys)?;

    Ok(conn)
}

/// Quote an identifier for interpolation into SQL
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// List tables in lexical order
///
/// Tables whose name starts with one of `internal_prefixes` are skipped unless
/// they are named in `always_include`.
pub fn list_tables(
    conn: &Connection,
    internal_prefixes: &[String],
    always_include: &[String],
) -> Result<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(names
        .into_iter()
        .filter(|name| {
            always_include.iter().any(|t| t == name)
                || !internal_prefixes.iter().any(|p| name.starts_with(p.as_str()))
        })
        .collect())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let count = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
        [],
        |row| row.get(0),
    )?;
    Ok(count)
}
