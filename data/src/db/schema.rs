//! Target schema introspection and initialization
//!
//! The target store is described by a DDL script. After the script is applied,
//! every table is introspected once and kept in a [`SchemaRegistry`] keyed by
//! table name, so per-table lookups during a run are constant time.

use super::value::{DefaultRule, DefaultSpec};
use super::{MigrationError, Result, StoreConfig, list_tables, quote_ident};
use regex::Regex;
use rusqlite::Connection;
use rusqlite::types::Value;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

static DECLARED_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9_ ]*)").expect("valid regex"));

/// Storage class of a target field, derived from its declared SQL type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    Text,
    DateTime,
    Date,
    Time,
    Blob,
    Other,
}

impl FieldKind {
    pub fn from_declared(declared: &str) -> Self {
        let base = DECLARED_TYPE
            .captures(declared)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_ascii_lowercase())
            .unwrap_or_default();

        if base.is_empty() {
            return FieldKind::Other;
        }

        // `TIMESTAMP WITH TIME ZONE` and friends are named by their first word
        match base.split_whitespace().next().unwrap_or_default() {
            "date" => return FieldKind::Date,
            "time" => return FieldKind::Time,
            "datetime" | "timestamp" => return FieldKind::DateTime,
            _ => {}
        }

        if base.contains("bool") {
            FieldKind::Boolean
        } else if base.contains("int") {
            FieldKind::Integer
        } else if ["real", "floa", "doub", "decimal", "numeric"]
            .iter()
            .any(|needle| base.contains(needle))
        {
            FieldKind::Float
        } else if ["char", "clob", "text", "uuid", "json"]
            .iter()
            .any(|needle| base.contains(needle))
        {
            FieldKind::Text
        } else if base.contains("blob") {
            FieldKind::Blob
        } else {
            FieldKind::Other
        }
    }

    /// Fixed per-value byte estimate, `None` for variable-length kinds
    pub fn fixed_width(&self) -> Option<u64> {
        match self {
            FieldKind::Boolean | FieldKind::Integer => Some(4),
            FieldKind::Float | FieldKind::DateTime => Some(8),
            FieldKind::Date | FieldKind::Time => Some(4),
            FieldKind::Text | FieldKind::Blob | FieldKind::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub kind: FieldKind,
    pub not_null: bool,
    pub primary_key: bool,
    /// Default declared in the DDL, if any
    pub default: Option<DefaultSpec>,
}

impl ColumnInfo {
    /// Integer primary keys are assigned by the store when absent
    pub fn is_rowid_alias(&self) -> bool {
        self.primary_key && self.kind == FieldKind::Integer
    }
}

/// A target table and the entity name used for `"<entity>.<field>"` keys
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub entity: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn primary_key(&self) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

/// Read column metadata for one table through `PRAGMA table_info`
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            let name: String = row.get(1)?;
            let declared_type: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
            let not_null: bool = row.get(3)?;
            let default: Option<String> = row.get(4)?;
            let pk: i64 = row.get(5)?;
            Ok(ColumnInfo {
                kind: FieldKind::from_declared(&declared_type),
                name,
                declared_type,
                not_null,
                primary_key: pk > 0,
                default: default.as_deref().map(parse_declared_default),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if columns.is_empty() {
        return Err(MigrationError::SourceUnreadable {
            table: table.to_string(),
            reason: "table does not exist".to_string(),
        });
    }

    Ok(columns)
}

/// Interpret the `dflt_value` text reported by `PRAGMA table_info`
pub fn parse_declared_default(raw: &str) -> DefaultSpec {
    let trimmed = raw.trim();
    let unwrapped = trimmed
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .map(str::trim)
        .unwrap_or(trimmed);

    match unwrapped.to_ascii_uppercase().as_str() {
        "NULL" => return DefaultSpec::Literal(Value::Null),
        "TRUE" => return DefaultSpec::Literal(Value::Integer(1)),
        "FALSE" => return DefaultSpec::Literal(Value::Integer(0)),
        "CURRENT_TIMESTAMP" => return DefaultSpec::Rule(DefaultRule::Now),
        "CURRENT_DATE" => return DefaultSpec::Rule(DefaultRule::Today),
        "CURRENT_TIME" => return DefaultSpec::Rule(DefaultRule::CurrentTime),
        _ => {}
    }

    if let Some(inner) = unwrapped
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return DefaultSpec::Literal(Value::Text(inner.replace("''", "'")));
    }

    if let Ok(i) = unwrapped.parse::<i64>() {
        return DefaultSpec::Literal(Value::Integer(i));
    }
    if let Ok(f) = unwrapped.parse::<f64>() {
        return DefaultSpec::Literal(Value::Real(f));
    }

    DefaultSpec::Literal(Value::Text(unwrapped.to_string()))
}

/// Precomputed table-name → entity lookup for the target schema
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: FxHashMap<String, TableSchema>,
}

impl SchemaRegistry {
    /// Introspect every user table of `conn`
    ///
    /// `entity_names` overrides the entity name of a table; unlisted tables use
    /// their own name.
    pub fn load(
        conn: &Connection,
        internal_prefixes: &[String],
        entity_names: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut tables = FxHashMap::default();

        for name in list_tables(conn, internal_prefixes, &[])? {
            let columns = table_columns(conn, &name)?;
            let entity = entity_names
                .get(&name)
                .cloned()
                .unwrap_or_else(|| name.clone());
            tables.insert(
                name.clone(),
                TableSchema {
                    name,
                    entity,
                    columns,
                },
            );
        }

        log::debug!("Schema registry holds {} tables", tables.len());
        Ok(Self { tables })
    }

    pub fn from_tables(tables: impl IntoIterator<Item = TableSchema>) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.name.clone(), t)).collect(),
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    /// Table names in lexical order
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Wipe the target store and apply `schema_sql` to the empty database
///
/// Any failure here is fatal for the run.
pub fn initialize_target(path: &Path, schema_sql: &str, config: &StoreConfig) -> Result<Connection> {
    remove_store_files(path).map_err(|e| {
        MigrationError::SchemaInitialization(format!(
            "Failed to clear target store {}: {}",
            path.display(),
            e
        ))
    })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MigrationError::SchemaInitialization(format!(
                    "Failed to create target directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let mut conn = super::open_read_write(path, config)
        .map_err(|e| MigrationError::SchemaInitialization(e.to_string()))?;

    log::info!("Applying target schema to {}", path.display());

    let tx = conn.transaction().map_err(|e| {
        MigrationError::SchemaInitialization(format!("Failed to start schema transaction: {}", e))
    })?;

    tx.execute_batch(schema_sql)
        .map_err(|e| MigrationError::SchemaInitialization(format!("Failed to apply schema: {}", e)))?;

    tx.commit()
        .map_err(|e| MigrationError::SchemaInitialization(format!("Failed to commit schema: {}", e)))?;

    log::info!("Target schema applied");
    Ok(conn)
}

fn remove_store_files(path: &Path) -> std::io::Result<()> {
    for suffix in ["", "-wal", "-shm", "-journal"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = std::path::PathBuf::from(candidate);
        if candidate.exists() {
            std::fs::remove_file(&candidate)?;
        }
    }
    Ok(())
}
