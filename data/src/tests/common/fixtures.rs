//! Store and schema fixtures

use crate::db::schema::{ColumnInfo, FieldKind};
use crate::db::value::DefaultSpec;
use crate::db::{StoreConfig, open_read_write};
use rusqlite::types::Value;
use rusqlite::params_from_iter;
use std::path::Path;

pub fn column(name: &str, kind: FieldKind, default: Option<DefaultSpec>) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        declared_type: format!("{:?}", kind).to_uppercase(),
        kind,
        not_null: false,
        primary_key: false,
        default,
    }
}

/// Creates `table (id INTEGER PRIMARY KEY, body TEXT, amount REAL)` holding
/// one row per entry of `bodies`
pub fn create_notes_store(
    path: &Path,
    table: &str,
    bodies: &[Option<String>],
) -> Result<(), Box<dyn std::error::Error>> {
    let conn = open_read_write(path, &StoreConfig::default())?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, body TEXT, amount REAL);"
    ))?;
    let mut stmt = conn.prepare(&format!("INSERT INTO {table} (body, amount) VALUES (?1, ?2)"))?;
    for (i, body) in bodies.iter().enumerate() {
        let body = body.clone().map(Value::Text).unwrap_or(Value::Null);
        stmt.execute(params_from_iter([body, Value::Real(i as f64)]))?;
    }
    Ok(())
}
