//! Default value resolution for target fields absent from the source row

use super::config::DefaultEntry;
use crate::db::schema::{ColumnInfo, FieldKind};
use crate::db::value::{Clock, DATE_FORMAT, DATETIME_FORMAT, DefaultSpec};
use rusqlite::types::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Explicit `"<entity>.<field>"` overrides
#[derive(Debug, Clone, Default)]
pub struct DefaultValueTable {
    entries: FxHashMap<String, DefaultSpec>,
}

impl DefaultValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(entries: &BTreeMap<String, DefaultEntry>) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(key, entry)| (key.clone(), entry.to_spec()))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, spec: DefaultSpec) {
        self.entries.insert(key.into(), spec);
    }

    pub fn get(&self, key: &str) -> Option<&DefaultSpec> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Which tier produced a resolved default
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultSource {
    Table,
    Declared,
    TypeFallback,
}

/// Resolves values for missing fields: table entry, then the declared
/// default, then a fallback by field kind. Never fails.
#[derive(Debug, Clone, Copy)]
pub struct DefaultValueResolver<'a> {
    table: &'a DefaultValueTable,
    clock: Clock,
}

impl<'a> DefaultValueResolver<'a> {
    pub fn new(table: &'a DefaultValueTable, clock: Clock) -> Self {
        Self { table, clock }
    }

    pub fn resolve(&self, entity: &str, column: &ColumnInfo) -> Value {
        self.resolve_with_source(entity, column).0
    }

    pub fn resolve_with_source(&self, entity: &str, column: &ColumnInfo) -> (Value, DefaultSource) {
        let key = format!("{}.{}", entity, column.name);

        if let Some(spec) = self.table.get(&key) {
            return (spec.produce(&self.clock), DefaultSource::Table);
        }

        if let Some(spec) = &column.default {
            return (spec.produce(&self.clock), DefaultSource::Declared);
        }

        (type_fallback(column.kind, &self.clock), DefaultSource::TypeFallback)
    }
}

/// Value used when neither the table nor the schema supplies a default
pub fn type_fallback(kind: FieldKind, clock: &Clock) -> Value {
    match kind {
        FieldKind::Boolean => Value::Integer(0),
        FieldKind::Text => Value::Text(String::new()),
        FieldKind::Integer => Value::Integer(0),
        FieldKind::Float => Value::Real(0.0),
        FieldKind::DateTime => Value::Text(clock.now().format(DATETIME_FORMAT).to_string()),
        FieldKind::Date => Value::Text(clock.now().format(DATE_FORMAT).to_string()),
        FieldKind::Time | FieldKind::Blob | FieldKind::Other => Value::Null,
    }
}
