//! Foreign-key validation of candidate rows against the target store
//!
//! Lookups run against the target, so parent tables must already be migrated
//! when their children are validated.

use crate::db::value::{FieldMap, render_value};
use crate::db::{MigrationError, Result, quote_ident};
use rusqlite::Connection;
use rusqlite::types::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_referenced_field() -> String {
    "id".to_string()
}

/// `(local field, referenced table, referenced field, nullable?)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRule {
    pub field: String,
    pub references: String,
    #[serde(default = "default_referenced_field")]
    pub referenced_field: String,
    #[serde(default)]
    pub nullable: bool,
}

impl ForeignKeyRule {
    pub fn new(field: impl Into<String>, references: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            references: references.into(),
            referenced_field: default_referenced_field(),
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_referenced_field(mut self, field: impl Into<String>) -> Self {
        self.referenced_field = field.into();
        self
    }
}

/// Target table name to its ordered rules
#[derive(Debug, Clone, Default)]
pub struct ForeignKeyRuleSet {
    rules: FxHashMap<String, Vec<ForeignKeyRule>>,
}

impl ForeignKeyRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(rules: &BTreeMap<String, Vec<ForeignKeyRule>>) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(table, rules)| (table.clone(), rules.clone()))
                .collect(),
        }
    }

    pub fn insert(&mut self, table: impl Into<String>, rules: Vec<ForeignKeyRule>) {
        self.rules.insert(table.into(), rules);
    }

    pub fn rules_for(&self, table: &str) -> &[ForeignKeyRule] {
        self.rules.get(table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn carries_rules(&self, table: &str) -> bool {
        !self.rules_for(table).is_empty()
    }

    /// Tables referenced by `table`, excluding itself
    pub fn parents_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> {
        self.rules_for(table)
            .iter()
            .map(|r| r.references.as_str())
            .filter(move |parent| *parent != table)
    }
}

/// Answers whether a referenced row exists
pub trait ReferenceLookup {
    fn exists(&self, table: &str, field: &str, value: &Value) -> Result<bool>;
}

/// Looks references up in the target store
pub struct TargetLookup<'c> {
    conn: &'c Connection,
}

impl<'c> TargetLookup<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

impl ReferenceLookup for TargetLookup<'_> {
    fn exists(&self, table: &str, field: &str, value: &Value) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            quote_ident(table),
            quote_ident(field)
        ))?;
        Ok(stmt.exists([value])?)
    }
}

/// Validates rows against a [`ForeignKeyRuleSet`]
#[derive(Debug, Clone, Copy)]
pub struct ForeignKeyValidator<'r> {
    rules: &'r ForeignKeyRuleSet,
}

impl<'r> ForeignKeyValidator<'r> {
    pub fn new(rules: &'r ForeignKeyRuleSet) -> Self {
        Self { rules }
    }

    /// Check every rule of `table` for `row`, stopping at the first violation
    ///
    /// A NULL (or absent) value passes a nullable rule and fails any other.
    pub fn validate(
        &self,
        table: &str,
        row: &FieldMap,
        lookup: &dyn ReferenceLookup,
    ) -> Result<()> {
        for rule in self.rules.rules_for(table) {
            let value = row.get(&rule.field).unwrap_or(&Value::Null);

            let found = match value {
                Value::Null if rule.nullable => continue,
                Value::Null => false,
                value => lookup
                    .exists(&rule.references, &rule.referenced_field, value)
                    .map_err(|e| MigrationError::ReferenceLookup {
                        table: table.to_string(),
                        field: rule.field.clone(),
                        value: render_value(value),
                        referenced_table: rule.references.clone(),
                        reason: e.to_string(),
                    })?,
            };

            if !found {
                return Err(MigrationError::ReferentialIntegrityViolation {
                    table: table.to_string(),
                    field: rule.field.clone(),
                    value: render_value(value),
                    referenced_table: rule.references.clone(),
                    referenced_field: rule.referenced_field.clone(),
                });
            }
        }
        Ok(())
    }
}
