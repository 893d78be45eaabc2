//! Versioned migration configuration
//!
//! Everything that describes one legacy-to-current migration lives in a JSON
//! document: the plan, the default value table, the foreign-key rule set and
//! the column mapping. A new schema version needs a new document, not a rebuild.

use super::foreign_keys::ForeignKeyRule;
use crate::db::value::{DefaultRule, DefaultSpec, json_to_value};
use crate::db::{MigrationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration format understood by this build
pub const CONFIG_VERSION: u32 = 1;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_PROGRESS_INTERVAL: usize = 1000;

/// A default value table entry as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultEntry {
    Rule { rule: DefaultRule },
    Literal(serde_json::Value),
}

impl DefaultEntry {
    pub fn to_spec(&self) -> DefaultSpec {
        match self {
            DefaultEntry::Rule { rule } => DefaultSpec::Rule(*rule),
            DefaultEntry::Literal(json) => DefaultSpec::Literal(json_to_value(json)),
        }
    }
}

/// Replaces a blank identifier field with a synthesized value
///
/// `template` may reference `{pk}` (the row's source key) and `{date}` (the run
/// date as `YYYYMMDD`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderRule {
    pub table: String,
    pub field: String,
    pub template: String,
}

impl PlaceholderRule {
    pub fn render(&self, pk: &str, date: &str) -> String {
        self.template.replace("{pk}", pk).replace("{date}", date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Explicit table order; empty means "derive from the foreign-key rules"
    pub tables: Vec<String>,
    /// Tables expected to diverge, migrated last and never FK-validated
    pub divergent: Vec<String>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            divergent: vec!["django_migrations".to_string(), "sqlite_sequence".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub version: u32,
    /// Target schema DDL, relative to the configuration file
    pub schema: Option<PathBuf>,
    /// Batch size for bulk inserts
    pub batch_size: usize,
    /// Log progress every this many rows
    pub progress_interval: usize,
    /// Copy an existing target aside before wiping it
    pub create_backup: bool,
    pub plan: PlanConfig,
    /// `"<entity>.<field>"` to literal or rule
    pub defaults: BTreeMap<String, DefaultEntry>,
    /// Target table to ordered foreign-key rules
    pub foreign_keys: BTreeMap<String, Vec<ForeignKeyRule>>,
    /// `"<table>.<source column>"` to target column
    pub renames: BTreeMap<String, String>,
    /// Target table to the source table feeding it, when the names differ
    pub sources: BTreeMap<String, String>,
    /// Target table to entity name used in default keys
    pub entities: BTreeMap<String, String>,
    pub placeholders: Vec<PlaceholderRule>,
    /// Auto-increment bookkeeping table, repopulated directly
    pub sequence_table: String,
    /// Migration-history bookkeeping table, exempt from row-count parity
    pub history_table: String,
    /// Name prefixes of store-internal tables
    pub internal_prefixes: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            schema: None,
            batch_size: DEFAULT_BATCH_SIZE,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            create_backup: false,
            plan: PlanConfig::default(),
            defaults: BTreeMap::new(),
            foreign_keys: BTreeMap::new(),
            renames: BTreeMap::new(),
            sources: BTreeMap::new(),
            entities: BTreeMap::new(),
            placeholders: vec![PlaceholderRule {
                table: "accounts_user".to_string(),
                field: "rfid_code".to_string(),
                template: "TEMP-{pk}-{date}".to_string(),
            }],
            sequence_table: "sqlite_sequence".to_string(),
            history_table: "django_migrations".to_string(),
            internal_prefixes: vec!["sqlite_".to_string()],
        }
    }
}

impl MigrationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a configuration file
    ///
    /// A relative `schema` path is resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            MigrationError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_json(&text)?;

        if let (Some(schema), Some(dir)) = (&config.schema, path.parent()) {
            if schema.is_relative() {
                config.schema = Some(dir.join(schema));
            }
        }

        log::info!(
            "Loaded migration config {} (version {}, {} defaults, {} FK tables)",
            path.display(),
            config.version,
            config.defaults.len(),
            config.foreign_keys.len()
        );
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)
            .map_err(|e| MigrationError::Config(format!("Invalid migration config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_VERSION {
            return Err(MigrationError::Config(format!(
                "Unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.batch_size == 0 {
            return Err(MigrationError::Config("batch_size must be positive".to_string()));
        }
        if let Some(key) = self.defaults.keys().find(|k| !k.contains('.')) {
            return Err(MigrationError::Config(format!(
                "Default key '{}' is not of the form <entity>.<field>",
                key
            )));
        }
        if let Some(key) = self.renames.keys().find(|k| !k.contains('.')) {
            return Err(MigrationError::Config(format!(
                "Rename key '{}' is not of the form <table>.<column>",
                key
            )));
        }
        Ok(())
    }

    /// Read the target schema DDL
    ///
    /// A missing or unreadable schema is a schema initialization failure.
    pub fn schema_sql(&self) -> Result<String> {
        let path = self.schema.as_ref().ok_or_else(|| {
            MigrationError::SchemaInitialization("No target schema configured".to_string())
        })?;
        fs::read_to_string(path).map_err(|e| {
            MigrationError::SchemaInitialization(format!(
                "Failed to read schema {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn with_schema(mut self, schema: impl Into<PathBuf>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn with_plan(mut self, tables: Vec<String>) -> Self {
        self.plan.tables = tables;
        self
    }

    pub fn with_foreign_keys(mut self, table: impl Into<String>, rules: Vec<ForeignKeyRule>) -> Self {
        self.foreign_keys.insert(table.into(), rules);
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, entry: DefaultEntry) -> Self {
        self.defaults.insert(key.into(), entry);
        self
    }

    /// Source table feeding `table`
    pub fn source_table<'a>(&'a self, table: &'a str) -> &'a str {
        self.sources.get(table).map(String::as_str).unwrap_or(table)
    }

    /// Target column for `column` of the source feeding `table`
    pub fn target_column<'a>(&'a self, table: &str, column: &'a str) -> &'a str {
        self.renames
            .get(&format!("{table}.{column}"))
            .map(String::as_str)
            .unwrap_or(column)
    }

    pub fn placeholders_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a PlaceholderRule> {
        self.placeholders.iter().filter(move |p| p.table == table)
    }
}
