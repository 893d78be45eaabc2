//! Reconciliation Reporter
//!
//! Compares row counts and estimated sizes table by table between the source
//! and the target store. It reads both stores directly and never fails: an
//! unreadable store or table simply reads as empty.

use super::config::MigrationConfig;
use crate::db::MigrationError;
use crate::db::reader::StoreReader;
use crate::db::Result;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Match,
    Mismatch,
    /// Present in the source only
    OldOnly,
    /// Present in the target only
    NewOnly,
    /// Expected to diverge; never reported as a mismatch
    Exempt,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableStatus::Match => "ok",
            TableStatus::Mismatch => "MISMATCH",
            TableStatus::OldOnly => "old-only",
            TableStatus::NewOnly => "new-only",
            TableStatus::Exempt => "exempt",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableComparison {
    pub table: String,
    pub old_rows: i64,
    pub new_rows: i64,
    pub old_size: u64,
    pub new_size: u64,
    pub status: TableStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub old_rows: i64,
    pub new_rows: i64,
    pub old_size: u64,
    pub new_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub tables: Vec<TableComparison>,
    pub totals: Totals,
}

impl ReconciliationReport {
    fn push(&mut self, comparison: TableComparison) {
        self.totals.old_rows += comparison.old_rows;
        self.totals.new_rows += comparison.new_rows;
        self.totals.old_size += comparison.old_size;
        self.totals.new_size += comparison.new_size;
        self.tables.push(comparison);
    }

    pub fn table(&self, name: &str) -> Option<&TableComparison> {
        self.tables.iter().find(|t| t.table == name)
    }

    fn with_status(&self, status: TableStatus) -> impl Iterator<Item = &TableComparison> {
        self.tables.iter().filter(move |t| t.status == status)
    }

    /// Tables present in both stores whose row counts differ
    pub fn mismatches(&self) -> impl Iterator<Item = &TableComparison> {
        self.with_status(TableStatus::Mismatch)
    }

    pub fn old_only(&self) -> impl Iterator<Item = &TableComparison> {
        self.with_status(TableStatus::OldOnly)
    }

    pub fn new_only(&self) -> impl Iterator<Item = &TableComparison> {
        self.with_status(TableStatus::NewOnly)
    }

    pub fn is_clean(&self) -> bool {
        self.mismatches().next().is_none()
    }

    pub fn to_errors(&self) -> Vec<MigrationError> {
        self.mismatches()
            .map(|t| MigrationError::ReconciliationMismatch {
                table: t.table.clone(),
                old_rows: t.old_rows,
                new_rows: t.new_rows,
            })
            .collect()
    }

    /// Aligned text table, one line per table plus totals
    pub fn render_table(&self) -> String {
        let width = self
            .tables
            .iter()
            .map(|t| t.table.len())
            .chain(std::iter::once("TOTAL".len()))
            .max()
            .unwrap_or(5);

        let mut out = format!(
            "{:<width$}  {:>10}  {:>10}  {:>12}  {:>12}  {}\n",
            "table", "old rows", "new rows", "old bytes", "new bytes", "status"
        );
        for t in &self.tables {
            out.push_str(&format!(
                "{:<width$}  {:>10}  {:>10}  {:>12}  {:>12}  {}\n",
                t.table, t.old_rows, t.new_rows, t.old_size, t.new_size, t.status
            ));
        }
        out.push_str(&format!(
            "{:<width$}  {:>10}  {:>10}  {:>12}  {:>12}\n",
            "TOTAL",
            self.totals.old_rows,
            self.totals.new_rows,
            self.totals.old_size,
            self.totals.new_size
        ));
        out
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for t in &self.tables {
            writer.serialize(t)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_table())
    }
}

pub struct ReconciliationReporter {
    source: StoreReader,
    target: StoreReader,
    internal_prefixes: Vec<String>,
    include: Vec<String>,
    exempt: BTreeSet<String>,
    /// Source table name to the target table it feeds
    aliases: BTreeMap<String, String>,
}

impl ReconciliationReporter {
    pub fn new(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        Self {
            source: StoreReader::new(source.as_ref(), "source"),
            target: StoreReader::new(target.as_ref(), "target"),
            internal_prefixes: vec!["sqlite_".to_string()],
            include: Vec::new(),
            exempt: BTreeSet::new(),
            aliases: BTreeMap::new(),
        }
    }

    /// Bookkeeping rules and source table aliases taken from the migration
    /// configuration
    pub fn from_config(config: &MigrationConfig, source: impl AsRef<Path>, target: impl AsRef<Path>) -> Self {
        let reporter = Self::new(source, target)
            .with_internal_prefixes(config.internal_prefixes.clone())
            .include(config.sequence_table.clone())
            .exempt(config.history_table.clone());
        config
            .sources
            .iter()
            .fold(reporter, |reporter, (target, source)| reporter.alias(source.clone(), target.clone()))
    }

    /// Compare source table `source` against target table `target`
    pub fn alias(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(source.into(), target.into());
        self
    }

    pub fn with_internal_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.internal_prefixes = prefixes;
        self
    }

    /// Compare `table` even though it carries an internal prefix
    pub fn include(mut self, table: impl Into<String>) -> Self {
        self.include.push(table.into());
        self
    }

    pub fn exempt(mut self, table: impl Into<String>) -> Self {
        self.exempt.insert(table.into());
        self
    }

    fn tables_of(&self, reader: &StoreReader) -> Vec<String> {
        reader
            .list_tables(&self.internal_prefixes, &self.include)
            .unwrap_or_else(|e| {
                log::warn!("Could not list {} tables: {}", reader.label(), e);
                Vec::new()
            })
    }

    pub fn run(&self) -> ReconciliationReport {
        let old_tables = self.tables_of(&self.source);
        let new_tables: BTreeSet<String> = self.tables_of(&self.target).into_iter().collect();

        let mut report = ReconciliationReport::default();
        let mut compared = BTreeSet::new();
        for source_table in &old_tables {
            let old = self.source.describe(source_table);
            let table = self.aliases.get(source_table).unwrap_or(source_table);
            let comparison = if new_tables.contains(table) {
                compared.insert(table.clone());
                let new = self.target.describe(table);
                let status = if self.exempt.contains(table) {
                    TableStatus::Exempt
                } else if old.row_count == new.row_count {
                    TableStatus::Match
                } else {
                    TableStatus::Mismatch
                };
                TableComparison {
                    table: table.clone(),
                    old_rows: old.row_count,
                    new_rows: new.row_count,
                    old_size: old.estimated_size,
                    new_size: new.estimated_size,
                    status,
                }
            } else {
                TableComparison {
                    table: source_table.clone(),
                    old_rows: old.row_count,
                    new_rows: 0,
                    old_size: old.estimated_size,
                    new_size: 0,
                    status: TableStatus::OldOnly,
                }
            };
            report.push(comparison);
        }

        for table in new_tables.iter().filter(|t| !compared.contains(*t)) {
            let new = self.target.describe(table);
            report.push(TableComparison {
                table: table.clone(),
                old_rows: 0,
                new_rows: new.row_count,
                old_size: 0,
                new_size: new.estimated_size,
                status: TableStatus::NewOnly,
            });
        }

        log::info!("Reconciliation:\n{}", report.render_table());
        let mismatched: Vec<String> = report
            .mismatches()
            .map(|t| format!("{} ({} -> {})", t.table, t.old_rows, t.new_rows))
            .collect();
        if mismatched.is_empty() {
            log::info!("Row counts match for every compared table");
        } else {
            log::warn!("Row count mismatches: {}", mismatched.join(", "));
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{StoreConfig, open_read_write};
    use tempfile::tempdir;

    fn store(path: &Path, sql: &str) {
        let conn = open_read_write(path, &StoreConfig::default()).unwrap();
        conn.execute_batch(sql).unwrap();
    }

    #[test]
    fn test_reconcile_statuses() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        let new = dir.path().join("new.sqlite3");
        store(
            &old,
            "CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO members VALUES (1, 'ann'), (2, 'bo');
             CREATE TABLE legacy_notes (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO legacy_notes VALUES (1, 'hello');
             CREATE TABLE django_migrations (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO django_migrations VALUES (1, '0001');
             CREATE TABLE devices (id INTEGER PRIMARY KEY);
             INSERT INTO devices VALUES (1), (2), (3);",
        );
        store(
            &new,
            "CREATE TABLE members (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO members VALUES (1, 'ann'), (2, 'bo');
             CREATE TABLE django_migrations (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO django_migrations VALUES (1, '0001'), (2, '0002');
             CREATE TABLE devices (id INTEGER PRIMARY KEY);
             INSERT INTO devices VALUES (1), (2);
             CREATE TABLE payroll (id INTEGER PRIMARY KEY);",
        );

        let report = ReconciliationReporter::from_config(&MigrationConfig::default(), &old, &new).run();

        assert_eq!(report.table("members").unwrap().status, TableStatus::Match);
        assert_eq!(report.table("django_migrations").unwrap().status, TableStatus::Exempt);
        assert_eq!(report.table("payroll").unwrap().status, TableStatus::NewOnly);

        let notes = report.old_only().next().unwrap();
        assert_eq!(notes.table, "legacy_notes");
        assert_eq!((notes.old_rows, notes.new_rows, notes.new_size), (1, 0, 0));
        assert!(notes.old_size > 0);

        let mismatches: Vec<_> = report.mismatches().map(|t| t.table.as_str()).collect();
        assert_eq!(mismatches, vec!["devices"]);
        assert!(!report.is_clean());
        assert!(matches!(
            report.to_errors().as_slice(),
            [MigrationError::ReconciliationMismatch { old_rows: 3, new_rows: 2, .. }]
        ));

        assert_eq!(report.totals.old_rows, 7);
        assert_eq!(report.totals.new_rows, 6);
    }

    #[test]
    fn test_missing_target_reads_as_empty() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        store(&old, "CREATE TABLE members (id INTEGER PRIMARY KEY); INSERT INTO members VALUES (1);");

        let report = ReconciliationReporter::new(&old, dir.path().join("absent.sqlite3")).run();
        assert_eq!(report.old_only().count(), 1);
        assert_eq!(report.totals.new_size, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_render_and_export() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        store(&old, "CREATE TABLE members (id INTEGER PRIMARY KEY); INSERT INTO members VALUES (1);");
        let report = ReconciliationReporter::new(&old, &old).run();

        let text = report.render_table();
        assert!(text.lines().next().unwrap().starts_with("table"));
        assert!(text.contains("members"));
        assert!(text.lines().last().unwrap().starts_with("TOTAL"));

        let csv_path = dir.path().join("report.csv");
        report.write_csv(&csv_path).unwrap();
        let csv_text = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv_text.starts_with("table,old_rows,new_rows,old_size,new_size,status"));
        assert!(csv_text.contains("members,1,1,4,4,match"));

        let json_path = dir.path().join("report.json");
        report.write_json(&json_path).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["totals"]["old_rows"], 1);
    }
}
