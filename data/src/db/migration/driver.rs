//! Migration Driver
//!
//! Runs one migration from a legacy store into a freshly initialized target:
//!
//! ```text
//! Initializing -> PerTable { Describe, Transform, Validate, Insert } (per plan entry)
//!              -> Reconciling -> Done
//! ```
//!
//! Only failures while initializing are returned as errors. Everything that
//! goes wrong with a table, a row or a batch is logged, recorded in the
//! [`MigrationReport`] and skipped.

use super::backup::BackupManager;
use super::batch::{BatchSink, BatchWriter, FlushResult, PendingRow, SqliteSink};
use super::config::MigrationConfig;
use super::defaults::{DefaultValueResolver, DefaultValueTable};
use super::foreign_keys::{ForeignKeyRuleSet, ForeignKeyValidator, ReferenceLookup, TargetLookup};
use super::helpers::{ColumnMapping, apply_placeholders};
use super::plan::MigrationPlan;
use super::progress::ProgressTracker;
use super::reconcile::ReconciliationReporter;
use super::runlog::RunLog;
use super::{MigrationReport, TableOutcome};
use crate::db::reader::StoreReader;
use crate::db::schema::{ColumnInfo, SchemaRegistry, initialize_target};
use crate::db::value::{Clock, render_value};
use crate::db::{MigrationError, Result, StoreConfig, quote_ident, table_exists};
use rusqlite::Connection;
use rusqlite::types::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStage {
    Describe,
    Transform,
    Validate,
    Insert,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Initializing,
    PerTable { table: String, stage: TableStage },
    Reconciling,
    Done,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Initializing => write!(f, "initializing"),
            DriverState::PerTable { table, stage } => write!(f, "{} ({:?})", table, stage),
            DriverState::Reconciling => write!(f, "reconciling"),
            DriverState::Done => write!(f, "done"),
        }
    }
}

/// Lookup that also sees rows of the current table still waiting in the batch
struct PendingAwareLookup<'a, S: BatchSink> {
    target: &'a TargetLookup<'a>,
    writer: &'a BatchWriter<S>,
    table: &'a str,
}

impl<S: BatchSink> ReferenceLookup for PendingAwareLookup<'_, S> {
    fn exists(&self, table: &str, field: &str, value: &Value) -> Result<bool> {
        if table == self.table && self.writer.pending_contains(field, value) {
            return Ok(true);
        }
        self.target.exists(table, field, value)
    }
}

/// Per-run inputs shared by every table
struct RunContext<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    rules: &'a ForeignKeyRuleSet,
    defaults: &'a DefaultValueTable,
    plan: &'a MigrationPlan,
}

pub struct MigrationDriver {
    config: MigrationConfig,
    source: StoreReader,
    target: PathBuf,
    store: StoreConfig,
    schema_sql: Option<String>,
    clock: Clock,
    log: RunLog,
    state: DriverState,
}

impl MigrationDriver {
    pub fn new(config: MigrationConfig, source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            config,
            source: StoreReader::new(source, "source"),
            target: target.into(),
            store: StoreConfig::default(),
            schema_sql: None,
            clock: Clock::System,
            log: RunLog::new(Uuid::new_v4()),
            state: DriverState::Initializing,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store_config(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    /// Use this DDL instead of the schema file named in the configuration
    pub fn with_schema_sql(mut self, sql: impl Into<String>) -> Self {
        self.schema_sql = Some(sql.into());
        self
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn state(&self) -> &DriverState {
        &self.state
    }

    pub fn run_log(&self) -> &RunLog {
        &self.log
    }

    pub fn run_id(&self) -> Uuid {
        self.log.run_id()
    }

    fn transition(&mut self, state: DriverState) {
        log::debug!("Driver state: {} -> {}", self.state, state);
        self.state = state;
    }

    fn set_stage(&mut self, next: TableStage) {
        if let DriverState::PerTable { stage, .. } = &mut self.state {
            *stage = next;
        }
    }

    /// Execute the whole run
    ///
    /// Errors are returned only when the target store cannot be prepared.
    pub fn run(&mut self) -> Result<MigrationReport> {
        let started_at = self.clock.now();
        let mut report = MigrationReport::new(self.run_id(), started_at);

        self.transition(DriverState::Initializing);
        let conn = self.initialize()?;

        let registry =
            SchemaRegistry::load(&conn, &self.config.internal_prefixes, &self.config.entities)
                .map_err(|e| MigrationError::SchemaInitialization(e.to_string()))?;
        let rules = ForeignKeyRuleSet::from_config(&self.config.foreign_keys);
        let defaults = DefaultValueTable::from_config(&self.config.defaults);
        let plan = MigrationPlan::resolve(&self.config, &rules, &registry.table_names());
        for warning in plan.validate(&rules) {
            self.log.warn(format!("Migration plan: {}", warning));
        }
        self.log.info(format!(
            "Migration plan ({} tables): {}",
            plan.len(),
            plan.tables().join(", ")
        ));

        let ctx = RunContext {
            conn: &conn,
            registry: &registry,
            rules: &rules,
            defaults: &defaults,
            plan: &plan,
        };
        for table in plan.iter() {
            let outcome = if table == self.config.sequence_table {
                self.migrate_sequence_table(&ctx, table, &mut report)
            } else {
                self.migrate_table(&ctx, table, &mut report)
            };
            report.push_table(outcome);
        }
        drop(conn);

        self.transition(DriverState::Reconciling);
        let reconciliation =
            ReconciliationReporter::from_config(&self.config, self.source.path(), &self.target).run();
        for mismatch in reconciliation.to_errors() {
            self.log.warn(mismatch.to_string());
            if let MigrationError::ReconciliationMismatch { table, .. } = &mismatch {
                report.record_error(table, None, &mismatch);
            }
        }
        report.reconciliation = Some(reconciliation);

        self.transition(DriverState::Done);
        self.log.info(format!(
            "Run {} finished: {} rows inserted, {} error(s) recorded",
            self.run_id(),
            report.total_inserted(),
            report.errors.len()
        ));
        Ok(report)
    }

    fn initialize(&mut self) -> Result<Connection> {
        if !self.source.path().exists() {
            return Err(MigrationError::Connection(format!(
                "Source store not found: {}",
                self.source.path().display()
            )));
        }
        if same_file(self.source.path(), &self.target) {
            return Err(MigrationError::Config(
                "Source and target must be different stores".to_string(),
            ));
        }

        let schema_sql = match &self.schema_sql {
            Some(sql) => sql.clone(),
            None => self.config.schema_sql()?,
        };

        if self.config.create_backup {
            let manager = BackupManager::beside(&self.target);
            if let Some(backup) = manager.backup_target(&self.target, self.run_id(), self.clock.now())? {
                self.log.info(format!(
                    "Backed up existing target to {}",
                    backup.backup_path.display()
                ));
            }
        }

        self.log.info(format!(
            "Run {}: migrating {} into {}",
            self.run_id(),
            self.source.path().display(),
            self.target.display()
        ));
        initialize_target(&self.target, &schema_sql, &self.store)
    }

    fn migrate_table(
        &mut self,
        ctx: &RunContext<'_>,
        table: &str,
        report: &mut MigrationReport,
    ) -> TableOutcome {
        self.transition(DriverState::PerTable {
            table: table.to_string(),
            stage: TableStage::Describe,
        });

        let Some(schema) = ctx.registry.get(table) else {
            self.log
                .warn(format!("No model for table '{}' in the target schema, skipping", table));
            return TableOutcome::skipped(table, "no model in target schema");
        };

        let source_table = self.config.source_table(table).to_string();
        let rows = match self.source.try_fetch_all(&source_table) {
            Ok(rows) => rows,
            Err(e) => {
                self.log.warn(e.to_string());
                report.record_error(table, None, &e);
                let mut outcome = TableOutcome::skipped(table, "source table unreadable");
                outcome.source_table = source_table;
                return outcome;
            }
        };

        let mut outcome = TableOutcome::new(table, &source_table);
        outcome.source_rows = rows.len();
        if rows.is_empty() {
            self.log.info(format!("Table '{}' has no source rows, skipping", table));
            outcome.skipped = Some("no source rows".to_string());
            return outcome;
        }

        self.set_stage(TableStage::Transform);
        let mapping = ColumnMapping::build(&self.config, schema, &rows.columns);
        if !mapping.dropped.is_empty() {
            self.log.debug(format!(
                "{}: source columns without a target field: {}",
                table,
                mapping.dropped.join(", ")
            ));
        }
        let missing: Vec<&ColumnInfo> = mapping
            .missing
            .iter()
            .filter_map(|field| schema.column(field))
            .collect();
        outcome.dropped_columns = mapping.dropped.clone();
        outcome.defaulted_fields = mapping.missing.clone();

        let validate = !ctx.plan.is_divergent(table) && ctx.rules.carries_rules(table);
        let validator = ForeignKeyValidator::new(ctx.rules);
        let resolver = DefaultValueResolver::new(ctx.defaults, self.clock);
        let target_lookup = TargetLookup::new(ctx.conn);
        let mut writer = BatchWriter::new(SqliteSink::new(ctx.conn, schema), self.config.batch_size);
        let mut progress = ProgressTracker::new(table, rows.len(), self.config.progress_interval);

        self.log.info(format!(
            "Migrating '{}' from '{}': {} rows, {} defaulted field(s)",
            table,
            source_table,
            rows.len(),
            missing.len()
        ));

        for index in 0..rows.len() {
            let key = rows.row_key(index);
            let mut fields = mapping.map_row(&rows, index);

            if validate {
                self.set_stage(TableStage::Validate);
                let lookup = PendingAwareLookup {
                    target: &target_lookup,
                    writer: &writer,
                    table,
                };
                if let Err(e) = validator.validate(table, &fields, &lookup) {
                    let row = render_value(&key);
                    self.log.error(format!("{} row {}: {}", table, row, e));
                    report.record_error(table, Some(row), &e);
                    outcome.rejected += 1;
                    progress.tick();
                    continue;
                }
            }

            self.set_stage(TableStage::Transform);
            for column in &missing {
                fields.insert(column.name.clone(), resolver.resolve(&schema.entity, column));
            }
            let synthesized = apply_placeholders(&self.config, table, &key, &mut fields, &self.clock);
            for field in synthesized {
                self.log.debug(format!(
                    "{} row {}: synthesized {}",
                    table,
                    render_value(&key),
                    field
                ));
            }

            self.set_stage(TableStage::Insert);
            if let Some(flush) = writer.push(PendingRow { key, fields }) {
                self.record_flush(flush, &mut outcome, report);
            }
            progress.tick();
        }

        self.set_stage(TableStage::Insert);
        if let Some(flush) = writer.flush() {
            self.record_flush(flush, &mut outcome, report);
        }
        progress.finish();

        let errors: Vec<String> = report.errors_for(table).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            self.log.info(format!(
                "Migrated '{}': {} inserted, {} duplicate(s) skipped",
                table, outcome.inserted, outcome.duplicates
            ));
        } else {
            self.log.warn(format!(
                "Migrated '{}' with {} error(s): {} inserted, {} rejected, {} dropped\n  {}",
                table,
                errors.len(),
                outcome.inserted,
                outcome.rejected,
                outcome.dropped,
                errors.join("\n  ")
            ));
        }
        outcome
    }

    fn record_flush(&mut self, flush: FlushResult, outcome: &mut TableOutcome, report: &mut MigrationReport) {
        outcome.batches_attempted += 1;
        match flush.result {
            Ok(batch) => {
                outcome.inserted += batch.inserted;
                outcome.duplicates += batch.duplicates;
                if batch.duplicates > 0 {
                    self.log.debug(format!(
                        "{} batch {}: {} duplicate key(s) ignored",
                        outcome.table, flush.batch, batch.duplicates
                    ));
                }
            }
            Err(e) => {
                outcome.batches_failed += 1;
                outcome.dropped += flush.rows;
                self.log.error(format!("Dropped batch: {}", e));
                report.record_error(&outcome.table, None, &e);
            }
        }
    }

    /// Clear the target's sequence table and copy the source entries verbatim
    fn migrate_sequence_table(
        &mut self,
        ctx: &RunContext<'_>,
        table: &str,
        report: &mut MigrationReport,
    ) -> TableOutcome {
        self.transition(DriverState::PerTable {
            table: table.to_string(),
            stage: TableStage::Describe,
        });

        match table_exists(ctx.conn, table) {
            Ok(true) => {}
            Ok(false) => {
                self.log
                    .info(format!("Target has no '{}' table, skipping", table));
                return TableOutcome::skipped(table, "absent from target");
            }
            Err(e) => {
                self.log.warn(e.to_string());
                return TableOutcome::skipped(table, "absent from target");
            }
        }

        let rows = match self.source.try_fetch_all(table) {
            Ok(rows) => rows,
            Err(e) => {
                self.log.warn(e.to_string());
                report.record_error(table, None, &e);
                return TableOutcome::skipped(table, "source table unreadable");
            }
        };
        let name_idx = rows.columns.iter().position(|c| c == "name");
        let seq_idx = rows.columns.iter().position(|c| c == "seq");
        let (Some(name_idx), Some(seq_idx)) = (name_idx, seq_idx) else {
            self.log.warn(format!("'{}' in the source lacks name/seq columns", table));
            return TableOutcome::skipped(table, "unexpected sequence table layout");
        };

        self.set_stage(TableStage::Transform);
        let mut outcome = TableOutcome::new(table, table);
        outcome.source_rows = rows.len();
        outcome.batches_attempted = 1;

        let mut entries: Vec<(String, &Value)> = Vec::with_capacity(rows.len());
        for row in &rows.rows {
            let source_name = render_value(&row[name_idx]);
            match self.sequence_target(ctx.registry, &source_name) {
                Some(target_name) => entries.push((target_name, &row[seq_idx])),
                None => {
                    self.log.debug(format!(
                        "{}: no target table fed from '{}', entry not copied",
                        table, source_name
                    ));
                    outcome.rejected += 1;
                }
            }
        }

        self.set_stage(TableStage::Insert);
        let result = (|| -> rusqlite::Result<usize> {
            let tx = ctx.conn.unchecked_transaction()?;
            tx.execute(&format!("DELETE FROM {}", quote_ident(table)), [])?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&format!(
                    "INSERT INTO {} (name, seq) VALUES (?1, ?2)",
                    quote_ident(table)
                ))?;
                for (name, seq) in &entries {
                    inserted += stmt.execute(rusqlite::params![name, seq])?;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })();

        match result {
            Ok(inserted) => {
                outcome.inserted = inserted;
                self.log
                    .info(format!("Repopulated '{}' with {} entries", table, inserted));
            }
            Err(e) => {
                let err = MigrationError::InsertionFailure {
                    table: table.to_string(),
                    batch: 1,
                    rows: rows.len(),
                    reason: e.to_string(),
                    sample: String::new(),
                };
                self.log.error(err.to_string());
                report.record_error(table, None, &err);
                outcome.batches_failed = 1;
                outcome.dropped = entries.len();
            }
        }
        outcome
    }

    /// Target table whose sequence a source entry carries, if the target has one
    ///
    /// Entries are keyed by source table name; aliased tables are looked up
    /// through `sources`. A source name that is also a target table fed from
    /// elsewhere does not count as that table.
    fn sequence_target(&self, registry: &SchemaRegistry, source_name: &str) -> Option<String> {
        let aliased = self
            .config
            .sources
            .iter()
            .find(|(_, source)| source.as_str() == source_name)
            .map(|(target, _)| target.as_str());

        let target = match aliased {
            Some(target) => target,
            None if self.config.source_table(source_name) == source_name => source_name,
            None => return None,
        };
        registry.get(target).map(|_| target.to_string())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migration::foreign_keys::ForeignKeyRule;
    use crate::db::{ErrorKind, open_read_write};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    const SCHEMA: &str = "
        CREATE TABLE accounts_user (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            rfid_code TEXT NOT NULL,
            is_staff BOOLEAN NOT NULL,
            date_joined DATETIME NOT NULL
        );
        CREATE TABLE members_member (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            sponsor_id INTEGER,
            phone TEXT NOT NULL DEFAULT 'unknown'
        );
    ";

    fn source(path: &Path) {
        let conn = open_read_write(path, &StoreConfig::default()).unwrap();
        conn.execute_batch(
            "CREATE TABLE accounts_user (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 username TEXT,
                 rfid_code TEXT,
                 legacy_flag INTEGER
             );
             INSERT INTO accounts_user VALUES (1, 'ann', 'RF-1', 0), (2, 'bo', '', 1);
             CREATE TABLE members_member (id INTEGER PRIMARY KEY, user_id INTEGER, sponsor_id INTEGER);
             INSERT INTO members_member VALUES (10, 1, NULL), (11, 2, 10), (12, 42, NULL), (13, 2, 99);",
        )
        .unwrap();
    }

    fn config() -> MigrationConfig {
        MigrationConfig::default()
            .with_plan(vec!["accounts_user".into(), "members_member".into()])
            .with_foreign_keys(
                "members_member",
                vec![
                    ForeignKeyRule::new("user_id", "accounts_user"),
                    ForeignKeyRule::new("sponsor_id", "members_member").nullable(),
                ],
            )
    }

    fn clock() -> Clock {
        Clock::Fixed(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap())
    }

    #[test]
    fn test_run_migrates_and_records_rejections() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        let new = dir.path().join("new.sqlite3");
        source(&old);

        let mut driver = MigrationDriver::new(config(), &old, &new)
            .with_clock(clock())
            .with_schema_sql(SCHEMA);
        let report = driver.run().unwrap();

        assert_eq!(driver.state(), &DriverState::Done);

        let users = report.table("accounts_user").unwrap();
        assert_eq!(users.inserted, 2);
        assert_eq!(users.dropped_columns, vec!["legacy_flag".to_string()]);
        assert_eq!(users.defaulted_fields, vec!["is_staff".to_string(), "date_joined".to_string()]);

        let members = report.table("members_member").unwrap();
        assert_eq!((members.inserted, members.rejected), (2, 2));
        assert_eq!(members.expected_target_rows(), 2);
        assert_eq!(report.count(ErrorKind::ReferentialIntegrityViolation), 2);

        let conn = open_read_write(&new, &StoreConfig::default()).unwrap();
        let (rfid, joined, phone): (String, String, String) = conn
            .query_row(
                "SELECT u.rfid_code, u.date_joined, m.phone
                 FROM accounts_user u JOIN members_member m ON m.user_id = u.id
                 WHERE u.id = 2",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(rfid, "TEMP-2-20240301");
        assert_eq!(joined, "2024-03-01 09:30:00.000000");
        assert_eq!(phone, "unknown");

        let seq: i64 = conn
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'accounts_user'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_self_reference_sees_pending_batch() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        let new = dir.path().join("new.sqlite3");
        source(&old);

        let mut driver = MigrationDriver::new(config(), &old, &new)
            .with_clock(clock())
            .with_schema_sql(SCHEMA);
        let report = driver.run().unwrap();

        let rejected: Vec<_> = report
            .errors_for("members_member")
            .filter_map(|e| e.row.clone())
            .collect();
        assert_eq!(rejected, vec!["12".to_string(), "13".to_string()]);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let dir = tempdir().unwrap();
        let mut driver = MigrationDriver::new(
            config(),
            dir.path().join("absent.sqlite3"),
            dir.path().join("new.sqlite3"),
        )
        .with_schema_sql(SCHEMA);

        assert!(matches!(driver.run(), Err(MigrationError::Connection(_))));
        assert_eq!(driver.state(), &DriverState::Initializing);
    }

    #[test]
    fn test_bad_schema_is_fatal() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        source(&old);

        let mut driver = MigrationDriver::new(config(), &old, dir.path().join("new.sqlite3"))
            .with_schema_sql("CREATE TABLE broken (");
        let err = driver.run().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), ErrorKind::SchemaInitializationFailure);
    }

    #[test]
    fn test_same_store_is_rejected() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old.sqlite3");
        source(&old);

        let mut driver = MigrationDriver::new(config(), &old, &old).with_schema_sql(SCHEMA);
        assert!(matches!(driver.run(), Err(MigrationError::Config(_))));
    }
}
