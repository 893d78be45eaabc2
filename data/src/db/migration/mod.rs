//! Legacy-to-current schema migration subsystem
//!
//! A run copies every table of a legacy club database into a freshly
//! initialized target store that follows the current schema:
//!
//! 1. The target is (optionally backed up,) wiped and rebuilt from the schema DDL
//! 2. Tables are visited in dependency order ([`MigrationPlan`])
//! 3. Each source row is mapped onto the target columns, checked against the
//!    foreign-key rule set, completed with default values and batched
//! 4. Batches are inserted with duplicate keys ignored
//! 5. Source and target are reconciled table by table
//!
//! Per-row and per-batch failures are recorded in the [`MigrationReport`] and
//! never abort the run. Only target initialization failures are fatal.

pub mod backup;
pub mod batch;
pub mod config;
pub mod defaults;
pub mod driver;
pub mod foreign_keys;
pub mod helpers;
pub mod plan;
pub mod progress;
pub mod reconcile;
pub mod runlog;
pub mod timestamps;

pub use backup::{BackupManager, BackupMetadata};
pub use batch::{BatchOutcome, BatchSink, BatchWriter, FlushResult, PendingRow, SqliteSink};
pub use config::{MigrationConfig, PlaceholderRule, PlanConfig};
pub use defaults::{DefaultSource, DefaultValueResolver, DefaultValueTable};
pub use driver::{DriverState, MigrationDriver, TableStage};
pub use foreign_keys::{ForeignKeyRule, ForeignKeyRuleSet, ForeignKeyValidator, ReferenceLookup};
pub use plan::MigrationPlan;
pub use progress::ProgressTracker;
pub use reconcile::{ReconciliationReport, ReconciliationReporter, TableComparison, TableStatus};
pub use runlog::{LogEntry, RunLog};
pub use timestamps::{ColumnFix, TimestampFixer, TimestampReport};

use super::error::{ErrorKind, MigrationError};
use chrono::{DateTime, Utc};
use enum_map::EnumMap;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// What happened to one table during a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableOutcome {
    pub table: String,
    /// Source table the rows were read from
    pub source_table: String,
    pub source_rows: usize,
    /// Rows written to the target
    pub inserted: usize,
    /// Rows skipped because their key already existed in the target
    pub duplicates: usize,
    /// Rows rejected by foreign-key validation (for the sequence table: entries
    /// naming no target table)
    pub rejected: usize,
    /// Rows lost with a failed batch
    pub dropped: usize,
    pub batches_attempted: usize,
    pub batches_failed: usize,
    /// Source columns with no counterpart in the target table
    pub dropped_columns: Vec<String>,
    /// Target fields filled by the default value resolver
    pub defaulted_fields: Vec<String>,
    /// Reason the table was skipped entirely
    pub skipped: Option<String>,
}

impl TableOutcome {
    pub fn new(table: impl Into<String>, source_table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            source_table: source_table.into(),
            ..Self::default()
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        let table = table.into();
        Self {
            source_table: table.clone(),
            table,
            skipped: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Target row count this table should reach given the recorded losses
    pub fn expected_target_rows(&self) -> usize {
        self.source_rows
            .saturating_sub(self.rejected)
            .saturating_sub(self.dropped)
            .saturating_sub(self.duplicates)
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

/// One non-fatal failure recorded during a run
#[derive(Debug, Clone, Serialize)]
pub struct RecordedError {
    pub table: String,
    pub kind: ErrorKind,
    /// Row identifier, when the failure concerns a single row
    pub row: Option<String>,
    pub message: String,
}

impl fmt::Display for RecordedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.row {
            Some(row) => write!(f, "[{}] {} (row {}): {}", self.kind, self.table, row, self.message),
            None => write!(f, "[{}] {}: {}", self.kind, self.table, self.message),
        }
    }
}

/// Outcome of a migration run: per-table counts, recorded errors and the
/// reconciliation of both stores
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub tables: Vec<TableOutcome>,
    pub errors: Vec<RecordedError>,
    pub reconciliation: Option<ReconciliationReport>,
    tally: EnumMap<ErrorKind, usize>,
}

impl MigrationReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            started_at,
            tables: Vec::new(),
            errors: Vec::new(),
            reconciliation: None,
            tally: EnumMap::default(),
        }
    }

    pub fn record_error(&mut self, table: &str, row: Option<String>, error: &MigrationError) {
        let kind = error.kind();
        self.tally[kind] += 1;
        self.errors.push(RecordedError {
            table: table.to_string(),
            kind,
            row,
            message: error.to_string(),
        });
    }

    pub fn push_table(&mut self, outcome: TableOutcome) {
        self.tables.push(outcome);
    }

    pub fn table(&self, name: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn errors_for<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a RecordedError> {
        self.errors.iter().filter(move |e| e.table == table)
    }

    pub fn count(&self, kind: ErrorKind) -> usize {
        self.tally[kind]
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True when every non-exempt table has matching row counts
    pub fn is_clean(&self) -> bool {
        self.reconciliation
            .as_ref()
            .is_some_and(|r| r.mismatches().next().is_none())
    }

    pub fn total_inserted(&self) -> usize {
        self.tables.iter().map(|t| t.inserted).sum()
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Migration run {} (started {})", self.run_id, self.started_at)?;
        for t in &self.tables {
            match &t.skipped {
                Some(reason) => writeln!(f, "  {}: skipped ({})", t.table, reason)?,
                None => writeln!(
                    f,
                    "  {}: {} read, {} inserted, {} duplicates, {} rejected, {} dropped ({} of {} batches failed)",
                    t.table,
                    t.source_rows,
                    t.inserted,
                    t.duplicates,
                    t.rejected,
                    t.dropped,
                    t.batches_failed,
                    t.batches_attempted
                )?,
            }
        }
        if self.has_errors() {
            writeln!(f, "  Errors encountered: {}", self.errors.len())?;
            for kind in ErrorKind::ALL {
                if self.tally[kind] > 0 {
                    writeln!(f, "    {}: {}", kind, self.tally[kind])?;
                }
            }
        }
        Ok(())
    }
}
