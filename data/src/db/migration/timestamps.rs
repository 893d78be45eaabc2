//! Timestamp normalization pass over the target store
//!
//! Legacy rows carry dates in a handful of formats. Every date/time and
//! date-only column is scanned and values in a recognised non-canonical form
//! are rewritten as `YYYY-MM-DD HH:MM:SS[.ffffff]` (UTC) or `YYYY-MM-DD`.
//! Anything unrecognised is left alone and counted.

use crate::db::schema::{FieldKind, table_columns};
use crate::db::{MigrationError, Result, StoreConfig, list_tables, open_read_write, quote_ident};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use rusqlite::types::Value;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static CANONICAL_DATETIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(\.\d{1,6})?$").expect("valid regex")
});
static CANONICAL_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));
static EPOCH_SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{9,10}$").expect("valid regex"));

const NAIVE_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];
const OFFSET_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%Y"];

/// Parse any recognised form into a UTC timestamp
fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();

    if EPOCH_SECONDS.is_match(raw) {
        return raw
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = OFFSET_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(raw, f).ok())
    {
        return Some(dt.naive_utc());
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
    {
        return Some(dt);
    }
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(raw, f).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn format_datetime(dt: NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

/// Canonical form of a full timestamp, `None` when unrecognised
pub fn normalize_datetime(raw: &str) -> Option<String> {
    if CANONICAL_DATETIME.is_match(raw) {
        return Some(raw.to_string());
    }
    parse_datetime(raw).map(format_datetime)
}

/// Canonical form of a date, `None` when unrecognised
pub fn normalize_date(raw: &str) -> Option<String> {
    if CANONICAL_DATE.is_match(raw) {
        return Some(raw.to_string());
    }
    parse_datetime(raw).map(|dt| dt.date().format("%Y-%m-%d").to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnFix {
    pub table: String,
    pub column: String,
    /// Non-null values inspected
    pub examined: usize,
    /// Values rewritten (or that would be, on a dry run)
    pub rewritten: usize,
    pub unparseable: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TimestampReport {
    pub dry_run: bool,
    pub columns: Vec<ColumnFix>,
}

impl TimestampReport {
    pub fn rewritten(&self) -> usize {
        self.columns.iter().map(|c| c.rewritten).sum()
    }

    pub fn unparseable(&self) -> usize {
        self.columns.iter().map(|c| c.unparseable).sum()
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnFix> {
        self.columns
            .iter()
            .find(|c| c.table == table && c.column == column)
    }
}

impl fmt::Display for TimestampReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = if self.dry_run { "would rewrite" } else { "rewrote" };
        for c in &self.columns {
            writeln!(
                f,
                "  {}.{}: {} examined, {} {}, {} unparseable",
                c.table, c.column, c.examined, verb, c.rewritten, c.unparseable
            )?;
        }
        write!(
            f,
            "Timestamp fix: {} {} value(s), {} unparseable",
            verb,
            self.rewritten(),
            self.unparseable()
        )
    }
}

pub struct TimestampFixer {
    target: PathBuf,
    dry_run: bool,
    internal_prefixes: Vec<String>,
}

impl TimestampFixer {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            dry_run: false,
            internal_prefixes: vec!["sqlite_".to_string()],
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_internal_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.internal_prefixes = prefixes;
        self
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn run(&self) -> Result<TimestampReport> {
        if !self.target.exists() {
            return Err(MigrationError::Connection(format!(
                "Target store not found: {}",
                self.target.display()
            )));
        }
        let conn = open_read_write(&self.target, &StoreConfig::default())?;
        let mut report = TimestampReport {
            dry_run: self.dry_run,
            columns: Vec::new(),
        };

        for table in list_tables(&conn, &self.internal_prefixes, &[])? {
            let columns = table_columns(&conn, &table)?;
            for column in columns
                .iter()
                .filter(|c| matches!(c.kind, FieldKind::DateTime | FieldKind::Date))
            {
                let fix = self.fix_column(&conn, &table, &column.name, column.kind)?;
                if fix.rewritten > 0 || fix.unparseable > 0 {
                    log::info!(
                        "{}.{}: {} rewritten, {} unparseable",
                        fix.table,
                        fix.column,
                        fix.rewritten,
                        fix.unparseable
                    );
                }
                report.columns.push(fix);
            }
        }

        log::info!("{}", report);
        Ok(report)
    }

    fn fix_column(
        &self,
        conn: &rusqlite::Connection,
        table: &str,
        column: &str,
        kind: FieldKind,
    ) -> Result<ColumnFix> {
        let mut fix = ColumnFix {
            table: table.to_string(),
            column: column.to_string(),
            ..ColumnFix::default()
        };

        let select = format!(
            "SELECT rowid, {col} FROM {tbl} WHERE {col} IS NOT NULL",
            col = quote_ident(column),
            tbl = quote_ident(table)
        );
        let values = {
            let mut stmt = conn.prepare(&select)?;
            stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };

        let normalize: fn(&str) -> Option<String> = match kind {
            FieldKind::Date => normalize_date,
            _ => normalize_datetime,
        };

        let mut updates = Vec::new();
        for (rowid, value) in values {
            fix.examined += 1;
            let raw = match value {
                Value::Text(text) => text,
                Value::Integer(secs) => secs.to_string(),
                _ => {
                    fix.unparseable += 1;
                    continue;
                }
            };
            match normalize(&raw) {
                Some(canonical) if canonical == raw => {}
                Some(canonical) => updates.push((rowid, canonical)),
                None => {
                    log::debug!("{}.{} row {}: unrecognised value {:?}", table, column, rowid, raw);
                    fix.unparseable += 1;
                }
            }
        }
        fix.rewritten = updates.len();

        if !self.dry_run && !updates.is_empty() {
            let update = format!(
                "UPDATE {} SET {} = ?1 WHERE rowid = ?2",
                quote_ident(table),
                quote_ident(column)
            );
            let tx = conn.unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(&update)?;
                for (rowid, canonical) in &updates {
                    stmt.execute(rusqlite::params![canonical, rowid])?;
                }
            }
            tx.commit()?;
        }

        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_normalize_datetime_forms() {
        let cases = [
            ("2024-03-01 09:30:00", "2024-03-01 09:30:00"),
            ("2024-03-01 09:30:00.123456", "2024-03-01 09:30:00.123456"),
            ("2024-03-01T09:30:00", "2024-03-01 09:30:00"),
            ("2024-03-01T09:30:00.5", "2024-03-01 09:30:00.500000"),
            ("2024-03-01T09:30:00+02:00", "2024-03-01 07:30:00"),
            ("2024-03-01T09:30:00Z", "2024-03-01 09:30:00"),
            ("2024-03-01 09:30", "2024-03-01 09:30:00"),
            ("01/03/2024 09:30", "2024-03-01 09:30:00"),
            ("01/03/2024", "2024-03-01 00:00:00"),
            ("2024-03-01", "2024-03-01 00:00:00"),
            ("1709285400", "2024-03-01 09:30:00"),
        ];
        for (raw, expected) in cases {
            assert_eq!(normalize_datetime(raw).as_deref(), Some(expected), "{raw}");
        }
        assert_eq!(normalize_datetime("next tuesday"), None);
        assert_eq!(normalize_datetime(""), None);
    }

    #[test]
    fn test_normalize_date_forms() {
        assert_eq!(normalize_date("2024-03-01").as_deref(), Some("2024-03-01"));
        assert_eq!(normalize_date("01/03/2024").as_deref(), Some("2024-03-01"));
        assert_eq!(normalize_date("2024-03-01T23:59:00").as_deref(), Some("2024-03-01"));
        assert_eq!(normalize_date("31/02/2024"), None);
    }

    fn fixture(path: &Path) {
        let conn = open_read_write(path, &StoreConfig::default()).unwrap();
        conn.execute_batch(
            "CREATE TABLE attendance_checkin (
                 id INTEGER PRIMARY KEY,
                 checked_in_at DATETIME,
                 day DATE,
                 note TEXT
             );
             INSERT INTO attendance_checkin VALUES
                 (1, '2024-03-01T09:30:00', '01/03/2024', '01/03/2024'),
                 (2, '2024-03-01 10:00:00', '2024-03-01', NULL),
                 (3, 'garbage', NULL, NULL),
                 (4, NULL, NULL, NULL);",
        )
        .unwrap();
    }

    #[test]
    fn test_fixer_rewrites_recognised_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("club.sqlite3");
        fixture(&path);

        let report = TimestampFixer::new(&path).run().unwrap();
        let checked_in = report.column("attendance_checkin", "checked_in_at").unwrap();
        assert_eq!((checked_in.examined, checked_in.rewritten, checked_in.unparseable), (3, 1, 1));
        assert_eq!(report.column("attendance_checkin", "day").unwrap().rewritten, 1);
        assert!(report.column("attendance_checkin", "note").is_none());

        let conn = open_read_write(&path, &StoreConfig::default()).unwrap();
        let (at, day, note): (String, String, String) = conn
            .query_row(
                "SELECT checked_in_at, day, note FROM attendance_checkin WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(at, "2024-03-01 09:30:00");
        assert_eq!(day, "2024-03-01");
        assert_eq!(note, "01/03/2024");
    }

    #[test]
    fn test_dry_run_counts_without_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("club.sqlite3");
        fixture(&path);

        let report = TimestampFixer::new(&path).dry_run(true).run().unwrap();
        assert_eq!(report.rewritten(), 2);
        assert!(report.to_string().contains("would rewrite 2 value(s)"));

        let conn = open_read_write(&path, &StoreConfig::default()).unwrap();
        let at: String = conn
            .query_row("SELECT checked_in_at FROM attendance_checkin WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(at, "2024-03-01T09:30:00");
    }

    #[test]
    fn test_missing_target_is_an_error() {
        let dir = tempdir().unwrap();
        let err = TimestampFixer::new(dir.path().join("absent.sqlite3")).run().unwrap_err();
        assert!(matches!(err, MigrationError::Connection(_)));
    }
}
