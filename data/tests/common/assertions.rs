//! Assertion helpers reading the stores directly

use data::db::{MigrationReport, StoreConfig, count_rows, open_read_write};
use std::path::Path;

pub fn row_count(path: &Path, table: &str) -> i64 {
    let conn = open_read_write(path, &StoreConfig::default()).expect("Failed to open store");
    count_rows(&conn, table).expect("Failed to count rows")
}

pub fn query_string(path: &Path, sql: &str) -> String {
    let conn = open_read_write(path, &StoreConfig::default()).expect("Failed to open store");
    conn.query_row(sql, [], |row| row.get(0))
        .unwrap_or_else(|e| panic!("Query failed: {sql}: {e}"))
}

pub fn assert_row_count(path: &Path, table: &str, expected: i64) {
    assert_eq!(row_count(path, table), expected, "{}: row count mismatch", table);
}

/// Every migrated table ends with `source - rejected - dropped - duplicates` rows
pub fn assert_row_invariant(report: &MigrationReport, target: &Path) {
    for outcome in report.tables.iter().filter(|t| !t.is_skipped()) {
        assert_eq!(
            row_count(target, &outcome.table),
            outcome.expected_target_rows() as i64,
            "{}: target rows do not match the recorded outcome",
            outcome.table
        );
    }
}
