use enum_map::Enum;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while migrating and reconciling the club database
#[derive(Error, Debug)]
pub enum MigrationError {
    /// A source table could not be read; callers treat it as empty
    #[error("Source table '{table}' is unreadable: {reason}")]
    SourceUnreadable { table: String, reason: String },

    /// A row's foreign key does not resolve in the target store
    #[error(
        "Referential integrity violation in '{table}': {field}={value} not found in {referenced_table}.{referenced_field}"
    )]
    ReferentialIntegrityViolation {
        table: String,
        field: String,
        value: String,
        referenced_table: String,
        referenced_field: String,
    },

    /// A referenced row could not be looked up; the row is rejected like a
    /// missing reference
    #[error(
        "Referential integrity violation in '{table}': cannot check {field}={value} against {referenced_table}: {reason}"
    )]
    ReferenceLookup {
        table: String,
        field: String,
        value: String,
        referenced_table: String,
        reason: String,
    },

    /// A batch insert failed for a reason other than a duplicate key
    #[error("Insertion failure in '{table}' (batch {batch}, {rows} rows): {reason}; sample: {sample}")]
    InsertionFailure {
        table: String,
        batch: usize,
        rows: usize,
        reason: String,
        sample: String,
    },

    /// The target store could not be cleared or brought to the current schema
    #[error("Schema initialization failed: {0}")]
    SchemaInitialization(String),

    /// Row counts differ between source and target after a run
    #[error("Row count mismatch in '{table}': source has {old_rows}, target has {new_rows}")]
    ReconciliationMismatch {
        table: String,
        old_rows: i64,
        new_rows: i64,
    },

    /// Failed to open a store
    #[error("Connection error: {0}")]
    Connection(String),

    /// Migration configuration is missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Underlying SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Classification used to tally recorded errors in a migration report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize)]
pub enum ErrorKind {
    SourceUnreadable,
    ReferentialIntegrityViolation,
    InsertionFailure,
    SchemaInitializationFailure,
    ReconciliationMismatch,
    Other,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::SourceUnreadable,
        ErrorKind::ReferentialIntegrityViolation,
        ErrorKind::InsertionFailure,
        ErrorKind::SchemaInitializationFailure,
        ErrorKind::ReconciliationMismatch,
        ErrorKind::Other,
    ];
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::SourceUnreadable => "SourceUnreadable",
            ErrorKind::ReferentialIntegrityViolation => "ReferentialIntegrityViolation",
            ErrorKind::InsertionFailure => "InsertionFailure",
            ErrorKind::SchemaInitializationFailure => "SchemaInitializationFailure",
            ErrorKind::ReconciliationMismatch => "ReconciliationMismatch",
            ErrorKind::Other => "Other",
        };
        f.write_str(name)
    }
}

impl MigrationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            MigrationError::ReferentialIntegrityViolation { .. }
            | MigrationError::ReferenceLookup { .. } => ErrorKind::ReferentialIntegrityViolation,
            MigrationError::InsertionFailure { .. } => ErrorKind::InsertionFailure,
            MigrationError::SchemaInitialization(_) => ErrorKind::SchemaInitializationFailure,
            MigrationError::ReconciliationMismatch { .. } => ErrorKind::ReconciliationMismatch,
            _ => ErrorKind::Other,
        }
    }

    /// Fatal errors abort the whole run; everything else is recorded and skipped
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MigrationError::SchemaInitialization(_)
                | MigrationError::Connection(_)
                | MigrationError::Config(_)
        )
    }
}

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, MigrationError>;
