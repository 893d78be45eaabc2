//! Schema migration and reconciliation engine for the club management database.
//!
//! The [`db`] module holds the store readers, target schema introspection and the
//! migration subsystem. [`log`] resolves where run logs are written.

pub mod db;
pub mod log;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

/// Environment variable overriding the directory used for run artifacts.
pub const DATA_PATH_ENV: &str = "CLUBMIGRATE_DATA_PATH";

pub fn data_path(path_name: Option<&str>) -> PathBuf {
    let root = if let Ok(path) = std::env::var(DATA_PATH_ENV) {
        PathBuf::from(path)
    } else {
        dirs_next::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clubmigrate")
    };

    match path_name {
        Some(name) => root.join(name),
        None => root,
    }
}
