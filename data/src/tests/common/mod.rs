//! Shared helpers for in-crate tests

pub mod fixtures;

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary directory holding a source and a target store path
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let temp_dir = TempDir::new()?;
        let source = temp_dir.path().join("legacy.sqlite3");
        let target = temp_dir.path().join("club.sqlite3");
        Ok(Self {
            temp_dir,
            source,
            target,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

pub fn setup_test_environment() -> Result<TestEnvironment, Box<dyn std::error::Error>> {
    TestEnvironment::new()
}
