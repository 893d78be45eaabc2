//! Shared fixtures and assertions for the integration tests

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Throwaway directory with a legacy source store and a target path
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub source: PathBuf,
    pub target: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("legacy.sqlite3");
        let target = temp_dir.path().join("club.sqlite3");
        Self {
            temp_dir,
            source,
            target,
        }
    }

    /// Environment whose source is the standard legacy gym store
    pub fn with_legacy_store() -> Self {
        let env = Self::new();
        fixtures::create_store(&env.source, fixtures::LEGACY_STORE);
        env
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}
