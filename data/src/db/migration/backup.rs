//! Target store backup taken before the wipe
//!
//! Each backup is a timestamped directory holding a copy of the store file
//! (plus any WAL sidecars) and a `manifest.json` describing it.

use crate::db::{MigrationError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MANIFEST: &str = "manifest.json";
const SIDECARS: [&str; 2] = ["-wal", "-shm"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub run_id: Uuid,
    pub timestamp: String,
    pub backup_path: PathBuf,
    pub files: Vec<BackupFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFile {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub size_bytes: u64,
}

impl BackupMetadata {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

pub struct BackupManager {
    backup_root: PathBuf,
}

impl BackupManager {
    pub fn new(backup_root: impl Into<PathBuf>) -> Self {
        Self {
            backup_root: backup_root.into(),
        }
    }

    /// `backups/` next to the target store
    pub fn beside(target: &Path) -> Self {
        let parent = target
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Self::new(parent.join("backups"))
    }

    pub fn root(&self) -> &Path {
        &self.backup_root
    }

    /// Copy the target store aside; `None` when there is nothing to back up
    pub fn backup_target(
        &self,
        target: &Path,
        run_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<BackupMetadata>> {
        if !target.exists() {
            log::debug!("No existing target at {}, skipping backup", target.display());
            return Ok(None);
        }

        let timestamp = now.format("%Y%m%d_%H%M%S").to_string();
        let backup_dir = self.unique_dir(&timestamp);
        fs::create_dir_all(&backup_dir).map_err(|e| {
            MigrationError::SchemaInitialization(format!(
                "Failed to create backup directory {}: {}",
                backup_dir.display(),
                e
            ))
        })?;

        log::info!("Creating backup in: {}", backup_dir.display());

        let mut files = Vec::new();
        let sidecars = SIDECARS.iter().map(|suffix| {
            let mut name = target.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        });
        for original in std::iter::once(target.to_path_buf()).chain(sidecars) {
            if !original.exists() {
                continue;
            }
            let file_name = original
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| "store.sqlite3".into());
            let copy = backup_dir.join(file_name);
            let size_bytes = fs::copy(&original, &copy).map_err(|e| {
                MigrationError::SchemaInitialization(format!(
                    "Failed to back up {}: {}",
                    original.display(),
                    e
                ))
            })?;
            files.push(BackupFile {
                original_path: original,
                backup_path: copy,
                size_bytes,
            });
        }

        let metadata = BackupMetadata {
            run_id,
            timestamp,
            backup_path: backup_dir.clone(),
            files,
        };
        fs::write(
            backup_dir.join(MANIFEST),
            serde_json::to_string_pretty(&metadata)?,
        )?;

        log::info!(
            "Backup created: {} file(s), {} bytes",
            metadata.files.len(),
            metadata.total_bytes()
        );
        Ok(Some(metadata))
    }

    pub fn load_backup_metadata(&self, backup_dir: &Path) -> Result<BackupMetadata> {
        let manifest = fs::read_to_string(backup_dir.join(MANIFEST))?;
        Ok(serde_json::from_str(&manifest)?)
    }

    fn unique_dir(&self, timestamp: &str) -> PathBuf {
        let base = self.backup_root.join(format!("backup_{}", timestamp));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.backup_root.join(format!("backup_{}_{}", timestamp, n)))
            .find(|p| !p.exists())
            .unwrap_or(base)
    }
}
