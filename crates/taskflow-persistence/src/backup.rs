use crate::store::write_atomic;
use crate::{DurableStore, Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use taskflow_core::TaskRecord;
use tracing::{info, warn};

/// Point-in-time snapshot of the whole store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArchive {
    pub created_at: DateTime<Utc>,
    pub records: Vec<TaskRecord>,
}

/// Archive as read back from disk; records are validated one by one
#[derive(Deserialize)]
struct RawArchive {
    created_at: DateTime<Utc>,
    records: Vec<serde_json::Value>,
}

fn backup_file_name(timestamp: DateTime<Utc>) -> String {
    format!("backup_{}.json", timestamp.format("%Y%m%dT%H%M%S%.3fZ"))
}

impl DurableStore {
    /// Snapshot every readable record into `backups/backup_<timestamp>.json`
    pub fn backup(&self, timestamp: DateTime<Utc>) -> Result<PathBuf> {
        let archive = BackupArchive {
            created_at: timestamp,
            records: self.list_all()?,
        };
        let bytes = serde_json::to_vec(&archive)?;

        let backups_dir = self.backups_dir();
        fs::create_dir_all(backups_dir)
            .map_err(|e| StoreError::storage(format!("create {}", backups_dir.display()), e))?;

        let path = backups_dir.join(backup_file_name(timestamp));
        write_atomic(backups_dir, &path, &bytes)?;

        info!(
            "Backed up {} task records to {}",
            archive.records.len(),
            path.display()
        );
        Ok(path)
    }

    /// Replay an archive into the shard layout, overwriting records by id.
    /// Returns the number of records restored; invalid entries are skipped.
    pub fn restore(&self, path: &Path) -> Result<usize> {
        let bytes = fs::read(path)
            .map_err(|e| StoreError::storage(format!("read {}", path.display()), e))?;
        let archive: RawArchive = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::corrupt(path, e.to_string()))?;

        let archive_created_at = archive.created_at;
        let mut restored = 0;
        for (position, value) in archive.records.into_iter().enumerate() {
            let record = serde_json::from_value::<TaskRecord>(value)
                .map_err(|e| e.to_string())
                .and_then(|record| record.validate().map(|_| record));

            match record {
                Ok(record) => {
                    self.save(&record)?;
                    restored += 1;
                }
                Err(reason) => {
                    warn!(
                        "Skipping invalid entry {} in backup {}: {}",
                        position,
                        path.display(),
                        reason
                    );
                }
            }
        }

        info!(
            "Restored {} task records from {} (taken {})",
            restored,
            path.display(),
            archive_created_at.to_rfc3339()
        );
        Ok(restored)
    }

    /// Backup archives on disk, oldest first
    pub fn list_backups(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(self.backups_dir()).map_err(|e| {
            StoreError::storage(format!("scan {}", self.backups_dir().display()), e)
        })?;

        let mut backups = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| StoreError::storage("scan backups", e))?
                .path();
            let is_backup = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("backup_") && name.ends_with(".json"))
                .unwrap_or(false);
            if is_backup {
                backups.push(path);
            }
        }
        backups.sort();
        Ok(backups)
    }
}
