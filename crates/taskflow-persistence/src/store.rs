use crate::{codec, Result, StoreError};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taskflow_core::{EventSink, LogSink, TaskEvent, TaskId, TaskRecord};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";

/// Configuration for the durable store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Number of leading id characters naming a shard directory (1-32)
    pub shard_prefix_len: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            data_dir: PathBuf::from("./taskflow_data"),
            shard_prefix_len: 2,
        }
    }
}

/// Crash-safe persistence of task records.
///
/// Layout under `data_dir`:
///
/// ```text
/// tasks/<shard>/<task-id>.json
/// backups/backup_<timestamp>.json
/// ```
///
/// Every write goes to a temporary file inside the target directory and is
/// renamed over the final path, so readers see either the previous version or
/// the new one. Writers to the same shard serialize on a per-shard lock.
pub struct DurableStore {
    tasks_dir: PathBuf,
    backups_dir: PathBuf,
    shard_prefix_len: usize,
    shard_locks: DashMap<String, Arc<Mutex<()>>>,
    events: Arc<dyn EventSink>,
}

impl DurableStore {
    /// Open or create a store
    pub fn open(config: StoreConfig) -> Result<Self> {
        let tasks_dir = config.data_dir.join("tasks");
        let backups_dir = config.data_dir.join("backups");

        for dir in [&tasks_dir, &backups_dir] {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::storage(format!("create {}", dir.display()), e))?;
        }

        info!("Opened task store at {:?}", config.data_dir);

        Ok(DurableStore {
            tasks_dir,
            backups_dir,
            shard_prefix_len: config.shard_prefix_len.clamp(1, 32),
            shard_locks: DashMap::new(),
            events: Arc::new(LogSink),
        })
    }

    /// Route storage-error events to `events` instead of the log
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    fn shard_key(&self, task_id: &TaskId) -> String {
        let simple = task_id.simple().to_string();
        simple[..self.shard_prefix_len].to_string()
    }

    /// Final location of a task's record file
    pub fn record_path(&self, task_id: &TaskId) -> PathBuf {
        self.tasks_dir
            .join(self.shard_key(task_id))
            .join(format!("{}.{}", task_id, RECORD_EXTENSION))
    }

    fn shard_lock(&self, shard: &str) -> Arc<Mutex<()>> {
        self.shard_locks
            .entry(shard.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Persist a record, replacing any previous version atomically
    pub fn save(&self, record: &TaskRecord) -> Result<()> {
        let result = self.write_record(record);
        if let Err(e) = &result {
            self.events.emit(&TaskEvent::StorageError {
                task_id: Some(record.id),
                error: e.to_string(),
            });
        }
        result
    }

    fn write_record(&self, record: &TaskRecord) -> Result<()> {
        let bytes = codec::encode_record(record)?;
        let shard = self.shard_key(&record.id);
        let shard_dir = self.tasks_dir.join(&shard);
        let path = self.record_path(&record.id);

        let lock = self.shard_lock(&shard);
        let _guard = lock.lock();

        fs::create_dir_all(&shard_dir)
            .map_err(|e| StoreError::storage(format!("create {}", shard_dir.display()), e))?;
        write_atomic(&shard_dir, &path, &bytes)?;

        debug!(task_id = %record.id, status = %record.status, "Saved task record");
        Ok(())
    }

    /// Load a record by id
    pub fn load(&self, task_id: &TaskId) -> Result<TaskRecord> {
        let path = self.record_path(task_id);
        let lock = self.shard_lock(&self.shard_key(task_id));

        let bytes = {
            let _guard = lock.lock();
            match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return Err(StoreError::NotFound(*task_id));
                }
                Err(e) => {
                    return Err(StoreError::storage(format!("read {}", path.display()), e));
                }
            }
        };

        let record =
            codec::decode_record(&bytes).map_err(|reason| StoreError::corrupt(&path, reason))?;
        if record.id != *task_id {
            return Err(StoreError::corrupt(
                &path,
                format!("file holds record {}", record.id),
            ));
        }
        Ok(record)
    }

    /// Remove a record. Returns false if there was nothing to remove.
    pub fn delete(&self, task_id: &TaskId) -> Result<bool> {
        let path = self.record_path(task_id);
        let lock = self.shard_lock(&self.shard_key(task_id));
        let _guard = lock.lock();

        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(%task_id, "Deleted task record");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::storage(format!("remove {}", path.display()), e)),
        }
    }

    /// Scan every shard and load all readable records, oldest first.
    ///
    /// Corrupt files are skipped and reported; they never abort the scan.
    pub fn list_all(&self) -> Result<Vec<TaskRecord>> {
        let mut records = Vec::new();

        for shard in read_dir(&self.tasks_dir)? {
            if !shard.is_dir() {
                continue;
            }

            for path in read_dir(&shard)? {
                if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                    continue;
                }

                let task_id = match path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| stem.parse::<TaskId>().ok())
                {
                    Some(task_id) => task_id,
                    None => {
                        self.skip_corrupt(&StoreError::corrupt(&path, "file name is not a task id"));
                        continue;
                    }
                };

                match self.load(&task_id) {
                    Ok(record) => records.push(record),
                    // Removed between the directory scan and the read.
                    Err(StoreError::NotFound(_)) => {}
                    Err(e @ StoreError::CorruptRecord { .. }) => self.skip_corrupt(&e),
                    Err(e) => return Err(e),
                }
            }
        }

        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    fn skip_corrupt(&self, error: &StoreError) {
        warn!("Skipping unreadable task record: {}", error);
        self.events.emit(&TaskEvent::StorageError {
            task_id: None,
            error: error.to_string(),
        });
    }
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).map_err(|e| StoreError::storage(format!("scan {}", dir.display()), e))?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::storage(format!("scan {}", dir.display()), e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

/// Write `bytes` to a temporary file in `dir`, flush it to disk and rename it
/// over `target`. A crash before the rename leaves `target` untouched.
pub(crate) fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| StoreError::storage(format!("create temp file in {}", dir.display()), e))?;

    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StoreError::storage(format!("write {}", tmp.path().display()), e))?;

    tmp.persist(target)
        .map_err(|e| StoreError::storage(format!("rename into {}", target.display()), e.error))?;
    Ok(())
}
