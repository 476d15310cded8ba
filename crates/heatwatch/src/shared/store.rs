//! Directory-backed key-value store shared by every execution context.
//!
//! A plain key is one `<key>.json` file that [`SharedStore::set`]
//! overwrites. Events are published as one `<key>.<entry>.json` file each,
//! so back-to-back events under the same key never replace one another
//! before a watcher has seen them. Writes are atomic (temp file + rename);
//! there is no locking between contexts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Key written when a job completes.
pub const JOB_COMPLETED_KEY: &str = "jobCompleted";

/// Key written when a job is cancelled.
pub const JOB_CANCELLED_KEY: &str = "jobCancelled";

/// How long published event files stay around for slower watchers.
pub const EVENT_RETENTION: Duration = Duration::from_secs(30);

const KEY_EXTENSION: &str = "json";

/// Value stored under [`JOB_COMPLETED_KEY`] / [`JOB_CANCELLED_KEY`].
///
/// Only `jobName` is required, so bare `{"jobName": ...}` records written by
/// other tools are understood too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CrossContextRecord {
    pub job_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_at: Option<DateTime<Utc>>,
}

impl CrossContextRecord {
    /// Parses a stored value. Malformed values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Ignoring malformed cross-context record: {}", e);
                None
            }
        }
    }
}

/// A store file, split into its key and, for event files, the entry name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreFile {
    pub key: String,
    pub entry: Option<String>,
}

impl StoreFile {
    pub fn is_event(&self) -> bool {
        self.entry.is_some()
    }

    /// Publish time encoded in an event entry name.
    fn published_at_millis(&self) -> Option<i64> {
        let entry = self.entry.as_deref()?;
        entry.split('-').next()?.parse().ok()
    }
}

/// Handle to the shared store. Cloning is cheap.
#[derive(Clone)]
pub struct SharedStore {
    dir: PathBuf,
    /// Content this handle wrote per file, so the watcher of the same
    /// context can recognise its own writes.
    own_writes: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl SharedStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDirectory {
            path: dir.clone(),
            source: e,
        })?;
        // Watcher events carry canonical paths.
        let dir = dir.canonicalize().unwrap_or(dir);
        Ok(Self {
            dir,
            own_writes: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    fn validate_key(key: &str) -> Result<(), StoreError> {
        if Self::is_valid_name(key) {
            Ok(())
        } else {
            Err(StoreError::InvalidKey(key.to_string()))
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", key, KEY_EXTENSION))
    }

    fn entry_path_for(&self, key: &str, entry: &str) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", key, entry, KEY_EXTENSION))
    }

    /// Classifies a file inside the store directory.
    pub fn file_for_path(&self, path: &Path) -> Option<StoreFile> {
        if path.parent()? != self.dir {
            return None;
        }
        if path.extension()?.to_str()? != KEY_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let (key, entry) = match stem.split_once('.') {
            Some((key, entry)) => (key, Some(entry)),
            None => (stem, None),
        };
        if !Self::is_valid_name(key) || !entry.map_or(true, Self::is_valid_name) {
            return None;
        }
        Some(StoreFile {
            key: key.to_string(),
            entry: entry.map(str::to_string),
        })
    }

    /// Maps a file inside the store directory back to its key.
    pub fn key_for_path(&self, path: &Path) -> Option<String> {
        self.file_for_path(path).map(|file| file.key)
    }

    fn write_file(&self, key: &str, target: &Path, value: &str) -> Result<(), StoreError> {
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));

        if let Ok(mut own) = self.own_writes.lock() {
            own.insert(target.to_path_buf(), value.to_string());
        }

        std::fs::write(&tmp, value).map_err(|e| StoreError::WriteKey {
            key: key.to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, target).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StoreError::WriteKey {
                key: key.to_string(),
                source: e,
            }
        })
    }

    /// Writes `value` under `key`, replacing whatever was there.
    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        Self::validate_key(key)?;
        self.write_file(key, &self.path_for(key), value)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::validate_key(key)?;
        self.read_file(key, &self.path_for(key))
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        Self::validate_key(key)?;
        Self::remove_file(key, &self.path_for(key))
    }

    /// Writes `value` as a new event file under `key` and returns its path.
    ///
    /// Event files older than [`EVENT_RETENTION`] are pruned on the way.
    pub fn publish(&self, key: &str, value: &str) -> Result<PathBuf, StoreError> {
        Self::validate_key(key)?;
        let entry = format!(
            "{:013}-{}",
            Utc::now().timestamp_millis(),
            uuid::Uuid::new_v4().simple()
        );
        let target = self.entry_path_for(key, &entry);
        self.write_file(key, &target, value)?;

        if let Err(e) = self.prune(key, EVENT_RETENTION) {
            log::debug!("Pruning shared key '{}' failed: {}", key, e);
        }
        Ok(target)
    }

    /// Event files under `key`, oldest first.
    pub fn entries(&self, key: &str) -> Result<Vec<PathBuf>, StoreError> {
        Self::validate_key(key)?;
        let read_dir = std::fs::read_dir(&self.dir).map_err(|e| StoreError::ReadKey {
            key: key.to_string(),
            source: e,
        })?;
        let mut paths: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                self.file_for_path(path)
                    .is_some_and(|file| file.key == key && file.is_event())
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Deletes event files under `key` published at least `older_than` ago.
    /// Returns how many were removed.
    pub fn prune(&self, key: &str, older_than: Duration) -> Result<usize, StoreError> {
        let cutoff = Utc::now().timestamp_millis()
            - i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        let mut removed = 0;
        for path in self.entries(key)? {
            let expired = self
                .file_for_path(&path)
                .and_then(|file| file.published_at_millis())
                .is_some_and(|at| at <= cutoff);
            if expired {
                Self::remove_file(key, &path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            if let Ok(mut own) = self.own_writes.lock() {
                own.retain(|path, _| path.exists());
            }
        }
        Ok(removed)
    }

    /// Reads any store file. Missing files yield `None`.
    pub fn read_path(&self, path: &Path) -> Result<Option<String>, StoreError> {
        let file = self
            .file_for_path(path)
            .ok_or_else(|| StoreError::InvalidKey(path.display().to_string()))?;
        self.read_file(&file.key, path)
    }

    fn read_file(&self, key: &str, path: &Path) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::ReadKey {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    fn remove_file(key: &str, path: &Path) -> Result<(), StoreError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            // Another context may have pruned it first.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::WriteKey {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    /// Serializes a cross-context record and publishes it under `key`.
    pub fn write_record(
        &self,
        key: &str,
        record: &CrossContextRecord,
    ) -> Result<PathBuf, StoreError> {
        let value = serde_json::to_string(record)?;
        self.publish(key, &value)
    }

    /// True when `value` is exactly what this handle last wrote to `path`.
    pub fn is_own_write(&self, path: &Path, value: &str) -> bool {
        self.own_writes
            .lock()
            .map(|own| own.get(path).is_some_and(|v| v == value))
            .unwrap_or(false)
    }
}
