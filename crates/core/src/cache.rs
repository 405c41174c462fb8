//! Last-known-good timetable snapshots on local disk.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{error::StorageError, models::Level, models::TimetableSnapshot};

/// Storage key for a level's snapshot.
pub fn cache_key(level: Level) -> String {
    format!("timetable_level_{level}")
}

/// File-backed snapshot cache, one JSON file per key.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    root: PathBuf,
}

impl SnapshotCache {
    /// Create a cache rooted at the provided directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding the snapshot files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_component(key)))
    }

    /// Persist `snapshot` under `key`, replacing whatever was there.
    pub fn save(&self, key: &str, snapshot: &TimetableSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;
        let path = self.path_for(key);
        let serialised = serde_json::to_vec_pretty(snapshot)?;
        // Staged write, renamed into place.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, serialised).map_err(|source| StorageError::Io {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(key, path = %path.display(), "snapshot cached");
        Ok(())
    }

    /// Stored snapshot for `key`; `None` when missing or unreadable.
    pub fn load(&self, key: &str) -> Option<TimetableSnapshot> {
        let path = self.path_for(key);
        if !path.exists() {
            return None;
        }
        match self.read(&path) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(key, %err, "ignoring unreadable cached snapshot");
                None
            }
        }
    }

    /// Forget the snapshot stored under `key`.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    /// Convenience wrappers keyed by level.
    pub fn save_level(&self, snapshot: &TimetableSnapshot) -> Result<(), StorageError> {
        self.save(&cache_key(snapshot.level), snapshot)
    }

    /// Snapshot stored for `level`, if it really belongs to that level.
    pub fn load_level(&self, level: Level) -> Option<TimetableSnapshot> {
        self.load(&cache_key(level))
            .filter(|snapshot| snapshot.level == level)
    }

    fn read(&self, path: &Path) -> Result<TimetableSnapshot, StorageError> {
        let content = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

fn sanitize_component(input: &str) -> String {
    let result: String = input
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(*ch, '-' | '_'))
        .collect();
    if result.is_empty() {
        "snapshot".to_string()
    } else {
        result
    }
}
