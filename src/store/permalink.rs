//! Permalink record storage.

use super::{StoreError, lock};
use crate::cache::{sha256_hex, write_atomic, write_temp};
use crate::permalink::Permalink;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Identifier → permalink record.
pub trait PermalinkStore: Sync {
    /// Cheap probe: can this store be used at all right now?
    fn is_available(&self) -> bool;

    fn find(&self, identifier: &str) -> Result<Option<Permalink>, StoreError>;

    /// Insert `record` unless its identifier already exists. Returns the
    /// record that is stored afterwards, which is the existing one when the
    /// insert lost.
    fn create_if_absent(&self, record: Permalink) -> Result<Permalink, StoreError>;

    /// Record a finished materialization.
    fn mark_resized(
        &self,
        identifier: &str,
        path: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Permalink>, StoreError>;

    /// Delete every record, returning how many there were.
    fn reset(&self) -> Result<usize, StoreError>;
}

fn resized(mut record: Permalink, path: &str, at: DateTime<Utc>) -> Permalink {
    record.path = Some(path.to_string());
    record.resized_at = Some(at);
    record.updated_at = at;
    record
}

/// In-process store.
pub struct MemoryPermalinkStore {
    available: bool,
    records: Mutex<HashMap<String, Permalink>>,
}

impl Default for MemoryPermalinkStore {
    fn default() -> Self {
        Self {
            available: true,
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl MemoryPermalinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports itself unprovisioned.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PermalinkStore for MemoryPermalinkStore {
    fn is_available(&self) -> bool {
        self.available
    }

    fn find(&self, identifier: &str) -> Result<Option<Permalink>, StoreError> {
        Ok(lock(&self.records).get(identifier).cloned())
    }

    fn create_if_absent(&self, record: Permalink) -> Result<Permalink, StoreError> {
        let mut records = lock(&self.records);
        Ok(records
            .entry(record.identifier.clone())
            .or_insert(record)
            .clone())
    }

    fn mark_resized(
        &self,
        identifier: &str,
        path: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Permalink>, StoreError> {
        let mut records = lock(&self.records);
        let Some(record) = records.get_mut(identifier) else {
            return Ok(None);
        };
        *record = resized(record.clone(), path, at);
        Ok(Some(record.clone()))
    }

    fn reset(&self) -> Result<usize, StoreError> {
        let mut records = lock(&self.records);
        let count = records.len();
        records.clear();
        Ok(count)
    }
}

/// One JSON file per permalink, named by the SHA-256 of its identifier.
///
/// The store is available once its directory exists; [`provision`]
/// creates it.
///
/// [`provision`]: FilePermalinkStore::provision
#[derive(Debug, Clone)]
pub struct FilePermalinkStore {
    root: PathBuf,
}

impl FilePermalinkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn provision(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    fn path_for(&self, identifier: &str) -> PathBuf {
        self.root.join(format!("{}.json", sha256_hex(identifier)))
    }

    fn require(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "{} does not exist",
                self.root.display()
            )))
        }
    }

    fn read(path: &Path) -> Result<Option<Permalink>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn record_files(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

impl PermalinkStore for FilePermalinkStore {
    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn find(&self, identifier: &str) -> Result<Option<Permalink>, StoreError> {
        self.require()?;
        let record = Self::read(&self.path_for(identifier))?;
        Ok(record.filter(|r| r.identifier == identifier))
    }

    fn create_if_absent(&self, record: Permalink) -> Result<Permalink, StoreError> {
        self.require()?;
        let path = self.path_for(&record.identifier);
        let tmp = write_temp(&self.root, &serde_json::to_vec_pretty(&record)?)?;
        let linked = fs::hard_link(&tmp, &path);
        let _ = fs::remove_file(&tmp);

        match linked {
            Ok(()) => Ok(record),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::read(&path)?
                .ok_or_else(|| StoreError::Unavailable(format!("{} vanished", path.display()))),
            Err(e) => Err(e.into()),
        }
    }

    fn mark_resized(
        &self,
        identifier: &str,
        path: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Permalink>, StoreError> {
        let Some(record) = self.find(identifier)? else {
            return Ok(None);
        };
        let record = resized(record, path, at);
        write_atomic(
            &self.path_for(identifier),
            &serde_json::to_vec_pretty(&record)?,
        )?;
        Ok(Some(record))
    }

    fn reset(&self) -> Result<usize, StoreError> {
        self.require()?;
        let mut count = 0;
        for path in self.record_files()? {
            fs::remove_file(path)?;
            count += 1;
        }
        Ok(count)
    }
}
