//! Ephemeral descriptor storage.
//!
//! Descriptors only bootstrap the first materialization of a pending URL,
//! so losing one is harmless: the fetch degrades to the not-found image.
//!
//! Expired descriptors are dropped when read, and [`DescriptorStore::purge_expired`]
//! sweeps the ones nobody asks for again. Scheduled collection calls it.

use super::{StoreError, lock};
use crate::cache::{is_cache_key, write_atomic};
use crate::ephemeral::EphemeralDescriptor;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Key → descriptor map with expiry.
pub trait DescriptorStore: Sync {
    /// The live descriptor under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<EphemeralDescriptor>, StoreError>;

    /// Store `descriptor` under `key` unless a live one is already there.
    fn remember(
        &self,
        key: &str,
        ttl: Duration,
        descriptor: &EphemeralDescriptor,
    ) -> Result<(), StoreError>;

    /// Drop every expired descriptor. Returns how many went.
    fn purge_expired(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    expires_at: DateTime<Utc>,
    value: EphemeralDescriptor,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// In-process store. Contents vanish with the process.
#[derive(Default)]
pub struct MemoryDescriptorStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryDescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DescriptorStore for MemoryDescriptorStore {
    fn get(&self, key: &str) -> Result<Option<EphemeralDescriptor>, StoreError> {
        let now = Utc::now();
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn remember(
        &self,
        key: &str,
        ttl: Duration,
        descriptor: &EphemeralDescriptor,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut entries = lock(&self.entries);
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                expires_at: now + ttl,
                value: descriptor.clone(),
            },
        );
        Ok(())
    }

    fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut entries = lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        Ok(before - entries.len())
    }
}

/// One JSON file per descriptor, `{root}/{key}.json`.
///
/// Keys are the prefixed cache keys, so only `{prefix}{64 hex}` names are
/// accepted; anything else reads as missing and is never written.
#[derive(Debug, Clone)]
pub struct FileDescriptorStore {
    root: PathBuf,
    prefix: String,
}

impl FileDescriptorStore {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        let hash = key.strip_prefix(self.prefix.as_str())?;
        is_cache_key(hash).then(|| self.root.join(format!("{key}.json")))
    }

    fn read(path: &Path) -> Result<Option<Entry>, StoreError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Another reader may have removed it first.
    fn remove(path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn is_descriptor_file(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "json")
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|key| self.path_for(key))
                .is_some()
    }
}

impl DescriptorStore for FileDescriptorStore {
    fn get(&self, key: &str) -> Result<Option<EphemeralDescriptor>, StoreError> {
        let Some(path) = self.path_for(key) else {
            return Ok(None);
        };
        match Self::read(&path)? {
            Some(entry) if entry.is_live(Utc::now()) => Ok(Some(entry.value)),
            Some(_) => {
                debug!(key, "descriptor expired, removing");
                Self::remove(&path)?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn remember(
        &self,
        key: &str,
        ttl: Duration,
        descriptor: &EphemeralDescriptor,
    ) -> Result<(), StoreError> {
        let path = self.path_for(key).ok_or_else(|| {
            StoreError::Unavailable(format!("{key:?} is not a descriptor key"))
        })?;
        let now = Utc::now();
        // A corrupt record is replaced rather than reported
        if let Ok(Some(existing)) = Self::read(&path)
            && existing.is_live(now)
        {
            return Ok(());
        }
        let entry = Entry {
            expires_at: now + ttl,
            value: descriptor.clone(),
        };
        write_atomic(&path, &serde_json::to_vec(&entry)?)?;
        Ok(())
    }

    /// Unreadable records count as expired: `remember` would replace them
    /// anyway.
    fn purge_expired(&self) -> Result<usize, StoreError> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();
        let mut purged = 0;
        for entry in dir {
            let path = entry?.path();
            if !self.is_descriptor_file(&path) {
                continue;
            }
            let live = matches!(Self::read(&path), Ok(Some(e)) if e.is_live(now));
            if live {
                continue;
            }
            match Self::remove(&path) {
                Ok(()) => purged += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "cannot remove descriptor"),
            }
        }
        debug!(root = %self.root.display(), purged, "expired descriptors purged");
        Ok(purged)
    }
}
