//! Content-addressed artifact store.
//!
//! Every rendered image lives at a path derived only from its cache key and
//! extension, so lookups never need an index: if the file exists, it is the
//! artifact.
//!
//! ## Layout
//!
//! Keys are lowercase hex SHA-256 digests. The first nine characters are
//! split into three directory levels to keep directories small:
//!
//! ```text
//! storage/imageresizecache/
//! └── 3a7/
//!     └── bd3/
//!         └── e23/
//!             └── 3a7bd3e236...1b.jpg
//! ```
//!
//! ## Writes
//!
//! Artifacts are written to a uniquely named temp file in the destination
//! directory, fsynced, then renamed over the final name. Readers either see
//! nothing or the complete file. Temp files carry the [`TEMP_PREFIX`] so
//! garbage collection can tell them apart from finished artifacts.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// File name prefix of in-flight writes.
pub const TEMP_PREFIX: &str = ".resize-tmp-";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SHA-256 of arbitrary bytes, returned as a lowercase hex string.
pub fn sha256_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(bytes.as_ref()))
}

/// Whether `key` looks like a cache key (64 lowercase hex characters).
pub fn is_cache_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Whether a path names an in-flight temp file.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

/// Shard directories for a key, e.g. `["3a7", "bd3", "e23"]`.
/// Keys shorter than nine characters are not sharded.
fn shards(key: &str) -> Vec<&str> {
    match (key.get(0..3), key.get(3..6), key.get(6..9)) {
        (Some(a), Some(b), Some(c)) => vec![a, b, c],
        _ => Vec::new(),
    }
}

/// Path of an artifact relative to the store root, `/`-separated.
///
/// Also used verbatim as the URL suffix of permanent artifact URLs.
pub fn relative_url_path(key: &str, extension: &str) -> String {
    let file = format!("{key}.{extension}");
    let mut parts = shards(key);
    parts.push(&file);
    parts.join("/")
}

/// On-disk store of rendered images, keyed by cache key.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic path for a key and extension.
    pub fn path_for(&self, key: &str, extension: &str) -> PathBuf {
        let mut path = self.root.clone();
        for shard in shards(key) {
            path.push(shard);
        }
        path.push(format!("{key}.{extension}"));
        path
    }

    pub fn exists(&self, key: &str, extension: &str) -> bool {
        self.path_for(key, extension).is_file()
    }

    /// Write an artifact atomically. See [`write_atomic`].
    pub fn write_atomic(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        write_atomic(path, bytes)
    }
}

/// A fresh temp file name inside `dir`, unique per process and call.
fn temp_path_in(dir: &Path) -> PathBuf {
    dir.join(format!(
        "{TEMP_PREFIX}{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Write `bytes` to a new temp file in `dir` and fsync it.
pub fn write_temp(dir: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let tmp = temp_path_in(dir);
    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();
    match result {
        Ok(()) => Ok(tmp),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

/// Write `bytes` to `path` atomically, creating parent directories.
///
/// Concurrent writers of the same path each use their own temp file; the
/// last rename wins and every reader sees a complete file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })?;
    fs::create_dir_all(dir)?;

    let tmp = write_temp(dir, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}
