//! Age-based garbage collection of cached artifacts.
//!
//! A run walks the cache root, picks every file older than the cutoff (or
//! every file when no age is given), lets a [`ClearHook`] prune that list,
//! deletes what is left in parallel and finally removes directories the
//! deletion left empty. The root itself is never removed.
//!
//! Failures are local: a file that cannot be stat'ed or deleted is counted
//! and skipped, and the run carries on.
//!
//! In-flight temp files younger than an hour are never candidates, so
//! a collection racing a materialization cannot pull a file out from under
//! its rename.
//!
//! ## Entry points
//!
//! | Function | Runs when | Age |
//! |---|---|---|
//! | [`clear`] | always | `cache.clear_interval`, or everything with `all` |
//! | [`run_scheduled`] | `cache.scheduled_gc` | `cache.clear_interval` |
//! | [`on_cache_cleared`] | `cache.cleanup_on_cache_clear` | `cache.clear_interval` |
//!
//! The two lifecycle entry points also sweep expired ephemeral descriptors,
//! which live outside the cache root.

use crate::cache::is_temp_file;
use crate::config::{CacheConfig, ConfigError};
use crate::store::DescriptorStore;
use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Temp files younger than this are assumed to belong to a live write.
const TEMP_GRACE_SECS: i64 = 3600;

/// Extension point offered the candidate list before anything is deleted.
pub trait ClearHook: Sync {
    /// Remove entries from `candidates` to keep them.
    fn prune(&self, candidates: &mut Vec<PathBuf>, max_age: Option<Duration>);
}

/// Hook that keeps the candidate list as is.
pub struct NoHook;

impl ClearHook for NoHook {
    fn prune(&self, _candidates: &mut Vec<PathBuf>, _max_age: Option<Duration>) {}
}

impl<F> ClearHook for F
where
    F: Fn(&mut Vec<PathBuf>, Option<Duration>) + Sync,
{
    fn prune(&self, candidates: &mut Vec<PathBuf>, max_age: Option<Duration>) {
        self(candidates, max_age)
    }
}

/// What a collection did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    pub scanned: usize,
    pub candidates: usize,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub dirs_removed: usize,
    pub descriptors_purged: usize,
}

struct Scanned {
    path: PathBuf,
    modified: DateTime<Utc>,
    len: u64,
}

fn scan(root: &Path, report: &mut GcReport) -> Vec<Scanned> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable cache entry");
                report.failed += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata().map_err(std::io::Error::from).and_then(|m| {
            Ok((m.modified()?, m.len()))
        }) {
            Ok((modified, len)) => files.push(Scanned {
                path: entry.into_path(),
                modified: modified.into(),
                len,
            }),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "cannot stat cache file");
                report.failed += 1;
            }
        }
    }
    report.scanned = files.len();
    files
}

fn is_candidate(file: &Scanned, now: DateTime<Utc>, max_age: Option<Duration>) -> bool {
    if is_temp_file(&file.path) && file.modified > now - Duration::seconds(TEMP_GRACE_SECS) {
        return false;
    }
    match max_age {
        Some(age) => file.modified < now - age,
        None => true,
    }
}

/// Remove directories under `root` that are empty, deepest first.
fn prune_empty_dirs(root: &Path) -> usize {
    WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_dir())
        // remove_dir refuses non-empty directories
        .filter(|e| fs::remove_dir(e.path()).is_ok())
        .count()
}

/// Delete files under `root` older than `max_age` (all files when `None`).
pub fn collect(root: &Path, max_age: Option<Duration>, hook: &dyn ClearHook) -> GcReport {
    let mut report = GcReport::default();
    if !root.is_dir() {
        debug!(root = %root.display(), "cache root missing, nothing to collect");
        return report;
    }

    let now = Utc::now();
    let files = scan(root, &mut report);
    let mut candidates: Vec<PathBuf> = files
        .iter()
        .filter(|f| is_candidate(f, now, max_age))
        .map(|f| f.path.clone())
        .collect();
    hook.prune(&mut candidates, max_age);
    report.candidates = candidates.len();

    let sizes: std::collections::HashMap<&Path, u64> =
        files.iter().map(|f| (f.path.as_path(), f.len)).collect();
    let freed: Vec<Option<u64>> = candidates
        .par_iter()
        .map(|path| match fs::remove_file(path) {
            Ok(()) => Some(sizes.get(path.as_path()).copied().unwrap_or(0)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot delete cache file");
                None
            }
        })
        .collect();

    for bytes in freed {
        match bytes {
            Some(bytes) => {
                report.deleted += 1;
                report.bytes_freed += bytes;
            }
            None => report.failed += 1,
        }
    }
    report.dirs_removed = prune_empty_dirs(root);

    info!(
        root = %root.display(),
        deleted = report.deleted,
        failed = report.failed,
        bytes = report.bytes_freed,
        dirs = report.dirs_removed,
        "cache collected"
    );
    report
}

/// Expired descriptors, counted into `report`.
fn purge_descriptors(descriptors: &dyn DescriptorStore, report: &mut GcReport) {
    match descriptors.purge_expired() {
        Ok(purged) => report.descriptors_purged = purged,
        Err(e) => {
            warn!(error = %e, "descriptor purge failed");
            report.failed += 1;
        }
    }
}

/// Manual clear. Always runs; `all` ignores the configured age.
pub fn clear(
    config: &CacheConfig,
    root: &Path,
    all: bool,
    hook: &dyn ClearHook,
) -> Result<GcReport, ConfigError> {
    let max_age = if all { None } else { Some(config.clear_age()?) };
    Ok(collect(root, max_age, hook))
}

/// Periodic collection, gated by `cache.scheduled_gc`.
pub fn run_scheduled(
    config: &CacheConfig,
    root: &Path,
    descriptors: &dyn DescriptorStore,
    hook: &dyn ClearHook,
) -> Result<Option<GcReport>, ConfigError> {
    if !config.scheduled_gc {
        debug!("scheduled gc disabled");
        return Ok(None);
    }
    let mut report = collect(root, Some(config.clear_age()?), hook);
    purge_descriptors(descriptors, &mut report);
    Ok(Some(report))
}

/// Collection triggered by an external "cache cleared" signal, gated by
/// `cache.cleanup_on_cache_clear`.
pub fn on_cache_cleared(
    config: &CacheConfig,
    root: &Path,
    descriptors: &dyn DescriptorStore,
    hook: &dyn ClearHook,
) -> Result<Option<GcReport>, ConfigError> {
    if !config.cleanup_on_cache_clear {
        debug!("gc on cache clear disabled");
        return Ok(None);
    }
    let mut report = collect(root, Some(config.clear_age()?), hook);
    purge_descriptors(descriptors, &mut report);
    Ok(Some(report))
}
