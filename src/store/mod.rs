//! Persistence for descriptors and permalinks.
//!
//! Both stores are small key → JSON record maps with one atomic primitive
//! each:
//!
//! | Store | Primitive | Memory | File |
//! |---|---|---|---|
//! | [`DescriptorStore`] | put-if-absent with TTL | `Mutex<HashMap>` | temp file + rename |
//! | [`PermalinkStore`] | create-if-absent | `Mutex<HashMap>` | temp file + `hard_link` |
//!
//! `hard_link` fails when the destination exists, which gives the file store
//! the same "exactly one insert wins" guarantee a unique index would.

pub mod descriptor;
pub mod permalink;

pub use descriptor::{DescriptorStore, FileDescriptorStore, MemoryDescriptorStore};
pub use permalink::{FilePermalinkStore, MemoryPermalinkStore, PermalinkStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Lock a mutex, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
