//! # imageresize
//!
//! On-demand image resizing behind a content-addressed cache. Handing out a
//! URL never decodes a pixel; the first fetch of that URL does the work once
//! and every later request is served from disk.
//!
//! # Architecture: Resolve, Then Materialize
//!
//! ```text
//! 1. Resolve      (source, w, h, options)  →  canonical options + cache key  →  URL
//! 2. Materialize  URL fetch                →  decode, transform, encode      →  artifact on disk
//! ```
//!
//! Two addressing schemes share the second stage:
//!
//! - **Ephemeral** ([`ephemeral`]): the URL carries the cache key. A short-lived
//!   descriptor remembers what to render until the first fetch.
//! - **Permalink** ([`permalink`]): the URL carries a caller-chosen identifier
//!   bound to a source and options on first use and frozen afterwards.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`options`] | Aliases, presets, filters and overrides → canonical options and cache key |
//! | [`imaging`] | Geometry planning, modifier table, and the `image`-crate backend |
//! | [`materialize`] | Produces an artifact exactly once per key, with not-found fallback |
//! | [`cache`] | Sharded artifact paths and atomic temp-file-then-rename writes |
//! | [`ephemeral`] | Hash-addressed pending URLs backed by descriptors |
//! | [`permalink`] | Identifier-addressed, create-if-absent permalinks |
//! | [`store`] | Descriptor and permalink stores, in memory or on disk |
//! | [`gc`] | Age-based artifact deletion and empty-directory pruning |
//! | [`resizer`] | The shared context: settings, base directory, backend, artifacts |
//! | [`source`] | Raw source strings (paths, same-site URLs, media JSON) → paths |
//! | [`route`] | Request paths → addressing scheme |
//! | [`config`] | `imageresize.toml` loading, merging onto stock defaults, validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Disk Is the Source of Truth
//!
//! An artifact's path is a pure function of its cache key and extension:
//! `{root}/{k[0:3]}/{k[3:6]}/{k[6:9]}/{k}.{ext}`. "Has this been rendered?"
//! is answered by checking that one path. Descriptors and permalink records
//! only say *how* to render; they never claim that a render happened.
//!
//! ## Deterministic Keys
//!
//! Options are held in a `BTreeMap` and hashed as compact JSON, so key order
//! at the call site cannot change a key. Defaults are merged in before
//! hashing, which means changing a default in `imageresize.toml` yields new
//! keys instead of silently serving stale artifacts.
//!
//! ## No Locks, Atomic Renames
//!
//! Two requests for the same key may both render. Each writes its own temp
//! file and renames it into place, so readers see a whole file or nothing.
//! Redundant work is accepted; torn files are not.
//!
//! ## Explicit Override Accumulator
//!
//! Call-site options beat filter values and the not-found fallback. The
//! values that must win are carried explicitly in
//! [`options::ResolvedOptions::overrides`] and persisted with the descriptor,
//! not kept in mutable resizer state.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, resampling (Lanczos3) and encoding come from the `image` crate,
//! free-angle rotation from `imageproc`. No system libraries are needed.

pub mod cache;
pub mod config;
pub mod ephemeral;
pub mod gc;
pub mod imaging;
pub mod materialize;
pub mod options;
pub mod output;
pub mod permalink;
pub mod resizer;
pub mod route;
pub mod source;
pub mod store;

pub use resizer::Resizer;

#[cfg(test)]
pub(crate) mod test_helpers;
