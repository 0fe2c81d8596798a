//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the three operations every backend must
//! support: identify, sniff_format, and render.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate with `imageproc` for free-angle rotation.

use super::params::{OutputFormat, RenderParams, SourceImage, SourceInfo};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Dimensions of the built-in placeholder image.
pub const PLACEHOLDER_DIMENSIONS: (u32, u32) = (512, 512);

/// Header facts for the built-in placeholder.
pub fn placeholder_info() -> SourceInfo {
    SourceInfo {
        width: PLACEHOLDER_DIMENSIONS.0,
        height: PLACEHOLDER_DIMENSIONS.1,
        format: Some(OutputFormat::Png),
        has_alpha: false,
    }
}

/// Trait for image processing backends.
///
/// Every backend must implement all three operations so the materializer is
/// backend-agnostic. `Sync` because garbage collection and the CLI share a
/// resizer across rayon workers.
pub trait ImageBackend: Sync {
    /// Read dimensions, container format and alpha without decoding pixels.
    fn identify(&self, source: &SourceImage) -> Result<SourceInfo, BackendError>;

    /// Detect the container format from file contents. `None` when the file
    /// is unreadable or the format is not one we encode.
    fn sniff_format(&self, path: &Path) -> Option<OutputFormat>;

    /// Decode, apply geometry steps then modifiers, and encode.
    fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError>;
}
