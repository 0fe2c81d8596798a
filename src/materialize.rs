//! Materialization: turning a resolved request into a stored artifact.
//!
//! ```text
//! format ─► path ─► exists? ──yes──► done (no pixel work)
//!                      │ no
//!                      ▼
//!              identify source ──fail──► not-found substitution
//!                      │                        │
//!                      ▼                        ▼
//!              validate options (all fields, one error)
//!                      │
//!                      ▼
//!        plan geometry ─► background fill ─► render ─► atomic write
//! ```
//!
//! The artifact path depends only on the cache key and the output extension,
//! so two materializations of the same request write the same file. Running
//! one twice is safe: the second finds the file and returns without
//! decoding, unless the options say `cache: false`.
//!
//! ## Not-found substitution
//!
//! When the source is missing or unreadable the configured not-found image
//! is rendered instead (or a built-in placeholder when that is missing too),
//! with the not-found settings forced over the request:
//!
//! - `background` (removed instead when `transparent` is set)
//! - `format` (unless `auto`)
//! - `mode`, `quality`
//!
//! The request's explicit overrides are applied again afterwards, so a
//! caller who asked for `quality=10` still gets it. The cache key is kept.
//! A pinned format is kept too; without one only the extension may change,
//! and the cache is checked again under the new extension before rendering.

use crate::imaging::{
    BackendError, GeometryRequest, ImageBackend, Modifier, OutputFormat, RenderParams,
    SourceImage, SourceInfo, plan_geometry,
};
use crate::imaging::backend::placeholder_info;
use crate::imaging::modifiers::Insert;
use crate::options::{
    CanonicalOptions, TransformOptions, ValidationError, apply_overrides, cache_enabled,
};
use crate::resizer::Resizer;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Image backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Everything needed to produce one artifact.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeRequest<'a> {
    /// Resolved source path; `None` renders the not-found image.
    pub source: Option<&'a Path>,
    pub options: &'a CanonicalOptions,
    /// Explicit call-site values, re-applied after not-found substitution.
    pub overrides: &'a CanonicalOptions,
    pub key: &'a str,
    /// Output format decided when the URL was handed out.
    pub pinned_format: Option<OutputFormat>,
}

/// A stored artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Materialized {
    pub path: PathBuf,
    pub key: String,
    pub format: OutputFormat,
    /// `false` when the artifact already existed and nothing was rendered.
    pub written: bool,
}

/// Artifact bytes ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub path: PathBuf,
}

impl RenderedImage {
    /// `image/{mime}`.
    pub fn content_type(&self) -> String {
        self.format.content_type()
    }
}

impl Materialized {
    pub fn read(&self) -> io::Result<RenderedImage> {
        Ok(RenderedImage {
            bytes: fs::read(&self.path)?,
            format: self.format,
            path: self.path.clone(),
        })
    }
}

/// The source actually rendered, after any substitution.
struct Prepared {
    image: SourceImage,
    info: SourceInfo,
    options: CanonicalOptions,
    format: OutputFormat,
}

impl<B: ImageBackend> Resizer<B> {
    /// Produce the artifact for `request`, rendering only when needed.
    pub fn materialize(
        &self,
        request: &MaterializeRequest<'_>,
    ) -> Result<Materialized, MaterializeError> {
        let format = self.output_format(request.source, request.options, request.pinned_format);
        if let Some(hit) = self.cached(request, format) {
            return Ok(hit);
        }

        let prepared = self.prepare(request, format);
        let mut options = prepared.options;
        // Unpinned substitution may land on another extension
        if prepared.format != format
            && let Some(hit) = self.cached(request, prepared.format)
        {
            return Ok(hit);
        }
        let format = prepared.format;
        let path = self.artifacts().path_for(request.key, format.extension());

        let geometry = TransformOptions::from_options(&options)?;
        let plan = plan_geometry(&GeometryRequest {
            original: (prepared.info.width, prepared.info.height),
            width: geometry.width,
            height: geometry.height,
            constraints: geometry.constraints,
            mode: geometry.mode,
            upsize: geometry.upsize,
            fit_position: geometry.fit_position,
        });

        // Flattening encoders need something under transparent pixels
        if !format.supports_alpha()
            && (prepared.info.has_alpha || plan.needs_background)
            && !options.contains_key("background")
        {
            options.insert("background".into(), Value::from("#fff"));
        }
        let transform = TransformOptions::from_options(&options)?;
        let modifiers = self.resolve_inserts(transform.modifiers);

        debug!(
            key = request.key,
            strategy = ?plan.strategy,
            output = ?plan.output,
            modifiers = modifiers.len(),
            "rendering artifact"
        );
        let bytes = self.backend().render(&RenderParams {
            source: prepared.image,
            steps: plan.steps,
            modifiers,
            format,
            quality: transform.quality,
        })?;

        self.artifacts().write_atomic(&path, &bytes)?;
        info!(key = request.key, path = %path.display(), bytes = bytes.len(), "artifact written");

        Ok(Materialized {
            path,
            key: request.key.to_string(),
            format,
            written: true,
        })
    }

    fn cached(
        &self,
        request: &MaterializeRequest<'_>,
        format: OutputFormat,
    ) -> Option<Materialized> {
        let path = self.artifacts().path_for(request.key, format.extension());
        if !cache_enabled(request.options) || !path.is_file() {
            return None;
        }
        debug!(key = request.key, path = %path.display(), "artifact cache hit");
        Some(Materialized {
            path,
            key: request.key.to_string(),
            format,
            written: false,
        })
    }

    /// Identify the source, substituting the not-found image on failure.
    ///
    /// A pinned format survives substitution: the URL already promised it.
    fn prepare(&self, request: &MaterializeRequest<'_>, format: OutputFormat) -> Prepared {
        if let Some(source) = request.source {
            let image = SourceImage::File(source.to_path_buf());
            match self.backend().identify(&image) {
                Ok(info) => {
                    return Prepared {
                        image,
                        info,
                        options: request.options.clone(),
                        format,
                    };
                }
                Err(e) => {
                    warn!(
                        source = %source.display(),
                        error = %e,
                        "source unreadable, using not-found image"
                    );
                }
            }
        } else {
            debug!(key = request.key, "no source, using not-found image");
        }

        let mut options = request.options.clone();
        self.force_not_found_options(&mut options);
        apply_overrides(&mut options, request.overrides);

        let found = self.not_found_image().and_then(|path| {
            let image = SourceImage::File(path.clone());
            match self.backend().identify(&image) {
                Ok(info) => Some((path, image, info)),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "not-found image unreadable, using placeholder"
                    );
                    None
                }
            }
        });

        match found {
            Some((path, image, info)) => Prepared {
                format: self.output_format(Some(&path), &options, request.pinned_format),
                image,
                info,
                options,
            },
            None => Prepared {
                format: self.output_format(None, &options, request.pinned_format),
                image: SourceImage::Placeholder,
                info: placeholder_info(),
                options,
            },
        }
    }

    fn force_not_found_options(&self, options: &mut CanonicalOptions) {
        let nf = &self.settings().not_found;
        if nf.transparent {
            options.remove("background");
        } else {
            options.insert("background".into(), Value::from(nf.background.clone()));
        }
        if nf.format != "auto" {
            options.insert("format".into(), Value::from(nf.format.clone()));
        }
        options.insert("mode".into(), Value::from(nf.mode.clone()));
        options.insert("quality".into(), Value::from(nf.quality));
    }

    /// Overlay paths are relative to the base directory.
    fn resolve_inserts(&self, modifiers: Vec<Modifier>) -> Vec<Modifier> {
        modifiers
            .into_iter()
            .map(|m| match m {
                Modifier::Insert(insert) => Modifier::Insert(Insert {
                    path: self.base_dir().join(&insert.path),
                    ..insert
                }),
                other => other,
            })
            .collect()
    }
}
