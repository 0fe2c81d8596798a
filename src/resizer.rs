//! The shared context every addressing scheme borrows.
//!
//! A [`Resizer`] owns the read-only pieces of a request: settings, the base
//! directory relative paths resolve against, the image backend and the
//! artifact store. It holds no per-request state; everything a single
//! resolution needs travels in [`ResolvedOptions`].

use crate::cache::{ArtifactStore, relative_url_path};
use crate::config::Settings;
use crate::imaging::{ImageBackend, OutputFormat, RustBackend};
use crate::options::{self, CanonicalOptions, ResolvedOptions};
use crate::source::{self, source_identity};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct Resizer<B: ImageBackend = RustBackend> {
    settings: Settings,
    base_dir: PathBuf,
    backend: B,
    artifacts: ArtifactStore,
}

impl Resizer<RustBackend> {
    pub fn new(settings: Settings, base_dir: impl Into<PathBuf>) -> Self {
        Self::with_backend(settings, base_dir, RustBackend::new())
    }
}

impl<B: ImageBackend> Resizer<B> {
    pub fn with_backend(settings: Settings, base_dir: impl Into<PathBuf>, backend: B) -> Self {
        let base_dir = base_dir.into();
        let artifacts = ArtifactStore::new(base_dir.join(&settings.cache.directory));
        Self {
            settings,
            base_dir,
            backend,
            artifacts,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Directory of a store path from settings, resolved against the base.
    pub fn store_dir(&self, configured: &str) -> PathBuf {
        self.base_dir.join(configured)
    }

    pub fn resolve_source(&self, raw: &str) -> Option<PathBuf> {
        source::resolve_source(raw, &self.base_dir, self.settings.app_url())
    }

    pub fn resolve_options(
        &self,
        source: Option<&Path>,
        width: Option<i64>,
        height: Option<i64>,
        raw: &CanonicalOptions,
    ) -> ResolvedOptions {
        options::resolve(
            &self.settings,
            &source_identity(source),
            width,
            height,
            raw,
        )
    }

    /// The configured not-found image, when it exists on disk.
    pub fn not_found_image(&self) -> Option<PathBuf> {
        let configured = self.settings.not_found.image.as_deref()?;
        let path = self.base_dir.join(configured.trim_start_matches('/'));
        path.is_file().then_some(path)
    }

    /// Format used when there is no readable source to inherit one from.
    pub fn not_found_format(&self) -> OutputFormat {
        OutputFormat::parse(&self.settings.not_found.format)
            .or_else(|| {
                self.not_found_image()
                    .and_then(|p| self.backend.sniff_format(&p))
            })
            .unwrap_or(OutputFormat::Jpg)
    }

    /// Output format of a render.
    ///
    /// A pinned format wins, then an explicit `format` option, then the
    /// sniffed source format, then [`Self::not_found_format`].
    pub fn output_format(
        &self,
        source: Option<&Path>,
        options: &CanonicalOptions,
        pinned: Option<OutputFormat>,
    ) -> OutputFormat {
        pinned
            .or_else(|| {
                options
                    .get("format")
                    .and_then(Value::as_str)
                    .and_then(OutputFormat::parse)
            })
            .or_else(|| source.and_then(|p| self.backend.sniff_format(p)))
            .unwrap_or_else(|| self.not_found_format())
    }

    /// First-fetch URL: `{app_url}/imageresize/{key}.{ext}`.
    pub fn pending_url(&self, key: &str, extension: &str) -> String {
        format!("{}/imageresize/{key}.{extension}", self.settings.app_url())
    }

    /// URL of a materialized artifact.
    pub fn cache_url(&self, key: &str, extension: &str) -> String {
        format!(
            "{}{}/{}",
            self.settings.app_url(),
            self.settings.cache.url_prefix(),
            relative_url_path(key, extension)
        )
    }

    /// `{app_url}/imageresizestatic/{identifier}.{ext}`.
    pub fn permalink_url(&self, identifier: &str, extension: &str) -> String {
        format!(
            "{}/imageresizestatic/{identifier}.{extension}",
            self.settings.app_url()
        )
    }
}
