//! Hash-addressed, lazily materialized resizes.
//!
//! `resolve` never touches pixels. It either finds the artifact on disk and
//! returns its permanent URL, or stores a descriptor and returns a pending
//! URL. The first fetch of the pending URL materializes from the descriptor;
//! after that the artifact on disk answers every request.
//!
//! ```text
//! resolve(src, w, h, opts)
//!   ├─ artifact exists → {app_url}/storage/imageresizecache/3a7/bd3/e23/{key}.jpg
//!   └─ otherwise       → remember(image_resize_{key}) → {app_url}/imageresize/{key}.jpg
//!
//! fetch(key)
//!   ├─ descriptor found   → materialize(descriptor)
//!   └─ missing / expired  → materialize(not-found image)
//! ```

use crate::cache::is_cache_key;
use crate::imaging::{ImageBackend, OutputFormat};
use crate::materialize::{MaterializeError, MaterializeRequest, RenderedImage};
use crate::options::{CanonicalOptions, cache_key};
use crate::resizer::Resizer;
use crate::store::{DescriptorStore, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Prefix of descriptor store keys.
pub const DESCRIPTOR_PREFIX: &str = "image_resize_";

/// Output format decided at resolve time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatCache {
    pub mime: String,
    pub extension: String,
}

impl FormatCache {
    pub fn of(format: OutputFormat) -> Self {
        Self {
            mime: format.mime().to_string(),
            extension: format.extension().to_string(),
        }
    }

    pub fn format(&self) -> Option<OutputFormat> {
        OutputFormat::parse(&self.extension)
    }
}

/// What a pending URL needs to materialize on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemeralDescriptor {
    pub image: Option<PathBuf>,
    pub options: CanonicalOptions,
    #[serde(default)]
    pub overrides: CanonicalOptions,
    pub format_cache: Option<FormatCache>,
}

pub fn descriptor_key(key: &str) -> String {
    format!("{DESCRIPTOR_PREFIX}{key}")
}

/// The ephemeral addressing scheme over a resizer and a descriptor store.
pub struct EphemeralCache<'a, B: ImageBackend, D: DescriptorStore> {
    resizer: &'a Resizer<B>,
    store: &'a D,
}

impl<'a, B: ImageBackend, D: DescriptorStore> EphemeralCache<'a, B, D> {
    pub fn new(resizer: &'a Resizer<B>, store: &'a D) -> Self {
        Self { resizer, store }
    }

    /// URL for `source` resized with `options`. Does no pixel work.
    pub fn resolve(
        &self,
        source: &str,
        width: Option<i64>,
        height: Option<i64>,
        options: &CanonicalOptions,
    ) -> Result<String, StoreError> {
        let image = self.resizer.resolve_source(source);
        let resolved = self
            .resizer
            .resolve_options(image.as_deref(), width, height, options);
        let format = self
            .resizer
            .output_format(image.as_deref(), &resolved.options, None);
        let extension = format.extension();

        if self.resizer.artifacts().exists(&resolved.key, extension) {
            debug!(key = %resolved.key, "artifact exists, returning cache url");
            return Ok(self.resizer.cache_url(&resolved.key, extension));
        }

        let ttl = self
            .resizer
            .settings()
            .cache
            .descriptor_ttl()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.store.remember(
            &descriptor_key(&resolved.key),
            ttl,
            &EphemeralDescriptor {
                image,
                options: resolved.options,
                overrides: resolved.overrides,
                format_cache: Some(FormatCache::of(format)),
            },
        )?;
        debug!(key = %resolved.key, "descriptor stored, returning pending url");
        Ok(self.resizer.pending_url(&resolved.key, extension))
    }

    /// Serve the artifact behind a pending URL, materializing it if needed.
    ///
    /// A malformed key or a missing descriptor renders the not-found image.
    pub fn fetch(&self, key: &str) -> Result<RenderedImage, MaterializeError> {
        let empty = CanonicalOptions::new();
        let (key, descriptor) = if is_cache_key(key) {
            (key.to_string(), self.descriptor(key))
        } else {
            warn!(key, "malformed cache key");
            (cache_key("", &empty), None)
        };

        let materialized = match &descriptor {
            Some(d) => self.resizer.materialize(&MaterializeRequest {
                source: d.image.as_deref(),
                options: &d.options,
                overrides: &d.overrides,
                key: &key,
                pinned_format: d.format_cache.as_ref().and_then(FormatCache::format),
            })?,
            None => self.resizer.materialize(&MaterializeRequest {
                source: None,
                options: &empty,
                overrides: &empty,
                key: &key,
                pinned_format: None,
            })?,
        };
        Ok(materialized.read()?)
    }

    fn descriptor(&self, key: &str) -> Option<EphemeralDescriptor> {
        match self.store.get(&descriptor_key(key)) {
            Ok(Some(d)) => Some(d),
            Ok(None) => {
                debug!(key, "no descriptor, serving not-found image");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "descriptor lookup failed, serving not-found image");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::options::options_from;
    use crate::store::MemoryDescriptorStore;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Resizer<MockBackend>) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("media")).unwrap();
        fs::write(tmp.path().join("media/a.jpg"), b"jpeg").unwrap();
        let mut settings = Settings::default();
        settings.app_url = "https://example.com".into();
        let resizer = Resizer::with_backend(settings, tmp.path(), MockBackend::new());
        (tmp, resizer)
    }

    fn key_of(url: &str) -> &str {
        let file = url.rsplit('/').next().unwrap();
        file.split('.').next().unwrap()
    }

    #[test]
    fn first_resolve_returns_pending_url_without_pixel_work() {
        let (_tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let url = cache
            .resolve("media/a.jpg", Some(200), None, &CanonicalOptions::new())
            .unwrap();
        assert!(url.starts_with("https://example.com/imageresize/"));
        assert!(url.ends_with(".jpg"));
        assert_eq!(store.len(), 1);
        assert_eq!(resizer.backend().render_count(), 0);
    }

    #[test]
    fn resolve_is_stable_and_switches_to_cache_url_after_fetch() {
        let (_tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);
        let opts = options_from([("mode", json!("auto"))]);

        let first = cache.resolve("media/a.jpg", Some(200), None, &opts).unwrap();
        let second = cache.resolve("media/a.jpg", Some(200), None, &opts).unwrap();
        assert_eq!(first, second);

        let key = key_of(&first).to_string();
        let image = cache.fetch(&key).unwrap();
        assert_eq!(image.content_type(), "image/jpeg");

        let third = cache.resolve("media/a.jpg", Some(200), None, &opts).unwrap();
        assert_eq!(key_of(&third), key);
        assert!(third.contains("/storage/imageresizecache/"));
    }

    #[test]
    fn fetch_uses_descriptor_options() {
        let (tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let url = cache
            .resolve("/media/a.jpg", Some(200), None, &options_from([("invert", json!(true))]))
            .unwrap();
        cache.fetch(key_of(&url)).unwrap();

        match resizer.backend().last_render() {
            Some(RecordedOp::Render {
                source, modifiers, ..
            }) => {
                assert_eq!(source, tmp.path().join("media/a.jpg").to_string_lossy());
                assert_eq!(modifiers, vec![crate::imaging::Modifier::Invert]);
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn repeated_fetch_renders_once() {
        let (_tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let url = cache
            .resolve("media/a.jpg", Some(100), Some(100), &CanonicalOptions::new())
            .unwrap();
        let a = cache.fetch(key_of(&url)).unwrap();
        let b = cache.fetch(key_of(&url)).unwrap();
        assert_eq!(a, b);
        assert_eq!(resizer.backend().render_count(), 1);
    }

    #[test]
    fn source_deleted_after_resolve_keeps_url_format() {
        let (tmp, _) = setup();
        let mut settings = Settings::default();
        settings.app_url = "https://example.com".into();
        settings.not_found.format = "png".into();
        let resizer = Resizer::with_backend(settings, tmp.path(), MockBackend::new());
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let url = cache
            .resolve("media/a.jpg", Some(100), None, &CanonicalOptions::new())
            .unwrap();
        assert!(url.ends_with(".jpg"));
        fs::remove_file(tmp.path().join("media/a.jpg")).unwrap();

        let a = cache.fetch(key_of(&url)).unwrap();
        let b = cache.fetch(key_of(&url)).unwrap();
        assert_eq!(a.content_type(), "image/jpeg");
        assert_eq!(a.path.extension().unwrap(), "jpg");
        assert_eq!(a, b);
        assert_eq!(resizer.backend().render_count(), 1);
    }

    #[test]
    fn missing_descriptor_serves_not_found() {
        let (_tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let key = "0".repeat(64);
        let image = cache.fetch(&key).unwrap();
        assert!(image.path.ends_with(format!("000/000/000/{key}.jpg")));
        match resizer.backend().last_render() {
            Some(RecordedOp::Render { source, quality, .. }) => {
                assert_eq!(source, "<placeholder>");
                assert_eq!(quality, 65);
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn malformed_key_serves_not_found() {
        let (_tmp, resizer) = setup();
        let store = MemoryDescriptorStore::new();
        let cache = EphemeralCache::new(&resizer, &store);

        let image = cache.fetch("../../etc/passwd").unwrap();
        assert!(image.path.starts_with(resizer.artifacts().root()));
    }

    #[test]
    fn descriptor_serializes_with_prefix_key() {
        assert_eq!(descriptor_key("abc"), "image_resize_abc");
        let d = EphemeralDescriptor {
            image: None,
            options: options_from([("quality", json!(60))]),
            overrides: CanonicalOptions::new(),
            format_cache: Some(FormatCache::of(OutputFormat::Jpg)),
        };
        let value = serde_json::to_value(&d).unwrap();
        assert_eq!(value["image"], json!(null));
        assert_eq!(value["format_cache"], json!({"mime": "jpeg", "extension": "jpg"}));
    }
}
