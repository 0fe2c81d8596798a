//! Identifier-addressed, durable resizes.
//!
//! A permalink binds a caller-chosen identifier to a source and an option
//! set the first time the identifier is seen. Later calls with the same
//! identifier get the same URL and the same image, whatever source or options
//! they pass: the record is frozen on first write. Only [`Permalinks::reset`]
//! releases identifiers.
//!
//! The artifact key mixes the identifier with the frozen options:
//! `sha256(identifier + ":permalink:" + canonical_json(options))`.

use crate::cache::{relative_url_path, sha256_hex};
use crate::imaging::{ImageBackend, OutputFormat};
use crate::materialize::{MaterializeError, MaterializeRequest, RenderedImage};
use crate::options::{CanonicalOptions, canonical_json};
use crate::resizer::Resizer;
use crate::store::PermalinkStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A persisted permalink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permalink {
    pub identifier: String,
    pub image: Option<PathBuf>,
    /// Full content type, e.g. `image/jpeg`.
    pub mime_type: String,
    pub extension: String,
    /// Options frozen at creation.
    pub options: CanonicalOptions,
    /// Artifact path relative to the cache root, set on first render.
    pub path: Option<String>,
    pub resized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Permalink {
    /// Cache key of this permalink's artifact.
    pub fn artifact_key(&self) -> String {
        sha256_hex(format!(
            "{}:permalink:{}",
            self.identifier,
            canonical_json(&self.options)
        ))
    }

    pub fn format(&self) -> Option<OutputFormat> {
        OutputFormat::parse(&self.extension)
    }
}

/// `"{scope}/{kind}/{slug}"`, or `"{kind}/{slug}"` without a scope.
///
/// `kind` is lowercased, so `identifier_for(Some("blog"), "Post", "hello")`
/// is `"blog/post/hello"`.
pub fn identifier_for(scope: Option<&str>, kind: &str, slug: &str) -> String {
    let kind = kind.to_lowercase();
    match scope {
        Some(scope) => format!("{scope}/{kind}/{slug}"),
        None => format!("{kind}/{slug}"),
    }
}

/// The permalink addressing scheme over a resizer and a permalink store.
pub struct Permalinks<'a, B: ImageBackend, S: PermalinkStore> {
    resizer: &'a Resizer<B>,
    store: &'a S,
}

impl<'a, B: ImageBackend, S: PermalinkStore> Permalinks<'a, B, S> {
    pub fn new(resizer: &'a Resizer<B>, store: &'a S) -> Self {
        Self { resizer, store }
    }

    fn url(&self, record: &Permalink) -> String {
        self.resizer
            .permalink_url(&record.identifier, &record.extension)
    }

    /// URL bound to `identifier`, creating the permalink if it is new.
    ///
    /// `None` when the store is unavailable or fails.
    pub fn resolve(
        &self,
        identifier: &str,
        source: &str,
        width: Option<i64>,
        height: Option<i64>,
        options: &CanonicalOptions,
    ) -> Option<String> {
        if !self.store.is_available() {
            debug!(identifier, "permalink store unavailable");
            return None;
        }
        let identifier = identifier.trim_matches('/');

        match self.store.find(identifier) {
            Ok(Some(existing)) => {
                debug!(identifier, "permalink exists, options frozen");
                return Some(self.url(&existing));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(identifier, error = %e, "permalink lookup failed");
                return None;
            }
        }

        let image = self.resizer.resolve_source(source);
        let mut options = options.clone();
        options.remove("permalink");
        let resolved = self
            .resizer
            .resolve_options(image.as_deref(), width, height, &options);
        let format = self
            .resizer
            .output_format(image.as_deref(), &resolved.options, None);

        let now = Utc::now();
        let record = Permalink {
            identifier: identifier.to_string(),
            image,
            mime_type: format.content_type(),
            extension: format.extension().to_string(),
            options: resolved.options,
            path: None,
            resized_at: None,
            created_at: now,
            updated_at: now,
        };

        match self.store.create_if_absent(record) {
            Ok(stored) => {
                info!(identifier, extension = %stored.extension, "permalink created");
                Some(self.url(&stored))
            }
            Err(e) => {
                warn!(identifier, error = %e, "permalink creation failed");
                None
            }
        }
    }

    /// Serve the permalink's artifact, materializing it on first use.
    ///
    /// `Ok(None)` when the store is unavailable or the identifier is unknown.
    pub fn render(&self, identifier: &str) -> Result<Option<RenderedImage>, MaterializeError> {
        if !self.store.is_available() {
            return Ok(None);
        }
        let identifier = identifier.trim_matches('/');
        let record = match self.store.find(identifier) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(e) => {
                warn!(identifier, error = %e, "permalink lookup failed");
                return Ok(None);
            }
        };

        let root = self.resizer.artifacts().root();
        if let Some(path) = &record.path {
            let absolute = root.join(path);
            // The stored file's own extension names what is served
            if absolute.is_file()
                && let Some(format) = absolute
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(OutputFormat::parse)
            {
                debug!(identifier, "serving stored permalink");
                return Ok(Some(RenderedImage {
                    bytes: std::fs::read(&absolute)?,
                    format,
                    path: absolute,
                }));
            }
        }

        let key = record.artifact_key();
        let empty = CanonicalOptions::new();
        let materialized = self.resizer.materialize(&MaterializeRequest {
            source: record.image.as_deref(),
            options: &record.options,
            overrides: &empty,
            key: &key,
            pinned_format: record.format(),
        })?;

        let relative = relative_url_path(&key, materialized.format.extension());
        if let Err(e) = self.store.mark_resized(identifier, &relative, Utc::now()) {
            warn!(identifier, error = %e, "could not record permalink resize");
        }
        Ok(Some(materialized.read()?))
    }

    /// Delete every permalink. Returns 0 when the store is unavailable.
    pub fn reset(&self) -> usize {
        if !self.store.is_available() {
            return 0;
        }
        match self.store.reset() {
            Ok(count) => {
                info!(count, "permalinks reset");
                count
            }
            Err(e) => {
                warn!(error = %e, "permalink reset failed");
                0
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
    use crate::store::MemoryPermalinkStore;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Resizer<MockBackend>) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("media")).unwrap();
        fs::write(tmp.path().join("media/a.jpg"), b"jpeg").unwrap();
        fs::write(tmp.path().join("media/b.jpg"), b"jpeg").unwrap();
        let mut settings = Settings::default();
        settings.app_url = "https://example.com".into();
        let resizer = Resizer::with_backend(settings, tmp.path(), MockBackend::new());
        (tmp, resizer)
    }

    #[test]
    fn identifiers() {
        assert_eq!(identifier_for(Some("blog"), "Post", "hello"), "blog/post/hello");
        assert_eq!(identifier_for(None, "Gallery", "x"), "gallery/x");
    }

    #[test]
    fn resolve_creates_without_pixel_work() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);

        let url = links
            .resolve("/blog/post/a/", "media/a.jpg", Some(100), None, &CanonicalOptions::new())
            .unwrap();
        assert_eq!(url, "https://example.com/imageresizestatic/blog/post/a.jpg");
        assert_eq!(resizer.backend().render_count(), 0);

        let record = store.find("blog/post/a").unwrap().unwrap();
        assert_eq!(record.mime_type, "image/jpeg");
        assert_eq!(record.options["width"], json!(100));
        assert_eq!(record.path, None);
    }

    #[test]
    fn first_writer_wins() {
        let (tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);

        let a = links
            .resolve("x", "media/a.jpg", Some(100), None, &CanonicalOptions::new())
            .unwrap();
        let b = links
            .resolve(
                "x",
                "media/b.jpg",
                Some(300),
                None,
                &options_from([("format", json!("png"))]),
            )
            .unwrap();
        assert_eq!(a, b);

        let record = store.find("x").unwrap().unwrap();
        assert_eq!(record.image, Some(tmp.path().join("media/a.jpg")));
        assert_eq!(record.options["width"], json!(100));
    }

    #[test]
    fn permalink_option_is_not_stored() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        links
            .resolve("x", "media/a.jpg", None, None, &options_from([("permalink", json!("x"))]))
            .unwrap();
        assert!(!store.find("x").unwrap().unwrap().options.contains_key("permalink"));
    }

    #[test]
    fn render_materializes_once_and_records_path() {
        let (tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        links
            .resolve("x", "media/a.jpg", Some(100), None, &CanonicalOptions::new())
            .unwrap();

        let first = links.render("x").unwrap().unwrap();
        let record = store.find("x").unwrap().unwrap();
        let key = record.artifact_key();
        assert_eq!(record.path, Some(relative_url_path(&key, "jpg")));
        assert!(record.resized_at.is_some());
        assert!(first.path.starts_with(tmp.path()));

        let second = links.render("x").unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(resizer.backend().render_count(), 1);
    }

    #[test]
    fn render_rebuilds_deleted_artifact() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        links
            .resolve("x", "media/a.jpg", None, None, &CanonicalOptions::new())
            .unwrap();

        let first = links.render("x").unwrap().unwrap();
        fs::remove_file(&first.path).unwrap();
        links.render("x").unwrap().unwrap();
        assert_eq!(resizer.backend().render_count(), 2);
    }

    #[test]
    fn vanished_source_keeps_the_recorded_format() {
        let (tmp, _) = setup();
        let mut settings = Settings::default();
        settings.app_url = "https://example.com".into();
        settings.not_found.format = "png".into();
        let resizer = Resizer::with_backend(settings, tmp.path(), MockBackend::new());
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        let url = links
            .resolve("x", "media/a.jpg", Some(100), None, &CanonicalOptions::new())
            .unwrap();
        assert!(url.ends_with("/x.jpg"));

        fs::remove_file(tmp.path().join("media/a.jpg")).unwrap();
        let first = links.render("x").unwrap().unwrap();
        let second = links.render("x").unwrap().unwrap();

        let record = store.find("x").unwrap().unwrap();
        assert_eq!(first.content_type(), record.mime_type);
        assert_eq!(first.path.extension().unwrap(), "jpg");
        assert_eq!(record.path, Some(relative_url_path(&record.artifact_key(), "jpg")));
        assert_eq!(first, second);
        assert_eq!(resizer.backend().render_count(), 1);
    }

    #[test]
    fn render_uses_frozen_image() {
        let (tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        links
            .resolve("x", "media/a.jpg", None, None, &CanonicalOptions::new())
            .unwrap();
        links
            .resolve("x", "media/b.jpg", None, None, &CanonicalOptions::new())
            .unwrap();
        links.render("x").unwrap();

        match resizer.backend().last_render() {
            Some(RecordedOp::Render { source, .. }) => {
                assert_eq!(source, tmp.path().join("media/a.jpg").to_string_lossy());
            }
            other => panic!("expected render, got {other:?}"),
        }
    }

    #[test]
    fn unknown_identifier_renders_nothing() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        assert_eq!(links.render("nope").unwrap(), None);
    }

    #[test]
    fn unavailable_store_is_a_no_op() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::unavailable();
        let links = Permalinks::new(&resizer, &store);
        assert_eq!(
            links.resolve("x", "media/a.jpg", None, None, &CanonicalOptions::new()),
            None
        );
        assert_eq!(links.render("x").unwrap(), None);
        assert_eq!(links.reset(), 0);
    }

    #[test]
    fn reset_releases_identifiers() {
        let (_tmp, resizer) = setup();
        let store = MemoryPermalinkStore::new();
        let links = Permalinks::new(&resizer, &store);
        links
            .resolve("x", "media/a.jpg", None, None, &CanonicalOptions::new())
            .unwrap();
        assert_eq!(links.reset(), 1);

        links
            .resolve("x", "media/b.jpg", None, None, &CanonicalOptions::new())
            .unwrap();
        let record = store.find("x").unwrap().unwrap();
        assert!(record.image.unwrap().ends_with("b.jpg"));
    }

    #[test]
    fn artifact_key_depends_on_identifier_and_options() {
        let now = Utc::now();
        let record = |id: &str, q: i64| Permalink {
            identifier: id.into(),
            image: None,
            mime_type: "image/jpeg".into(),
            extension: "jpg".into(),
            options: options_from([("quality", json!(q))]),
            path: None,
            resized_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(
            record("a", 1).artifact_key(),
            sha256_hex(r#"a:permalink:{"quality":1}"#)
        );
        assert_ne!(record("a", 1).artifact_key(), record("b", 1).artifact_key());
        assert_ne!(record("a", 1).artifact_key(), record("a", 2).artifact_key());
    }
}
