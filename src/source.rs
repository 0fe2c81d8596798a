//! Raw source strings → filesystem paths.
//!
//! Callers hand over whatever they have: a path relative to the site root, a
//! full URL pointing back at this site, or a JSON media object carrying a
//! `path` field. All of them end up as a path under the base directory.
//!
//! ```text
//! "media/cat.jpg"                          → {base}/media/cat.jpg
//! "/media/cat.jpg"                         → {base}/media/cat.jpg
//! "https://example.com:8080/media/a%20b.jpg" → {base}/media/a b.jpg
//! {"path":"media/cat.jpg","title":"Cat"}   → {base}/media/cat.jpg
//! ""                                       → no source
//! ```
//!
//! Only `%20` is decoded in URLs; a literal `+` stays a `+`.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct MediaObject {
    #[serde(default)]
    path: Option<String>,
}

/// Host part of `app_url`, without scheme, port or path.
pub fn host_of(app_url: &str) -> &str {
    let rest = app_url
        .strip_prefix("https://")
        .or_else(|| app_url.strip_prefix("http://"))
        .unwrap_or(app_url);
    let end = rest.find(['/', ':']).unwrap_or(rest.len());
    &rest[..end]
}

/// `[http[s]://]{host}[:port]/{rest}` → `rest`.
fn same_host_path<'a>(raw: &'a str, host: &str) -> Option<&'a str> {
    if host.is_empty() {
        return None;
    }
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    let rest = rest.strip_prefix(host)?;
    let rest = match rest.strip_prefix(':') {
        Some(port) => {
            let digits = port.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                return None;
            }
            &port[digits..]
        }
        None => rest,
    };
    rest.strip_prefix('/').filter(|p| !p.is_empty())
}

/// Resolve a raw source string against `base_dir`.
///
/// Returns `None` for empty input, which materializes as the not-found image.
pub fn resolve_source(raw: &str, base_dir: &Path, app_url: &str) -> Option<PathBuf> {
    let mut raw = raw.trim();

    let object_path;
    if raw.starts_with("{\"")
        && let Ok(object) = serde_json::from_str::<MediaObject>(raw)
        && let Some(path) = object.path.filter(|p| !p.is_empty())
    {
        object_path = path;
        raw = &object_path;
    }

    if raw.is_empty() {
        return None;
    }

    if let Some(rest) = same_host_path(raw, host_of(app_url)) {
        return Some(base_dir.join(rest.replace("%20", " ")));
    }

    let relative = raw.trim_matches('/');
    if relative.is_empty() {
        return None;
    }
    Some(base_dir.join(relative))
}

/// The string a source contributes to cache keys.
pub fn source_identity(source: Option<&Path>) -> String {
    source
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}
