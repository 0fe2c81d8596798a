//! Request path → addressing scheme.
//!
//! ```text
//! /imageresize/{key}.{ext}              → Route::Ephemeral
//! /imageresizestatic/{identifier}.{ext} → Route::Permalink (identifier may contain '/')
//! ```
//!
//! Full URLs are accepted too; scheme, host and query string are ignored.
//! The extension is informational: the artifact format is decided by the
//! descriptor or permalink record, not by the request.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Ephemeral { key: String, extension: String },
    Permalink { identifier: String, extension: String },
}

fn strip_origin(request: &str) -> &str {
    let Some((_, rest)) = request.split_once("://") else {
        return request;
    };
    match rest.find('/') {
        Some(i) => &rest[i..],
        None => "",
    }
}

fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let last_segment = stem.rsplit('/').next().unwrap_or(stem);
    (!last_segment.is_empty() && !ext.is_empty() && !ext.contains('/')).then_some((stem, ext))
}

/// Parse a request path or URL.
pub fn parse(request: &str) -> Option<Route> {
    let path = strip_origin(request.trim());
    let path = path.split(['?', '#']).next().unwrap_or(path);
    let path = path.trim_start_matches('/');

    if let Some(name) = path.strip_prefix("imageresize/") {
        let (key, extension) = split_extension(name)?;
        if key.contains('/') {
            return None;
        }
        return Some(Route::Ephemeral {
            key: key.to_string(),
            extension: extension.to_string(),
        });
    }

    if let Some(name) = path.strip_prefix("imageresizestatic/") {
        let (identifier, extension) = split_extension(name)?;
        return Some(Route::Permalink {
            identifier: identifier.to_string(),
            extension: extension.to_string(),
        });
    }

    None
}
