//! Option resolution and validation.
//!
//! Turns whatever a caller passed (aliases, deprecated presets, a filter
//! code, explicit values) into one canonical option map and the cache key
//! derived from it.
//!
//! ## Resolution order
//!
//! 1. Aliases: `fill` → `background`, `grayscale` → `greyscale`,
//!    `colourise` → `colorize`. Null values are dropped.
//! 2. Deprecated `preset`: `low` / `medium` / `high`.
//! 3. Width and height arguments; non-positive values mean "absent".
//! 4. Snapshot the explicit values as the *override accumulator*.
//! 5. Apply the rules of the first filter whose code matches `filter`.
//! 6. Re-apply the overrides, so explicit values beat filter values.
//! 7. Lay everything over the settings defaults (`driver`, `mode`,
//!    `quality`, `format`).
//! 8. `key = sha256(source + canonical_json(options))`.
//!
//! Canonical JSON is compact `serde_json` output of a sorted map, so two
//! option sets that differ only in key order hash identically.
//!
//! Resolution never fails. Values are checked later, all at once, by
//! [`TransformOptions::from_options`].

use crate::cache::sha256_hex;
use crate::config::Settings;
use crate::imaging::modifiers::{self, as_bool, as_int};
use crate::imaging::{Constraints, FitPosition, Mode, Modifier, OutputFormat, Quality};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Option name → JSON value, sorted by name.
pub type CanonicalOptions = BTreeMap<String, Value>;

const ALIASES: &[(&str, &str)] = &[
    ("fill", "background"),
    ("grayscale", "greyscale"),
    ("colourise", "colorize"),
];

/// Largest accepted width/height/min/max value.
pub const MAX_DIMENSION: i64 = 10_000;

/// Result of resolving a request's options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedOptions {
    /// Full option set, defaults included. This is what gets hashed.
    pub options: CanonicalOptions,
    /// Explicit call-site values, re-applied after any later substitution.
    pub overrides: CanonicalOptions,
    /// Lowercase hex SHA-256 cache key.
    pub key: String,
}

/// Build a canonical option map from `(name, value)` pairs.
pub fn options_from<I, K>(pairs: I) -> CanonicalOptions
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Compact JSON with sorted keys.
pub fn canonical_json(options: &CanonicalOptions) -> String {
    Value::Object(options.clone().into_iter().collect()).to_string()
}

/// `sha256(source + canonical_json(options))` as lowercase hex.
pub fn cache_key(source: &str, options: &CanonicalOptions) -> String {
    sha256_hex(format!("{source}{}", canonical_json(options)))
}

/// Write every override over `options`.
pub fn apply_overrides(options: &mut CanonicalOptions, overrides: &CanonicalOptions) {
    for (name, value) in overrides {
        options.insert(name.clone(), value.clone());
    }
}

fn apply_aliases(options: &mut CanonicalOptions) {
    for (alias, canonical) in ALIASES {
        if let Some(value) = options.remove(*alias) {
            options.insert(canonical.to_string(), value);
        }
    }
}

fn apply_preset(options: &mut CanonicalOptions) {
    let preset = options.get("preset").and_then(Value::as_str).map(str::to_owned);
    match preset.as_deref() {
        Some("low") => {
            options.insert("format".into(), "jpg".into());
            options.insert("quality".into(), 50.into());
        }
        Some("medium") => {
            options.insert("format".into(), "jpg".into());
            options.insert("quality".into(), 80.into());
        }
        Some("high") => {
            options.remove("format");
            options.insert("quality".into(), 100.into());
        }
        _ => {}
    }
}

/// Drop width/height that are not positive integers-or-numeric-strings.
fn normalise_dimension(options: &mut CanonicalOptions, name: &str) {
    if let Some(value) = options.get(name)
        && as_int(value).is_some_and(|n| n <= 0)
    {
        options.remove(name);
    }
}

/// Steps 1-3 of resolution: everything the caller said, cleaned up.
fn explicit_options(
    width: Option<i64>,
    height: Option<i64>,
    raw: &CanonicalOptions,
) -> CanonicalOptions {
    let mut options: CanonicalOptions = raw
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    apply_aliases(&mut options);
    apply_preset(&mut options);

    if let Some(w) = width {
        options.insert("width".into(), w.into());
    }
    if let Some(h) = height {
        options.insert("height".into(), h.into());
    }
    for name in ["width", "height"] {
        normalise_dimension(&mut options, name);
    }
    options
}

/// Resolve a request into canonical options and a cache key.
///
/// `source` is the identity string of the source image (its resolved path,
/// or empty when there is none).
pub fn resolve(
    settings: &Settings,
    source: &str,
    width: Option<i64>,
    height: Option<i64>,
    raw: &CanonicalOptions,
) -> ResolvedOptions {
    let mut options = explicit_options(width, height, raw);
    let overrides = options.clone();

    let filter = options
        .get("filter")
        .and_then(Value::as_str)
        .and_then(|code| settings.filter(code));
    if let Some(filter) = filter {
        for (name, value) in filter.values() {
            options.insert(name, value);
        }
        for name in ["width", "height"] {
            normalise_dimension(&mut options, name);
        }
    }

    apply_overrides(&mut options, &overrides);

    let mut merged = defaults(settings);
    apply_overrides(&mut merged, &options);

    let key = cache_key(source, &merged);
    ResolvedOptions {
        options: merged,
        overrides,
        key,
    }
}

fn defaults(settings: &Settings) -> CanonicalOptions {
    options_from([
        ("driver", Value::from(settings.driver.clone())),
        ("mode", Value::from(settings.mode.clone())),
        ("quality", Value::from(settings.quality)),
        ("format", Value::from(settings.format.clone())),
    ])
}

// =============================================================================
// Validation
// =============================================================================

/// One rejected option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.message)
    }
}

/// Every invalid option of a request, reported together.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cannot process image: {}", summarize(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn fields(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.field.as_str()).collect()
    }
}

/// The typed, validated view of a canonical option set.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub mode: Mode,
    /// `None` means `auto`: keep the source format.
    pub format: Option<OutputFormat>,
    pub quality: Quality,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub constraints: Constraints,
    pub upsize: bool,
    pub fit_position: FitPosition,
    /// `false` forces a re-render even when the artifact exists.
    pub cache: bool,
    /// Modifiers in application order.
    pub modifiers: Vec<Modifier>,
}

fn parse_mode(value: &Value) -> Result<Mode, String> {
    value
        .as_str()
        .and_then(Mode::parse)
        .ok_or_else(|| "must be one of: auto, contain, cover, crop, stretch".into())
}

fn parse_format(value: &Value) -> Result<Option<OutputFormat>, String> {
    match value.as_str() {
        Some("auto") => Ok(None),
        Some(s) => OutputFormat::parse(s)
            .map(Some)
            .ok_or_else(|| "must be one of: auto, jpg, png, webp, bmp, gif, ico".into()),
        None => Err("must be a string".into()),
    }
}

fn parse_quality(value: &Value) -> Result<Quality, String> {
    match as_int(value) {
        Some(q) if (1..=100).contains(&q) => Ok(Quality::new(q as u32)),
        Some(_) => Err("must be between 1 and 100".into()),
        None => Err("must be an integer".into()),
    }
}

/// Non-positive dimensions mean "absent".
fn parse_dimension(value: &Value) -> Result<Option<u32>, String> {
    match as_int(value) {
        Some(n) if n <= 0 => Ok(None),
        Some(n) if n <= MAX_DIMENSION => Ok(Some(n as u32)),
        Some(_) => Err(format!("must be at most {MAX_DIMENSION}")),
        None => Err("must be an integer".into()),
    }
}

fn parse_flag(value: &Value) -> Result<bool, String> {
    as_bool(value).ok_or_else(|| "must be a boolean".into())
}

fn parse_fit_position(value: &Value) -> Result<FitPosition, String> {
    value
        .as_str()
        .and_then(FitPosition::parse)
        .ok_or_else(|| format!("must be one of: {}", FitPosition::NAMES.join(", ")))
}

/// Check one non-modifier option. Unknown names are accepted untouched.
fn check_field(name: &str, value: &Value) -> Result<(), String> {
    match name {
        "mode" => parse_mode(value).map(drop),
        "format" => parse_format(value).map(drop),
        "quality" => parse_quality(value).map(drop),
        "width" | "height" | "min_width" | "min_height" | "max_width" | "max_height" => {
            parse_dimension(value).map(drop)
        }
        "upsize" | "cache" => parse_flag(value).map(drop),
        "fit_position" => parse_fit_position(value).map(drop),
        _ => Ok(()),
    }
}

/// Validate a value a filter rule would write, with the same rules a
/// request is held to.
pub fn check_filter_value(name: &str, value: &Value) -> Result<(), String> {
    if modifiers::is_modifier(name) {
        modifiers::parse(name, value).map(drop)
    } else {
        check_field(name, value)
    }
}

impl TransformOptions {
    /// Parse and validate every option, collecting all failures.
    pub fn from_options(options: &CanonicalOptions) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();

        let mut field = |name: &str, value: Option<&Value>| -> Option<Value> {
            let value = value?;
            if let Err(message) = check_field(name, value) {
                errors.push(FieldError {
                    field: name.to_string(),
                    message,
                });
                return None;
            }
            Some(value.clone())
        };

        let mode = field("mode", options.get("mode"));
        let format = field("format", options.get("format"));
        let quality = field("quality", options.get("quality"));
        let width = field("width", options.get("width"));
        let height = field("height", options.get("height"));
        let min_width = field("min_width", options.get("min_width"));
        let min_height = field("min_height", options.get("min_height"));
        let max_width = field("max_width", options.get("max_width"));
        let max_height = field("max_height", options.get("max_height"));
        let upsize = field("upsize", options.get("upsize"));
        let fit_position = field("fit_position", options.get("fit_position"));
        let cache = field("cache", options.get("cache"));

        let modifiers = match modifiers::collect(options) {
            Ok(m) => m,
            Err(failed) => {
                errors.extend(
                    failed
                        .into_iter()
                        .map(|(field, message)| FieldError { field, message }),
                );
                Vec::new()
            }
        };

        if !errors.is_empty() {
            errors.sort_by(|a, b| a.field.cmp(&b.field));
            return Err(ValidationError { errors });
        }

        // Everything below has passed check_field already
        let dim = |v: Option<Value>| v.and_then(|v| parse_dimension(&v).ok().flatten());
        Ok(Self {
            mode: mode.and_then(|v| parse_mode(&v).ok()).unwrap_or_default(),
            format: format.and_then(|v| parse_format(&v).ok().flatten()),
            quality: quality
                .and_then(|v| parse_quality(&v).ok())
                .unwrap_or_default(),
            width: dim(width),
            height: dim(height),
            constraints: Constraints {
                min_width: dim(min_width),
                min_height: dim(min_height),
                max_width: dim(max_width),
                max_height: dim(max_height),
            },
            upsize: upsize.and_then(|v| as_bool(&v)).unwrap_or(false),
            fit_position: fit_position
                .and_then(|v| parse_fit_position(&v).ok())
                .unwrap_or_default(),
            cache: cache.and_then(|v| as_bool(&v)).unwrap_or(true),
            modifiers,
        })
    }
}

/// Whether caching is on. Unlike [`TransformOptions::from_options`] this
/// never fails: anything but an explicit false keeps the cache.
pub fn cache_enabled(options: &CanonicalOptions) -> bool {
    options
        .get("cache")
        .and_then(as_bool)
        .unwrap_or(true)
}
