//! Resizer configuration module.
//!
//! Handles loading, validating, and merging `imageresize.toml`. Stock defaults
//! are overridden by whatever the user file specifies; a missing file means
//! stock defaults.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! driver = "image"              # Backend name, part of every cache key
//! mode = "auto"                 # auto | contain | cover | crop | stretch
//! quality = 60                  # Lossy encoding quality (1-100)
//! format = "auto"               # auto | jpg | png | webp | bmp | gif | ico
//! app_url = "http://localhost"  # Prefix for every URL handed out
//!
//! [not_found]
//! # image = "assets/not-found.png"  # Omit for the built-in placeholder
//! background = "#fff"
//! transparent = false
//! format = "auto"
//! mode = "cover"
//! quality = 65
//!
//! [cache]
//! directory = "storage/imageresizecache"
//! # url_prefix = "/storage/imageresizecache"
//! clear_interval = "1 week"     # Age before scheduled deletion
//! descriptor_ttl = "1 week"     # How long pending URLs stay resolvable
//! cleanup_on_cache_clear = false
//! scheduled_gc = true
//!
//! [stores]
//! descriptors = "storage/imageresize/descriptors"
//! permalinks = "storage/imageresize/permalinks"
//!
//! [processing]
//! max_processes = 4             # Max parallel workers (omit for auto = CPU cores)
//!
//! [[filters]]
//! code = "thumbnail"
//! description = "Basic thumbnail filter"
//! rules = [{ modifier = "max_width", value = "500" }]
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse, override just the values you want:
//!
//! ```toml
//! quality = 80
//!
//! [cache]
//! scheduled_gc = false
//! ```
//!
//! Unknown keys are rejected to catch typos early. A `[[filters]]` list in the
//! user file replaces the stock filters entirely.

use crate::imaging::{Color, Mode, OutputFormat};
use crate::options;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Resizer configuration loaded from `imageresize.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Backend name. Recorded in every cache key.
    pub driver: String,
    /// Default resize mode.
    pub mode: String,
    /// Default lossy quality.
    pub quality: u32,
    /// Default output format, `auto` keeps the source format.
    pub format: String,
    /// Scheme and host prepended to every URL.
    pub app_url: String,
    /// Substitution used when a source cannot be read.
    pub not_found: NotFoundConfig,
    /// Artifact directory, URL prefix and garbage collection.
    pub cache: CacheConfig,
    /// Where descriptor and permalink records live.
    pub stores: StoresConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    /// Named option bundles, looked up by `code`.
    pub filters: Vec<FilterConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver: "image".to_string(),
            mode: "auto".to_string(),
            quality: 60,
            format: "auto".to_string(),
            app_url: "http://localhost".to_string(),
            not_found: NotFoundConfig::default(),
            cache: CacheConfig::default(),
            stores: StoresConfig::default(),
            processing: ProcessingConfig::default(),
            filters: stock_filters(),
        }
    }
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.driver != "image" {
            return Err(ConfigError::Validation(format!(
                "driver must be \"image\", got {:?}",
                self.driver
            )));
        }
        if Mode::parse(&self.mode).is_none() {
            return Err(ConfigError::Validation(format!("mode {:?} is not valid", self.mode)));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation("quality must be 1-100".into()));
        }
        if !is_format_or_auto(&self.format) {
            return Err(ConfigError::Validation(format!(
                "format {:?} is not valid",
                self.format
            )));
        }
        self.not_found.validate()?;
        self.cache.validate()?;
        for filter in &self.filters {
            filter.validate()?;
        }
        Ok(())
    }

    /// First filter whose code matches.
    pub fn filter(&self, code: &str) -> Option<&FilterConfig> {
        self.filters.iter().find(|f| f.code == code)
    }

    /// `app_url` without a trailing slash.
    pub fn app_url(&self) -> &str {
        self.app_url.trim_end_matches('/')
    }
}

fn is_format_or_auto(value: &str) -> bool {
    value == "auto" || OutputFormat::parse(value).is_some()
}

/// What to serve when a source image is missing or unreadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotFoundConfig {
    /// Replacement image, relative to the base directory. Omit for the
    /// built-in placeholder.
    pub image: Option<String>,
    pub background: String,
    /// Skip the background fill entirely.
    pub transparent: bool,
    pub format: String,
    pub mode: String,
    pub quality: u32,
}

impl Default for NotFoundConfig {
    fn default() -> Self {
        Self {
            image: None,
            background: "#fff".to_string(),
            transparent: false,
            format: "auto".to_string(),
            mode: "cover".to_string(),
            quality: 65,
        }
    }
}

impl NotFoundConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if Color::parse_hex(&self.background).is_none() {
            return Err(ConfigError::Validation(
                "not_found.background must be a hex colour".into(),
            ));
        }
        if Mode::parse(&self.mode).is_none() {
            return Err(ConfigError::Validation(format!(
                "not_found.mode {:?} is not valid",
                self.mode
            )));
        }
        if !is_format_or_auto(&self.format) {
            return Err(ConfigError::Validation(format!(
                "not_found.format {:?} is not valid",
                self.format
            )));
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ConfigError::Validation(
                "not_found.quality must be 1-100".into(),
            ));
        }
        Ok(())
    }
}

/// Artifact cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Artifact root, relative to the base directory unless absolute.
    pub directory: String,
    /// Public URL path of the artifact root. Defaults to `/{directory}`.
    pub url_prefix: Option<String>,
    /// Minimum age before scheduled deletion, e.g. `"1 week"`.
    pub clear_interval: String,
    /// How long a pending descriptor stays resolvable.
    pub descriptor_ttl: String,
    /// Run garbage collection when the host clears its caches.
    pub cleanup_on_cache_clear: bool,
    /// Allow the scheduled garbage collection entry point to run.
    pub scheduled_gc: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: "storage/imageresizecache".to_string(),
            url_prefix: None,
            clear_interval: "1 week".to_string(),
            descriptor_ttl: "1 week".to_string(),
            cleanup_on_cache_clear: false,
            scheduled_gc: true,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "cache.directory must not be empty".into(),
            ));
        }
        self.clear_age()?;
        self.descriptor_ttl()?;
        Ok(())
    }

    /// URL path under which artifacts are served, no trailing slash.
    pub fn url_prefix(&self) -> String {
        match &self.url_prefix {
            Some(prefix) => format!("/{}", prefix.trim_matches('/')),
            None => format!("/{}", self.directory.trim_matches('/')),
        }
    }

    pub fn clear_age(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.clear_interval).ok_or_else(|| {
            ConfigError::Validation(format!(
                "cache.clear_interval {:?} is not an interval like \"1 week\"",
                self.clear_interval
            ))
        })
    }

    pub fn descriptor_ttl(&self) -> Result<Duration, ConfigError> {
        parse_interval(&self.descriptor_ttl).ok_or_else(|| {
            ConfigError::Validation(format!(
                "cache.descriptor_ttl {:?} is not an interval like \"1 week\"",
                self.descriptor_ttl
            ))
        })
    }
}

/// Record store locations. Relative paths hang off the base directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoresConfig {
    pub descriptors: String,
    pub permalinks: String,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            descriptors: "storage/imageresize/descriptors".to_string(),
            permalinks: "storage/imageresize/permalinks".to_string(),
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Worker cap for parallel deletion. Absent means one per core; larger
    /// values are clamped to the core count.
    pub max_processes: Option<usize>,
}

/// Thread count for the rayon pool: `min(max_processes, cores)`.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config.max_processes.map(|n| n.min(cores)).unwrap_or(cores)
}

// =============================================================================
// Filters
// =============================================================================

/// A named bundle of option values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterConfig {
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: Vec<FilterRule>,
}

/// One `{modifier, value}` pair of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRule {
    pub modifier: String,
    pub value: toml::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cast {
    Int,
    Bool,
    Str,
}

/// Option names a filter may set, with the type its value is cast to.
const FILTER_CASTS: &[(&str, Cast)] = &[
    ("width", Cast::Int),
    ("height", Cast::Int),
    ("min_width", Cast::Int),
    ("min_height", Cast::Int),
    ("max_width", Cast::Int),
    ("max_height", Cast::Int),
    ("blur", Cast::Int),
    ("sharpen", Cast::Int),
    ("brightness", Cast::Int),
    ("contrast", Cast::Int),
    ("pixelate", Cast::Int),
    ("greyscale", Cast::Bool),
    ("invert", Cast::Bool),
    ("opacity", Cast::Int),
    ("rotate", Cast::Int),
    ("flip", Cast::Str),
    ("background", Cast::Str),
    ("colorize", Cast::Str),
    ("format", Cast::Str),
    ("quality", Cast::Int),
    ("mode", Cast::Str),
    ("fit_position", Cast::Str),
];

fn cast_value(cast: Cast, value: &toml::Value) -> serde_json::Value {
    use toml::Value as T;
    match (cast, value) {
        (Cast::Int, T::Integer(i)) => (*i).into(),
        (Cast::Int, T::Float(f)) => (f.trunc() as i64).into(),
        (Cast::Int, T::Boolean(b)) => (*b as i64).into(),
        (Cast::Int, T::String(s)) => s.trim().parse::<i64>().unwrap_or(0).into(),
        (Cast::Bool, T::Boolean(b)) => (*b).into(),
        (Cast::Bool, T::Integer(i)) => (*i == 1).into(),
        (Cast::Bool, T::String(s)) => (s == "1" || s == "true").into(),
        (_, T::String(s)) => s.clone().into(),
        (_, other) => other.to_string().into(),
    }
}

impl FilterRule {
    /// The rule value cast to the option's type. Errors for option names a
    /// filter may not set.
    pub fn cast(&self) -> Result<serde_json::Value, ConfigError> {
        FILTER_CASTS
            .iter()
            .find(|(name, _)| *name == self.modifier)
            .map(|(_, cast)| cast_value(*cast, &self.value))
            .ok_or_else(|| {
                ConfigError::Validation(format!(
                    "filter modifier {:?} is not supported",
                    self.modifier
                ))
            })
    }
}

impl FilterConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.code.trim().is_empty() {
            return Err(ConfigError::Validation("filter code must not be empty".into()));
        }
        let mut errors = Vec::new();
        for rule in &self.rules {
            let value = rule.cast()?;
            if let Err(message) = options::check_filter_value(&rule.modifier, &value) {
                errors.push(format!("{}: {}", rule.modifier, message));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(format!(
                "filter {:?}: {}",
                self.code,
                errors.join(", ")
            )))
        }
    }

    /// Rules cast to option values, in declaration order.
    pub fn values(&self) -> Vec<(String, serde_json::Value)> {
        self.rules
            .iter()
            .filter_map(|rule| Some((rule.modifier.clone(), rule.cast().ok()?)))
            .collect()
    }
}

fn rule(modifier: &str, value: &str) -> FilterRule {
    FilterRule {
        modifier: modifier.to_string(),
        value: toml::Value::String(value.to_string()),
    }
}

/// The `thumbnail` and `hero` filters every fresh install starts with.
pub fn stock_filters() -> Vec<FilterConfig> {
    vec![
        FilterConfig {
            code: "thumbnail".to_string(),
            description: "Basic thumbnail filter".to_string(),
            rules: vec![
                rule("max_width", "500"),
                rule("max_height", "500"),
                rule("brightness", "50"),
                rule("background", "#fff"),
                rule("greyscale", "true"),
                rule("quality", "60"),
                rule("format", "jpg"),
                rule("mode", "cover"),
            ],
        },
        FilterConfig {
            code: "hero".to_string(),
            description: "Standard hero filter".to_string(),
            rules: vec![
                rule("width", "1920"),
                rule("height", "500"),
                rule("mode", "cover"),
                rule("quality", "80"),
                rule("format", "jpg"),
            ],
        },
    ]
}

// =============================================================================
// Intervals
// =============================================================================

/// Parse a human interval such as `"1 week"`, `"3 days"` or `"12 hours"`.
///
/// A month counts as 30 days and a year as 365.
pub fn parse_interval(value: &str) -> Option<Duration> {
    let mut parts = value.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?.to_ascii_lowercase();
    if parts.next().is_some() || amount < 0 {
        return None;
    }
    let unit = unit.strip_suffix('s').unwrap_or(&unit);
    match unit {
        "second" | "sec" => Duration::try_seconds(amount),
        "minute" | "min" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        "month" => Duration::try_days(amount.checked_mul(30)?),
        "year" => Duration::try_days(amount.checked_mul(365)?),
        _ => None,
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// [`Settings::default`] as a TOML table, the bottom layer of every load.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(Settings::default())?)
}

/// Lay `overlay` over `base`. Tables merge per key, recursively; any other
/// overlay value (arrays included, so `[[filters]]`) replaces the base value.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge, deserialize into [`Settings`], validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Settings = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load settings from the given file.
///
/// A missing file yields the stock settings.
pub fn load_config(path: &Path) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(path)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `imageresize.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# imageresize configuration
# =========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# Backend name. Part of every cache key, so changing it invalidates the cache.
driver = "image"

# Default resize mode: auto, contain, cover (alias crop) or stretch.
mode = "auto"

# Default lossy encoding quality (1 = worst, 100 = best).
quality = 60

# Default output format: auto (keep the source format), jpg, png, webp, bmp, gif or ico.
format = "auto"

# Scheme and host prepended to every URL handed out.
app_url = "http://localhost"

# ---------------------------------------------------------------------------
# Missing or unreadable source images
# ---------------------------------------------------------------------------
[not_found]
# Replacement image relative to the base directory.
# Omit to use the built-in placeholder.
# image = "assets/image-not-found.png"
background = "#fff"
# Keep the replacement transparent instead of filling the background.
transparent = false
format = "auto"
mode = "cover"
quality = 65

# ---------------------------------------------------------------------------
# Artifact cache
# ---------------------------------------------------------------------------
[cache]
# Where resized images are stored, relative to the base directory.
directory = "storage/imageresizecache"

# Public URL path of the cache directory. Defaults to "/" + directory.
# url_prefix = "/storage/imageresizecache"

# Files older than this are removed by garbage collection.
clear_interval = "1 week"

# How long a pending resize URL stays resolvable before it is rendered.
descriptor_ttl = "1 week"

# Also run garbage collection when the host application clears its caches.
cleanup_on_cache_clear = false

# Allow the scheduled garbage collection run.
scheduled_gc = true

# ---------------------------------------------------------------------------
# Record stores
# ---------------------------------------------------------------------------
[stores]
descriptors = "storage/imageresize/descriptors"
permalinks = "storage/imageresize/permalinks"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Filters
# ---------------------------------------------------------------------------
# Named option bundles, applied with the `filter` option. Explicit options
# given alongside a filter always win. Listing any filter here replaces
# the stock ones.

[[filters]]
code = "thumbnail"
description = "Basic thumbnail filter"
rules = [
    { modifier = "max_width", value = "500" },
    { modifier = "max_height", value = "500" },
    { modifier = "brightness", value = "50" },
    { modifier = "background", value = "#fff" },
    { modifier = "greyscale", value = "true" },
    { modifier = "quality", value = "60" },
    { modifier = "format", value = "jpg" },
    { modifier = "mode", value = "cover" },
]

[[filters]]
code = "hero"
description = "Standard hero filter"
rules = [
    { modifier = "width", value = "1920" },
    { modifier = "height", value = "500" },
    { modifier = "mode", value = "cover" },
    { modifier = "quality", value = "80" },
    { modifier = "format", value = "jpg" },
]
"##
}
