//! Pixel modifier dispatch table.
//!
//! Each modifier option has one entry in [`TABLE`]: its option name and a
//! parser that validates the raw JSON value and turns it into a typed
//! [`Modifier`]. The table order is the application order; options are never
//! applied in the order the caller happened to list them.
//!
//! | Option | Accepted value |
//! |---|---|
//! | `blur`, `sharpen` | integer 0–100 |
//! | `brightness`, `contrast` | integer −100–100 |
//! | `pixelate` | integer 1–1000 |
//! | `greyscale`, `invert` | boolean flag, `false` skips |
//! | `opacity` | integer 0–100 |
//! | `rotate` | integer 0–360, counter-clockwise |
//! | `flip` | `v` or `h` |
//! | `background` | `#rgb` or `#rrggbb` |
//! | `colorize` | `r,g,b`, each −100–100 |
//! | `insert` | `path[,position[,x,y]]` |

use super::params::{Color, FitPosition, Flip};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Component, PathBuf};

/// A validated pixel operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    Blur(u32),
    Sharpen(u32),
    Brightness(i32),
    Contrast(i32),
    Pixelate(u32),
    Greyscale,
    Invert,
    Opacity(u32),
    /// Degrees counter-clockwise.
    Rotate(u32),
    Flip(Flip),
    Background(Color),
    Colorize(i32, i32, i32),
    Insert(Insert),
}

/// Watermark-style overlay of another image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insert {
    /// Relative to the base directory until the materializer resolves it.
    pub path: PathBuf,
    pub position: FitPosition,
    pub x: u32,
    pub y: u32,
}

type Parser = fn(&Value) -> Result<Option<Modifier>, String>;

/// Option name → parser, in application order.
pub const TABLE: &[(&str, Parser)] = &[
    ("blur", parse_blur),
    ("sharpen", parse_sharpen),
    ("brightness", parse_brightness),
    ("contrast", parse_contrast),
    ("pixelate", parse_pixelate),
    ("greyscale", parse_greyscale),
    ("invert", parse_invert),
    ("opacity", parse_opacity),
    ("rotate", parse_rotate),
    ("flip", parse_flip),
    ("background", parse_background),
    ("colorize", parse_colorize),
    ("insert", parse_insert),
];

/// Whether `name` is a modifier option.
pub fn is_modifier(name: &str) -> bool {
    TABLE.iter().any(|(n, _)| *n == name)
}

/// Validate a single modifier value. `Ok(None)` means the option is present
/// but switched off. Unknown names are not modifiers and yield `Ok(None)`.
pub fn parse(name: &str, value: &Value) -> Result<Option<Modifier>, String> {
    match TABLE.iter().find(|(n, _)| *n == name) {
        Some((_, parser)) if !value.is_null() => parser(value),
        _ => Ok(None),
    }
}

/// Collect every modifier present in `options`, in table order.
///
/// Every invalid field is reported, not just the first one.
pub fn collect(options: &BTreeMap<String, Value>) -> Result<Vec<Modifier>, Vec<(String, String)>> {
    let mut modifiers = Vec::new();
    let mut errors = Vec::new();

    for (name, _) in TABLE {
        let Some(value) = options.get(*name) else {
            continue;
        };
        match parse(name, value) {
            Ok(Some(m)) => modifiers.push(m),
            Ok(None) => {}
            Err(message) => errors.push((name.to_string(), message)),
        }
    }

    if errors.is_empty() {
        Ok(modifiers)
    } else {
        Err(errors)
    }
}

// ============================================================================
// Value coercion
// ============================================================================

/// Integer from a JSON number or numeric string.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean from a JSON bool, 0/1, or the usual truthy/falsy strings.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn int_in_range(value: &Value, min: i64, max: i64) -> Result<i64, String> {
    match as_int(value) {
        Some(n) if (min..=max).contains(&n) => Ok(n),
        Some(_) => Err(format!("must be between {min} and {max}")),
        None => Err("must be an integer".into()),
    }
}

fn flag(value: &Value, modifier: Modifier) -> Result<Option<Modifier>, String> {
    match as_bool(value) {
        Some(true) => Ok(Some(modifier)),
        Some(false) => Ok(None),
        None => Err("must be a boolean flag".into()),
    }
}

fn text(value: &Value) -> Result<&str, String> {
    value.as_str().ok_or_else(|| "must be a string".into())
}

// ============================================================================
// Parsers
// ============================================================================

fn parse_blur(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Blur(int_in_range(v, 0, 100)? as u32)))
}

fn parse_sharpen(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Sharpen(int_in_range(v, 0, 100)? as u32)))
}

fn parse_brightness(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Brightness(int_in_range(v, -100, 100)? as i32)))
}

fn parse_contrast(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Contrast(int_in_range(v, -100, 100)? as i32)))
}

fn parse_pixelate(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Pixelate(int_in_range(v, 1, 1000)? as u32)))
}

fn parse_greyscale(v: &Value) -> Result<Option<Modifier>, String> {
    flag(v, Modifier::Greyscale)
}

fn parse_invert(v: &Value) -> Result<Option<Modifier>, String> {
    flag(v, Modifier::Invert)
}

fn parse_opacity(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Opacity(int_in_range(v, 0, 100)? as u32)))
}

fn parse_rotate(v: &Value) -> Result<Option<Modifier>, String> {
    Ok(Some(Modifier::Rotate(int_in_range(v, 0, 360)? as u32)))
}

fn parse_flip(v: &Value) -> Result<Option<Modifier>, String> {
    match text(v)? {
        "v" => Ok(Some(Modifier::Flip(Flip::Vertical))),
        "h" => Ok(Some(Modifier::Flip(Flip::Horizontal))),
        _ => Err("must be one of: v, h".into()),
    }
}

fn parse_background(v: &Value) -> Result<Option<Modifier>, String> {
    Color::parse_hex(text(v)?)
        .map(|c| Some(Modifier::Background(c)))
        .ok_or_else(|| "must be a hex colour like #fff or #ffffff".into())
}

fn parse_colorize(v: &Value) -> Result<Option<Modifier>, String> {
    let raw = text(v)?;
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    let channel = |s: &str| s.parse::<i32>().ok().filter(|n| (-100..=100).contains(n));
    match parts.as_slice() {
        [r, g, b] => match (channel(r), channel(g), channel(b)) {
            (Some(r), Some(g), Some(b)) => Ok(Some(Modifier::Colorize(r, g, b))),
            _ => Err("each channel must be between -100 and 100".into()),
        },
        _ => Err("must be three comma-separated values r,g,b".into()),
    }
}

/// `path`, `path,position` or `path,position,x,y`. The path itself may
/// contain commas, so the trailing fields are matched from the right.
fn parse_insert(v: &Value) -> Result<Option<Modifier>, String> {
    let raw = text(v)?.trim();
    let parts: Vec<&str> = raw.split(',').collect();
    let n = parts.len();

    let offset = |s: &str| s.trim().parse::<u32>().ok();
    let position = |s: &str| FitPosition::parse(s.trim());

    let (path, position, x, y) = if n >= 4
        && let (Some(p), Some(x), Some(y)) = (
            position(parts[n - 3]),
            offset(parts[n - 2]),
            offset(parts[n - 1]),
        ) {
        (parts[..n - 3].join(","), p, x, y)
    } else if n >= 2
        && let Some(p) = position(parts[n - 1])
    {
        (parts[..n - 1].join(","), p, 0, 0)
    } else {
        (raw.to_string(), FitPosition::TopLeft, 0, 0)
    };

    let path = PathBuf::from(path.trim().trim_start_matches('/'));
    if path.as_os_str().is_empty() {
        return Err("must name an image path".into());
    }
    if !path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err("must stay inside the base directory".into());
    }
    Ok(Some(Modifier::Insert(Insert {
        path,
        position,
        x,
        y,
    })))
}
