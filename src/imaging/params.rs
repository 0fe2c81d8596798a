//! Parameter types for image operations.
//!
//! These types describe *what* to do, not *how* to do it. They are the
//! interface between the [`materialize`](crate::materialize) module (which
//! decides what artifact to produce) and the [`backend`](super::backend)
//! (which does the actual pixel work). This separation allows swapping
//! backends (e.g. for testing with a mock) without changing cache logic.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100). Clamped on construction.
//! - [`OutputFormat`]: Encodable output formats and their mime/extension pair.
//! - [`Mode`] / [`FitPosition`] / [`Flip`]: Enumerated option values.
//! - [`Color`]: Parsed `#rgb` / `#rrggbb` colour.
//! - [`SourceImage`]: A file on disk or the built-in placeholder.
//! - [`RenderParams`]: Everything one render needs: source, geometry
//!   steps, modifiers, output format and quality.

use super::calculations::GeometryStep;
use super::modifiers::Modifier;
use std::fmt;
use std::path::PathBuf;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(60)
    }
}

/// Output formats the encoder side supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Jpg,
    Png,
    Webp,
    Bmp,
    Gif,
    Ico,
}

impl OutputFormat {
    /// Parse a `format` option value. `auto` is not a format and yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "bmp" => Some(Self::Bmp),
            "gif" => Some(Self::Gif),
            "ico" => Some(Self::Ico),
            _ => None,
        }
    }

    /// File extension used for stored artifacts.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Bmp => "bmp",
            Self::Gif => "gif",
            Self::Ico => "ico",
        }
    }

    /// Mime subtype, i.e. the part after `image/`.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Jpg => "jpeg",
            Self::Ico => "x-icon",
            other => other.extension(),
        }
    }

    /// Full `Content-Type` header value.
    pub fn content_type(self) -> String {
        format!("image/{}", self.mime())
    }

    /// Whether the encoded file keeps an alpha channel. Everything else is
    /// flattened, so transparent sources need a background first.
    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png | Self::Webp)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// How requested dimensions are reconciled with the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Resize the canvas to the target, no scaling.
    #[default]
    Auto,
    /// Scale inside the target and letterbox-pad.
    Contain,
    /// Scale to cover the target and crop the overflow (`crop` is an alias).
    Cover,
    /// Scale each axis independently.
    Stretch,
}

impl Mode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto" => Some(Self::Auto),
            "contain" => Some(Self::Contain),
            "cover" | "crop" => Some(Self::Cover),
            "stretch" => Some(Self::Stretch),
            _ => None,
        }
    }
}

/// Anchor point for cover crops and overlay inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FitPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl FitPosition {
    pub const NAMES: [&'static str; 9] = [
        "top-left",
        "top",
        "top-right",
        "left",
        "center",
        "right",
        "bottom-left",
        "bottom",
        "bottom-right",
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "top-left" => Some(Self::TopLeft),
            "top" => Some(Self::Top),
            "top-right" => Some(Self::TopRight),
            "left" => Some(Self::Left),
            "center" | "centre" => Some(Self::Center),
            "right" => Some(Self::Right),
            "bottom-left" => Some(Self::BottomLeft),
            "bottom" => Some(Self::Bottom),
            "bottom-right" => Some(Self::BottomRight),
            _ => None,
        }
    }

    /// Offset of an `inner` span placed inside an `outer` span along one axis.
    ///
    /// `start`/`end` pick which edge the anchor hugs on this axis; neither
    /// means centered. Negative results mean the inner span overflows.
    fn axis_offset(outer: u32, inner: u32, start: bool, end: bool) -> i64 {
        let free = outer as i64 - inner as i64;
        if start {
            0
        } else if end {
            free
        } else {
            free / 2
        }
    }

    /// Which edges the anchor hugs: (left, right, top, bottom).
    fn edges(self) -> (bool, bool, bool, bool) {
        use FitPosition::*;
        (
            matches!(self, TopLeft | Left | BottomLeft),
            matches!(self, TopRight | Right | BottomRight),
            matches!(self, TopLeft | Top | TopRight),
            matches!(self, BottomLeft | Bottom | BottomRight),
        )
    }

    /// Top-left offset of an `inner` box anchored inside an `outer` box.
    pub fn offset(self, outer: (u32, u32), inner: (u32, u32)) -> (i64, i64) {
        let (left, right, top, bottom) = self.edges();
        (
            Self::axis_offset(outer.0, inner.0, left, right),
            Self::axis_offset(outer.1, inner.1, top, bottom),
        )
    }

    /// [`offset`](Self::offset), then moved `dx`/`dy` pixels away from the
    /// anchored edges (towards the inside of `outer`).
    pub fn offset_inward(
        self,
        outer: (u32, u32),
        inner: (u32, u32),
        dx: u32,
        dy: u32,
    ) -> (i64, i64) {
        let (x, y) = self.offset(outer, inner);
        let (_, right, _, bottom) = self.edges();
        let dx = if right { -(dx as i64) } else { dx as i64 };
        let dy = if bottom { -(dy as i64) } else { dy as i64 };
        (x + dx, y + dy)
    }
}

/// Flip direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flip {
    Vertical,
    Horizontal,
}

/// An opaque RGB colour parsed from `#rgb` or `#rrggbb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const WHITE: Color = Color {
        r: 255,
        g: 255,
        b: 255,
    };

    /// Parse a hex colour. Returns `None` for anything but `#rgb` / `#rrggbb`.
    pub fn parse_hex(value: &str) -> Option<Self> {
        let hex = value.strip_prefix('#')?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        match hex.len() {
            3 => {
                let mut it = hex.chars().map(|c| {
                    let d = c.to_digit(16).unwrap_or(0) as u8;
                    d * 17
                });
                Some(Self {
                    r: it.next()?,
                    g: it.next()?,
                    b: it.next()?,
                })
            }
            6 => Some(Self {
                r: channel(&hex[0..2])?,
                g: channel(&hex[2..4])?,
                b: channel(&hex[4..6])?,
            }),
            _ => None,
        }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, 255])
    }
}

/// What to decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceImage {
    File(PathBuf),
    /// Built-in neutral placeholder used when no not-found image is available.
    Placeholder,
}

/// Header-level facts about a source image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    /// Detected container format, when it is one we can also encode.
    pub format: Option<OutputFormat>,
    pub has_alpha: bool,
}

/// Parameters for a single render: decode → geometry → modifiers → encode.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    pub source: SourceImage,
    pub steps: Vec<GeometryStep>,
    pub modifiers: Vec<Modifier>,
    pub format: OutputFormat,
    pub quality: Quality,
}
