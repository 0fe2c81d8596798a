//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, WebP, BMP, GIF, ICO) | `image` crate (pure Rust decoders) |
//! | Identify | `ImageReader::with_guessed_format` + `ImageDecoder` header read |
//! | Crop / scale | `crop_imm`, `resize_exact` with `Lanczos3` |
//! | Canvas, background, insert | `image::imageops::overlay` |
//! | Blur / sharpen | `DynamicImage::blur` / `unsharpen` |
//! | Right-angle rotate, flip | `rotate90/180/270`, `flipv`, `fliph` |
//! | Free-angle rotate | `imageproc::geometric_transformations::rotate_about_center` |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` |
//! | Encode → WebP | `WebPEncoder::new_lossless` (quality is ignored) |
//! | Encode → PNG, BMP, GIF, ICO | `DynamicImage::write_to` |

use super::backend::{BackendError, ImageBackend, PLACEHOLDER_DIMENSIONS, placeholder_info};
use super::calculations::GeometryStep;
use super::modifiers::{Insert, Modifier};
use super::params::{
    FitPosition, Flip, OutputFormat, Quality, RenderParams, SourceImage, SourceInfo,
};
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{
    DynamicImage, GenericImageView, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage,
};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use std::io::Cursor;
use std::path::Path;

/// Largest edge the ICO container can hold.
const ICO_MAX_EDGE: u32 = 256;

const PLACEHOLDER_GREY: Rgba<u8> = Rgba([229, 229, 229, 255]);

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn to_output_format(format: ImageFormat) -> Option<OutputFormat> {
    match format {
        ImageFormat::Jpeg => Some(OutputFormat::Jpg),
        ImageFormat::Png => Some(OutputFormat::Png),
        ImageFormat::WebP => Some(OutputFormat::Webp),
        ImageFormat::Bmp => Some(OutputFormat::Bmp),
        ImageFormat::Gif => Some(OutputFormat::Gif),
        ImageFormat::Ico => Some(OutputFormat::Ico),
        _ => None,
    }
}

fn processing(context: &str, e: impl std::fmt::Display) -> BackendError {
    BackendError::ProcessingFailed(format!("{context}: {e}"))
}

/// Load and decode an image from disk, detecting the format from content.
fn load_image(path: &Path) -> Result<DynamicImage, BackendError> {
    ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| processing(&format!("Failed to decode {}", path.display()), e))
}

fn placeholder_image() -> DynamicImage {
    let (w, h) = PLACEHOLDER_DIMENSIONS;
    DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, PLACEHOLDER_GREY))
}

// ============================================================================
// Geometry
// ============================================================================

fn apply_step(img: DynamicImage, step: &GeometryStep) -> DynamicImage {
    match *step {
        GeometryStep::Crop {
            x,
            y,
            width,
            height,
        } => img.crop_imm(x, y, width, height),
        GeometryStep::Scale { width, height } => {
            img.resize_exact(width, height, FilterType::Lanczos3)
        }
        GeometryStep::Canvas { width, height } => {
            let mut canvas = RgbaImage::from_pixel(width, height, TRANSPARENT);
            let (x, y) = FitPosition::Center.offset((width, height), img.dimensions());
            imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);
            DynamicImage::ImageRgba8(canvas)
        }
    }
}

// ============================================================================
// Modifiers
// ============================================================================

fn apply_modifier(img: DynamicImage, modifier: &Modifier) -> Result<DynamicImage, BackendError> {
    Ok(match modifier {
        Modifier::Blur(0) | Modifier::Sharpen(0) => img,
        Modifier::Blur(amount) => img.blur(*amount as f32 * 0.25),
        Modifier::Sharpen(amount) => img.unsharpen(*amount as f32 / 20.0, 0),
        Modifier::Brightness(level) => img.brighten(level * 255 / 100),
        Modifier::Contrast(level) => img.adjust_contrast(*level as f32),
        Modifier::Pixelate(size) => pixelate(img, *size),
        Modifier::Greyscale => DynamicImage::ImageRgba8(img.grayscale().to_rgba8()),
        Modifier::Invert => {
            let mut img = img;
            img.invert();
            img
        }
        Modifier::Opacity(percent) => opacity(img, *percent),
        Modifier::Rotate(degrees) => rotate(img, *degrees),
        Modifier::Flip(Flip::Vertical) => img.flipv(),
        Modifier::Flip(Flip::Horizontal) => img.fliph(),
        Modifier::Background(color) => {
            let (w, h) = img.dimensions();
            let mut canvas = RgbaImage::from_pixel(w, h, color.to_rgba());
            imageops::overlay(&mut canvas, &img.to_rgba8(), 0, 0);
            DynamicImage::ImageRgba8(canvas)
        }
        Modifier::Colorize(r, g, b) => colorize(img, *r, *g, *b),
        Modifier::Insert(insert) => overlay_insert(img, insert)?,
    })
}

fn pixelate(img: DynamicImage, size: u32) -> DynamicImage {
    if size <= 1 {
        return img;
    }
    let (w, h) = img.dimensions();
    let small = img.resize_exact(
        w.div_ceil(size).max(1),
        h.div_ceil(size).max(1),
        FilterType::Triangle,
    );
    small.resize_exact(w, h, FilterType::Nearest)
}

fn opacity(img: DynamicImage, percent: u32) -> DynamicImage {
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        pixel[3] = (pixel[3] as u32 * percent / 100) as u8;
    }
    DynamicImage::ImageRgba8(rgba)
}

/// Counter-clockwise rotation. Right angles are exact; anything else grows
/// the canvas to the rotated bounding box and leaves the corners transparent.
fn rotate(img: DynamicImage, degrees: u32) -> DynamicImage {
    match degrees % 360 {
        0 => img,
        90 => img.rotate270(),
        180 => img.rotate180(),
        270 => img.rotate90(),
        deg => {
            let theta = (deg as f32).to_radians();
            let (w, h) = img.dimensions();
            let (sin, cos) = theta.sin_cos();
            let bw = (w as f32 * cos.abs() + h as f32 * sin.abs()).ceil() as u32;
            let bh = (w as f32 * sin.abs() + h as f32 * cos.abs()).ceil() as u32;

            let mut canvas = RgbaImage::from_pixel(bw.max(w), bh.max(h), TRANSPARENT);
            let (x, y) = FitPosition::Center.offset(canvas.dimensions(), (w, h));
            imageops::overlay(&mut canvas, &img.to_rgba8(), x, y);

            // imageproc rotates clockwise
            let rotated =
                rotate_about_center(&canvas, -theta, Interpolation::Bilinear, TRANSPARENT);
            DynamicImage::ImageRgba8(rotated)
        }
    }
}

fn colorize(img: DynamicImage, r: i32, g: i32, b: i32) -> DynamicImage {
    let shift = [r * 255 / 100, g * 255 / 100, b * 255 / 100];
    let mut rgba = img.to_rgba8();
    for pixel in rgba.pixels_mut() {
        for (channel, delta) in pixel.0.iter_mut().take(3).zip(shift) {
            *channel = (*channel as i32 + delta).clamp(0, 255) as u8;
        }
    }
    DynamicImage::ImageRgba8(rgba)
}

fn overlay_insert(img: DynamicImage, insert: &Insert) -> Result<DynamicImage, BackendError> {
    let top = load_image(&insert.path)?.to_rgba8();
    let mut base = img.to_rgba8();
    let (x, y) = insert
        .position
        .offset_inward(base.dimensions(), top.dimensions(), insert.x, insert.y);
    imageops::overlay(&mut base, &top, x, y);
    Ok(DynamicImage::ImageRgba8(base))
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode into an in-memory buffer in the requested format.
fn encode(
    img: &DynamicImage,
    format: OutputFormat,
    quality: Quality,
) -> Result<Vec<u8>, BackendError> {
    let mut buf = Vec::new();
    match format {
        OutputFormat::Jpg => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.value() as u8);
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(encoder)
                .map_err(|e| processing("JPEG encode failed", e))?;
        }
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buf);
            rgba(img)
                .write_with_encoder(encoder)
                .map_err(|e| processing("WebP encode failed", e))?;
        }
        OutputFormat::Png => write_container(&rgba(img), &mut buf, ImageFormat::Png)?,
        OutputFormat::Bmp => {
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            write_container(&rgb, &mut buf, ImageFormat::Bmp)?
        }
        OutputFormat::Gif => write_container(&rgba(img), &mut buf, ImageFormat::Gif)?,
        OutputFormat::Ico => {
            let (w, h) = img.dimensions();
            if w > ICO_MAX_EDGE || h > ICO_MAX_EDGE {
                return Err(BackendError::ProcessingFailed(format!(
                    "ICO images are limited to {ICO_MAX_EDGE}x{ICO_MAX_EDGE}, got {w}x{h}"
                )));
            }
            write_container(&rgba(img), &mut buf, ImageFormat::Ico)?
        }
    }
    Ok(buf)
}

fn rgba(img: &DynamicImage) -> DynamicImage {
    DynamicImage::ImageRgba8(img.to_rgba8())
}

fn write_container(
    img: &DynamicImage,
    buf: &mut Vec<u8>,
    format: ImageFormat,
) -> Result<(), BackendError> {
    img.write_to(&mut Cursor::new(buf), format)
        .map_err(|e| processing(&format!("{format:?} encode failed"), e))
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &SourceImage) -> Result<SourceInfo, BackendError> {
        let path = match source {
            SourceImage::Placeholder => return Ok(placeholder_info()),
            SourceImage::File(path) => path,
        };
        let reader = ImageReader::open(path)?.with_guessed_format()?;
        let format = reader.format().and_then(to_output_format);
        let decoder = reader
            .into_decoder()
            .map_err(|e| processing(&format!("Failed to read {}", path.display()), e))?;
        let (width, height) = decoder.dimensions();
        Ok(SourceInfo {
            width,
            height,
            format,
            has_alpha: decoder.color_type().has_alpha(),
        })
    }

    fn sniff_format(&self, path: &Path) -> Option<OutputFormat> {
        ImageReader::open(path)
            .ok()?
            .with_guessed_format()
            .ok()?
            .format()
            .and_then(to_output_format)
    }

    fn render(&self, params: &RenderParams) -> Result<Vec<u8>, BackendError> {
        let mut img = match &params.source {
            SourceImage::File(path) => load_image(path)?,
            SourceImage::Placeholder => placeholder_image(),
        };
        for step in &params.steps {
            img = apply_step(img, step);
        }
        for modifier in &params.modifiers {
            img = apply_modifier(img, modifier)?;
        }
        encode(&img, params.format, params.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::params::Color;
    use crate::test_helpers::{create_test_jpeg, create_test_png_with_alpha};
    use std::path::PathBuf;

    fn params(
        source: PathBuf,
        steps: Vec<GeometryStep>,
        modifiers: Vec<Modifier>,
        format: OutputFormat,
    ) -> RenderParams {
        RenderParams {
            source: SourceImage::File(source),
            steps,
            modifiers,
            format,
            quality: Quality::new(85),
        }
    }

    fn decode(bytes: &[u8]) -> DynamicImage {
        image::load_from_memory(bytes).unwrap()
    }

    #[test]
    fn identify_synthetic_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("test.jpg");
        create_test_jpeg(&path, 200, 150);

        let info = RustBackend::new().identify(&SourceImage::File(path)).unwrap();
        assert_eq!((info.width, info.height), (200, 150));
        assert_eq!(info.format, Some(OutputFormat::Jpg));
        assert!(!info.has_alpha);
    }

    #[test]
    fn identify_detects_alpha() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("alpha.png");
        create_test_png_with_alpha(&path, 20, 10);

        let info = RustBackend::new().identify(&SourceImage::File(path)).unwrap();
        assert_eq!(info.format, Some(OutputFormat::Png));
        assert!(info.has_alpha);
    }

    #[test]
    fn identify_nonexistent_file_errors() {
        let result =
            RustBackend::new().identify(&SourceImage::File("/nonexistent/image.jpg".into()));
        assert!(result.is_err());
    }

    #[test]
    fn sniff_ignores_extension() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("really-a-jpeg.png");
        create_test_jpeg(&path, 10, 10);
        assert_eq!(RustBackend::new().sniff_format(&path), Some(OutputFormat::Jpg));
        assert_eq!(RustBackend::new().sniff_format(&tmp.path().join("nope")), None);
    }

    #[test]
    fn render_scale_to_jpeg() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 400, 300);

        let bytes = RustBackend::new()
            .render(&params(
                source,
                vec![GeometryStep::Scale {
                    width: 200,
                    height: 150,
                }],
                vec![],
                OutputFormat::Jpg,
            ))
            .unwrap();
        assert_eq!(decode(&bytes).dimensions(), (200, 150));
    }

    #[test]
    fn render_crop_then_scale() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 100, 50);

        let bytes = RustBackend::new()
            .render(&params(
                source,
                vec![
                    GeometryStep::Crop {
                        x: 25,
                        y: 0,
                        width: 50,
                        height: 50,
                    },
                    GeometryStep::Scale {
                        width: 30,
                        height: 30,
                    },
                ],
                vec![],
                OutputFormat::Png,
            ))
            .unwrap();
        assert_eq!(decode(&bytes).dimensions(), (30, 30));
    }

    #[test]
    fn canvas_padding_is_transparent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 30, 15);

        let bytes = RustBackend::new()
            .render(&params(
                source,
                vec![GeometryStep::Canvas {
                    width: 30,
                    height: 30,
                }],
                vec![],
                OutputFormat::Png,
            ))
            .unwrap();
        let img = decode(&bytes).to_rgba8();
        assert_eq!(img.dimensions(), (30, 30));
        assert_eq!(img.get_pixel(0, 0)[3], 0);
        assert_eq!(img.get_pixel(15, 15)[3], 255);
    }

    #[test]
    fn background_fills_padding() {
        let tmp = tempfile::TempDir::new().unwrap();
        let source = tmp.path().join("source.jpg");
        create_test_jpeg(&source, 30, 15);

        let bytes = RustBackend::new()
            .render(&params(
                source,
                vec![GeometryStep::Canvas {
                    width: 30,
                    height: 30,
                }],
                vec![Modifier::Background(Color { r: 255, g: 0, b: 0 })],
                OutputFormat::Png,
            ))
            .unwrap();
        let img = decode(&bytes).to_rgba8();
        assert_eq!(img.get_pixel(0, 0), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn right_angle_rotation_swaps_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(40, 10));
        assert_eq!(rotate(img.clone(), 90).dimensions(), (10, 40));
        assert_eq!(rotate(img.clone(), 180).dimensions(), (40, 10));
        assert_eq!(rotate(img, 360).dimensions(), (40, 10));
    }

    #[test]
    fn rotation_is_counter_clockwise() {
        // Mark the top-right corner; after a 90° counter-clockwise turn it
        // sits at the top-left.
        let mut rgba = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        rgba.put_pixel(3, 0, Rgba([255, 255, 255, 255]));
        let rotated = rotate(DynamicImage::ImageRgba8(rgba), 90).to_rgba8();
        assert_eq!(rotated.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn free_angle_rotation_grows_canvas() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255])));
        let rotated = rotate(img, 45);
        let (w, h) = rotated.dimensions();
        assert!(w > 40 && h > 40);
        assert_eq!(rotated.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn opacity_scales_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 200])));
        assert_eq!(opacity(img, 50).to_rgba8().get_pixel(0, 0)[3], 100);
    }

    #[test]
    fn colorize_shifts_channels() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, Rgba([100, 100, 100, 255])));
        let out = colorize(img, 100, -100, 0).to_rgba8();
        assert_eq!(out.get_pixel(0, 0), &Rgba([255, 0, 100, 255]));
    }

    #[test]
    fn pixelate_keeps_dimensions() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(33, 17));
        assert_eq!(pixelate(img, 8).dimensions(), (33, 17));
    }

    #[test]
    fn insert_overlays_at_anchor() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mark = tmp.path().join("mark.png");
        RgbaImage::from_pixel(2, 2, Rgba([255, 255, 255, 255]))
            .save(&mark)
            .unwrap();

        let base = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255])));
        let out = overlay_insert(
            base,
            &Insert {
                path: mark,
                position: FitPosition::BottomRight,
                x: 1,
                y: 1,
            },
        )
        .unwrap()
        .to_rgba8();
        assert_eq!(out.get_pixel(7, 7), &Rgba([255, 255, 255, 255]));
        assert_eq!(out.get_pixel(9, 9), &Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn insert_missing_file_errors() {
        let base = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let insert = Insert {
            path: "/nonexistent/mark.png".into(),
            position: FitPosition::TopLeft,
            x: 0,
            y: 0,
        };
        assert!(overlay_insert(base, &insert).is_err());
    }

    #[test]
    fn placeholder_renders_without_a_file() {
        let bytes = RustBackend::new()
            .render(&RenderParams {
                source: SourceImage::Placeholder,
                steps: vec![GeometryStep::Scale {
                    width: 64,
                    height: 64,
                }],
                modifiers: vec![],
                format: OutputFormat::Png,
                quality: Quality::default(),
            })
            .unwrap();
        assert_eq!(decode(&bytes).dimensions(), (64, 64));
    }

    #[test]
    fn every_format_encodes() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 8, Rgba([1, 2, 3, 255])));
        for format in [
            OutputFormat::Jpg,
            OutputFormat::Png,
            OutputFormat::Webp,
            OutputFormat::Bmp,
            OutputFormat::Gif,
            OutputFormat::Ico,
        ] {
            let bytes = encode(&img, format, Quality::default()).unwrap();
            assert_eq!(
                image::guess_format(&bytes).ok().and_then(to_output_format),
                Some(format),
                "{format}"
            );
        }
    }

    #[test]
    fn oversized_ico_errors() {
        let img = DynamicImage::ImageRgba8(RgbaImage::new(300, 10));
        assert!(encode(&img, OutputFormat::Ico, Quality::default()).is_err());
    }
}
