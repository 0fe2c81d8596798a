//! Image processing, pure Rust.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader` header read |
//! | **Geometry** | crop / `resize_exact` (Lanczos3) / canvas overlay |
//! | **Modifiers** | `image::imageops` + `imageproc` rotation |
//! | **Encode** | JPEG (quality), PNG, lossless WebP, BMP, GIF, ICO |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for geometry planning (unit testable)
//! - **Modifiers**: Option name → validated pixel operation table
//! - **Parameters**: Data structures describing a render
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]

pub mod backend;
pub mod calculations;
pub mod modifiers;
pub mod params;
pub mod rust_backend;

pub use backend::{BackendError, ImageBackend};
pub use calculations::{
    Constraints, GeometryPlan, GeometryRequest, GeometryStep, Strategy, plan_geometry,
    target_dimensions,
};
pub use modifiers::Modifier;
pub use params::{
    Color, FitPosition, Flip, Mode, OutputFormat, Quality, RenderParams, SourceImage, SourceInfo,
};
pub use rust_backend::RustBackend;
