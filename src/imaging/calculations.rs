//! Pure calculation functions for image geometry.
//!
//! All functions here are pure and testable without any I/O or images. The
//! entry point is [`plan_geometry`], which turns an original size plus the
//! requested width/height/min/max/mode into an ordered list of
//! [`GeometryStep`]s the backend replays on the decoded pixels.
//!
//! ## Target dimensions
//!
//! | Given | Target |
//! |---|---|
//! | nothing (no min/max either) | no geometric transform |
//! | width only | clamp width, height = `floor(width / ratio)` |
//! | height only | clamp height, width = `floor(height * ratio)` |
//! | min/max only | original size, each axis clamped |
//! | both | each axis clamped independently |
//!
//! ## Modes
//!
//! - `stretch`: scale to exactly the target.
//! - `auto`: resize the *canvas* to the target, no scaling.
//! - `contain`: same ratio → plain scale; otherwise scale to fit and pad.
//! - `cover`: crop the largest target-ratio region at `fit_position`, then scale.
//!
//! Unless `upsize` is set no scale step enlarges the source.

use super::params::{FitPosition, Mode};

/// Optional min/max bounds for each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Constraints {
    pub min_width: Option<u32>,
    pub min_height: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self.min_width.is_none()
            && self.min_height.is_none()
            && self.max_width.is_none()
            && self.max_height.is_none()
    }
}

/// Everything the geometry engine needs to know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryRequest {
    /// Original image dimensions (width, height).
    pub original: (u32, u32),
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub constraints: Constraints,
    pub mode: Mode,
    pub upsize: bool,
    pub fit_position: FitPosition,
}

/// A single geometric operation, applied in order by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryStep {
    /// Cut a region out of the current image.
    Crop {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    /// Resample the current image to exactly these dimensions.
    Scale { width: u32, height: u32 },
    /// Resize the canvas around the centered content. New area is transparent,
    /// content outside the new canvas is cut.
    Canvas { width: u32, height: u32 },
}

/// How the target was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// No geometric transform.
    None,
    /// Aspect-preserving scale (contain with a matching ratio).
    Scale,
    /// Independent per-axis scale.
    Stretch,
    /// Canvas resize without scaling.
    Canvas,
    /// Scale then letterbox-pad.
    Pad,
    /// Crop then scale.
    Crop,
}

/// Output of [`plan_geometry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryPlan {
    pub strategy: Strategy,
    /// Target width/height after min/max clamping, `None` without a transform.
    pub target: Option<(u32, u32)>,
    /// Whether the target has the same aspect ratio as the original.
    pub same_ratio: bool,
    pub steps: Vec<GeometryStep>,
    /// Final pixel dimensions.
    pub output: (u32, u32),
    /// Whether some step introduces transparent area that a flattening
    /// encoder would need a background colour for.
    pub needs_background: bool,
}

fn clamp_axis(value: u32, min: Option<u32>, max: Option<u32>) -> u32 {
    let mut v = value;
    if let Some(min) = min {
        v = v.max(min);
    }
    if let Some(max) = max {
        v = v.min(max);
    }
    v.max(1)
}

fn ratio_matches(target: (u32, u32), original: (u32, u32)) -> bool {
    target.0 as u64 * original.1 as u64 == target.1 as u64 * original.0 as u64
}

/// Compute the target dimensions and whether they keep the original ratio.
///
/// Returns `None` when neither a dimension nor any min/max bound was given.
///
/// # Examples
/// ```
/// # use imageresize::imaging::{Constraints, target_dimensions};
/// // 100x50 with width 50 → height derived from the 2:1 ratio
/// assert_eq!(
///     target_dimensions((100, 50), Some(50), None, &Constraints::default()),
///     Some(((50, 25), true))
/// );
/// ```
pub fn target_dimensions(
    original: (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    c: &Constraints,
) -> Option<((u32, u32), bool)> {
    let (ow, oh) = (original.0.max(1) as u64, original.1.max(1) as u64);

    match (width, height) {
        (None, None) if c.is_empty() => None,
        (Some(w), None) => {
            let w = clamp_axis(w, c.min_width, c.max_width);
            let h = ((w as u64 * oh) / ow).max(1) as u32;
            Some(((w, h), true))
        }
        (None, Some(h)) => {
            let h = clamp_axis(h, c.min_height, c.max_height);
            let w = ((h as u64 * ow) / oh).max(1) as u32;
            Some(((w, h), true))
        }
        (None, None) => {
            let w = clamp_axis(original.0, c.min_width, c.max_width);
            let h = clamp_axis(original.1, c.min_height, c.max_height);
            Some(((w, h), ratio_matches((w, h), original)))
        }
        (Some(w), Some(h)) => {
            let w = clamp_axis(w, c.min_width, c.max_width);
            let h = clamp_axis(h, c.min_height, c.max_height);
            Some(((w, h), ratio_matches((w, h), original)))
        }
    }
}

/// Largest region with the target's aspect ratio that fits in `source`.
///
/// # Returns
/// * `(width, height)` - crop dimensions, each at most the source's
pub fn calculate_cover_region(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (sw, sh) = (source.0 as u64, source.1 as u64);
    let (tw, th) = (target.0.max(1) as u64, target.1.max(1) as u64);

    if sw * th > sh * tw {
        // Source is wider: full height, trimmed width
        let w = (sh * tw / th).clamp(1, sw);
        (w as u32, sh as u32)
    } else {
        // Source is taller (or equal): full width, trimmed height
        let h = (sw * th / tw).clamp(1, sh);
        (sw as u32, h as u32)
    }
}

/// Dimensions of `size` shrunk uniformly so it fits inside `bound`.
/// Sizes already inside the bound are returned unchanged.
fn fit_within(size: (u32, u32), bound: (u32, u32)) -> (u32, u32) {
    if size.0 <= bound.0 && size.1 <= bound.1 {
        return size;
    }
    let scale = f64::min(
        bound.0 as f64 / size.0 as f64,
        bound.1 as f64 / size.1 as f64,
    );
    (
        ((size.0 as f64 * scale).round() as u32).clamp(1, bound.0),
        ((size.1 as f64 * scale).round() as u32).clamp(1, bound.1),
    )
}

/// Per-axis upsize clamp for non ratio-preserving scales.
fn clamp_per_axis(size: (u32, u32), bound: (u32, u32)) -> (u32, u32) {
    (size.0.min(bound.0), size.1.min(bound.1))
}

/// Plan the geometric transform for a request.
pub fn plan_geometry(req: &GeometryRequest) -> GeometryPlan {
    let original = req.original;
    let Some(((w, h), same_ratio)) =
        target_dimensions(original, req.width, req.height, &req.constraints)
    else {
        return GeometryPlan {
            strategy: Strategy::None,
            target: None,
            same_ratio: true,
            steps: Vec::new(),
            output: original,
            needs_background: false,
        };
    };

    let (strategy, steps) = match req.mode {
        Mode::Stretch => {
            let size = if req.upsize {
                (w, h)
            } else {
                clamp_per_axis((w, h), original)
            };
            (Strategy::Stretch, scale_unless_noop(original, size))
        }
        Mode::Auto => (
            Strategy::Canvas,
            vec![GeometryStep::Canvas {
                width: w,
                height: h,
            }],
        ),
        Mode::Contain if same_ratio => {
            let size = if req.upsize {
                (w, h)
            } else {
                clamp_per_axis((w, h), original)
            };
            (Strategy::Scale, scale_unless_noop(original, size))
        }
        Mode::Contain => {
            let (ow, oh) = (original.0 as u64, original.1 as u64);
            // Source is wider than the target: width fills, height shrinks
            let content = if ow * h as u64 > oh * w as u64 {
                (w, ((w as u64 * oh) / ow).max(1) as u32)
            } else {
                (((h as u64 * ow) / oh).max(1) as u32, h)
            };
            let content = if req.upsize {
                content
            } else {
                fit_within(content, original)
            };
            let mut steps = scale_unless_noop(original, content);
            steps.push(GeometryStep::Canvas {
                width: w,
                height: h,
            });
            (Strategy::Pad, steps)
        }
        Mode::Cover => {
            let region = calculate_cover_region(original, (w, h));
            let (x, y) = req.fit_position.offset(original, region);
            let mut steps = Vec::new();
            if region != original {
                steps.push(GeometryStep::Crop {
                    x: x.max(0) as u32,
                    y: y.max(0) as u32,
                    width: region.0,
                    height: region.1,
                });
            }
            let enlarges = w > region.0 || h > region.1;
            if (req.upsize || !enlarges) && (w, h) != region {
                steps.push(GeometryStep::Scale {
                    width: w,
                    height: h,
                });
            }
            (Strategy::Crop, steps)
        }
    };

    let (output, needs_background) = replay(original, &steps);

    GeometryPlan {
        strategy,
        target: Some((w, h)),
        same_ratio,
        steps,
        output,
        needs_background,
    }
}

fn scale_unless_noop(original: (u32, u32), size: (u32, u32)) -> Vec<GeometryStep> {
    if size == original {
        Vec::new()
    } else {
        vec![GeometryStep::Scale {
            width: size.0,
            height: size.1,
        }]
    }
}

/// Follow the steps to the final size, noting whether any canvas grew past
/// its content.
fn replay(original: (u32, u32), steps: &[GeometryStep]) -> ((u32, u32), bool) {
    let mut size = original;
    let mut padded = false;
    for step in steps {
        size = match *step {
            GeometryStep::Crop { width, height, .. } => (width, height),
            GeometryStep::Scale { width, height } => (width, height),
            GeometryStep::Canvas { width, height } => {
                padded |= width > size.0 || height > size.1;
                (width, height)
            }
        };
    }
    (size, padded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(
        original: (u32, u32),
        width: Option<u32>,
        height: Option<u32>,
        mode: Mode,
    ) -> GeometryRequest {
        GeometryRequest {
            original,
            width,
            height,
            constraints: Constraints::default(),
            mode,
            upsize: false,
            fit_position: FitPosition::Center,
        }
    }

    // =========================================================================
    // target_dimensions tests
    // =========================================================================

    #[test]
    fn nothing_requested_means_no_transform() {
        assert_eq!(
            target_dimensions((100, 50), None, None, &Constraints::default()),
            None
        );
    }

    #[test]
    fn width_only_derives_height_from_ratio() {
        assert_eq!(
            target_dimensions((100, 50), Some(50), None, &Constraints::default()),
            Some(((50, 25), true))
        );
    }

    #[test]
    fn height_only_derives_width_from_ratio() {
        assert_eq!(
            target_dimensions((100, 50), None, Some(20), &Constraints::default()),
            Some(((40, 20), true))
        );
    }

    #[test]
    fn derived_dimension_is_floored() {
        // 101 * 200 / 300 = 67.33 → 67
        assert_eq!(
            target_dimensions((300, 200), Some(101), None, &Constraints::default()),
            Some(((101, 67), true))
        );
    }

    #[test]
    fn single_dimension_clamped_before_deriving() {
        let c = Constraints {
            max_width: Some(40),
            ..Constraints::default()
        };
        assert_eq!(
            target_dimensions((100, 50), Some(80), None, &c),
            Some(((40, 20), true))
        );
    }

    #[test]
    fn min_max_only_seeds_from_original() {
        let c = Constraints {
            max_width: Some(60),
            ..Constraints::default()
        };
        // Width clamped, height untouched → ratio no longer matches
        assert_eq!(
            target_dimensions((100, 50), None, None, &c),
            Some(((60, 50), false))
        );
    }

    #[test]
    fn min_max_only_within_bounds_keeps_ratio() {
        let c = Constraints {
            max_width: Some(500),
            max_height: Some(500),
            ..Constraints::default()
        };
        assert_eq!(
            target_dimensions((100, 50), None, None, &c),
            Some(((100, 50), true))
        );
    }

    #[test]
    fn both_given_compares_ratio() {
        let c = Constraints::default();
        assert_eq!(
            target_dimensions((100, 50), Some(30), Some(30), &c),
            Some(((30, 30), false))
        );
        assert_eq!(
            target_dimensions((100, 50), Some(40), Some(20), &c),
            Some(((40, 20), true))
        );
    }

    #[test]
    fn both_given_clamped_independently() {
        let c = Constraints {
            min_width: Some(50),
            max_height: Some(10),
            ..Constraints::default()
        };
        assert_eq!(
            target_dimensions((100, 50), Some(30), Some(30), &c),
            Some(((50, 10), false))
        );
    }

    // =========================================================================
    // calculate_cover_region tests
    // =========================================================================

    #[test]
    fn cover_region_wider_source() {
        assert_eq!(calculate_cover_region((100, 50), (30, 30)), (50, 50));
    }

    #[test]
    fn cover_region_taller_source() {
        assert_eq!(calculate_cover_region((600, 800), (500, 400)), (600, 480));
    }

    #[test]
    fn cover_region_same_ratio_is_whole_image() {
        assert_eq!(calculate_cover_region((800, 600), (400, 300)), (800, 600));
    }

    // =========================================================================
    // plan_geometry tests
    // =========================================================================

    #[test]
    fn no_dimensions_plans_nothing() {
        let plan = plan_geometry(&request((100, 50), None, None, Mode::Auto));
        assert_eq!(plan.strategy, Strategy::None);
        assert!(plan.steps.is_empty());
        assert_eq!(plan.output, (100, 50));
    }

    #[test]
    fn auto_width_only_resizes_canvas() {
        let plan = plan_geometry(&request((100, 50), Some(50), None, Mode::Auto));
        assert_eq!(plan.strategy, Strategy::Canvas);
        assert_eq!(plan.target, Some((50, 25)));
        assert_eq!(plan.output, (50, 25));
        assert!(!plan.needs_background);
    }

    #[test]
    fn auto_larger_canvas_needs_background() {
        let plan = plan_geometry(&request((100, 50), Some(200), Some(200), Mode::Auto));
        assert_eq!(plan.output, (200, 200));
        assert!(plan.needs_background);
    }

    #[test]
    fn cover_crops_to_exact_square() {
        let plan = plan_geometry(&request((100, 50), Some(30), Some(30), Mode::Cover));
        assert_eq!(plan.strategy, Strategy::Crop);
        assert_eq!(
            plan.steps,
            vec![
                GeometryStep::Crop {
                    x: 25,
                    y: 0,
                    width: 50,
                    height: 50
                },
                GeometryStep::Scale {
                    width: 30,
                    height: 30
                },
            ]
        );
        assert_eq!(plan.output, (30, 30));
        assert!(!plan.needs_background);
    }

    #[test]
    fn cover_respects_fit_position() {
        let mut req = request((100, 50), Some(30), Some(30), Mode::Cover);
        req.fit_position = FitPosition::Left;
        let plan = plan_geometry(&req);
        assert!(matches!(plan.steps[0], GeometryStep::Crop { x: 0, y: 0, .. }));

        req.fit_position = FitPosition::BottomRight;
        let plan = plan_geometry(&req);
        assert!(matches!(plan.steps[0], GeometryStep::Crop { x: 50, y: 0, .. }));
    }

    #[test]
    fn cover_without_upsize_keeps_crop_region() {
        let plan = plan_geometry(&request((50, 50), Some(200), Some(100), Mode::Cover));
        assert_eq!(plan.output, (50, 25));
        assert!(
            !plan
                .steps
                .iter()
                .any(|s| matches!(s, GeometryStep::Scale { .. }))
        );
    }

    #[test]
    fn cover_with_upsize_scales_up() {
        let mut req = request((50, 50), Some(200), Some(100), Mode::Cover);
        req.upsize = true;
        assert_eq!(plan_geometry(&req).output, (200, 100));
    }

    #[test]
    fn contain_pads_to_exact_target() {
        let plan = plan_geometry(&request((100, 50), Some(30), Some(30), Mode::Contain));
        assert_eq!(plan.strategy, Strategy::Pad);
        assert_eq!(
            plan.steps,
            vec![
                GeometryStep::Scale {
                    width: 30,
                    height: 15
                },
                GeometryStep::Canvas {
                    width: 30,
                    height: 30
                },
            ]
        );
        assert_eq!(plan.output, (30, 30));
        assert!(plan.needs_background);
    }

    #[test]
    fn contain_taller_source_shrinks_width() {
        let plan = plan_geometry(&request((50, 100), Some(30), Some(30), Mode::Contain));
        assert_eq!(
            plan.steps[0],
            GeometryStep::Scale {
                width: 15,
                height: 30
            }
        );
    }

    #[test]
    fn contain_same_ratio_is_plain_scale() {
        let plan = plan_geometry(&request((100, 50), Some(40), Some(20), Mode::Contain));
        assert_eq!(plan.strategy, Strategy::Scale);
        assert_eq!(
            plan.steps,
            vec![GeometryStep::Scale {
                width: 40,
                height: 20
            }]
        );
    }

    #[test]
    fn upsize_guard_never_enlarges_content() {
        for mode in [Mode::Contain, Mode::Cover, Mode::Stretch, Mode::Auto] {
            let plan = plan_geometry(&request((50, 50), Some(200), Some(200), mode));
            for step in &plan.steps {
                if let GeometryStep::Scale { width, height } = step {
                    assert!(*width <= 50 && *height <= 50, "{mode:?} scaled to {width}x{height}");
                }
            }
        }
    }

    #[test]
    fn contain_upsize_guard_pads_original() {
        let plan = plan_geometry(&request((50, 50), Some(200), Some(100), Mode::Contain));
        // Content stays 50x50 and is padded out to the requested canvas
        assert_eq!(
            plan.steps,
            vec![GeometryStep::Canvas {
                width: 200,
                height: 100
            }]
        );
        assert_eq!(plan.output, (200, 100));
    }

    #[test]
    fn stretch_distorts_to_target() {
        let plan = plan_geometry(&request((100, 50), Some(30), Some(30), Mode::Stretch));
        assert_eq!(plan.strategy, Strategy::Stretch);
        assert_eq!(plan.output, (30, 30));
    }

    #[test]
    fn stretch_upsize_clamps_per_axis() {
        let plan = plan_geometry(&request((100, 50), Some(80), Some(90), Mode::Stretch));
        assert_eq!(plan.output, (80, 50));
    }
}
