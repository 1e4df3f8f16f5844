//! Size and aspect-ratio math for the transform pipeline
//!
//! Provides the scale/crop/pad steps used to build the per-frame filter
//! chain, inference of an undefined target dimension from the source aspect
//! ratio, even-width rounding for the encoder, and the scoring function used
//! to pick among discrete camera-supported sizes.

use serde::{Deserialize, Serialize};

/// Ratios closer than this to 1.0 are treated as "no scaling".
const UNIT_RATIO_EPSILON: f64 = 1e-9;

/// Weight of recorded pixels against wasted pixels when scoring sizes.
const RECORDED_PIXEL_WEIGHT: i64 = 100;

/// A fully defined width × height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// How scaling treats a target whose aspect ratio differs from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalePolicy {
    /// Cover the target; excess may be cropped
    #[default]
    Fill,
    /// Fit inside the target; the remainder may be padded
    Fit,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel area
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The size with width and height swapped (90° rotation)
    pub fn transposed(&self) -> Self {
        Self::new(self.height, self.width)
    }

    /// Pointwise minimum of two sizes
    pub fn intersect(&self, other: Size) -> Self {
        Self::new(self.width.min(other.width), self.height.min(other.height))
    }

    /// Pointwise maximum of two sizes
    pub fn union(&self, other: Size) -> Self {
        Self::new(self.width.max(other.width), self.height.max(other.height))
    }

    /// Scale towards `target` according to `policy`.
    ///
    /// `Fill` uses the larger of the two required ratios so both dimensions end
    /// up ≥ the target, `Fit` uses the smaller so both end up ≤ the target. An
    /// upscale (ratio > 1) is skipped unless `allow_upscale` is set.
    ///
    /// Returns the applied scale factor, 1.0 if nothing was applied.
    pub fn scale(&mut self, target: Size, policy: ScalePolicy, allow_upscale: bool) -> f64 {
        if self.is_empty() || target.is_empty() {
            return 1.0;
        }

        let width_ratio = target.width as f64 / self.width as f64;
        let height_ratio = target.height as f64 / self.height as f64;
        let ratio = match policy {
            ScalePolicy::Fill => width_ratio.max(height_ratio),
            ScalePolicy::Fit => width_ratio.min(height_ratio),
        };

        if (ratio - 1.0).abs() < UNIT_RATIO_EPSILON {
            return 1.0;
        }
        if ratio > 1.0 && !allow_upscale {
            return 1.0;
        }

        self.width = ((self.width as f64 * ratio).round() as u32).max(1);
        self.height = ((self.height as f64 * ratio).round() as u32).max(1);
        ratio
    }

    /// Clamp each dimension down to the target. Returns whether anything was cut.
    pub fn crop_to(&mut self, target: Size) -> bool {
        let cropped = self.intersect(target);
        let changed = cropped != *self;
        *self = cropped;
        changed
    }

    /// Raise each dimension up to the target. Returns whether anything was added.
    pub fn pad_to(&mut self, target: Size) -> bool {
        let padded = self.union(target);
        let changed = padded != *self;
        *self = padded;
        changed
    }

    /// Make the width even, recomputing the height to keep the aspect ratio.
    ///
    /// The encoder rejects odd widths.
    pub fn round_width_up_to_even_and_maintain_aspect_ratio(&mut self) {
        if self.width % 2 == 0 {
            return;
        }
        let old_width = self.width as f64;
        self.width += 1;
        self.height = ((self.width as f64 * self.height as f64 / old_width).round() as u32).max(1);
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A target size whose dimensions may be left undefined
///
/// An undefined dimension is inferred from the source aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl TargetSize {
    pub const fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }

    pub const fn exact(width: u32, height: u32) -> Self {
        Self::new(Some(width), Some(height))
    }

    pub const fn width(width: u32) -> Self {
        Self::new(Some(width), None)
    }

    pub const fn height(height: u32) -> Self {
        Self::new(None, Some(height))
    }

    pub fn is_partially_defined(&self) -> bool {
        self.width.is_some() != self.height.is_some()
    }

    /// Fill in a single undefined dimension from `source`'s aspect ratio.
    ///
    /// Both-defined and both-undefined targets are left alone, as is any
    /// target when the source has a zero dimension.
    pub fn calculate_undefined_dimensions(&mut self, source: Size) {
        if source.is_empty() {
            return;
        }
        match (self.width, self.height) {
            (Some(width), None) => {
                let height = (source.height as f64 * width as f64 / source.width as f64).round();
                self.height = Some((height as u32).max(1));
            }
            (None, Some(height)) => {
                let width = (source.width as f64 * height as f64 / source.height as f64).round();
                self.width = Some((width as u32).max(1));
            }
            _ => {}
        }
    }

    /// The concrete size, if both dimensions are defined
    pub fn resolved(&self) -> Option<Size> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Size::new(width, height)),
            _ => None,
        }
    }
}

/// Desired output geometry and the steps allowed to reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub size: TargetSize,
    pub policy: ScalePolicy,
    pub allow_crop: bool,
    pub allow_pad: bool,
    pub allow_upscale: bool,
}

impl Default for TargetGeometry {
    fn default() -> Self {
        Self {
            size: TargetSize::default(),
            policy: ScalePolicy::Fill,
            allow_crop: true,
            allow_pad: true,
            allow_upscale: false,
        }
    }
}

impl TargetGeometry {
    pub fn new(size: TargetSize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: ScalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_crop(mut self, allow: bool) -> Self {
        self.allow_crop = allow;
        self
    }

    pub fn with_pad(mut self, allow: bool) -> Self {
        self.allow_pad = allow;
        self
    }

    pub fn with_upscale(mut self, allow: bool) -> Self {
        self.allow_upscale = allow;
        self
    }

    /// Concrete target for `source`: undefined dimensions inferred, both
    /// undefined meaning "keep the source size", width rounded up to even.
    pub fn resolve_target(&self, source: Size) -> Size {
        let mut target = self.size;
        target.calculate_undefined_dimensions(source);
        let mut resolved = target.resolved().unwrap_or(source);
        resolved.round_width_up_to_even_and_maintain_aspect_ratio();
        resolved
    }

    /// Run the scale → crop → pad steps for `source`
    pub fn plan(&self, source: Size) -> GeometryPlan {
        let target = self.resolve_target(source);

        let mut scaled = source;
        let scale_factor = scaled.scale(target, self.policy, self.allow_upscale);
        scaled.round_width_up_to_even_and_maintain_aspect_ratio();

        // Both `scaled` and `target` have even widths here, so min/max keep it even.
        let mut output = scaled;
        let cropped = self.allow_crop && output.crop_to(target);
        let content = output;
        let padded = self.allow_pad && output.pad_to(target);

        GeometryPlan {
            source,
            target,
            scale_factor,
            scaled,
            cropped,
            padded,
            content,
            output,
        }
    }
}

/// Result of running a [`TargetGeometry`] against a source size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryPlan {
    pub source: Size,
    pub target: Size,
    pub scale_factor: f64,
    /// Size after the scale step
    pub scaled: Size,
    pub cropped: bool,
    pub padded: bool,
    /// Size after the crop step, i.e. the picture content inside any padding
    pub content: Size,
    pub output: Size,
}

impl GeometryPlan {
    pub fn needs_scale(&self) -> bool {
        self.scaled != self.source
    }
}

/// Score a candidate size against a target.
///
/// `score = 100 × recorded − wasted`, where `recorded` is the area common to
/// the candidate scaled to the target, the target itself and the unscaled
/// candidate (pixels that end up in the output without being upscaled), and
/// `wasted` is whatever part of the candidate's area is not recorded.
pub fn score_size(candidate: Size, target: Size, policy: ScalePolicy) -> i64 {
    let mut scaled = candidate;
    scaled.scale(target, policy, true);

    let recorded = scaled.intersect(target).intersect(candidate).area();
    let wasted = (candidate.area() - recorded).max(0);
    RECORDED_PIXEL_WEIGHT * recorded - wasted
}

/// Pick the best of `candidates` for `target`; ties go to the earliest.
pub fn choose_best_size(candidates: &[Size], target: Size, policy: ScalePolicy) -> Option<Size> {
    let mut best: Option<(Size, i64)> = None;
    for &candidate in candidates {
        let score = score_size(candidate, target, policy);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((candidate, score)),
        }
    }
    best.map(|(size, _)| size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_undefined_width_and_height() {
        let source = Size::new(640, 480);

        let mut target = TargetSize::width(320);
        target.calculate_undefined_dimensions(source);
        assert_eq!(target.resolved(), Some(Size::new(320, 240)));

        let mut target = TargetSize::height(720);
        target.calculate_undefined_dimensions(source);
        assert_eq!(target.resolved(), Some(Size::new(960, 720)));
    }

    #[test]
    fn test_calculate_undefined_leaves_other_targets_alone() {
        let source = Size::new(640, 480);

        let mut both = TargetSize::exact(100, 100);
        both.calculate_undefined_dimensions(source);
        assert_eq!(both, TargetSize::exact(100, 100));

        let mut neither = TargetSize::default();
        neither.calculate_undefined_dimensions(source);
        assert_eq!(neither.resolved(), None);

        let mut zero_source = TargetSize::width(320);
        zero_source.calculate_undefined_dimensions(Size::new(0, 480));
        assert_eq!(zero_source.resolved(), None);
    }

    #[test]
    fn test_inferred_dimension_is_never_zero() {
        let mut thin = TargetSize::width(2);
        thin.calculate_undefined_dimensions(Size::new(1000, 1));
        assert_eq!(thin.resolved(), Some(Size::new(2, 1)));

        let mut tall = TargetSize::height(1);
        tall.calculate_undefined_dimensions(Size::new(1, 1000));
        assert_eq!(tall.resolved(), Some(Size::new(1, 1)));

        let geometry = TargetGeometry::new(TargetSize::width(2));
        assert!(!geometry.resolve_target(Size::new(1000, 1)).is_empty());
    }

    #[test]
    fn test_inference_preserves_aspect_ratio() {
        let sources = [
            Size::new(640, 480),
            Size::new(1920, 1080),
            Size::new(720, 1280),
            Size::new(333, 777),
        ];
        for source in sources {
            for width in [100u32, 241, 320, 999] {
                let mut target = TargetSize::width(width);
                target.calculate_undefined_dimensions(source);
                let size = target.resolved().unwrap();
                let expected = source.height as f64 * width as f64 / source.width as f64;
                assert!((size.height as f64 - expected).abs() <= 0.5);
            }
        }
    }

    #[test]
    fn test_scale_fill_covers_target() {
        let target = Size::new(480, 480);
        let mut size = Size::new(640, 480);
        let factor = size.scale(target, ScalePolicy::Fill, false);
        assert_eq!(factor, 1.0);
        assert_eq!(size, Size::new(640, 480));

        let mut size = Size::new(1280, 720);
        let factor = size.scale(target, ScalePolicy::Fill, false);
        assert!((factor - 480.0 / 720.0).abs() < 1e-9);
        assert_eq!(size, Size::new(853, 480));
        assert!(size.width >= target.width && size.height >= target.height);
    }

    #[test]
    fn test_scale_fit_inside_target() {
        let target = Size::new(480, 480);
        let mut size = Size::new(1280, 720);
        size.scale(target, ScalePolicy::Fit, false);
        assert_eq!(size, Size::new(480, 270));
        assert!(size.width <= target.width && size.height <= target.height);
    }

    #[test]
    fn test_scale_upscale_gate() {
        let target = Size::new(1280, 960);
        let mut size = Size::new(640, 480);
        assert_eq!(size.scale(target, ScalePolicy::Fill, false), 1.0);
        assert_eq!(size, Size::new(640, 480));

        assert_eq!(size.scale(target, ScalePolicy::Fill, true), 2.0);
        assert_eq!(size, Size::new(1280, 960));
    }

    #[test]
    fn test_scale_is_idempotent() {
        let cases = [
            (Size::new(641, 480), Size::new(320, 240)),
            (Size::new(1920, 1080), Size::new(480, 480)),
            (Size::new(333, 777), Size::new(100, 50)),
            (Size::new(640, 480), Size::new(1000, 200)),
        ];
        for (source, target) in cases {
            for policy in [ScalePolicy::Fill, ScalePolicy::Fit] {
                let mut size = source;
                size.scale(target, policy, true);
                let after_first = size;
                assert_eq!(size.scale(target, policy, true), 1.0);
                assert_eq!(size, after_first);
            }
        }
    }

    #[test]
    fn test_crop_and_pad() {
        let mut size = Size::new(853, 480);
        assert!(size.crop_to(Size::new(480, 480)));
        assert_eq!(size, Size::new(480, 480));
        assert!(!size.crop_to(Size::new(480, 480)));

        let mut size = Size::new(480, 270);
        assert!(size.pad_to(Size::new(480, 480)));
        assert_eq!(size, Size::new(480, 480));
        assert!(!size.pad_to(Size::new(100, 100)));
    }

    #[test]
    fn test_round_width_up_to_even() {
        let mut size = Size::new(321, 241);
        size.round_width_up_to_even_and_maintain_aspect_ratio();
        assert_eq!(size.width, 322);
        assert_eq!(size.height, 242);

        let mut even = Size::new(320, 241);
        even.round_width_up_to_even_and_maintain_aspect_ratio();
        assert_eq!(even, Size::new(320, 241));

        for width in 1..200u32 {
            let mut size = Size::new(width, 99);
            size.round_width_up_to_even_and_maintain_aspect_ratio();
            assert_eq!(size.width % 2, 0);
        }
    }

    #[test]
    fn test_resolve_target() {
        let geometry = TargetGeometry::new(TargetSize::width(320));
        assert_eq!(
            geometry.resolve_target(Size::new(640, 480)),
            Size::new(320, 240)
        );

        let keep = TargetGeometry::default();
        assert_eq!(keep.resolve_target(Size::new(641, 480)), Size::new(642, 481));
    }

    #[test]
    fn test_plan_fill_crops_to_square() {
        let geometry = TargetGeometry::new(TargetSize::exact(480, 480));
        let plan = geometry.plan(Size::new(1280, 720));
        assert_eq!(plan.scaled, Size::new(854, 481));
        assert!(plan.cropped);
        assert!(!plan.padded);
        assert_eq!(plan.output, Size::new(480, 480));
    }

    #[test]
    fn test_plan_fit_pads_to_square() {
        let geometry =
            TargetGeometry::new(TargetSize::exact(480, 480)).with_policy(ScalePolicy::Fit);
        let plan = geometry.plan(Size::new(1280, 720));
        assert_eq!(plan.scaled, Size::new(480, 270));
        assert!(plan.padded);
        assert_eq!(plan.content, Size::new(480, 270));
        assert_eq!(plan.output, Size::new(480, 480));
    }

    #[test]
    fn test_plan_without_crop_or_pad_keeps_scaled_size() {
        let geometry = TargetGeometry::new(TargetSize::exact(480, 480))
            .with_policy(ScalePolicy::Fit)
            .with_pad(false)
            .with_crop(false);
        let plan = geometry.plan(Size::new(1280, 720));
        assert_eq!(plan.output, Size::new(480, 270));
        assert_eq!(plan.output.width % 2, 0);
    }

    #[test]
    fn test_score_prefers_exact_match() {
        let target = Size::new(640, 480);
        let candidates = [
            Size::new(320, 240),
            Size::new(1280, 960),
            Size::new(640, 480),
            Size::new(800, 600),
            Size::new(1920, 1080),
        ];
        assert_eq!(
            choose_best_size(&candidates, target, ScalePolicy::Fill),
            Some(Size::new(640, 480))
        );
        assert_eq!(
            score_size(Size::new(640, 480), target, ScalePolicy::Fill),
            100 * 640 * 480
        );
    }

    #[test]
    fn test_choose_best_size_ties_first_wins() {
        let target = Size::new(100, 100);
        let candidates = [Size::new(100, 100), Size::new(100, 100)];
        assert_eq!(
            choose_best_size(&candidates, target, ScalePolicy::Fill),
            Some(Size::new(100, 100))
        );
        assert_eq!(choose_best_size(&[], target, ScalePolicy::Fill), None);
    }

    #[test]
    fn test_serialization() {
        let geometry = TargetGeometry::new(TargetSize::width(320)).with_policy(ScalePolicy::Fit);
        let json = serde_json::to_string(&geometry).unwrap();
        let restored: TargetGeometry = serde_json::from_str(&json).unwrap();
        assert_eq!(geometry, restored);
    }
}
