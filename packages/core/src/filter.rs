//! Orientation- and facing-dependent filter chains
//!
//! Every frame goes through one of four chains chosen by how the device was
//! held and which camera produced it. The chains share one base
//! scale/crop/pad transform, computed once per save from the source size and
//! the target geometry, so all four produce frames of the same output size.
//!
//! Chain descriptions use ffmpeg filtergraph syntax (`hflip`,
//! `transpose=clock`, `scale=w:h`, `crop=w:h:x:y`, `pad=w:h:x:y`).

use crate::capture::{CameraFacing, Orientation, PixelFormat, VideoFrame};
use crate::engine::{FrameFilter, MediaEngine};
use crate::error::{CodecError, CodecOp, CodecResult};
use crate::geometry::{GeometryPlan, Size, TargetGeometry};
use crate::RecorderResult;
use std::fmt;
use std::str::FromStr;

/// Quarter-turn direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rotation {
    Clockwise,
    CounterClockwise,
}

/// One step of a filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    HFlip,
    Transpose(Rotation),
    Scale { width: u32, height: u32 },
    Crop { width: u32, height: u32, x: u32, y: u32 },
    Pad { width: u32, height: u32, x: u32, y: u32 },
}

impl FilterOp {
    /// Size of a frame after this op
    pub fn output_size(&self, input: Size) -> Size {
        match *self {
            FilterOp::HFlip => input,
            FilterOp::Transpose(_) => input.transposed(),
            FilterOp::Scale { width, height }
            | FilterOp::Crop { width, height, .. }
            | FilterOp::Pad { width, height, .. } => Size::new(width, height),
        }
    }

    /// Parse a comma-separated chain description
    pub fn parse_chain(description: &str) -> CodecResult<Vec<FilterOp>> {
        description
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(FilterOp::from_str)
            .collect()
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::HFlip => write!(f, "hflip"),
            FilterOp::Transpose(Rotation::Clockwise) => write!(f, "transpose=clock"),
            FilterOp::Transpose(Rotation::CounterClockwise) => write!(f, "transpose=cclock"),
            FilterOp::Scale { width, height } => write!(f, "scale={}:{}", width, height),
            FilterOp::Crop { width, height, x, y } => {
                write!(f, "crop={}:{}:{}:{}", width, height, x, y)
            }
            FilterOp::Pad { width, height, x, y } => {
                write!(f, "pad={}:{}:{}:{}", width, height, x, y)
            }
        }
    }
}

impl FromStr for FilterOp {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::new(CodecOp::FilterInit, format!("invalid filter '{}'", s));
        let (name, args) = match s.split_once('=') {
            Some((name, args)) => (name, Some(args)),
            None => (s, None),
        };

        let numbers = |expected: usize| -> CodecResult<Vec<u32>> {
            let values = args
                .ok_or_else(invalid)?
                .split(':')
                .map(|v| v.trim().parse::<u32>().map_err(|_| invalid()))
                .collect::<CodecResult<Vec<_>>>()?;
            if values.len() == expected {
                Ok(values)
            } else {
                Err(invalid())
            }
        };

        match (name, args) {
            ("hflip", None) => Ok(FilterOp::HFlip),
            ("transpose", Some("clock")) => Ok(FilterOp::Transpose(Rotation::Clockwise)),
            ("transpose", Some("cclock")) => Ok(FilterOp::Transpose(Rotation::CounterClockwise)),
            ("scale", _) => {
                let v = numbers(2)?;
                Ok(FilterOp::Scale { width: v[0], height: v[1] })
            }
            ("crop", _) => {
                let v = numbers(4)?;
                Ok(FilterOp::Crop { width: v[0], height: v[1], x: v[2], y: v[3] })
            }
            ("pad", _) => {
                let v = numbers(4)?;
                Ok(FilterOp::Pad { width: v[0], height: v[1], x: v[2], y: v[3] })
            }
            _ => Err(invalid()),
        }
    }
}

/// Render ops as a filtergraph description
pub fn describe(ops: &[FilterOp]) -> String {
    ops.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// The scale/crop/pad steps shared by all chains
#[derive(Debug, Clone, PartialEq)]
pub struct BaseTransform {
    ops: Vec<FilterOp>,
    plan: GeometryPlan,
}

impl BaseTransform {
    /// Compute the base steps for frames of (upright) size `source`.
    ///
    /// The scale step is always absolute, so frames of any input size leave
    /// the chain at [`output_size`](Self::output_size).
    pub fn compute(source: Size, geometry: &TargetGeometry) -> Self {
        let plan = geometry.plan(source);
        let mut ops = vec![FilterOp::Scale {
            width: plan.scaled.width,
            height: plan.scaled.height,
        }];

        if plan.cropped {
            ops.push(FilterOp::Crop {
                width: plan.content.width,
                height: plan.content.height,
                x: (plan.scaled.width - plan.content.width) / 2,
                y: (plan.scaled.height - plan.content.height) / 2,
            });
        }

        if plan.padded {
            ops.push(FilterOp::Pad {
                width: plan.output.width,
                height: plan.output.height,
                x: (plan.output.width - plan.content.width) / 2,
                y: (plan.output.height - plan.content.height) / 2,
            });
        }

        Self { ops, plan }
    }

    pub fn ops(&self) -> &[FilterOp] {
        &self.ops
    }

    pub fn plan(&self) -> &GeometryPlan {
        &self.plan
    }

    pub fn output_size(&self) -> Size {
        self.plan.output
    }

    pub fn description(&self) -> String {
        describe(&self.ops)
    }
}

/// Selects one of the four chains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub orientation: Orientation,
    pub facing: CameraFacing,
}

impl FilterKey {
    pub fn new(orientation: Orientation, facing: CameraFacing) -> Self {
        Self {
            orientation,
            facing,
        }
    }

    pub fn for_frame(frame: &VideoFrame) -> Self {
        Self::new(frame.orientation, frame.facing)
    }

    pub fn all() -> [FilterKey; 4] {
        [
            FilterKey::new(Orientation::Landscape, CameraFacing::Back),
            FilterKey::new(Orientation::Portrait, CameraFacing::Back),
            FilterKey::new(Orientation::Landscape, CameraFacing::Front),
            FilterKey::new(Orientation::Portrait, CameraFacing::Front),
        ]
    }

    /// Orientation fix-up applied before the base transform
    pub fn orientation_ops(&self) -> Vec<FilterOp> {
        match (self.facing, self.orientation) {
            (CameraFacing::Back, Orientation::Landscape) => vec![],
            (CameraFacing::Back, Orientation::Portrait) => {
                vec![FilterOp::Transpose(Rotation::Clockwise)]
            }
            (CameraFacing::Front, Orientation::Landscape) => vec![FilterOp::HFlip],
            (CameraFacing::Front, Orientation::Portrait) => vec![
                FilterOp::HFlip,
                FilterOp::Transpose(Rotation::CounterClockwise),
            ],
        }
    }

    pub fn chain(&self, base: &BaseTransform) -> Vec<FilterOp> {
        let mut ops = self.orientation_ops();
        ops.extend_from_slice(base.ops());
        ops
    }

    pub fn description(&self, base: &BaseTransform) -> String {
        describe(&self.chain(base))
    }
}

/// The four chains of one save operation
///
/// Owns every chain until [`release`](Self::release) (or drop), used or not.
pub struct FilterSet {
    chains: Vec<(FilterKey, Box<dyn FrameFilter>)>,
    output: Size,
}

impl FilterSet {
    /// Build all four chains up front
    pub fn build(
        engine: &dyn MediaEngine,
        base: &BaseTransform,
        format: PixelFormat,
    ) -> RecorderResult<Self> {
        let mut set = Self {
            chains: Vec::with_capacity(4),
            output: base.output_size(),
        };

        for key in FilterKey::all() {
            let description = key.description(base);
            tracing::debug!("Building filter chain {:?}: {}", key, description);
            // On failure `set` drops here and releases the chains built so far.
            let filter = engine.create_filter(&description, format)?;
            set.chains.push((key, filter));
        }

        Ok(set)
    }

    pub fn output_size(&self) -> Size {
        self.output
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn select(&mut self, key: FilterKey) -> Option<&mut dyn FrameFilter> {
        self.chains
            .iter_mut()
            .find(|(k, _)| *k == key)
            .map(|(_, f)| f.as_mut() as &mut dyn FrameFilter)
    }

    /// Push `frame` through its chain and hand every output frame to `sink`.
    ///
    /// Returns the number of frames emitted.
    pub fn process<F>(&mut self, frame: VideoFrame, mut sink: F) -> RecorderResult<usize>
    where
        F: FnMut(VideoFrame) -> RecorderResult<()>,
    {
        let key = FilterKey::for_frame(&frame);
        let filter = self.select(key).ok_or_else(|| {
            CodecError::new(CodecOp::FilterPush, format!("no filter chain for {:?}", key))
        })?;

        filter.push(frame)?;
        let mut emitted = Vec::new();
        while let Some(out) = filter.pull()? {
            emitted.push(out);
        }

        let count = emitted.len();
        for out in emitted {
            sink(out)?;
        }
        Ok(count)
    }

    /// Release every chain; failures are logged
    pub fn release(&mut self) {
        for (key, mut filter) in self.chains.drain(..) {
            if let Err(e) = filter.release() {
                tracing::warn!("Failed to release filter {:?}: {}", key, e);
            }
        }
    }
}

impl Drop for FilterSet {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ScalePolicy, TargetSize};

    fn base_640x480_to_320() -> BaseTransform {
        let geometry = TargetGeometry::new(TargetSize::width(320));
        BaseTransform::compute(Size::new(640, 480), &geometry)
    }

    #[test]
    fn test_base_transform_scale_only() {
        let base = base_640x480_to_320();
        assert_eq!(base.output_size(), Size::new(320, 240));
        assert_eq!(base.description(), "scale=320:240");
    }

    #[test]
    fn test_base_transform_fill_crops_centered() {
        let geometry = TargetGeometry::new(TargetSize::exact(480, 480));
        let base = BaseTransform::compute(Size::new(1280, 720), &geometry);
        assert_eq!(base.output_size(), Size::new(480, 480));
        assert_eq!(base.description(), "scale=854:481,crop=480:480:187:0");
    }

    #[test]
    fn test_base_transform_fit_pads_centered() {
        let geometry =
            TargetGeometry::new(TargetSize::exact(480, 480)).with_policy(ScalePolicy::Fit);
        let base = BaseTransform::compute(Size::new(960, 540), &geometry);
        assert_eq!(base.output_size(), Size::new(480, 480));
        assert_eq!(base.description(), "scale=480:270,pad=480:480:0:105");
    }

    #[test]
    fn test_chain_descriptions() {
        let base = base_640x480_to_320();

        let back_landscape = FilterKey::new(Orientation::Landscape, CameraFacing::Back);
        assert_eq!(back_landscape.description(&base), "scale=320:240");

        let back_portrait = FilterKey::new(Orientation::Portrait, CameraFacing::Back);
        assert_eq!(
            back_portrait.description(&base),
            "transpose=clock,scale=320:240"
        );

        let front_landscape = FilterKey::new(Orientation::Landscape, CameraFacing::Front);
        assert_eq!(front_landscape.description(&base), "hflip,scale=320:240");

        let front_portrait = FilterKey::new(Orientation::Portrait, CameraFacing::Front);
        let desc = front_portrait.description(&base);
        let hflip = desc.find("hflip").unwrap();
        let cclock = desc.find("transpose=cclock").unwrap();
        let scale = desc.find("scale=").unwrap();
        assert!(hflip < cclock && cclock < scale);
    }

    #[test]
    fn test_all_keys_distinct() {
        let keys = FilterKey::all();
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_parse_chain() {
        let ops = FilterOp::parse_chain("hflip,transpose=cclock,scale=320:240,crop=300:200:10:20,pad=320:240:10:20")
            .unwrap();
        assert_eq!(
            ops,
            vec![
                FilterOp::HFlip,
                FilterOp::Transpose(Rotation::CounterClockwise),
                FilterOp::Scale { width: 320, height: 240 },
                FilterOp::Crop { width: 300, height: 200, x: 10, y: 20 },
                FilterOp::Pad { width: 320, height: 240, x: 10, y: 20 },
            ]
        );
        assert_eq!(
            describe(&ops),
            "hflip,transpose=cclock,scale=320:240,crop=300:200:10:20,pad=320:240:10:20"
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(FilterOp::parse_chain("rotate=45").is_err());
        assert!(FilterOp::parse_chain("scale=320").is_err());
        assert!(FilterOp::parse_chain("transpose=dir").is_err());
    }
}
