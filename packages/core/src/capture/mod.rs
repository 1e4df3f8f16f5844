use crate::geometry::{choose_best_size, ScalePolicy, Size};
use crate::{RecorderError, RecorderResult};
use serde::{Deserialize, Serialize};

pub mod audio;
pub mod buffer;

/// Packed pixel layouts accepted by the transform pipeline
///
/// Planar camera formats (NV21, I420) are converted by the camera
/// collaborator before frames reach the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    #[default]
    Bgra,
    Rgba,
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name understood by ffmpeg's `-pixel_format`
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra => "bgra",
            PixelFormat::Rgba => "rgba",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Gray8 => "gray",
        }
    }

    pub(crate) fn to_tag(self) -> u8 {
        match self {
            PixelFormat::Bgra => 0,
            PixelFormat::Rgba => 1,
            PixelFormat::Rgb24 => 2,
            PixelFormat::Gray8 => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PixelFormat::Bgra),
            1 => Some(PixelFormat::Rgba),
            2 => Some(PixelFormat::Rgb24),
            3 => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

/// Device orientation at capture time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    #[default]
    Landscape,
}

/// Which camera produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Front,
    #[default]
    Back,
}

/// Identifies the capture stream behind a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Video,
    Audio,
}

/// A raw captured video frame
///
/// Owns its pixels: the bytes are copied out of the camera's reusable buffer
/// at construction and never change afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Nanoseconds since the start of the recording session
    pub timestamp_ns: u64,
    pub orientation: Orientation,
    pub facing: CameraFacing,
}

impl VideoFrame {
    /// Copy a frame out of a capture buffer that the camera will reuse
    pub fn from_capture(
        buffer: &[u8],
        size: Size,
        format: PixelFormat,
        timestamp_ns: u64,
        orientation: Orientation,
        facing: CameraFacing,
    ) -> RecorderResult<Self> {
        let expected = Self::byte_len(size, format);
        if buffer.len() < expected {
            return Err(RecorderError::capture(format!(
                "Capture buffer holds {} bytes, {} needed for {} {:?}",
                buffer.len(),
                expected,
                size,
                format
            )));
        }

        Ok(Self {
            data: buffer[..expected].to_vec(),
            width: size.width,
            height: size.height,
            format,
            timestamp_ns,
            orientation,
            facing,
        })
    }

    /// Take ownership of a buffer already swapped out of the camera
    pub fn from_owned(
        mut buffer: Vec<u8>,
        size: Size,
        format: PixelFormat,
        timestamp_ns: u64,
        orientation: Orientation,
        facing: CameraFacing,
    ) -> RecorderResult<Self> {
        let expected = Self::byte_len(size, format);
        if buffer.len() < expected {
            return Err(RecorderError::capture(format!(
                "Capture buffer holds {} bytes, {} needed for {} {:?}",
                buffer.len(),
                expected,
                size,
                format
            )));
        }
        buffer.truncate(expected);

        Ok(Self {
            data: buffer,
            width: size.width,
            height: size.height,
            format,
            timestamp_ns,
            orientation,
            facing,
        })
    }

    pub fn byte_len(size: Size, format: PixelFormat) -> usize {
        size.width as usize * size.height as usize * format.bytes_per_pixel()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn is_portrait(&self) -> bool {
        self.orientation == Orientation::Portrait
    }

    pub fn is_front_camera(&self) -> bool {
        self.facing == CameraFacing::Front
    }

    /// Size of the picture once rotated upright for its orientation
    pub fn upright_size(&self) -> Size {
        upright_size(self.size(), self.orientation)
    }
}

/// Camera frames are delivered landscape; portrait recordings are rotated 90°.
pub fn upright_size(native: Size, orientation: Orientation) -> Size {
    match orientation {
        Orientation::Landscape => native,
        Orientation::Portrait => native.transposed(),
    }
}

/// A chunk of interleaved signed 16-bit PCM
///
/// Carries no timestamp; its position follows from the number of samples
/// consumed before it.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<i16>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<i16>, channels: u16, sample_rate: u32) -> Self {
        Self {
            samples,
            channels,
            sample_rate,
        }
    }

    /// Samples per channel
    pub fn frames(&self) -> u64 {
        if self.channels == 0 {
            return 0;
        }
        (self.samples.len() / self.channels as usize) as u64
    }

    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_micros(self.frames() * 1_000_000 / self.sample_rate as u64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Metadata describing the bytes handed to a preview callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewInfo {
    pub size: Size,
    pub format: PixelFormat,
    pub orientation: Orientation,
    pub facing: CameraFacing,
}

/// Per-frame callback registered with a camera.
///
/// The buffer belongs to the camera; the callee must swap a fresh buffer in
/// before returning so the camera's next write cannot tear the frame.
pub type PreviewCallback = Box<dyn FnMut(MediaSource, &mut Vec<u8>, PreviewInfo) + Send>;

/// Capability surface of the platform camera
pub trait CameraDevice: Send {
    fn open(&mut self, facing: CameraFacing) -> RecorderResult<()>;
    fn close(&mut self) -> RecorderResult<()>;
    fn is_open(&self) -> bool;
    fn facing(&self) -> CameraFacing;
    fn supported_preview_sizes(&self) -> Vec<Size>;
    fn set_preview_size(&mut self, size: Size) -> RecorderResult<()>;
    fn preview_size(&self) -> Size;
    fn display_orientation(&self) -> Orientation;
    fn set_flash(&mut self, enabled: bool) -> RecorderResult<()>;
    /// Focus at a normalized (0.0-1.0) preview position
    fn focus_at(&mut self, x: f32, y: f32) -> RecorderResult<()>;
    fn start_preview(&mut self, callback: PreviewCallback) -> RecorderResult<()>;
    fn stop_preview(&mut self) -> RecorderResult<()>;
}

/// Capability surface of the platform microphone
///
/// Implementations push chunks into the sender from their own capture context.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    fn start(&mut self, sink: crossbeam_channel::Sender<AudioChunk>) -> RecorderResult<()>;
    fn stop(&mut self) -> RecorderResult<()>;
    fn is_running(&self) -> bool;
}

/// Pick the camera preview size that best serves `target` and apply it
pub fn negotiate_preview_size(
    camera: &mut dyn CameraDevice,
    target: Size,
    policy: ScalePolicy,
) -> RecorderResult<Size> {
    let supported = camera.supported_preview_sizes();
    let best = choose_best_size(&supported, target, policy).ok_or_else(|| {
        RecorderError::capture("Camera reports no supported preview sizes")
    })?;

    if best != camera.preview_size() {
        camera.set_preview_size(best)?;
    }
    tracing::debug!(
        "Negotiated preview size {} for target {} from {} candidates",
        best,
        target,
        supported.len()
    );
    Ok(best)
}
