//! Media codec engine capability traits
//!
//! The mux orchestrator only talks to encoders, filters and decoders through
//! these traits. Every call returns a [`CodecResult`] naming the primitive
//! that failed, so callers branch on results instead of catching panics.

pub mod software;

#[cfg(feature = "encoding")]
pub mod ffmpeg;

use crate::capture::{AudioChunk, PixelFormat, VideoFrame};
use crate::error::CodecResult;
use crate::ledger::Clip;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Output container and codec settings handed to [`MediaWriter::configure`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    pub width: u32,
    pub height: u32,
    /// Pixel layout of the frames passed to `record_frame`
    pub pixel_format: PixelFormat,
    pub frame_rate: u32,
    pub video_codec: String,
    /// Video bitrate in bits per second
    pub video_bitrate: u64,
    /// Constant rate factor, lower is better
    pub quality: u32,
    pub preset: String,
    pub audio_codec: String,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u64,
    pub sample_rate: u32,
    pub container_format: String,
}

/// Encoder and muxer for one output file
///
/// Lifecycle: `configure` → `start` → `record_*` → `stop` → `release`.
/// `release` must be safe to call in any state, including after a failure.
/// Frames arrive already retimed to `WriterConfig::frame_rate`, one per slot.
pub trait MediaWriter: Send {
    fn configure(&mut self, config: &WriterConfig) -> CodecResult<()>;

    fn start(&mut self) -> CodecResult<()>;

    fn record_frame(&mut self, frame: &VideoFrame) -> CodecResult<()>;

    fn record_samples(&mut self, chunk: &AudioChunk) -> CodecResult<()>;

    /// Flush and finish the output file
    fn stop(&mut self) -> CodecResult<()>;

    fn release(&mut self) -> CodecResult<()>;
}

/// A filter chain instance
///
/// A pushed frame may produce zero or more output frames; callers pull until
/// `None` after every push.
pub trait FrameFilter: Send {
    fn description(&self) -> &str;

    fn push(&mut self, frame: VideoFrame) -> CodecResult<()>;

    fn pull(&mut self) -> CodecResult<Option<VideoFrame>>;

    fn release(&mut self) -> CodecResult<()>;
}

/// Sequential frame reader for a file-backed clip
pub trait ClipDecoder: Send {
    fn next_frame(&mut self) -> CodecResult<Option<VideoFrame>>;

    fn release(&mut self) -> CodecResult<()>;
}

/// Factory for the codec primitives
pub trait MediaEngine: Send + Sync {
    /// Create a writer for `output` with `channels` audio channels
    fn create_writer(&self, output: &Path, channels: u16) -> CodecResult<Box<dyn MediaWriter>>;

    /// Build a filter chain from its description
    fn create_filter(&self, description: &str, format: PixelFormat)
        -> CodecResult<Box<dyn FrameFilter>>;

    /// Open a decoder for a spool or container clip, producing `format` frames
    fn open_decoder(&self, clip: &Clip, format: PixelFormat) -> CodecResult<Box<dyn ClipDecoder>>;

    /// Write the first frame of `video` as a still image at `output`
    fn extract_thumbnail(&self, video: &Path, output: &Path) -> CodecResult<()>;
}
