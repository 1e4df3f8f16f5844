//! Recorder configuration
//!
//! One flat struct per concern, aggregated by [`RecorderConfig`] and stored
//! as JSON in the user's config directory. Validation is a pure function
//! over the whole aggregate.

use crate::capture::{CameraFacing, PixelFormat};
use crate::engine::WriterConfig;
use crate::error::{RecorderError, RecorderResult};
use crate::geometry::{ScalePolicy, Size, TargetGeometry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Video codec for the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoCodec {
    /// H.264/AVC - widely compatible
    #[default]
    H264,
    /// H.265/HEVC - better compression
    H265,
}

impl VideoCodec {
    pub fn encoder_name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::H265 => write!(f, "H.265"),
        }
    }
}

/// Audio codec for the output file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// AAC - widely compatible
    #[default]
    Aac,
    /// Opus - better quality at low bitrates
    Opus,
}

impl AudioCodec {
    pub fn encoder_name(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Opus => "libopus",
        }
    }
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    #[default]
    Mp4,
    Mov,
    Mkv,
}

impl ContainerFormat {
    /// ffmpeg muxer name
    pub fn muxer_name(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "matroska",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mkv => "mkv",
        }
    }
}

/// Quality preset for quick configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
    /// Uses `EncoderConfig::custom_crf`
    Custom,
}

impl QualityPreset {
    /// Recommended CRF, lower is better
    pub fn recommended_crf(&self) -> u32 {
        match self {
            QualityPreset::Low => 28,
            QualityPreset::Medium => 23,
            QualityPreset::High => 18,
            QualityPreset::Custom => 23,
        }
    }
}

/// Camera-side settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Size asked for during preview size negotiation
    pub preferred_preview_size: Size,
    pub facing: CameraFacing,
    pub frame_rate: u32,
    pub pixel_format: PixelFormat,
    /// Policy used when scoring supported preview sizes
    pub preview_policy: ScalePolicy,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            preferred_preview_size: Size::new(640, 480),
            facing: CameraFacing::Back,
            frame_rate: 30,
            pixel_format: PixelFormat::Bgra,
            preview_policy: ScalePolicy::Fill,
        }
    }
}

impl CameraConfig {
    pub fn with_preview_size(mut self, size: Size) -> Self {
        self.preferred_preview_size = size;
        self
    }

    pub fn with_facing(mut self, facing: CameraFacing) -> Self {
        self.facing = facing;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }
}

/// Encoder and container settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Video bitrate in bits per second
    pub video_bitrate: u64,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_rate: u32,
    pub quality: QualityPreset,
    #[serde(default)]
    pub custom_crf: Option<u32>,
    /// Preset (ultrafast, fast, medium, slow, veryslow)
    pub preset: String,
    pub container: ContainerFormat,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Aac,
            video_bitrate: 2_000_000, // 2 Mbps
            audio_bitrate: 128_000,   // 128 kbps
            sample_rate: 44_100,
            channels: 1,
            frame_rate: 30,
            quality: QualityPreset::Medium,
            custom_crf: None,
            preset: "veryfast".to_string(),
            container: ContainerFormat::Mp4,
        }
    }
}

impl EncoderConfig {
    pub fn with_video_codec(mut self, codec: VideoCodec) -> Self {
        self.video_codec = codec;
        self
    }

    pub fn with_quality(mut self, quality: QualityPreset) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_audio(mut self, sample_rate: u32, channels: u16) -> Self {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self
    }

    pub fn effective_crf(&self) -> u32 {
        match self.quality {
            QualityPreset::Custom => self.custom_crf.unwrap_or(23),
            _ => self.quality.recommended_crf(),
        }
    }

    /// Writer settings for a resolved output size
    pub fn writer_config(&self, output: Size, pixel_format: PixelFormat) -> WriterConfig {
        WriterConfig {
            width: output.width,
            height: output.height,
            pixel_format,
            frame_rate: self.frame_rate,
            video_codec: self.video_codec.encoder_name().to_string(),
            video_bitrate: self.video_bitrate,
            quality: self.effective_crf(),
            preset: self.preset.clone(),
            audio_codec: self.audio_codec.encoder_name().to_string(),
            audio_bitrate: self.audio_bitrate,
            sample_rate: self.sample_rate,
            container_format: self.container.muxer_name().to_string(),
        }
    }
}

/// Where and how the result is written
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    pub output_path: Option<PathBuf>,
    pub target: TargetGeometry,
    /// Write `<output>.jpg` next to the output
    pub thumbnail: bool,
    /// Directory for clip spools; defaults to the user cache directory
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl OutputConfig {
    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    pub fn with_target(mut self, target: TargetGeometry) -> Self {
        self.target = target;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: bool) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.spool_dir.clone().unwrap_or_else(default_spool_dir)
    }
}

/// Limits on recording interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionLimits {
    /// Recording stops automatically at this total length
    pub max_recording_ms: u64,
    /// Shortest total recording that can be saved
    pub min_recording_ms: u64,
    /// Clips shorter than this are discarded on stop
    pub min_clip_ms: u64,
}

impl Default for InteractionLimits {
    fn default() -> Self {
        Self {
            max_recording_ms: 15_000,
            min_recording_ms: 1_000,
            min_clip_ms: 0,
        }
    }
}

impl InteractionLimits {
    pub fn max_recording_time(&self) -> Duration {
        Duration::from_millis(self.max_recording_ms)
    }

    pub fn min_recording_time(&self) -> Duration {
        Duration::from_millis(self.min_recording_ms)
    }

    pub fn min_clip_duration(&self) -> Duration {
        Duration::from_millis(self.min_clip_ms)
    }

    pub fn with_max_recording_time(mut self, max: Duration) -> Self {
        self.max_recording_ms = max.as_millis() as u64;
        self
    }

    pub fn with_min_recording_time(mut self, min: Duration) -> Self {
        self.min_recording_ms = min.as_millis() as u64;
        self
    }
}

/// Complete recorder configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub limits: InteractionLimits,
}

impl RecorderConfig {
    /// Check the configuration before any resource is allocated
    pub fn validate(&self) -> RecorderResult<()> {
        if self.output.output_path.is_none() {
            return Err(RecorderError::configuration("Output path is required"));
        }
        self.validate_capture()
    }

    /// Everything [`validate`](Self::validate) checks except the output path,
    /// which may be chosen after recording
    pub fn validate_capture(&self) -> RecorderResult<()> {
        if self.camera.frame_rate == 0 || self.encoder.frame_rate == 0 {
            return Err(RecorderError::configuration(
                "Frame rate must be greater than 0",
            ));
        }
        if self.encoder.sample_rate == 0 {
            return Err(RecorderError::configuration(
                "Sample rate must be greater than 0",
            ));
        }
        if self.encoder.channels == 0 || self.encoder.channels > 2 {
            return Err(RecorderError::configuration(format!(
                "Unsupported channel count {}",
                self.encoder.channels
            )));
        }
        if self.camera.preferred_preview_size.is_empty() {
            return Err(RecorderError::configuration(
                "Preview size must be greater than 0",
            ));
        }
        let target = self.output.target.size;
        if target.width == Some(0) || target.height == Some(0) {
            return Err(RecorderError::configuration(
                "Target dimensions must be greater than 0",
            ));
        }
        if self.limits.max_recording_ms == 0 {
            return Err(RecorderError::configuration(
                "Max recording time must be greater than 0",
            ));
        }
        if self.limits.min_recording_ms > self.limits.max_recording_ms {
            return Err(RecorderError::configuration(format!(
                "Min recording time {}ms exceeds max {}ms",
                self.limits.min_recording_ms, self.limits.max_recording_ms
            )));
        }
        if self.encoder.quality == QualityPreset::Custom && self.encoder.custom_crf.is_none() {
            return Err(RecorderError::configuration(
                "Custom quality requires a CRF value",
            ));
        }
        Ok(())
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("app", "cliprec", "Cliprec")
            .map(|dirs| dirs.config_dir().join("recorder.json"))
            .unwrap_or_else(|| PathBuf::from("./recorder.json"))
    }

    pub fn load(path: &Path) -> RecorderResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> RecorderResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn default_spool_dir() -> PathBuf {
    directories::ProjectDirs::from("app", "cliprec", "Cliprec")
        .map(|dirs| dirs.cache_dir().join("clips"))
        .unwrap_or_else(|| std::env::temp_dir().join("cliprec-clips"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::TargetSize;
    use tempfile::TempDir;

    fn valid() -> RecorderConfig {
        RecorderConfig {
            output: OutputConfig::default().with_output_path("/tmp/out.mp4"),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_requires_output_path() {
        let err = RecorderConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("Output path"));
        assert!(RecorderConfig::default().validate_capture().is_ok());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_rates() {
        let mut config = valid();
        config.encoder.frame_rate = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.encoder.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_min_above_max() {
        let mut config = valid();
        config.limits = InteractionLimits::default()
            .with_max_recording_time(Duration::from_secs(1))
            .with_min_recording_time(Duration::from_secs(2));
        assert!(matches!(
            config.validate(),
            Err(RecorderError::Configuration(_))
        ));
    }

    #[test]
    fn test_undefined_target_allowed() {
        let mut config = valid();
        config.output.target = TargetGeometry::new(TargetSize::default());
        assert!(config.validate().is_ok());

        config.output.target = TargetGeometry::new(TargetSize::width(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_custom_quality_needs_crf() {
        let mut config = valid();
        config.encoder.quality = QualityPreset::Custom;
        assert!(config.validate().is_err());
        config.encoder.custom_crf = Some(30);
        assert!(config.validate().is_ok());
        assert_eq!(config.encoder.effective_crf(), 30);
    }

    #[test]
    fn test_writer_config() {
        let encoder = EncoderConfig::default().with_quality(QualityPreset::High);
        let writer = encoder.writer_config(Size::new(320, 240), PixelFormat::Rgba);
        assert_eq!((writer.width, writer.height), (320, 240));
        assert_eq!(writer.quality, 18);
        assert_eq!(writer.video_codec, "libx264");
        assert_eq!(writer.container_format, "mp4");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("recorder.json");

        let mut config = valid();
        config.output.target = TargetGeometry::new(TargetSize::width(320));
        config.save(&path).unwrap();

        let loaded = RecorderConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recorder.json");
        std::fs::write(&path, r#"{"limits":{"max_recording_ms":6000,"min_recording_ms":500,"min_clip_ms":0}}"#)
            .unwrap();

        let loaded = RecorderConfig::load(&path).unwrap();
        assert_eq!(loaded.limits.max_recording_time(), Duration::from_secs(6));
        assert_eq!(loaded.encoder, EncoderConfig::default());
    }
}
