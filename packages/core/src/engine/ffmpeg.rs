//! Media engine backed by the ffmpeg binary via ffmpeg-sidecar
//!
//! - Video: raw frames are piped to an ffmpeg encoder process on stdin
//! - Audio: PCM is written to a temporary WAV file with hound
//! - On stop the two are muxed into the output container
//!
//! Filtering runs in-process with [`SoftwareFilter`]; spool clips are read
//! with [`SpoolDecoder`] and container clips are decoded by ffmpeg to raw
//! frames on stdout.

use super::software::{SoftwareFilter, SpoolDecoder};
use super::{ClipDecoder, FrameFilter, MediaEngine, MediaWriter, WriterConfig};
use crate::capture::{AudioChunk, CameraFacing, Orientation, PixelFormat, VideoFrame};
use crate::error::{CodecError, CodecOp, CodecResult};
use crate::ledger::{Clip, ClipSource, CONTAINER_FRAME_RATE};
use ffmpeg_sidecar::command::FfmpegCommand;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};

const CONTAINER_FRAME_NS: u64 = 1_000_000_000 / CONTAINER_FRAME_RATE as u64;

/// Engine spawning ffmpeg processes
#[derive(Debug, Default)]
pub struct FfmpegEngine {
    auto_download: bool,
}

impl FfmpegEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Download ffmpeg on first use when it is not installed
    pub fn with_auto_download(mut self, enabled: bool) -> Self {
        self.auto_download = enabled;
        self
    }

    /// Ensure ffmpeg is available, downloading it if allowed
    pub fn ensure_ffmpeg(&self, op: CodecOp) -> CodecResult<()> {
        if ffmpeg_sidecar::command::ffmpeg_is_installed() {
            return Ok(());
        }
        if !self.auto_download {
            return Err(CodecError::new(op, "ffmpeg is not installed"));
        }

        tracing::info!("FFmpeg not found, downloading...");
        ffmpeg_sidecar::download::auto_download()
            .map_err(|e| CodecError::new(op, format!("failed to download ffmpeg: {}", e)))?;
        tracing::info!("FFmpeg downloaded successfully");
        Ok(())
    }
}

impl MediaEngine for FfmpegEngine {
    fn create_writer(&self, output: &Path, channels: u16) -> CodecResult<Box<dyn MediaWriter>> {
        self.ensure_ffmpeg(CodecOp::Configure)?;
        Ok(Box::new(FfmpegWriter::new(output, channels)))
    }

    fn create_filter(
        &self,
        description: &str,
        format: PixelFormat,
    ) -> CodecResult<Box<dyn FrameFilter>> {
        Ok(Box::new(SoftwareFilter::new(description, format)?))
    }

    fn open_decoder(&self, clip: &Clip, format: PixelFormat) -> CodecResult<Box<dyn ClipDecoder>> {
        match &clip.source {
            ClipSource::Spool(path) => Ok(Box::new(SpoolDecoder::open(path, format)?)),
            ClipSource::Container(path) => {
                self.ensure_ffmpeg(CodecOp::Decode)?;
                Ok(Box::new(ContainerDecoder::spawn(
                    path,
                    clip.width,
                    clip.height,
                    format,
                )?))
            }
            ClipSource::Frames(_) => Err(CodecError::new(
                CodecOp::Decode,
                "in-memory clips are not decoded",
            )),
        }
    }

    fn extract_thumbnail(&self, video: &Path, output: &Path) -> CodecResult<()> {
        self.ensure_ffmpeg(CodecOp::Thumbnail)?;

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-i", &*video.to_string_lossy()]);
        cmd.args(["-frames:v", "1", "-y"]);
        cmd.arg(&*output.to_string_lossy());

        let result = cmd
            .as_inner_mut()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CodecError::new(CodecOp::Thumbnail, e.to_string()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(CodecError::new(CodecOp::Thumbnail, stderr.trim().to_string()));
        }
        Ok(())
    }
}

/// Writer producing one muxed container file
pub struct FfmpegWriter {
    output_path: PathBuf,
    channels: u16,
    config: Option<WriterConfig>,
    process: Option<Child>,
    video_stdin: Option<ChildStdin>,
    audio_writer: Option<hound::WavWriter<BufWriter<File>>>,
    audio_samples: u64,
    frame_count: u64,
}

impl FfmpegWriter {
    pub fn new(output: &Path, channels: u16) -> Self {
        Self {
            output_path: output.to_path_buf(),
            channels,
            config: None,
            process: None,
            video_stdin: None,
            audio_writer: None,
            audio_samples: 0,
            frame_count: 0,
        }
    }

    fn container_ext(&self) -> &str {
        self.config
            .as_ref()
            .map_or("mp4", |c| c.container_format.as_str())
    }

    fn video_temp_path(&self) -> PathBuf {
        self.output_path
            .with_extension(format!("video.{}", self.container_ext()))
    }

    fn audio_temp_path(&self) -> PathBuf {
        self.output_path.with_extension("audio.wav")
    }

    fn config(&self, op: CodecOp) -> CodecResult<&WriterConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| CodecError::new(op, "writer not configured"))
    }

    fn spawn_video_encoder(&mut self) -> CodecResult<()> {
        let config = self.config(CodecOp::Start)?.clone();
        let video_temp = self.video_temp_path();

        let mut cmd = FfmpegCommand::new();

        // Input: raw frames from stdin
        cmd.args([
            "-f",
            "rawvideo",
            "-pixel_format",
            config.pixel_format.ffmpeg_name(),
            "-video_size",
            &format!("{}x{}", config.width, config.height),
            "-framerate",
            &config.frame_rate.to_string(),
            "-i",
            "pipe:0",
        ]);

        // 4:2:0 chroma needs an even height
        if config.height % 2 != 0 {
            cmd.args(["-vf", "pad=iw:ih+1:0:0"]);
        }
        cmd.args(["-c:v", &config.video_codec]);
        cmd.args(["-preset", &config.preset]);
        cmd.args(["-crf", &config.quality.to_string()]);
        cmd.args(["-pix_fmt", "yuv420p"]);
        cmd.args(["-maxrate", &format!("{}k", config.video_bitrate / 1000)]);
        cmd.args(["-bufsize", &format!("{}k", config.video_bitrate / 500)]);
        cmd.args(["-an", "-f", &config.container_format, "-y"]);
        cmd.arg(&*video_temp.to_string_lossy());

        let mut child = cmd
            .as_inner_mut()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CodecError::new(CodecOp::Start, format!("failed to start ffmpeg: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CodecError::new(CodecOp::Start, "failed to get ffmpeg stdin"))?;

        self.video_stdin = Some(stdin);
        self.process = Some(child);

        tracing::info!(
            "Video encoder started: {}x{} @ {} fps, codec: {}",
            config.width,
            config.height,
            config.frame_rate,
            config.video_codec
        );
        Ok(())
    }

    fn finish_audio(&mut self) -> CodecResult<Option<PathBuf>> {
        let Some(writer) = self.audio_writer.take() else {
            return Ok(None);
        };
        writer
            .finalize()
            .map_err(|e| CodecError::new(CodecOp::Stop, format!("failed to finalize audio: {}", e)))?;

        if self.audio_samples == 0 {
            let _ = std::fs::remove_file(self.audio_temp_path());
            return Ok(None);
        }
        Ok(Some(self.audio_temp_path()))
    }

    fn mux(&self, video: &Path, audio: &Path) -> CodecResult<()> {
        let config = self.config(CodecOp::Stop)?;

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-i", &*video.to_string_lossy()]);
        cmd.args(["-i", &*audio.to_string_lossy()]);
        cmd.args(["-map", "0:v:0", "-map", "1:a:0"]);
        cmd.args(["-c:v", "copy"]);
        cmd.args(["-c:a", &config.audio_codec]);
        cmd.args(["-b:a", &format!("{}k", config.audio_bitrate / 1000)]);
        cmd.args(["-f", &config.container_format, "-y"]);
        cmd.arg(&*self.output_path.to_string_lossy());

        let output = cmd
            .as_inner_mut()
            .stdin(Stdio::null())
            .output()
            .map_err(|e| CodecError::new(CodecOp::Stop, format!("muxing failed: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CodecError::new(
                CodecOp::Stop,
                format!("muxing failed: {}", stderr.trim()),
            ));
        }

        tracing::info!("Muxing complete: {:?}", self.output_path);
        Ok(())
    }

    fn remove_temp_files(&self) {
        for path in [self.video_temp_path(), self.audio_temp_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove temp file {:?}: {}", path, e),
            }
        }
    }
}

impl MediaWriter for FfmpegWriter {
    fn configure(&mut self, config: &WriterConfig) -> CodecResult<()> {
        if self.process.is_some() {
            return Err(CodecError::new(CodecOp::Configure, "writer already started"));
        }
        if config.width % 2 != 0 {
            return Err(CodecError::new(
                CodecOp::Configure,
                format!("width {} is not even", config.width),
            ));
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        if self.process.is_some() {
            return Err(CodecError::new(CodecOp::Start, "writer already started"));
        }
        let sample_rate = self.config(CodecOp::Start)?.sample_rate;
        self.spawn_video_encoder()?;

        if self.channels > 0 {
            let spec = hound::WavSpec {
                channels: self.channels,
                sample_rate,
                bits_per_sample: 16,
                sample_format: hound::SampleFormat::Int,
            };
            let writer = hound::WavWriter::create(self.audio_temp_path(), spec).map_err(|e| {
                CodecError::new(CodecOp::Start, format!("failed to create audio file: {}", e))
            })?;
            self.audio_writer = Some(writer);
        }
        Ok(())
    }

    fn record_frame(&mut self, frame: &VideoFrame) -> CodecResult<()> {
        let stdin = self
            .video_stdin
            .as_mut()
            .ok_or_else(|| CodecError::new(CodecOp::Record, "encoder not started"))?;

        stdin
            .write_all(&frame.data)
            .map_err(|e| CodecError::new(CodecOp::Record, format!("failed to write frame: {}", e)))?;

        self.frame_count += 1;
        if self.frame_count % 100 == 0 {
            tracing::debug!("Encoded {} frames", self.frame_count);
        }
        Ok(())
    }

    fn record_samples(&mut self, chunk: &AudioChunk) -> CodecResult<()> {
        let sample_rate = self.config(CodecOp::RecordSamples)?.sample_rate;
        if chunk.sample_rate != sample_rate {
            return Err(CodecError::new(
                CodecOp::RecordSamples,
                format!(
                    "chunk is {}Hz, writer expects {}Hz",
                    chunk.sample_rate, sample_rate
                ),
            ));
        }
        if chunk.channels != self.channels {
            return Err(CodecError::new(
                CodecOp::RecordSamples,
                format!(
                    "chunk has {} channels, writer expects {}",
                    chunk.channels, self.channels
                ),
            ));
        }
        let writer = self
            .audio_writer
            .as_mut()
            .ok_or_else(|| CodecError::new(CodecOp::RecordSamples, "audio not started"))?;

        for sample in &chunk.samples {
            writer.write_sample(*sample).map_err(|e| {
                CodecError::new(CodecOp::RecordSamples, format!("failed to write sample: {}", e))
            })?;
        }
        self.audio_samples += chunk.samples.len() as u64;
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        // Closing stdin signals end of input.
        drop(self.video_stdin.take());

        let mut process = self
            .process
            .take()
            .ok_or_else(|| CodecError::new(CodecOp::Stop, "encoder not started"))?;
        let status = process
            .wait()
            .map_err(|e| CodecError::new(CodecOp::Stop, format!("ffmpeg process failed: {}", e)))?;
        if !status.success() {
            return Err(CodecError::new(
                CodecOp::Stop,
                format!("ffmpeg exited with status: {}", status),
            ));
        }

        let video_temp = self.video_temp_path();
        match self.finish_audio()? {
            Some(audio) => {
                self.mux(&video_temp, &audio)?;
                self.remove_temp_files();
            }
            None => {
                std::fs::rename(&video_temp, &self.output_path).map_err(|e| {
                    CodecError::new(CodecOp::Stop, format!("failed to rename output: {}", e))
                })?;
            }
        }

        tracing::info!(
            "Encoding finalized: {} frames to {:?}",
            self.frame_count,
            self.output_path
        );
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        drop(self.video_stdin.take());
        drop(self.audio_writer.take());

        let mut result = Ok(());
        if let Some(mut process) = self.process.take() {
            // Only reached when stop() never ran to completion.
            if let Err(e) = process.kill().and_then(|()| process.wait().map(|_| ())) {
                result = Err(CodecError::new(
                    CodecOp::Release,
                    format!("failed to kill ffmpeg: {}", e),
                ));
            }
        }
        self.remove_temp_files();
        result
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("{}", e);
        }
    }
}

/// Decodes a container file to raw frames through an ffmpeg child process
pub struct ContainerDecoder {
    process: Option<Child>,
    stdout: Option<ChildStdout>,
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_size: usize,
    frame_index: u64,
}

impl ContainerDecoder {
    pub fn spawn(path: &Path, width: u32, height: u32, format: PixelFormat) -> CodecResult<Self> {
        if width == 0 || height == 0 {
            return Err(CodecError::new(
                CodecOp::Decode,
                format!("container clip {:?} has no frame size", path),
            ));
        }

        let mut cmd = FfmpegCommand::new();
        cmd.args(["-i", &*path.to_string_lossy()]);
        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            format.ffmpeg_name(),
            "-s",
            &format!("{}x{}", width, height),
            "-r",
            &CONTAINER_FRAME_RATE.to_string(),
            "-",
        ]);

        let mut child = cmd
            .as_inner_mut()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CodecError::new(CodecOp::Decode, format!("failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CodecError::new(CodecOp::Decode, "no ffmpeg stdout"))?;

        tracing::debug!("Decoding {:?} at {}x{}", path, width, height);

        Ok(Self {
            process: Some(child),
            stdout: Some(stdout),
            width,
            height,
            format,
            frame_size: width as usize * height as usize * format.bytes_per_pixel(),
            frame_index: 0,
        })
    }
}

impl ClipDecoder for ContainerDecoder {
    fn next_frame(&mut self) -> CodecResult<Option<VideoFrame>> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| CodecError::new(CodecOp::Decode, "decoder already released"))?;

        let mut buffer = vec![0u8; self.frame_size];
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = VideoFrame {
                    data: buffer,
                    width: self.width,
                    height: self.height,
                    format: self.format,
                    // Stamped at the end of the frame's interval, like captured frames.
                    timestamp_ns: (self.frame_index + 1) * CONTAINER_FRAME_NS,
                    // Container clips are stored upright.
                    orientation: Orientation::Landscape,
                    facing: CameraFacing::Back,
                };
                self.frame_index += 1;
                Ok(Some(frame))
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(CodecError::new(CodecOp::Decode, format!("read error: {}", e))),
        }
    }

    fn release(&mut self) -> CodecResult<()> {
        drop(self.stdout.take());
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            process
                .wait()
                .map_err(|e| CodecError::new(CodecOp::Release, e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for ContainerDecoder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("Failed to release decoder: {}", e);
        }
    }
}
