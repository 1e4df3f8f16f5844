//! Save pipeline: clips and audio in, one muxed container out
//!
//! Runs single-threaded: every video frame of every clip in recording order,
//! each through the filter chain for its orientation and camera, then every
//! audio chunk. The writer, the four filter chains and any open decoder are
//! released on every exit path.
//!
//! Writers take frames at a constant rate. [`FrameRetimer`] maps each frame's
//! session timestamp onto that grid, so a camera running slower or faster
//! than the encoder keeps its real timing against the audio track.

use crate::capture::{AudioChunk, VideoFrame};
use crate::config::RecorderConfig;
use crate::engine::{ClipDecoder, MediaEngine, MediaWriter};
use crate::error::{CodecResult, RecorderError, RecorderResult};
use crate::filter::{BaseTransform, FilterSet};
use crate::geometry::Size;
use crate::ledger::{Clip, ClipSource};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Scale of the `current`/`total` values passed to [`ProgressListener::on_progress`]
pub const PROGRESS_SCALE: u64 = 10_000;

/// Which pass a progress update belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStage {
    Video,
    Audio,
}

/// Receives save progress
///
/// Called from the save worker thread.
pub trait ProgressListener: Send + Sync {
    fn on_start(&self) {}

    /// A pass begins; video always comes first
    fn on_stage(&self, _stage: SaveStage) {}

    /// Overall progress as `current` out of `total`
    fn on_progress(&self, current: u64, total: u64);

    fn on_done(&self, _outcome: &SaveOutcome) {}

    fn on_failed(&self, _error: &RecorderError) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressListener for NoProgress {
    fn on_progress(&self, _current: u64, _total: u64) {}
}

/// How the progress range is shared between the video and audio passes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSplit {
    /// Fraction of the range covered by the video pass, in `0.0..=1.0`
    pub video_weight: f64,
}

impl Default for ProgressSplit {
    fn default() -> Self {
        Self { video_weight: 0.9 }
    }
}

impl ProgressSplit {
    pub fn new(video_weight: f64) -> Self {
        Self {
            video_weight: video_weight.clamp(0.0, 1.0),
        }
    }

    /// Video gets the whole range when there is no audio
    fn effective_video_weight(&self, has_audio: bool) -> f64 {
        if has_audio {
            self.video_weight
        } else {
            1.0
        }
    }

    pub fn video_progress(&self, done: u64, total: u64, has_audio: bool) -> u64 {
        let weight = self.effective_video_weight(has_audio);
        scaled(done, total, 0.0, weight)
    }

    pub fn audio_progress(&self, done: u64, total: u64) -> u64 {
        scaled(done, total, self.video_weight, 1.0 - self.video_weight)
    }
}

fn scaled(done: u64, total: u64, offset: f64, weight: f64) -> u64 {
    let fraction = if total == 0 {
        1.0
    } else {
        (done as f64 / total as f64).min(1.0)
    };
    ((offset + fraction * weight) * PROGRESS_SCALE as f64).round() as u64
}

/// Cooperative cancellation flag shared with a running save
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> RecorderResult<()> {
        if self.is_cancelled() {
            Err(RecorderError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Everything a save needs
#[derive(Debug, Clone)]
pub struct SaveRequest {
    /// Finalized clips in recording order
    pub clips: Vec<Clip>,
    /// Recorded audio in order
    pub audio: Vec<AudioChunk>,
    pub config: RecorderConfig,
}

impl SaveRequest {
    pub fn new(clips: Vec<Clip>, audio: Vec<AudioChunk>, config: RecorderConfig) -> Self {
        Self {
            clips,
            audio,
            config,
        }
    }

    /// Pointwise maximum of the clips' upright frame sizes
    pub fn source_size(&self) -> Size {
        self.clips
            .iter()
            .fold(Size::default(), |acc, clip| acc.union(clip.upright))
    }

    /// Frames the clips will yield when decoded
    pub fn total_video_frames(&self) -> u64 {
        self.clips.iter().map(Clip::expected_frames).sum()
    }

    pub fn total_audio_chunks(&self) -> u64 {
        self.audio.len() as u64
    }
}

/// Result of a successful save
#[derive(Debug, Clone, PartialEq)]
pub struct SaveOutcome {
    pub output_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub video_frames: u64,
    /// Audio samples per channel written
    pub audio_samples: u64,
    pub width: u32,
    pub height: u32,
    pub duration: Duration,
}

/// Thumbnail location for an output file
pub fn thumbnail_path(output: &Path) -> PathBuf {
    output.with_extension("jpg")
}

/// Places stamped frames on a writer's constant frame-rate grid
///
/// A frame stamped `t` fills the grid slot that ends at `t`. Slots a slow
/// camera skipped repeat the previous frame; a frame whose slot is already
/// filled is dropped.
#[derive(Debug)]
pub struct FrameRetimer {
    frame_rate: u64,
    last: Option<VideoFrame>,
    written: u64,
    repeated: u64,
    dropped: u64,
}

impl FrameRetimer {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_rate: frame_rate.max(1) as u64,
            last: None,
            written: 0,
            repeated: 0,
            dropped: 0,
        }
    }

    /// Grid slot of a frame stamped `timestamp_ns`
    pub fn slot(&self, timestamp_ns: u64) -> u64 {
        let ticks = (timestamp_ns as u128 * self.frame_rate as u128 + 500_000_000) / 1_000_000_000;
        (ticks as u64).saturating_sub(1)
    }

    /// Frames handed to the writer, repeats included
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn repeated(&self) -> u64 {
        self.repeated
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Time covered by the frames written so far
    pub fn end_ns(&self) -> u64 {
        (self.written as u128 * 1_000_000_000 / self.frame_rate as u128) as u64
    }

    pub fn duration(&self) -> Duration {
        Duration::from_nanos(self.end_ns())
    }

    /// Write `frame` into its slot. Returns how many frames reached the writer.
    pub fn write(&mut self, frame: VideoFrame, writer: &mut dyn MediaWriter) -> CodecResult<u64> {
        let slot = self.slot(frame.timestamp_ns);
        if slot < self.written {
            self.dropped += 1;
            return Ok(0);
        }

        let mut count = 0;
        while self.written < slot {
            // Before the first frame there is nothing to repeat yet.
            let filler = self.last.as_ref().unwrap_or(&frame);
            writer.record_frame(filler)?;
            self.written += 1;
            self.repeated += 1;
            count += 1;
        }
        writer.record_frame(&frame)?;
        self.written += 1;
        self.last = Some(frame);
        Ok(count + 1)
    }
}

/// Writer that is released on drop
struct WriterGuard {
    writer: Box<dyn MediaWriter>,
    released: bool,
}

impl WriterGuard {
    fn new(writer: Box<dyn MediaWriter>) -> Self {
        Self {
            writer,
            released: false,
        }
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Err(e) = self.writer.release() {
            tracing::warn!("Failed to release writer: {}", e);
        }
    }
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decoder that is released on drop
struct DecoderGuard {
    decoder: Box<dyn ClipDecoder>,
}

impl Drop for DecoderGuard {
    fn drop(&mut self) {
        if let Err(e) = self.decoder.release() {
            tracing::warn!("Failed to release decoder: {}", e);
        }
    }
}

/// Progress bookkeeping for one save
struct Tracker<'a> {
    listener: &'a dyn ProgressListener,
    cancel: &'a CancelToken,
    split: ProgressSplit,
    has_audio: bool,
    video_total: u64,
    video_done: u64,
    audio_total: u64,
    audio_done: u64,
}

impl Tracker<'_> {
    fn video_frame(&mut self) -> RecorderResult<()> {
        self.cancel.check()?;
        self.video_done += 1;
        // Container clip counts are estimates and may fall short.
        self.video_total = self.video_total.max(self.video_done);
        let current = self
            .split
            .video_progress(self.video_done, self.video_total, self.has_audio);
        self.listener.on_progress(current, PROGRESS_SCALE);
        Ok(())
    }

    fn audio_chunk(&mut self) -> RecorderResult<()> {
        self.cancel.check()?;
        self.audio_done += 1;
        let current = self.split.audio_progress(self.audio_done, self.audio_total);
        self.listener.on_progress(current, PROGRESS_SCALE);
        Ok(())
    }
}

/// Run a save on the current thread
pub fn save_recording(
    engine: &dyn MediaEngine,
    request: SaveRequest,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
) -> RecorderResult<SaveOutcome> {
    save_recording_with_split(engine, request, listener, cancel, ProgressSplit::default())
}

/// [`save_recording`] with a custom progress split
pub fn save_recording_with_split(
    engine: &dyn MediaEngine,
    request: SaveRequest,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
    split: ProgressSplit,
) -> RecorderResult<SaveOutcome> {
    let result = run_save(engine, request, listener, cancel, split);
    match &result {
        Ok(outcome) => listener.on_done(outcome),
        Err(RecorderError::Cancelled) => {
            tracing::info!("Save cancelled");
            listener.on_failed(&RecorderError::Cancelled);
        }
        Err(e) => {
            tracing::error!("Save failed: {}", e);
            listener.on_failed(e);
        }
    }
    result
}

fn run_save(
    engine: &dyn MediaEngine,
    request: SaveRequest,
    listener: &dyn ProgressListener,
    cancel: &CancelToken,
    split: ProgressSplit,
) -> RecorderResult<SaveOutcome> {
    request.config.validate()?;
    let output_path = request
        .config
        .output
        .output_path
        .clone()
        .ok_or_else(|| RecorderError::configuration("Output path is required"))?;
    if request.clips.is_empty() {
        return Err(RecorderError::configuration("No clips to save"));
    }

    let source = request.source_size();
    if source.is_empty() {
        return Err(RecorderError::configuration("Clips have no frame size"));
    }

    cancel.check()?;

    let config = &request.config;
    let format = config.camera.pixel_format;
    let base = BaseTransform::compute(source, &config.output.target);
    let output = base.output_size();
    let has_audio = !request.audio.is_empty();
    let channels = if has_audio { config.encoder.channels } else { 0 };

    tracing::info!(
        "Saving {} clips ({} frames, {} audio chunks) from {} to {} at {:?}",
        request.clips.len(),
        request.total_video_frames(),
        request.audio.len(),
        source,
        output,
        output_path
    );

    listener.on_start();
    listener.on_stage(SaveStage::Video);

    let mut writer = WriterGuard::new(engine.create_writer(&output_path, channels)?);
    writer
        .writer
        .configure(&config.encoder.writer_config(output, format))?;
    let mut filters = FilterSet::build(engine, &base, format)?;
    writer.writer.start()?;

    let mut tracker = Tracker {
        listener,
        cancel,
        split,
        has_audio,
        video_total: request.total_video_frames(),
        video_done: 0,
        audio_total: request.total_audio_chunks(),
        audio_done: 0,
    };

    let SaveRequest {
        clips,
        audio,
        config,
    } = request;

    let mut retimer = FrameRetimer::new(config.encoder.frame_rate);
    // Session time taken up by imported clips, which are stamped from zero.
    let mut imported_ns = 0u64;

    for (index, mut clip) in clips.into_iter().enumerate() {
        cancel.check()?;
        tracing::debug!("Muxing clip {} ({} frames)", index, clip.expected_frames());

        let mut frames = Frames {
            filters: &mut filters,
            writer: writer.writer.as_mut(),
            retimer: &mut retimer,
            tracker: &mut tracker,
        };
        if let ClipSource::Frames(list) = &mut clip.source {
            for mut frame in std::mem::take(list) {
                frame.timestamp_ns += imported_ns;
                frames.encode(frame)?;
            }
            continue;
        }

        let imported = matches!(clip.source, ClipSource::Container(_));
        let base = if imported {
            frames.retimer.end_ns()
        } else {
            imported_ns
        };
        let mut decoder = DecoderGuard {
            decoder: engine.open_decoder(&clip, format)?,
        };
        while let Some(mut frame) = decoder.decoder.next_frame()? {
            frame.timestamp_ns += base;
            frames.encode(frame)?;
        }
        if imported {
            imported_ns += frames.retimer.end_ns() - base;
        }
    }

    let mut audio_samples = 0u64;
    if !audio.is_empty() {
        listener.on_stage(SaveStage::Audio);
    }
    for chunk in &audio {
        cancel.check()?;
        writer.writer.record_samples(chunk)?;
        audio_samples += chunk.frames();
        tracker.audio_chunk()?;
    }

    cancel.check()?;
    filters.release();
    writer.writer.stop()?;
    writer.release();

    let video_frames = retimer.written();
    if retimer.repeated() > 0 || retimer.dropped() > 0 {
        tracing::info!(
            "Retimed to {} fps: {} frames repeated, {} dropped",
            config.encoder.frame_rate,
            retimer.repeated(),
            retimer.dropped()
        );
    }
    let thumbnail = if config.output.thumbnail {
        let path = thumbnail_path(&output_path);
        match engine.extract_thumbnail(&output_path, &path) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!("Failed to write thumbnail {:?}: {}", path, e);
                None
            }
        }
    } else {
        None
    };

    let duration = retimer.duration();
    tracing::info!(
        "Saved {} frames ({:?}) to {:?}",
        video_frames,
        duration,
        output_path
    );

    Ok(SaveOutcome {
        output_path,
        thumbnail_path: thumbnail,
        video_frames,
        audio_samples,
        width: output.width,
        height: output.height,
        duration,
    })
}

/// Per-clip view of the video pass
struct Frames<'a, 'b> {
    filters: &'a mut FilterSet,
    writer: &'a mut dyn MediaWriter,
    retimer: &'a mut FrameRetimer,
    tracker: &'a mut Tracker<'b>,
}

impl Frames<'_, '_> {
    fn encode(&mut self, frame: VideoFrame) -> RecorderResult<()> {
        self.tracker.cancel.check()?;
        let writer = &mut *self.writer;
        let retimer = &mut *self.retimer;
        self.filters.process(frame, |out| {
            retimer.write(out, writer)?;
            Ok(())
        })?;
        self.tracker.video_frame()
    }
}

/// A save running on the blocking thread pool
pub struct SaveHandle {
    cancel: CancelToken,
    task: tokio::task::JoinHandle<RecorderResult<SaveOutcome>>,
}

impl SaveHandle {
    /// Ask the save to stop at the next frame or chunk
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the save to end; resources are released by then
    pub async fn join(self) -> RecorderResult<SaveOutcome> {
        self.task
            .await
            .map_err(|e| RecorderError::InvalidState(format!("Save task failed: {}", e)))?
    }
}

/// Start a save off the caller's thread. Requires a tokio runtime.
pub fn spawn_save(
    engine: Arc<dyn MediaEngine>,
    request: SaveRequest,
    listener: Arc<dyn ProgressListener>,
) -> RecorderResult<SaveHandle> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|_| RecorderError::InvalidState("No tokio runtime for save".to_string()))?;

    let cancel = CancelToken::new();
    let token = cancel.clone();
    let task = runtime.spawn_blocking(move || {
        save_recording(engine.as_ref(), request, listener.as_ref(), &token)
    });

    Ok(SaveHandle { cancel, task })
}

/// Output pixel size for a request without running it
pub fn planned_output_size(request: &SaveRequest) -> Size {
    BaseTransform::compute(request.source_size(), &request.config.output.target).output_size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraFacing, Orientation, PixelFormat};
    use crate::config::OutputConfig;
    use crate::engine::software::{SoftwareFilter, SpoolDecoder};
    use crate::engine::{FrameFilter, WriterConfig};
    use crate::error::{CodecError, CodecOp, CodecResult, EncodeStage};
    use crate::geometry::{TargetGeometry, TargetSize};
    use chrono::Utc;
    use parking_lot::Mutex;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[derive(Default)]
    struct Log {
        events: Mutex<Vec<String>>,
        frames: Mutex<Vec<Size>>,
    }

    impl Log {
        fn push(&self, event: impl Into<String>) {
            self.events.lock().push(event.into());
        }

        fn has(&self, event: &str) -> bool {
            self.events.lock().iter().any(|e| e == event)
        }

        fn count(&self, prefix: &str) -> usize {
            self.events
                .lock()
                .iter()
                .filter(|e| e.starts_with(prefix))
                .count()
        }
    }

    struct MockWriter {
        log: Arc<Log>,
        output: PathBuf,
        fail_on_frame: Option<usize>,
        frames: usize,
    }

    impl MediaWriter for MockWriter {
        fn configure(&mut self, config: &WriterConfig) -> CodecResult<()> {
            self.log
                .push(format!("configure {}x{}", config.width, config.height));
            Ok(())
        }

        fn start(&mut self) -> CodecResult<()> {
            self.log.push("start");
            Ok(())
        }

        fn record_frame(&mut self, frame: &VideoFrame) -> CodecResult<()> {
            if self.fail_on_frame == Some(self.frames) {
                return Err(CodecError::new(CodecOp::Record, "disk full"));
            }
            self.frames += 1;
            self.log.frames.lock().push(frame.size());
            Ok(())
        }

        fn record_samples(&mut self, chunk: &AudioChunk) -> CodecResult<()> {
            self.log.push(format!("samples {}", chunk.frames()));
            Ok(())
        }

        fn stop(&mut self) -> CodecResult<()> {
            std::fs::write(&self.output, b"container")
                .map_err(|e| CodecError::new(CodecOp::Stop, e.to_string()))?;
            self.log.push("stop");
            Ok(())
        }

        fn release(&mut self) -> CodecResult<()> {
            self.log.push("release writer");
            Ok(())
        }
    }

    struct LoggedFilter {
        inner: SoftwareFilter,
        log: Arc<Log>,
    }

    impl FrameFilter for LoggedFilter {
        fn description(&self) -> &str {
            self.inner.description()
        }

        fn push(&mut self, frame: VideoFrame) -> CodecResult<()> {
            self.inner.push(frame)
        }

        fn pull(&mut self) -> CodecResult<Option<VideoFrame>> {
            self.inner.pull()
        }

        fn release(&mut self) -> CodecResult<()> {
            self.log.push("release filter");
            self.inner.release()
        }
    }

    struct MockEngine {
        log: Arc<Log>,
        fail_on_frame: Option<usize>,
        fail_filter: Option<usize>,
        filters_built: Mutex<usize>,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                log: Arc::new(Log::default()),
                fail_on_frame: None,
                fail_filter: None,
                filters_built: Mutex::new(0),
            }
        }
    }

    impl MediaEngine for MockEngine {
        fn create_writer(&self, output: &Path, channels: u16) -> CodecResult<Box<dyn MediaWriter>> {
            self.log.push(format!("create writer {}", channels));
            Ok(Box::new(MockWriter {
                log: self.log.clone(),
                output: output.to_path_buf(),
                fail_on_frame: self.fail_on_frame,
                frames: 0,
            }))
        }

        fn create_filter(
            &self,
            description: &str,
            format: PixelFormat,
        ) -> CodecResult<Box<dyn FrameFilter>> {
            let mut built = self.filters_built.lock();
            if self.fail_filter == Some(*built) {
                return Err(CodecError::new(CodecOp::FilterInit, "bad graph"));
            }
            *built += 1;
            Ok(Box::new(LoggedFilter {
                inner: SoftwareFilter::new(description, format)?,
                log: self.log.clone(),
            }))
        }

        fn open_decoder(
            &self,
            clip: &Clip,
            format: PixelFormat,
        ) -> CodecResult<Box<dyn ClipDecoder>> {
            match &clip.source {
                ClipSource::Spool(path) => Ok(Box::new(SpoolDecoder::open(path, format)?)),
                _ => Err(CodecError::new(CodecOp::Decode, "unsupported")),
            }
        }

        fn extract_thumbnail(&self, _video: &Path, _output: &Path) -> CodecResult<()> {
            Err(CodecError::new(CodecOp::Thumbnail, "no decoder"))
        }
    }

    #[derive(Default)]
    struct Collector {
        stage: Mutex<Option<SaveStage>>,
        progress: Mutex<Vec<(SaveStage, u64)>>,
        done: Mutex<bool>,
        failed: Mutex<Option<String>>,
    }

    impl ProgressListener for Collector {
        fn on_stage(&self, stage: SaveStage) {
            *self.stage.lock() = Some(stage);
        }

        fn on_progress(&self, current: u64, total: u64) {
            assert_eq!(total, PROGRESS_SCALE);
            let stage = self.stage.lock().expect("progress before stage");
            self.progress.lock().push((stage, current));
        }

        fn on_done(&self, _outcome: &SaveOutcome) {
            *self.done.lock() = true;
        }

        fn on_failed(&self, error: &RecorderError) {
            *self.failed.lock() = Some(error.to_string());
        }
    }

    const FRAME_NS: u64 = 33_333_333;

    /// `frames` frames at 30 fps, the first stamped one interval after `start_ns`
    fn memory_clip(start_ns: u64, frames: usize, size: Size, orientation: Orientation) -> Clip {
        let frame_list: Vec<VideoFrame> = (0..frames)
            .map(|i| VideoFrame {
                data: vec![0u8; size.width as usize * size.height as usize * 4],
                width: size.width,
                height: size.height,
                format: PixelFormat::Bgra,
                timestamp_ns: start_ns + (i as u64 + 1) * FRAME_NS,
                orientation,
                facing: CameraFacing::Back,
            })
            .collect();
        let native = size;
        let upright = crate::capture::upright_size(native, orientation);
        Clip {
            id: Uuid::new_v4(),
            size_bytes: frame_list.iter().map(|f| f.data.len() as u64).sum(),
            frame_count: frames as u64,
            source: ClipSource::Frames(frame_list),
            duration: Duration::from_millis(frames as u64 * 1000 / 30),
            width: native.width,
            height: native.height,
            upright,
            created_at: Utc::now(),
        }
    }

    fn request(dir: &TempDir, clips: Vec<Clip>, audio: Vec<AudioChunk>) -> SaveRequest {
        let config = RecorderConfig {
            output: OutputConfig::default()
                .with_output_path(dir.path().join("out.mp4"))
                .with_target(TargetGeometry::new(TargetSize::width(32)))
                .with_thumbnail(true),
            ..Default::default()
        };
        SaveRequest::new(clips, audio, config)
    }

    #[derive(Default)]
    struct StampWriter {
        stamps: Vec<u64>,
    }

    impl MediaWriter for StampWriter {
        fn configure(&mut self, _config: &WriterConfig) -> CodecResult<()> {
            Ok(())
        }

        fn start(&mut self) -> CodecResult<()> {
            Ok(())
        }

        fn record_frame(&mut self, frame: &VideoFrame) -> CodecResult<()> {
            self.stamps.push(frame.timestamp_ns);
            Ok(())
        }

        fn record_samples(&mut self, _chunk: &AudioChunk) -> CodecResult<()> {
            Ok(())
        }

        fn stop(&mut self) -> CodecResult<()> {
            Ok(())
        }

        fn release(&mut self) -> CodecResult<()> {
            Ok(())
        }
    }

    fn stamped(timestamp_ns: u64) -> VideoFrame {
        VideoFrame {
            data: vec![0; 4],
            width: 1,
            height: 1,
            format: PixelFormat::Bgra,
            timestamp_ns,
            orientation: Orientation::Landscape,
            facing: CameraFacing::Back,
        }
    }

    #[test]
    fn test_retimer_repeats_frames_for_slow_camera() {
        let mut writer = StampWriter::default();
        let mut retimer = FrameRetimer::new(30);
        for k in 1..=15u64 {
            retimer.write(stamped(k * 66_666_666), &mut writer).unwrap();
        }

        assert_eq!(retimer.written(), 30);
        assert_eq!(retimer.repeated(), 15);
        assert_eq!(retimer.dropped(), 0);
        assert_eq!(retimer.duration(), Duration::from_secs(1));
        // The gap before the first frame is filled with the first frame.
        assert_eq!(writer.stamps[..4], [66_666_666, 66_666_666, 66_666_666, 133_333_332]);
        assert!(writer.stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_retimer_drops_frames_for_fast_camera() {
        let mut writer = StampWriter::default();
        let mut retimer = FrameRetimer::new(30);
        for k in 1..=30u64 {
            retimer.write(stamped(k * 16_666_666), &mut writer).unwrap();
        }

        assert_eq!(retimer.written(), 15);
        assert_eq!(retimer.dropped(), 15);
        assert_eq!(retimer.repeated(), 0);
        assert_eq!(retimer.duration(), Duration::from_millis(500));
    }

    #[test]
    fn test_retimer_matching_rate_is_one_to_one() {
        let mut writer = StampWriter::default();
        let mut retimer = FrameRetimer::new(30);
        for k in 1..=90u64 {
            assert_eq!(retimer.write(stamped(k * FRAME_NS), &mut writer).unwrap(), 1);
        }
        assert_eq!(retimer.written(), 90);
        assert_eq!(retimer.duration(), Duration::from_secs(3));

        // A frame held back to the previous stamp has no slot of its own.
        assert_eq!(retimer.write(stamped(90 * FRAME_NS), &mut writer).unwrap(), 0);
        assert_eq!(retimer.dropped(), 1);
    }

    #[test]
    fn test_progress_split() {
        let split = ProgressSplit::default();
        assert_eq!(split.video_progress(0, 10, true), 0);
        assert_eq!(split.video_progress(10, 10, true), 9_000);
        assert_eq!(split.video_progress(10, 10, false), PROGRESS_SCALE);
        assert_eq!(split.audio_progress(0, 4), 9_000);
        assert_eq!(split.audio_progress(4, 4), PROGRESS_SCALE);
        assert_eq!(ProgressSplit::new(1.5).video_weight, 1.0);
    }

    #[test]
    fn test_save_video_then_audio() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let collector = Collector::default();
        let clips = vec![
            memory_clip(0, 3, Size::new(64, 48), Orientation::Landscape),
            memory_clip(3 * FRAME_NS, 2, Size::new(64, 48), Orientation::Landscape),
        ];
        let audio = vec![
            AudioChunk::new(vec![0; 441], 1, 44_100),
            AudioChunk::new(vec![0; 441], 1, 44_100),
        ];

        let outcome = save_recording(
            &engine,
            request(&dir, clips, audio),
            &collector,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(outcome.video_frames, 5);
        assert_eq!(outcome.audio_samples, 882);
        assert_eq!((outcome.width, outcome.height), (32, 24));
        assert_eq!(outcome.thumbnail_path, None);
        assert!(outcome.output_path.exists());

        assert!(engine.log.has("create writer 1"));
        assert!(engine.log.has("configure 32x24"));
        assert_eq!(engine.log.count("samples"), 2);
        assert_eq!(engine.log.count("release filter"), 4);
        assert_eq!(engine.log.count("release writer"), 1);
        assert!(engine
            .log
            .frames
            .lock()
            .iter()
            .all(|s| *s == Size::new(32, 24)));

        let progress = collector.progress.lock();
        assert_eq!(progress.len(), 7);
        assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(progress[4], (SaveStage::Video, 9_000));
        assert_eq!(progress[6], (SaveStage::Audio, PROGRESS_SCALE));
        assert!(*collector.done.lock());
    }

    #[test]
    fn test_portrait_clip_sets_upright_output() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let clips = vec![memory_clip(0, 2, Size::new(64, 48), Orientation::Portrait)];

        let outcome =
            save_recording(&engine, request(&dir, clips, vec![]), &NoProgress, &CancelToken::new())
                .unwrap();

        // 48x64 upright, width 32 → height 43 (rounded)
        assert_eq!(outcome.width, 32);
        assert_eq!(outcome.height, 43);
        assert!(engine.log.has("create writer 0"));
    }

    #[test]
    fn test_writer_failure_releases_everything() {
        let dir = TempDir::new().unwrap();
        let mut engine = MockEngine::new();
        engine.fail_on_frame = Some(1);
        let collector = Collector::default();
        let clips = vec![memory_clip(0, 3, Size::new(64, 48), Orientation::Landscape)];

        let err = save_recording(
            &engine,
            request(&dir, clips, vec![]),
            &collector,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RecorderError::Encode {
                stage: EncodeStage::Writer,
                ..
            }
        ));
        assert_eq!(engine.log.count("release filter"), 4);
        assert_eq!(engine.log.count("release writer"), 1);
        assert!(!engine.log.has("stop"));
        assert!(collector.failed.lock().is_some());
        assert!(!*collector.done.lock());
    }

    #[test]
    fn test_filter_build_failure_releases_built_chains() {
        let dir = TempDir::new().unwrap();
        let mut engine = MockEngine::new();
        engine.fail_filter = Some(2);
        let clips = vec![memory_clip(0, 1, Size::new(64, 48), Orientation::Landscape)];

        let err = save_recording(
            &engine,
            request(&dir, clips, vec![]),
            &NoProgress,
            &CancelToken::new(),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RecorderError::Encode {
                stage: EncodeStage::Filter,
                ..
            }
        ));
        assert_eq!(engine.log.count("release filter"), 2);
        assert_eq!(engine.log.count("release writer"), 1);
    }

    #[test]
    fn test_cancel_before_start() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let clips = vec![memory_clip(0, 1, Size::new(64, 48), Orientation::Landscape)];

        let err = save_recording(&engine, request(&dir, clips, vec![]), &NoProgress, &cancel)
            .unwrap_err();
        assert!(matches!(err, RecorderError::Cancelled));
        assert!(!engine.log.has("start"));
    }

    #[test]
    fn test_configuration_errors_allocate_nothing() {
        let dir = TempDir::new().unwrap();
        let engine = MockEngine::new();

        let err = save_recording(&engine, request(&dir, vec![], vec![]), &NoProgress, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RecorderError::Configuration(_)));

        let mut no_output = request(
            &dir,
            vec![memory_clip(0, 1, Size::new(64, 48), Orientation::Landscape)],
            vec![],
        );
        no_output.config.output.output_path = None;
        let err = save_recording(&engine, no_output, &NoProgress, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, RecorderError::Configuration(_)));

        assert!(engine.log.events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_save() {
        let dir = TempDir::new().unwrap();
        let engine: Arc<dyn MediaEngine> = Arc::new(MockEngine::new());
        let clips = vec![memory_clip(0, 4, Size::new(64, 48), Orientation::Landscape)];

        let handle = spawn_save(engine, request(&dir, clips, vec![]), Arc::new(NoProgress)).unwrap();
        let outcome = handle.join().await.unwrap();
        assert_eq!(outcome.video_frames, 4);
        assert_eq!(outcome.duration, Duration::from_nanos(133_333_333));
    }

    #[test]
    fn test_spawn_save_needs_runtime() {
        let dir = TempDir::new().unwrap();
        let engine: Arc<dyn MediaEngine> = Arc::new(MockEngine::new());
        let result = spawn_save(engine, request(&dir, vec![], vec![]), Arc::new(NoProgress));
        assert!(matches!(result, Err(RecorderError::InvalidState(_))));
    }
}
