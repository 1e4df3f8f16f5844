//! Recording session facade
//!
//! `ClipRecorder` ties the capture callbacks, the timestamp synchronizer, the
//! clip ledger and the audio thread together. The camera callback only ever
//! touches a [`FrameSink`]: it stamps the frame and parks it in the frame
//! buffer, and the control thread moves parked frames into the ledger.

use crate::capture::audio::{AudioCaptureThread, AudioThreadSummary};
use crate::capture::buffer::{CaptureBufferPool, FrameBuffer, SampleBuffer};
use crate::capture::{AudioChunk, AudioSource, MediaSource, PreviewCallback, PreviewInfo, VideoFrame};
use crate::config::RecorderConfig;
use crate::ledger::{Clip, ClipLedger, SegmentRecorder, SpoolSegmentRecorder};
use crate::mux::SaveRequest;
use crate::session::{RecorderState, SessionPhase};
use crate::sync::{Clock, MonotonicClock, SyncMark, TimestampSynchronizer};
use crate::{RecorderError, RecorderResult};
use crossbeam_channel::Sender;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Chunks the audio source may queue ahead of the audio thread
const AUDIO_CHANNEL_CAPACITY: usize = 64;

/// Camera-thread half of the recorder
#[derive(Clone)]
pub struct FrameSink {
    state: Arc<RecorderState>,
    synchronizer: Arc<TimestampSynchronizer>,
    pool: Arc<CaptureBufferPool>,
    frames: Arc<FrameBuffer>,
}

impl FrameSink {
    /// Take the frame in `buffer`, leaving a fresh buffer for the camera.
    ///
    /// Returns whether the frame was recorded. Frames arriving while no clip
    /// is being recorded are counted as dropped.
    pub fn on_preview_frame(
        &self,
        source: MediaSource,
        buffer: &mut Vec<u8>,
        info: PreviewInfo,
    ) -> RecorderResult<bool> {
        if source != MediaSource::Video {
            return Err(RecorderError::capture(
                "Preview callback received a non-video source",
            ));
        }
        if !self.state.is_recording() {
            self.state.drop_frame();
            return Ok(false);
        }

        let needed = VideoFrame::byte_len(info.size, info.format);
        if buffer.len() < needed {
            self.state.drop_frame();
            return Err(RecorderError::capture(format!(
                "Preview buffer holds {} bytes, {} needed for {}",
                buffer.len(),
                needed,
                info.size
            )));
        }
        if self.pool.buffer_len() != needed {
            self.pool.resize(needed);
        }

        let filled = self.pool.rearm(buffer);
        let stamp = self.synchronizer.next_video_timestamp();
        let frame = VideoFrame::from_owned(
            filled,
            info.size,
            info.format,
            stamp.timestamp_ns,
            info.orientation,
            info.facing,
        )?;

        self.state.record_frame(stamp.timestamp_ns);
        self.frames.push(frame);

        let frames = self.state.frames_recorded();
        if frames % 100 == 0 {
            tracing::debug!(
                "Captured {} frames ({} pending, {:?} stamp)",
                frames,
                self.frames.len(),
                stamp.source
            );
        }

        if self.synchronizer.elapsed() >= self.synchronizer.max_recording_time() {
            tracing::info!(
                "Maximum recording time {:?} reached, stopping",
                self.synchronizer.max_recording_time()
            );
            self.state.set_recording(false);
            self.state.mark_auto_stopped();
        }
        Ok(true)
    }

    /// Wrap the sink as a camera preview callback; rejected frames are logged
    pub fn into_callback(self) -> PreviewCallback {
        Box::new(move |source, buffer, info| {
            if let Err(e) = self.on_preview_frame(source, buffer, info) {
                tracing::warn!("Dropped preview frame: {}", e);
            }
        })
    }
}

/// Clock and audio positions at the start of a clip
#[derive(Debug, Clone, Copy, Default)]
struct ClipMark {
    sync: SyncMark,
    sample_frames: u64,
}

/// One multi-clip recording session
pub struct ClipRecorder {
    config: RecorderConfig,
    state: Arc<RecorderState>,
    synchronizer: Arc<TimestampSynchronizer>,
    pool: Arc<CaptureBufferPool>,
    frames: Arc<FrameBuffer>,
    samples: Arc<SampleBuffer>,
    ledger: ClipLedger,
    /// One per finalized clip
    marks: Vec<ClipMark>,
    pending_mark: Option<ClipMark>,
    audio: Option<AudioCaptureThread>,
    audio_tx: Option<Sender<AudioChunk>>,
}

impl ClipRecorder {
    pub fn new(
        config: RecorderConfig,
        segments: Box<dyn SegmentRecorder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let synchronizer = Arc::new(TimestampSynchronizer::new(
            clock.clone(),
            config.camera.frame_rate,
            config.encoder.sample_rate,
            config.limits.max_recording_time(),
        ));
        let pool = Arc::new(CaptureBufferPool::new(
            VideoFrame::byte_len(
                config.camera.preferred_preview_size,
                config.camera.pixel_format,
            ),
            0,
        ));
        let mut ledger = ClipLedger::new(segments, clock)
            .with_min_clip_duration(config.limits.min_clip_duration());
        ledger.set_buffer_pool(pool.clone());

        Self {
            config,
            state: Arc::new(RecorderState::new()),
            synchronizer,
            pool,
            frames: Arc::new(FrameBuffer::new()),
            samples: Arc::new(SampleBuffer::new()),
            ledger,
            marks: Vec::new(),
            pending_mark: None,
            audio: None,
            audio_tx: None,
        }
    }

    /// Recorder spooling clips into the configured spool directory
    pub fn spooled(config: RecorderConfig) -> Self {
        let segments = SpoolSegmentRecorder::new(config.output.spool_dir());
        Self::new(config, Box::new(segments), Arc::new(MonotonicClock::new()))
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// The output location may be picked after recording
    pub fn set_output_path(&mut self, path: impl Into<PathBuf>) {
        self.config.output.output_path = Some(path.into());
    }

    pub fn state(&self) -> &Arc<RecorderState> {
        &self.state
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase()
    }

    pub fn synchronizer(&self) -> &Arc<TimestampSynchronizer> {
        &self.synchronizer
    }

    pub fn ledger(&self) -> &ClipLedger {
        &self.ledger
    }

    pub fn frame_sink(&self) -> FrameSink {
        FrameSink {
            state: self.state.clone(),
            synchronizer: self.synchronizer.clone(),
            pool: self.pool.clone(),
            frames: self.frames.clone(),
        }
    }

    /// Prepare a fresh session
    pub fn init_recorders(&mut self) -> RecorderResult<()> {
        if self.ledger.is_recording() {
            return Err(RecorderError::RecordingInProgress);
        }
        if self.ledger.clip_count() > 0 {
            return Err(RecorderError::InvalidState(
                "Session has unsaved clips".to_string(),
            ));
        }
        self.config.validate_capture()?;

        self.pool.resize(VideoFrame::byte_len(
            self.config.camera.preferred_preview_size,
            self.config.camera.pixel_format,
        ));
        self.synchronizer.set_frame_rate(self.config.camera.frame_rate);
        self.synchronizer.set_sample_rate(self.config.encoder.sample_rate);
        self.synchronizer.reset();
        self.frames.clear();
        self.samples.clear();
        self.state.reset();
        self.state.set_initialized(true);

        tracing::info!(
            "Recorders initialized: {} @ {}fps, {}Hz audio, max {:?}",
            self.config.camera.preferred_preview_size,
            self.config.camera.frame_rate,
            self.config.encoder.sample_rate,
            self.config.limits.max_recording_time()
        );
        Ok(())
    }

    /// Begin a new clip
    pub fn start_recording(&mut self) -> RecorderResult<()> {
        if !self.state.is_initialized() {
            return Err(RecorderError::InvalidState(
                "Recorders not initialized".to_string(),
            ));
        }
        if self.state.is_finished() {
            return Err(RecorderError::InvalidState(
                "Session already handed off for saving".to_string(),
            ));
        }
        if self.ledger.is_recording() {
            return Err(RecorderError::RecordingInProgress);
        }
        if self.synchronizer.elapsed() >= self.synchronizer.max_recording_time() {
            return Err(RecorderError::InvalidState(
                "Maximum recording time reached".to_string(),
            ));
        }

        // Frames that slipped in after the previous stop belong to no clip.
        let stale = self.frames.drain();
        for _ in 0..stale.len() {
            self.state.drop_frame();
        }
        self.frames.recycle(stale);
        self.state.take_auto_stopped();

        let mark = ClipMark {
            sync: self.synchronizer.mark(),
            sample_frames: self.samples.total_frames(),
        };
        self.ledger.start()?;
        self.pending_mark = Some(mark);

        self.synchronizer.resume();
        self.state.set_recording(true);
        tracing::info!("Recording clip {}", self.ledger.clip_count());
        Ok(())
    }

    /// Finalize the current clip.
    ///
    /// Returns `None` when the clip was shorter than the minimum and dropped.
    pub fn stop_recording(&mut self) -> RecorderResult<Option<&Clip>> {
        if !self.ledger.is_recording() {
            return Err(RecorderError::NoRecordingInProgress);
        }
        self.finish_clip()
    }

    fn finish_clip(&mut self) -> RecorderResult<Option<&Clip>> {
        self.state.set_recording(false);
        self.synchronizer.pause();

        let drained = self.drain_frames();
        let mark = self.pending_mark.take().unwrap_or_default();
        let kept = match self.ledger.stop() {
            Ok(clip) => clip.is_some(),
            Err(e) => {
                self.rewind(mark);
                return Err(e);
            }
        };

        // Every clip in the ledger needs its mark, even a partially drained one.
        if kept {
            self.marks.push(mark);
        } else {
            self.rewind(mark);
        }
        if let Err(e) = drained {
            tracing::warn!("Clip finalized with missing frames: {}", e);
            return Err(e);
        }

        Ok(if kept { self.ledger.clips().last() } else { None })
    }

    fn drain_frames(&mut self) -> RecorderResult<usize> {
        let mut drained = self.frames.drain();
        let count = drained.len();
        for frame in drained.drain(..) {
            self.ledger.record_frame(frame)?;
        }
        self.frames.recycle(drained);
        Ok(count)
    }

    fn rewind(&self, mark: ClipMark) {
        self.synchronizer.rewind_to(mark.sync);
        self.samples.truncate_frames(mark.sample_frames);
    }

    /// Move frames parked by the camera callback into the current clip.
    ///
    /// Finalizes the clip when the maximum recording time stopped it; returns
    /// true in that case.
    pub fn flush_pending(&mut self) -> RecorderResult<bool> {
        if !self.ledger.is_recording() {
            return Ok(false);
        }
        if self.state.take_auto_stopped() {
            self.finish_clip()?;
            return Ok(true);
        }
        self.drain_frames()?;
        Ok(false)
    }

    /// Record a preview frame delivered on the calling thread
    pub fn on_preview_frame(
        &mut self,
        source: MediaSource,
        buffer: &mut Vec<u8>,
        info: PreviewInfo,
    ) -> RecorderResult<bool> {
        let recorded = self.frame_sink().on_preview_frame(source, buffer, info)?;
        self.flush_pending()?;
        Ok(recorded)
    }

    /// Start the audio thread and return the channel audio chunks go into
    pub fn start_audio(&mut self, sample_rate: u32) -> RecorderResult<Sender<AudioChunk>> {
        if !self.state.is_initialized() {
            return Err(RecorderError::InvalidState(
                "Recorders not initialized".to_string(),
            ));
        }
        if self.audio.is_some() {
            return Err(RecorderError::InvalidState(
                "Audio thread already running".to_string(),
            ));
        }
        // Samples are written as captured; there is no resampling stage.
        if sample_rate != self.config.encoder.sample_rate {
            return Err(RecorderError::configuration(format!(
                "Audio source runs at {}Hz, encoder expects {}Hz",
                sample_rate, self.config.encoder.sample_rate
            )));
        }

        self.synchronizer.set_sample_rate(sample_rate);
        let (tx, rx) = crossbeam_channel::bounded(AUDIO_CHANNEL_CAPACITY);
        let thread = AudioCaptureThread::spawn(
            rx,
            self.synchronizer.clone(),
            self.samples.clone(),
            self.state.clone(),
        )?;
        self.audio = Some(thread);
        self.audio_tx = Some(tx.clone());
        Ok(tx)
    }

    /// Start `source` feeding the audio thread
    pub fn attach_audio_source(&mut self, source: &mut dyn AudioSource) -> RecorderResult<()> {
        if source.channels() != self.config.encoder.channels {
            return Err(RecorderError::configuration(format!(
                "Audio source has {} channels, encoder expects {}",
                source.channels(),
                self.config.encoder.channels
            )));
        }
        let tx = self.start_audio(source.sample_rate())?;
        if let Err(e) = source.start(tx) {
            self.stop_audio();
            return Err(e);
        }
        Ok(())
    }

    /// Feed one chunk from an audio callback on the calling thread
    pub fn on_audio_chunk(&self, source: MediaSource, chunk: AudioChunk) -> RecorderResult<()> {
        if source != MediaSource::Audio {
            return Err(RecorderError::capture(
                "Audio callback received a non-audio source",
            ));
        }
        let tx = self
            .audio_tx
            .as_ref()
            .ok_or_else(|| RecorderError::InvalidState("Audio thread not running".to_string()))?;
        tx.send(chunk)
            .map_err(|_| RecorderError::capture("Audio thread has exited"))
    }

    /// Stop the audio thread once the audio has caught up with the video
    pub fn stop_audio(&mut self) -> Option<AudioThreadSummary> {
        self.audio_tx = None;
        let thread = self.audio.take()?;
        match thread.finish() {
            Ok(summary) => {
                tracing::debug!(
                    "Audio thread finished: {} chunks, {} frames recorded",
                    summary.chunks,
                    summary.recorded_frames
                );
                Some(summary)
            }
            Err(e) => {
                tracing::warn!("Failed to stop audio thread: {}", e);
                None
            }
        }
    }

    /// Finalized clips plus the live one
    pub fn recorded_duration(&self) -> Duration {
        self.ledger.recorded_duration()
    }

    pub fn recorded_millis(&self) -> u64 {
        self.ledger.recorded_millis()
    }

    /// Drop the newest clip together with its audio
    pub fn remove_last_clip(&mut self) -> RecorderResult<Option<Clip>> {
        let removed = self.ledger.remove_last_clip()?;
        if removed.is_some() {
            if let Some(mark) = self.marks.pop() {
                self.rewind(mark);
            }
            tracing::info!("Removed last clip, {} left", self.ledger.clip_count());
        }
        Ok(removed)
    }

    /// Throw the whole session away. The recorder stays initialized.
    pub fn discard(&mut self) {
        self.state.set_recording(false);
        self.stop_audio();
        self.frames.clear();
        self.samples.clear();
        self.ledger.delete_clips();
        self.marks.clear();
        self.pending_mark = None;
        self.synchronizer.reset();
        self.state.reset();
        tracing::info!("Recording session discarded");
    }

    /// Hand the finished session over for saving.
    ///
    /// Joins the audio thread first so no chunk is written after the audio
    /// list is taken.
    pub fn take_save_request(&mut self) -> RecorderResult<SaveRequest> {
        self.flush_pending()?;
        if self.ledger.is_recording() {
            return Err(RecorderError::RecordingInProgress);
        }
        self.config.validate()?;

        let recorded = self.ledger.recorded_duration();
        let min = self.config.limits.min_recording_time();
        if recorded < min {
            return Err(RecorderError::configuration(format!(
                "Recording is {}ms, at least {}ms required",
                recorded.as_millis(),
                min.as_millis()
            )));
        }
        if self.ledger.clip_count() == 0 {
            return Err(RecorderError::configuration("No clips recorded"));
        }

        self.stop_audio();
        let clips = self.ledger.take_clips()?;
        self.marks.clear();
        let audio = self.samples.take_all();
        self.state.set_finished(true);

        tracing::info!(
            "Session handed off: {} clips, {}ms, {} audio chunks",
            clips.len(),
            recorded.as_millis(),
            audio.len()
        );
        Ok(SaveRequest::new(clips, audio, self.config.clone()))
    }
}
