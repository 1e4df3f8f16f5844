//! Audio/video timestamp synchronization
//!
//! Video frames are stamped from one of three sources, in order of preference:
//! - before any audio arrives: wall-clock time since the session started,
//!   excluding the gaps between clips
//! - audio clock unchanged since the previous frame: previous stamp plus one
//!   frame interval
//! - otherwise: the audio clock plus the wall-clock time since that audio
//!   chunk was recorded
//!
//! The audio clock is derived purely from the number of PCM frames consumed,
//! so it is immune to wall-clock jitter in the capture callbacks. Video stamps
//! are clamped so they never go backwards.
//!
//! Each field has a single writer (the camera callback thread for the video
//! side, the audio thread for the audio side, the control thread for session
//! bounds). Readers on other threads rely on atomic visibility only.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sentinel for "no wall-clock time recorded yet".
const UNSET: u64 = u64::MAX;

/// Monotonic time source in nanoseconds
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for deterministic tests and offline replays
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now_ns.fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, at: Duration) {
        self.now_ns.store(at.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

/// Which rule produced a video timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampSource {
    WallClock,
    FrameInterval,
    AudioClock,
}

/// A stamped video frame time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoStamp {
    pub timestamp_ns: u64,
    pub source: StampSource,
    /// The computed time was behind the previous frame and was raised to it
    pub clamped: bool,
}

/// Shared clock state for one recording session
pub struct TimestampSynchronizer {
    clock: Arc<dyn Clock>,
    frame_rate: AtomicU32,
    sample_rate: AtomicU32,
    max_recording_time_us: AtomicU64,

    session_start_ns: AtomicU64,
    paused_total_ns: AtomicU64,
    pause_started_ns: AtomicU64,

    samples_recorded: AtomicU64,
    audio_sample_wall_ns: AtomicU64,
    audio_started: AtomicBool,

    last_video_us: AtomicU64,
    last_seen_audio_us: AtomicU64,
    video_frames: AtomicU64,
}

impl TimestampSynchronizer {
    pub fn new(
        clock: Arc<dyn Clock>,
        frame_rate: u32,
        sample_rate: u32,
        max_recording_time: Duration,
    ) -> Self {
        Self {
            clock,
            frame_rate: AtomicU32::new(frame_rate.max(1)),
            sample_rate: AtomicU32::new(sample_rate.max(1)),
            max_recording_time_us: AtomicU64::new(max_recording_time.as_micros() as u64),
            session_start_ns: AtomicU64::new(UNSET),
            paused_total_ns: AtomicU64::new(0),
            pause_started_ns: AtomicU64::new(UNSET),
            samples_recorded: AtomicU64::new(0),
            audio_sample_wall_ns: AtomicU64::new(UNSET),
            audio_started: AtomicBool::new(false),
            last_video_us: AtomicU64::new(0),
            last_seen_audio_us: AtomicU64::new(0),
            video_frames: AtomicU64::new(0),
        }
    }

    /// Forget everything from a previous session
    pub fn reset(&self) {
        self.session_start_ns.store(UNSET, Ordering::SeqCst);
        self.paused_total_ns.store(0, Ordering::SeqCst);
        self.pause_started_ns.store(UNSET, Ordering::SeqCst);
        self.samples_recorded.store(0, Ordering::SeqCst);
        self.audio_sample_wall_ns.store(UNSET, Ordering::SeqCst);
        self.audio_started.store(false, Ordering::SeqCst);
        self.last_video_us.store(0, Ordering::SeqCst);
        self.last_seen_audio_us.store(0, Ordering::SeqCst);
        self.video_frames.store(0, Ordering::SeqCst);
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate.max(1), Ordering::SeqCst);
    }

    pub fn set_frame_rate(&self, frame_rate: u32) {
        self.frame_rate.store(frame_rate.max(1), Ordering::SeqCst);
    }

    pub fn frame_rate(&self) -> u32 {
        self.frame_rate.load(Ordering::SeqCst)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn max_recording_time(&self) -> Duration {
        Duration::from_micros(self.max_recording_time_us.load(Ordering::SeqCst))
    }

    /// Fixed frame interval in microseconds
    pub fn frame_time_us(&self) -> u64 {
        1_000_000 / self.frame_rate() as u64
    }

    /// Start (or continue) the session clock when a clip begins.
    ///
    /// The first call anchors the session; later calls close the pause that
    /// began at the previous [`pause`](Self::pause).
    pub fn resume(&self) {
        let now = self.clock.now_ns();
        if self.session_start_ns.load(Ordering::SeqCst) == UNSET {
            self.session_start_ns.store(now, Ordering::SeqCst);
            return;
        }

        let pause_started = self.pause_started_ns.swap(UNSET, Ordering::SeqCst);
        if pause_started == UNSET {
            return;
        }
        let gap = now.saturating_sub(pause_started);
        self.paused_total_ns.fetch_add(gap, Ordering::SeqCst);

        // Extrapolation from the last audio chunk must not count the gap either.
        let audio_wall = self.audio_sample_wall_ns.load(Ordering::SeqCst);
        if audio_wall != UNSET {
            self.audio_sample_wall_ns.store(audio_wall + gap, Ordering::SeqCst);
        }
    }

    /// Mark the end of a clip; time until the next [`resume`](Self::resume) is excluded
    pub fn pause(&self) {
        if self.session_start_ns.load(Ordering::SeqCst) == UNSET {
            return;
        }
        let _ = self.pause_started_ns.compare_exchange(
            UNSET,
            self.clock.now_ns(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_paused(&self) -> bool {
        self.pause_started_ns.load(Ordering::SeqCst) != UNSET
    }

    /// Wall-clock recording time so far, excluding pauses
    pub fn elapsed(&self) -> Duration {
        let start = self.session_start_ns.load(Ordering::SeqCst);
        if start == UNSET {
            return Duration::ZERO;
        }
        let pause_started = self.pause_started_ns.load(Ordering::SeqCst);
        let end = if pause_started != UNSET {
            pause_started
        } else {
            self.clock.now_ns()
        };
        let paused = self.paused_total_ns.load(Ordering::SeqCst);
        Duration::from_nanos(end.saturating_sub(start).saturating_sub(paused))
    }

    /// Account for `frames` PCM frames (samples per channel) just consumed.
    ///
    /// Called from the audio thread only.
    pub fn on_audio_samples(&self, frames: u64) {
        if frames == 0 {
            return;
        }
        self.samples_recorded.fetch_add(frames, Ordering::SeqCst);
        self.audio_sample_wall_ns
            .store(self.clock.now_ns(), Ordering::SeqCst);
        self.audio_started.store(true, Ordering::SeqCst);
    }

    pub fn samples_recorded(&self) -> u64 {
        self.samples_recorded.load(Ordering::SeqCst)
    }

    pub fn audio_started(&self) -> bool {
        self.audio_started.load(Ordering::SeqCst)
    }

    /// `1_000_000 × samples / sample_rate`
    pub fn audio_timestamp_us(&self) -> u64 {
        let samples = self.samples_recorded.load(Ordering::SeqCst);
        let rate = self.sample_rate.load(Ordering::SeqCst) as u64;
        (samples as u128 * 1_000_000 / rate as u128) as u64
    }

    /// Stamp of the most recent video frame in microseconds
    pub fn last_video_timestamp_us(&self) -> u64 {
        self.last_video_us.load(Ordering::SeqCst)
    }

    pub fn video_frames(&self) -> u64 {
        self.video_frames.load(Ordering::SeqCst)
    }

    /// Compute the timestamp for the video frame arriving now.
    ///
    /// Called from the camera callback thread only.
    pub fn next_video_timestamp(&self) -> VideoStamp {
        let now = self.clock.now_ns();
        let last_us = self.last_video_us.load(Ordering::SeqCst);
        let frames = self.video_frames.load(Ordering::SeqCst);
        let audio_us = self.audio_timestamp_us();
        let session_start = self.session_start_ns.load(Ordering::SeqCst);

        let (candidate_us, source) = if !self.audio_started() && session_start != UNSET {
            let paused = self.paused_total_ns.load(Ordering::SeqCst);
            let elapsed_ns = now.saturating_sub(session_start).saturating_sub(paused);
            (elapsed_ns / 1_000, StampSource::WallClock)
        } else if !self.audio_started()
            || (frames > 0 && audio_us == self.last_seen_audio_us.load(Ordering::SeqCst))
        {
            let next = if frames == 0 {
                0
            } else {
                last_us + self.frame_time_us()
            };
            (next, StampSource::FrameInterval)
        } else {
            // The two audio fields are read without a lock; a torn pair is off
            // by at most one chunk and the clamp below keeps ordering intact.
            let audio_wall = self.audio_sample_wall_ns.load(Ordering::SeqCst);
            let since_audio_ns = if audio_wall == UNSET {
                0
            } else {
                now.saturating_sub(audio_wall)
            };
            (audio_us + since_audio_ns / 1_000, StampSource::AudioClock)
        };

        let clamped = frames > 0 && candidate_us < last_us;
        let timestamp_us = if clamped { last_us } else { candidate_us };

        self.last_video_us.store(timestamp_us, Ordering::SeqCst);
        self.last_seen_audio_us.store(audio_us, Ordering::SeqCst);
        self.video_frames.fetch_add(1, Ordering::SeqCst);

        VideoStamp {
            timestamp_ns: timestamp_us * 1_000,
            source,
            clamped,
        }
    }

    /// Whether the audio thread should keep reading.
    ///
    /// Before a stop request audio runs freely. After it, audio continues
    /// while the last video frame is ahead of the audio clock so the tail of
    /// the video still has sound. The maximum recording time is a hard ceiling.
    pub fn should_continue_audio(&self, stop_requested: bool) -> bool {
        let audio_us = self.audio_timestamp_us();
        if audio_us >= self.max_recording_time_us.load(Ordering::SeqCst) {
            return false;
        }
        if !stop_requested {
            return true;
        }
        self.last_video_timestamp_us() > audio_us
    }

    /// Snapshot taken at a clip boundary, for [`rewind_to`](Self::rewind_to)
    pub fn mark(&self) -> SyncMark {
        SyncMark {
            elapsed_ns: self.elapsed().as_nanos() as u64,
            video_us: self.last_video_timestamp_us(),
            video_frames: self.video_frames(),
            audio_frames: self.samples_recorded(),
        }
    }

    /// Roll both clocks back to `mark` after the clips recorded since were dropped.
    ///
    /// The dropped span is folded into the paused time. Only valid while paused.
    pub fn rewind_to(&self, mark: SyncMark) {
        if !self.is_paused() {
            tracing::warn!("Ignoring synchronizer rewind while recording");
            return;
        }
        let dropped = (self.elapsed().as_nanos() as u64).saturating_sub(mark.elapsed_ns);
        self.paused_total_ns.fetch_add(dropped, Ordering::SeqCst);

        self.last_video_us.store(mark.video_us, Ordering::SeqCst);
        self.video_frames.store(mark.video_frames, Ordering::SeqCst);
        self.samples_recorded
            .store(mark.audio_frames, Ordering::SeqCst);
        self.audio_started
            .store(mark.audio_frames > 0, Ordering::SeqCst);
        self.last_seen_audio_us
            .store(self.audio_timestamp_us(), Ordering::SeqCst);
    }
}

/// Clock positions at a clip boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncMark {
    pub elapsed_ns: u64,
    pub video_us: u64,
    pub video_frames: u64,
    pub audio_frames: u64,
}

impl std::fmt::Debug for TimestampSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampSynchronizer")
            .field("frame_rate", &self.frame_rate())
            .field("samples_recorded", &self.samples_recorded())
            .field("audio_timestamp_us", &self.audio_timestamp_us())
            .field("last_video_us", &self.last_video_timestamp_us())
            .field("video_frames", &self.video_frames())
            .finish()
    }
}
