//! Shared recording state
//!
//! Read from the camera callback, the audio thread and the UI without locks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Lifecycle of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Recorders not yet initialized
    Idle,
    /// Initialized, no clip being recorded
    Ready,
    /// A clip is being recorded
    Recording,
    /// Clips handed off for saving
    Finished,
}

#[derive(Debug, Default)]
pub struct RecorderState {
    recording: AtomicBool,
    initialized: AtomicBool,
    finished: AtomicBool,
    frames_recorded: AtomicU64,
    frames_dropped: AtomicU64,
    auto_stopped: AtomicBool,
    last_frame_ns: AtomicU64,
}

impl RecorderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn set_recording(&self, recording: bool) {
        self.recording.store(recording, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn set_finished(&self, finished: bool) {
        self.finished.store(finished, Ordering::SeqCst);
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_finished() {
            SessionPhase::Finished
        } else if self.is_recording() {
            SessionPhase::Recording
        } else if self.is_initialized() {
            SessionPhase::Ready
        } else {
            SessionPhase::Idle
        }
    }

    pub fn record_frame(&self, timestamp_ns: u64) {
        self.frames_recorded.fetch_add(1, Ordering::SeqCst);
        self.last_frame_ns.store(timestamp_ns, Ordering::SeqCst);
    }

    /// Count a frame that arrived while not recording or was malformed
    pub fn drop_frame(&self) {
        self.frames_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn frames_recorded(&self) -> u64 {
        self.frames_recorded.load(Ordering::SeqCst)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::SeqCst)
    }

    pub fn last_frame_time(&self) -> Duration {
        Duration::from_nanos(self.last_frame_ns.load(Ordering::SeqCst))
    }

    pub fn mark_auto_stopped(&self) {
        self.auto_stopped.store(true, Ordering::SeqCst);
    }

    /// Returns true once after an automatic stop
    pub fn take_auto_stopped(&self) -> bool {
        self.auto_stopped.swap(false, Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.recording.store(false, Ordering::SeqCst);
        self.finished.store(false, Ordering::SeqCst);
        self.frames_recorded.store(0, Ordering::SeqCst);
        self.frames_dropped.store(0, Ordering::SeqCst);
        self.auto_stopped.store(false, Ordering::SeqCst);
        self.last_frame_ns.store(0, Ordering::SeqCst);
    }
}
