//! Audio capture thread and microphone source
//!
//! This module provides:
//! - `AudioCaptureThread`: the dedicated thread that drains microphone chunks,
//!   advances the audio clock and keeps recording past a stop until the audio
//!   has caught up with the last video frame
//! - `microphone::MicrophoneCapture`: cpal-backed `AudioSource` (feature `capture`)

use super::buffer::SampleBuffer;
use super::AudioChunk;
use crate::session::RecorderState;
use crate::sync::TimestampSynchronizer;
use crate::{RecorderError, RecorderResult};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// How often the loop wakes up to re-check its flags without audio arriving.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Longest the thread waits for tail audio after being asked to finish.
const FINISH_GRACE: Duration = Duration::from_secs(2);

/// What the audio thread did over its lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioThreadSummary {
    pub recorded_frames: u64,
    pub discarded_frames: u64,
    pub chunks: u64,
}

/// Handle to the running audio thread
///
/// Stop is cooperative: [`finish`](Self::finish) raises a flag the loop polls,
/// and the caller joins before finalizing anything the thread writes into.
pub struct AudioCaptureThread {
    finish_requested: Arc<AtomicBool>,
    handle: Option<JoinHandle<AudioThreadSummary>>,
}

impl AudioCaptureThread {
    pub fn spawn(
        receiver: Receiver<AudioChunk>,
        synchronizer: Arc<TimestampSynchronizer>,
        samples: Arc<SampleBuffer>,
        state: Arc<RecorderState>,
    ) -> RecorderResult<Self> {
        let finish_requested = Arc::new(AtomicBool::new(false));
        let finish = finish_requested.clone();

        let handle = std::thread::Builder::new()
            .name("cliprec-audio".to_string())
            .spawn(move || run_audio_loop(receiver, synchronizer, samples, state, finish))
            .map_err(|e| RecorderError::capture(format!("Failed to spawn audio thread: {}", e)))?;

        Ok(Self {
            finish_requested,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit once audio has caught up with video
    pub fn request_finish(&self) {
        self.finish_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request finish and wait for the thread to exit
    pub fn finish(mut self) -> RecorderResult<AudioThreadSummary> {
        self.request_finish();
        self.join_inner()
    }

    fn join_inner(&mut self) -> RecorderResult<AudioThreadSummary> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| RecorderError::capture("Audio thread panicked")),
            None => Ok(AudioThreadSummary::default()),
        }
    }
}

impl Drop for AudioCaptureThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_finish();
            if let Err(e) = self.join_inner() {
                tracing::warn!("Failed to join audio thread during drop: {}", e);
            }
        }
    }
}

fn run_audio_loop(
    receiver: Receiver<AudioChunk>,
    synchronizer: Arc<TimestampSynchronizer>,
    samples: Arc<SampleBuffer>,
    state: Arc<RecorderState>,
    finish_requested: Arc<AtomicBool>,
) -> AudioThreadSummary {
    let mut summary = AudioThreadSummary::default();
    let mut finish_deadline: Option<Instant> = None;

    tracing::debug!("Audio thread started");

    loop {
        if finish_requested.load(Ordering::SeqCst) {
            if !synchronizer.should_continue_audio(!state.is_recording()) {
                break;
            }
            let deadline = *finish_deadline.get_or_insert_with(|| Instant::now() + FINISH_GRACE);
            if Instant::now() >= deadline {
                tracing::warn!(
                    "Audio did not catch up with video within {:?} (audio {}us, video {}us)",
                    FINISH_GRACE,
                    synchronizer.audio_timestamp_us(),
                    synchronizer.last_video_timestamp_us()
                );
                break;
            }
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => {
                summary.chunks += 1;
                let frames = chunk.frames();
                if synchronizer.should_continue_audio(!state.is_recording()) {
                    synchronizer.on_audio_samples(frames);
                    samples.push(chunk);
                    summary.recorded_frames += frames;
                } else {
                    summary.discarded_frames += frames;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::debug!("Audio source disconnected");
                break;
            }
        }
    }

    tracing::debug!(
        "Audio thread exiting: {} frames recorded, {} discarded",
        summary.recorded_frames,
        summary.discarded_frames
    );
    summary
}

#[cfg(feature = "capture")]
pub mod microphone {
    use crate::capture::{AudioChunk, AudioSource};
    use crate::{RecorderError, RecorderResult};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::Sender;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Audio capture configuration
    #[derive(Debug, Clone)]
    pub struct MicrophoneConfig {
        /// Sample rate (e.g., 44100)
        pub sample_rate: u32,
        /// Number of channels (1 = mono, 2 = stereo)
        pub channels: u16,
        /// Buffer size in frames
        pub buffer_size: u32,
    }

    impl Default for MicrophoneConfig {
        fn default() -> Self {
            Self {
                sample_rate: 44_100,
                channels: 1,
                buffer_size: 1024,
            }
        }
    }

    /// Microphone capture using cpal
    pub struct MicrophoneCapture {
        is_running: Arc<AtomicBool>,
        config: MicrophoneConfig,
        stream: Option<cpal::Stream>,
    }

    impl MicrophoneCapture {
        pub fn new(config: MicrophoneConfig) -> Self {
            Self {
                is_running: Arc::new(AtomicBool::new(false)),
                config,
                stream: None,
            }
        }

        /// Names of the available input devices
        pub fn list_devices() -> RecorderResult<Vec<String>> {
            let host = cpal::default_host();
            let devices = host
                .input_devices()
                .map_err(|e| RecorderError::capture(format!("Failed to list devices: {}", e)))?;
            Ok(devices
                .map(|d| d.name().unwrap_or_else(|_| "Unknown".to_string()))
                .collect())
        }
    }

    impl AudioSource for MicrophoneCapture {
        fn sample_rate(&self) -> u32 {
            self.config.sample_rate
        }

        fn channels(&self) -> u16 {
            self.config.channels
        }

        fn start(&mut self, sink: Sender<AudioChunk>) -> RecorderResult<()> {
            if self.is_running.load(Ordering::SeqCst) {
                return Err(RecorderError::RecordingInProgress);
            }

            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| RecorderError::capture("No default input device"))?;

            let stream_config = cpal::StreamConfig {
                channels: self.config.channels,
                sample_rate: cpal::SampleRate(self.config.sample_rate),
                buffer_size: cpal::BufferSize::Fixed(self.config.buffer_size),
            };

            let is_running = self.is_running.clone();
            let sample_rate = self.config.sample_rate;
            let channels = self.config.channels;

            let err_fn = |err| {
                tracing::error!("Audio stream error: {}", err);
            };

            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !is_running.load(Ordering::SeqCst) {
                            return;
                        }
                        let samples = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        // Non-blocking: a full channel drops the chunk rather than stalling the device.
                        let _ = sink.try_send(AudioChunk::new(samples, channels, sample_rate));
                    },
                    err_fn,
                    None,
                )
                .map_err(|e| RecorderError::capture(format!("Failed to build stream: {}", e)))?;

            stream
                .play()
                .map_err(|e| RecorderError::capture(format!("Failed to start stream: {}", e)))?;

            self.stream = Some(stream);
            self.is_running.store(true, Ordering::SeqCst);

            tracing::info!(
                "Microphone capture started: {}Hz, {} channels",
                self.config.sample_rate,
                self.config.channels
            );
            Ok(())
        }

        fn stop(&mut self) -> RecorderResult<()> {
            if !self.is_running.swap(false, Ordering::SeqCst) {
                return Err(RecorderError::NoRecordingInProgress);
            }
            // Dropping the stream stops the device and releases the sender.
            self.stream = None;
            tracing::info!("Microphone capture stopped");
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.is_running.load(Ordering::SeqCst)
        }
    }

    impl Drop for MicrophoneCapture {
        fn drop(&mut self) {
            if self.is_running.load(Ordering::SeqCst) {
                let _ = self.stop();
            }
        }
    }
}
