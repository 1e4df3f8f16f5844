//! Record synthetic clips and save them with ffmpeg
//!
//! Run with: cargo run --example save_clips -p cliprec-core

use anyhow::Context;
use cliprec_core::capture::{AudioChunk, CameraFacing, MediaSource, Orientation, PreviewInfo};
use cliprec_core::geometry::{Size, TargetGeometry, TargetSize};
use cliprec_core::mux::{save_recording, CancelToken, ProgressListener, SaveOutcome, SaveStage};
use cliprec_core::{
    ClipRecorder, FfmpegEngine, OutputConfig, PixelFormat, RecorderConfig, VideoFrame,
};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const PREVIEW: Size = Size::new(640, 480);
const SAMPLE_RATE: u32 = 44_100;

fn fill_test_frame(buffer: &mut [u8], size: Size, frame_num: u32) {
    for y in 0..size.height {
        for x in 0..size.width {
            let idx = ((y * size.width + x) * 4) as usize;

            let r = ((x as f32 / size.width as f32) * 255.0) as u8;
            let g = ((y as f32 / size.height as f32) * 255.0) as u8;
            let b = ((frame_num * 5) % 256) as u8;

            buffer[idx] = b;
            buffer[idx + 1] = g;
            buffer[idx + 2] = r;
            buffer[idx + 3] = 255;
        }
    }
}

/// One frame interval of a 440 Hz tone
fn tone_chunk(frame_num: u32) -> AudioChunk {
    let frames = SAMPLE_RATE / 30;
    let samples = (0..frames)
        .map(|i| {
            let t = (frame_num * frames + i) as f32 / SAMPLE_RATE as f32;
            ((t * 440.0 * std::f32::consts::TAU).sin() * 8_000.0) as i16
        })
        .collect();
    AudioChunk::new(samples, 1, SAMPLE_RATE)
}

struct PrintProgress {
    last_percent: Mutex<u64>,
}

impl ProgressListener for PrintProgress {
    fn on_start(&self) {
        println!("Saving...");
    }

    fn on_stage(&self, stage: SaveStage) {
        println!("  {:?} pass", stage);
    }

    fn on_progress(&self, current: u64, total: u64) {
        let percent = current * 100 / total.max(1);
        let mut last = self.last_percent.lock().unwrap_or_else(|e| e.into_inner());
        if percent >= *last + 10 {
            *last = percent;
            println!("  {}%", percent);
        }
    }

    fn on_done(&self, outcome: &SaveOutcome) {
        println!(
            "Done: {}x{}, {} frames, {:?}",
            outcome.width, outcome.height, outcome.video_frames, outcome.duration
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    println!("Clip Recorder Test");
    println!("==================\n");

    let engine = FfmpegEngine::new().with_auto_download(true);
    engine
        .ensure_ffmpeg(cliprec_core::CodecOp::Start)
        .context("ffmpeg is not available")?;

    let mut config = RecorderConfig {
        output: OutputConfig::default()
            .with_output_path("test_output.mp4")
            .with_target(TargetGeometry::new(TargetSize::width(320)))
            .with_thumbnail(true),
        ..Default::default()
    };
    config.camera.preferred_preview_size = PREVIEW;

    let mut recorder = ClipRecorder::spooled(config);
    recorder.init_recorders()?;
    let audio = recorder.start_audio(SAMPLE_RATE)?;

    let info = PreviewInfo {
        size: PREVIEW,
        format: PixelFormat::Bgra,
        orientation: Orientation::Landscape,
        facing: CameraFacing::Back,
    };
    let mut camera_buffer = vec![0u8; VideoFrame::byte_len(PREVIEW, PixelFormat::Bgra)];

    let mut frame_num = 0;
    for (clip, frames) in [30u32, 45, 20].into_iter().enumerate() {
        println!("Recording clip {} ({} frames)", clip, frames);
        recorder.start_recording()?;
        for _ in 0..frames {
            fill_test_frame(&mut camera_buffer, PREVIEW, frame_num);
            recorder.on_preview_frame(MediaSource::Video, &mut camera_buffer, info)?;
            audio.send(tone_chunk(frame_num))?;
            frame_num += 1;
            std::thread::sleep(Duration::from_millis(33));
        }
        recorder.stop_recording()?;
    }
    println!("Recorded {}ms\n", recorder.recorded_millis());

    let request = recorder.take_save_request()?;
    let listener = PrintProgress {
        last_percent: Mutex::new(0),
    };

    let start = Instant::now();
    let outcome = save_recording(&engine, request, &listener, &CancelToken::new())?;
    println!("\nSaved {:?} in {:.2?}", outcome.output_path, start.elapsed());
    if let Some(thumbnail) = outcome.thumbnail_path {
        println!("Thumbnail: {:?}", thumbnail);
    }

    Ok(())
}
