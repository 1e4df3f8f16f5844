//! Clip ledger
//!
//! Tracks the ordered list of finalized clips of a session plus the segment
//! currently being recorded. A clip only exists once its segment is stopped.

use crate::capture::buffer::CaptureBufferPool;
use crate::capture::VideoFrame;
use crate::geometry::Size;
use crate::spool::SpoolWriter;
use crate::sync::Clock;
use crate::{RecorderError, RecorderResult};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Rate at which imported container clips are decoded
pub const CONTAINER_FRAME_RATE: u32 = 30;

/// Where a clip's frames live
#[derive(Debug, Clone, PartialEq)]
pub enum ClipSource {
    /// Raw frame spool written by [`SpoolSegmentRecorder`]
    Spool(PathBuf),
    /// Encoded container file recorded elsewhere
    Container(PathBuf),
    /// Frames kept in memory
    Frames(Vec<VideoFrame>),
}

impl ClipSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ClipSource::Spool(path) | ClipSource::Container(path) => Some(path),
            ClipSource::Frames(_) => None,
        }
    }
}

/// One finalized recording segment
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: Uuid,
    pub source: ClipSource,
    pub duration: Duration,
    pub size_bytes: u64,
    pub frame_count: u64,
    /// Largest native frame size seen in the clip
    pub width: u32,
    pub height: u32,
    /// Largest frame size after undoing device rotation
    pub upright: Size,
    pub created_at: DateTime<Utc>,
}

impl Clip {
    pub fn native_size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn duration_millis(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Frames a decoder yields for this clip; estimated for container clips
    pub fn expected_frames(&self) -> u64 {
        match self.source {
            ClipSource::Container(_) => {
                let ticks = self.duration.as_nanos() * CONTAINER_FRAME_RATE as u128;
                ((ticks + 500_000_000) / 1_000_000_000) as u64
            }
            _ => self.frame_count,
        }
    }

    /// Remove the clip's backing file, if any. A missing file is not an error.
    pub fn delete_storage(&self) -> RecorderResult<()> {
        if let Some(path) = self.source.path() {
            remove_if_exists(path)?;
        }
        Ok(())
    }
}

/// What a segment recorder hands back when a segment is stopped
#[derive(Debug)]
pub struct SegmentOutput {
    pub source: ClipSource,
    pub frame_count: u64,
    pub size_bytes: u64,
}

/// Backing storage for the segment being recorded
pub trait SegmentRecorder: Send {
    /// Allocate storage for the segment with the given index
    fn prepare(&mut self, index: usize) -> RecorderResult<()>;

    fn start(&mut self) -> RecorderResult<()>;

    fn record_frame(&mut self, frame: VideoFrame) -> RecorderResult<()>;

    /// Bytes held by the live segment
    fn live_bytes(&self) -> u64;

    fn stop(&mut self) -> RecorderResult<SegmentOutput>;

    /// Drop the live segment and its storage
    fn discard(&mut self) -> RecorderResult<()>;

    /// Pool that consumed frame buffers go back to
    fn set_buffer_pool(&mut self, _pool: Arc<CaptureBufferPool>) {}
}

/// Clips as raw frame spools in a directory
pub struct SpoolSegmentRecorder {
    dir: PathBuf,
    session: Uuid,
    pending: Option<PathBuf>,
    writer: Option<SpoolWriter>,
    pool: Option<Arc<CaptureBufferPool>>,
}

impl SpoolSegmentRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            session: Uuid::new_v4(),
            pending: None,
            writer: None,
            pool: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}-{:03}.spool", self.session, index))
    }
}

impl SegmentRecorder for SpoolSegmentRecorder {
    fn prepare(&mut self, index: usize) -> RecorderResult<()> {
        if self.writer.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }
        std::fs::create_dir_all(&self.dir)?;
        self.pending = Some(self.segment_path(index));
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        let path = self
            .pending
            .take()
            .ok_or_else(|| RecorderError::InvalidState("Segment not prepared".to_string()))?;
        self.writer = Some(SpoolWriter::create(path)?);
        Ok(())
    }

    fn record_frame(&mut self, frame: VideoFrame) -> RecorderResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or(RecorderError::NoRecordingInProgress)?;
        writer.append(&frame)?;
        if let Some(pool) = &self.pool {
            pool.recycle(frame.data);
        }
        Ok(())
    }

    fn live_bytes(&self) -> u64 {
        self.writer.as_ref().map_or(0, |w| w.bytes())
    }

    fn stop(&mut self) -> RecorderResult<SegmentOutput> {
        let writer = self
            .writer
            .take()
            .ok_or(RecorderError::NoRecordingInProgress)?;
        let summary = writer.finish()?;
        Ok(SegmentOutput {
            source: ClipSource::Spool(summary.path),
            frame_count: summary.frames,
            size_bytes: summary.bytes,
        })
    }

    fn discard(&mut self) -> RecorderResult<()> {
        self.pending = None;
        if let Some(writer) = self.writer.take() {
            let path = writer.path().to_path_buf();
            drop(writer);
            remove_if_exists(&path)?;
        }
        Ok(())
    }

    fn set_buffer_pool(&mut self, pool: Arc<CaptureBufferPool>) {
        self.pool = Some(pool);
    }
}

/// Clips as in-memory frame lists
#[derive(Default)]
pub struct MemorySegmentRecorder {
    frames: Option<Vec<VideoFrame>>,
    bytes: u64,
    prepared: bool,
}

impl MemorySegmentRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentRecorder for MemorySegmentRecorder {
    fn prepare(&mut self, _index: usize) -> RecorderResult<()> {
        if self.frames.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }
        self.prepared = true;
        Ok(())
    }

    fn start(&mut self) -> RecorderResult<()> {
        if !std::mem::take(&mut self.prepared) {
            return Err(RecorderError::InvalidState("Segment not prepared".to_string()));
        }
        self.frames = Some(Vec::new());
        self.bytes = 0;
        Ok(())
    }

    fn record_frame(&mut self, frame: VideoFrame) -> RecorderResult<()> {
        let frames = self
            .frames
            .as_mut()
            .ok_or(RecorderError::NoRecordingInProgress)?;
        self.bytes += frame.data.len() as u64;
        frames.push(frame);
        Ok(())
    }

    fn live_bytes(&self) -> u64 {
        self.bytes
    }

    fn stop(&mut self) -> RecorderResult<SegmentOutput> {
        let frames = self
            .frames
            .take()
            .ok_or(RecorderError::NoRecordingInProgress)?;
        let size_bytes = std::mem::take(&mut self.bytes);
        Ok(SegmentOutput {
            frame_count: frames.len() as u64,
            source: ClipSource::Frames(frames),
            size_bytes,
        })
    }

    fn discard(&mut self) -> RecorderResult<()> {
        self.prepared = false;
        self.frames = None;
        self.bytes = 0;
        Ok(())
    }
}

struct LiveSegment {
    started_ns: u64,
    native: Size,
    upright: Size,
}

/// Ordered clips of one session
pub struct ClipLedger {
    recorder: Box<dyn SegmentRecorder>,
    clock: Arc<dyn Clock>,
    clips: Vec<Clip>,
    live: Option<LiveSegment>,
    min_clip_duration: Duration,
}

impl ClipLedger {
    pub fn new(recorder: Box<dyn SegmentRecorder>, clock: Arc<dyn Clock>) -> Self {
        Self {
            recorder,
            clock,
            clips: Vec::new(),
            live: None,
            min_clip_duration: Duration::ZERO,
        }
    }

    /// Segments shorter than this are discarded on stop (zero-length ones always are)
    pub fn with_min_clip_duration(mut self, min: Duration) -> Self {
        self.min_clip_duration = min;
        self
    }

    pub fn set_buffer_pool(&mut self, pool: Arc<CaptureBufferPool>) {
        self.recorder.set_buffer_pool(pool);
    }

    pub fn is_recording(&self) -> bool {
        self.live.is_some()
    }

    /// Begin a new segment
    pub fn start(&mut self) -> RecorderResult<()> {
        if self.live.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }

        let index = self.clips.len();
        let prepared = self
            .recorder
            .prepare(index)
            .and_then(|()| self.recorder.start());
        if let Err(e) = prepared {
            tracing::error!("Failed to start clip {}: {}", index, e);
            if let Err(cleanup) = self.recorder.discard() {
                tracing::warn!("Failed to clean up unstarted clip: {}", cleanup);
            }
            return Err(e);
        }

        self.live = Some(LiveSegment {
            started_ns: self.clock.now_ns(),
            native: Size::default(),
            upright: Size::default(),
        });
        tracing::debug!("Clip {} started", index);
        Ok(())
    }

    pub fn record_frame(&mut self, frame: VideoFrame) -> RecorderResult<()> {
        let live = self
            .live
            .as_mut()
            .ok_or(RecorderError::NoRecordingInProgress)?;
        live.native = live.native.union(frame.size());
        live.upright = live.upright.union(frame.upright_size());
        self.recorder.record_frame(frame)
    }

    /// Finalize the live segment.
    ///
    /// Returns `None` when the segment was too short and got discarded.
    pub fn stop(&mut self) -> RecorderResult<Option<&Clip>> {
        let live = self.live.take().ok_or(RecorderError::NoRecordingInProgress)?;
        let duration = Duration::from_nanos(self.clock.now_ns().saturating_sub(live.started_ns));

        if duration.is_zero() || duration < self.min_clip_duration {
            tracing::info!("Discarding clip shorter than minimum ({:?})", duration);
            self.recorder.discard()?;
            return Ok(None);
        }

        let output = self.recorder.stop()?;
        let clip = Clip {
            id: Uuid::new_v4(),
            source: output.source,
            duration,
            size_bytes: output.size_bytes,
            frame_count: output.frame_count,
            width: live.native.width,
            height: live.native.height,
            upright: live.upright,
            created_at: Utc::now(),
        };
        tracing::info!(
            "Clip {} finalized: {} frames, {}ms, {} bytes",
            self.clips.len(),
            clip.frame_count,
            clip.duration_millis(),
            clip.size_bytes
        );
        self.clips.push(clip);
        Ok(self.clips.last())
    }

    /// Append a container file recorded outside this ledger
    pub fn import_container_clip(
        &mut self,
        path: impl Into<PathBuf>,
        duration: Duration,
        size: Size,
    ) -> RecorderResult<&Clip> {
        if self.live.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }
        let path = path.into();
        let size_bytes = std::fs::metadata(&path)?.len();

        self.clips.push(Clip {
            id: Uuid::new_v4(),
            source: ClipSource::Container(path),
            duration,
            size_bytes,
            frame_count: 0,
            width: size.width,
            height: size.height,
            upright: size,
            created_at: Utc::now(),
        });
        Ok(&self.clips[self.clips.len() - 1])
    }

    pub fn clips(&self) -> &[Clip] {
        &self.clips
    }

    pub fn clip_count(&self) -> usize {
        self.clips.len()
    }

    pub fn live_elapsed(&self) -> Duration {
        self.live.as_ref().map_or(Duration::ZERO, |live| {
            Duration::from_nanos(self.clock.now_ns().saturating_sub(live.started_ns))
        })
    }

    /// Finalized clips plus the live segment
    pub fn recorded_duration(&self) -> Duration {
        self.clips.iter().map(|c| c.duration).sum::<Duration>() + self.live_elapsed()
    }

    pub fn recorded_millis(&self) -> u64 {
        self.recorded_duration().as_millis() as u64
    }

    pub fn recorded_bytes(&self) -> u64 {
        self.clips.iter().map(|c| c.size_bytes).sum::<u64>() + self.recorder.live_bytes()
    }

    pub fn total_frames(&self) -> u64 {
        self.clips.iter().map(|c| c.frame_count).sum()
    }

    /// Pointwise maximum of the clips' native frame sizes
    pub fn native_max_size(&self) -> Size {
        self.clips
            .iter()
            .fold(Size::default(), |acc, c| acc.union(c.native_size()))
    }

    /// Pointwise maximum of the clips' upright frame sizes
    pub fn upright_max_size(&self) -> Size {
        self.clips
            .iter()
            .fold(Size::default(), |acc, c| acc.union(c.upright))
    }

    /// Remove and delete the newest clip. Not allowed while recording.
    pub fn remove_last_clip(&mut self) -> RecorderResult<Option<Clip>> {
        if self.live.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }
        let Some(clip) = self.clips.pop() else {
            return Ok(None);
        };
        clip.delete_storage()?;
        tracing::debug!("Removed clip {}", clip.id);
        Ok(Some(clip))
    }

    /// Drop the live segment and every clip with its storage. Safe to repeat.
    pub fn delete_clips(&mut self) {
        if self.live.take().is_some() {
            if let Err(e) = self.recorder.discard() {
                tracing::warn!("Failed to discard live segment: {}", e);
            }
        }
        for clip in self.clips.drain(..) {
            if let Err(e) = clip.delete_storage() {
                tracing::warn!("Failed to delete clip {}: {}", clip.id, e);
            }
        }
    }

    /// Hand the finalized clips over. Fails while a segment is live.
    pub fn take_clips(&mut self) -> RecorderResult<Vec<Clip>> {
        if self.live.is_some() {
            return Err(RecorderError::RecordingInProgress);
        }
        Ok(std::mem::take(&mut self.clips))
    }

    /// Consume the ledger, discarding any live segment
    pub fn into_clips(mut self) -> Vec<Clip> {
        if self.live.take().is_some() {
            if let Err(e) = self.recorder.discard() {
                tracing::warn!("Failed to discard live segment: {}", e);
            }
        }
        std::mem::take(&mut self.clips)
    }
}

fn remove_if_exists(path: &Path) -> RecorderResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CameraFacing, Orientation, PixelFormat};
    use crate::sync::ManualClock;
    use tempfile::TempDir;

    fn frame(width: u32, height: u32, orientation: Orientation) -> VideoFrame {
        VideoFrame {
            data: vec![0u8; (width * height) as usize],
            width,
            height,
            format: PixelFormat::Gray8,
            timestamp_ns: 0,
            orientation,
            facing: CameraFacing::Back,
        }
    }

    fn memory_ledger() -> (Arc<ManualClock>, ClipLedger) {
        let clock = Arc::new(ManualClock::new());
        let ledger = ClipLedger::new(Box::new(MemorySegmentRecorder::new()), clock.clone());
        (clock, ledger)
    }

    #[test]
    fn test_recorded_millis_includes_live_segment() {
        let (clock, mut ledger) = memory_ledger();

        ledger.start().unwrap();
        clock.advance(Duration::from_millis(500));
        ledger.stop().unwrap();

        ledger.start().unwrap();
        clock.advance(Duration::from_millis(300));

        assert_eq!(ledger.recorded_millis(), 800);
        assert_eq!(ledger.clip_count(), 1);
        assert!(ledger.is_recording());
    }

    #[test]
    fn test_zero_length_segment_discarded() {
        let (_clock, mut ledger) = memory_ledger();
        ledger.start().unwrap();
        ledger.record_frame(frame(4, 2, Orientation::Landscape)).unwrap();
        assert!(ledger.stop().unwrap().is_none());
        assert_eq!(ledger.clip_count(), 0);
    }

    #[test]
    fn test_min_clip_duration() {
        let (clock, ledger) = memory_ledger();
        let mut ledger = ledger.with_min_clip_duration(Duration::from_millis(100));

        ledger.start().unwrap();
        clock.advance(Duration::from_millis(50));
        assert!(ledger.stop().unwrap().is_none());

        ledger.start().unwrap();
        clock.advance(Duration::from_millis(150));
        assert!(ledger.stop().unwrap().is_some());
    }

    #[test]
    fn test_clip_sizes_and_bytes() {
        let (clock, mut ledger) = memory_ledger();

        ledger.start().unwrap();
        ledger.record_frame(frame(4, 2, Orientation::Landscape)).unwrap();
        ledger.record_frame(frame(4, 2, Orientation::Portrait)).unwrap();
        assert_eq!(ledger.recorded_bytes(), 16);
        clock.advance(Duration::from_millis(66));
        let clip = ledger.stop().unwrap().unwrap();

        assert_eq!(clip.frame_count, 2);
        assert_eq!(clip.size_bytes, 16);
        assert_eq!(clip.native_size(), Size::new(4, 2));
        assert_eq!(clip.upright, Size::new(4, 4));
        assert_eq!(ledger.native_max_size(), Size::new(4, 2));
        assert_eq!(ledger.upright_max_size(), Size::new(4, 4));
    }

    #[test]
    fn test_start_twice_fails() {
        let (_clock, mut ledger) = memory_ledger();
        ledger.start().unwrap();
        assert!(matches!(
            ledger.start(),
            Err(RecorderError::RecordingInProgress)
        ));
    }

    #[test]
    fn test_stop_without_start_fails() {
        let (_clock, mut ledger) = memory_ledger();
        assert!(matches!(
            ledger.stop(),
            Err(RecorderError::NoRecordingInProgress)
        ));
    }

    #[test]
    fn test_remove_last_clip_only_when_stopped() {
        let (clock, mut ledger) = memory_ledger();
        ledger.start().unwrap();
        clock.advance(Duration::from_millis(10));
        ledger.stop().unwrap();

        ledger.start().unwrap();
        assert!(ledger.remove_last_clip().is_err());

        clock.advance(Duration::from_millis(10));
        ledger.stop().unwrap();
        assert!(ledger.remove_last_clip().unwrap().is_some());
        assert_eq!(ledger.clip_count(), 1);
    }

    #[test]
    fn test_delete_clips_removes_spools() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new());
        let mut ledger = ClipLedger::new(
            Box::new(SpoolSegmentRecorder::new(dir.path())),
            clock.clone(),
        );

        for _ in 0..2 {
            ledger.start().unwrap();
            ledger.record_frame(frame(4, 2, Orientation::Landscape)).unwrap();
            clock.advance(Duration::from_millis(100));
            ledger.stop().unwrap();
        }
        ledger.start().unwrap();
        ledger.record_frame(frame(4, 2, Orientation::Landscape)).unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);

        ledger.delete_clips();
        assert!(ledger.clips().is_empty());
        assert!(!ledger.is_recording());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        // Second call is a no-op.
        ledger.delete_clips();
        assert!(ledger.clips().is_empty());
    }

    #[test]
    fn test_import_container_clip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("external.mp4");
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let (_clock, mut ledger) = memory_ledger();
        let clip = ledger
            .import_container_clip(&path, Duration::from_secs(2), Size::new(640, 480))
            .unwrap();
        assert_eq!(clip.size_bytes, 128);
        assert_eq!(clip.source, ClipSource::Container(path.clone()));
        assert_eq!(clip.frame_count, 0);
        assert_eq!(clip.expected_frames(), 60);
        assert_eq!(ledger.recorded_millis(), 2_000);

        assert!(ledger
            .import_container_clip(dir.path().join("missing.mp4"), Duration::ZERO, Size::default())
            .is_err());
    }

    #[test]
    fn test_take_clips() {
        let (clock, mut ledger) = memory_ledger();
        ledger.start().unwrap();
        clock.advance(Duration::from_millis(10));
        ledger.stop().unwrap();

        let clips = ledger.take_clips().unwrap();
        assert_eq!(clips.len(), 1);
        assert_eq!(ledger.clip_count(), 0);
    }
}
