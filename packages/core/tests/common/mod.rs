//! Recording mock engine shared by the integration tests

#![allow(dead_code)]

use cliprec_core::engine::software::{SoftwareFilter, SpoolDecoder};
use cliprec_core::geometry::Size;
use cliprec_core::ledger::{Clip, ClipSource};
use cliprec_core::{
    AudioChunk, ClipDecoder, CodecError, CodecOp, CodecResult, FrameFilter, MediaEngine,
    MediaWriter, PixelFormat, VideoFrame, WriterConfig,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    WriterCreated { channels: u16 },
    Configured(WriterConfig),
    Started,
    Frame(Size, u64),
    Samples(u64),
    Stopped,
    WriterReleased,
    FilterCreated(String),
    FilterReleased,
    DecoderOpened,
    DecoderReleased,
    Thumbnail(PathBuf),
}

#[derive(Debug, Default, Clone)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.0.lock().iter().filter(|e| matches(e)).count()
    }

    pub fn frames(&self) -> Vec<Size> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Frame(size, _) => Some(*size),
                _ => None,
            })
            .collect()
    }

    pub fn stamps(&self) -> Vec<u64> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Frame(_, ts) => Some(*ts),
                _ => None,
            })
            .collect()
    }
}

/// Engine that records every call and writes placeholder files
#[derive(Debug, Default)]
pub struct MockEngine {
    pub log: EventLog,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MockWriter {
    log: EventLog,
    output: PathBuf,
}

impl MediaWriter for MockWriter {
    fn configure(&mut self, config: &WriterConfig) -> CodecResult<()> {
        self.log.push(Event::Configured(config.clone()));
        Ok(())
    }

    fn start(&mut self) -> CodecResult<()> {
        self.log.push(Event::Started);
        Ok(())
    }

    fn record_frame(&mut self, frame: &VideoFrame) -> CodecResult<()> {
        self.log.push(Event::Frame(frame.size(), frame.timestamp_ns));
        Ok(())
    }

    fn record_samples(&mut self, chunk: &AudioChunk) -> CodecResult<()> {
        self.log.push(Event::Samples(chunk.frames()));
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        std::fs::write(&self.output, b"mock container")
            .map_err(|e| CodecError::new(CodecOp::Stop, e.to_string()))?;
        self.log.push(Event::Stopped);
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.log.push(Event::WriterReleased);
        Ok(())
    }
}

struct MockFilter {
    inner: SoftwareFilter,
    log: EventLog,
}

impl FrameFilter for MockFilter {
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
        self.log.push(Event::FilterReleased);
        self.inner.release()
    }
}

struct MockDecoder {
    inner: SpoolDecoder,
    log: EventLog,
}

impl ClipDecoder for MockDecoder {
    fn next_frame(&mut self) -> CodecResult<Option<VideoFrame>> {
        self.inner.next_frame()
    }

    fn release(&mut self) -> CodecResult<()> {
        self.log.push(Event::DecoderReleased);
        self.inner.release()
    }
}

impl MediaEngine for MockEngine {
    fn create_writer(&self, output: &Path, channels: u16) -> CodecResult<Box<dyn MediaWriter>> {
        self.log.push(Event::WriterCreated { channels });
        Ok(Box::new(MockWriter {
            log: self.log.clone(),
            output: output.to_path_buf(),
        }))
    }

    fn create_filter(
        &self,
        description: &str,
        format: PixelFormat,
    ) -> CodecResult<Box<dyn FrameFilter>> {
        self.log.push(Event::FilterCreated(description.to_string()));
        Ok(Box::new(MockFilter {
            inner: SoftwareFilter::new(description, format)?,
            log: self.log.clone(),
        }))
    }

    fn open_decoder(&self, clip: &Clip, format: PixelFormat) -> CodecResult<Box<dyn ClipDecoder>> {
        let ClipSource::Spool(path) = &clip.source else {
            return Err(CodecError::new(CodecOp::Decode, "mock decodes spools only"));
        };
        self.log.push(Event::DecoderOpened);
        Ok(Box::new(MockDecoder {
            inner: SpoolDecoder::open(path, format)?,
            log: self.log.clone(),
        }))
    }

    fn extract_thumbnail(&self, _video: &Path, output: &Path) -> CodecResult<()> {
        std::fs::write(output, b"jpeg")
            .map_err(|e| CodecError::new(CodecOp::Thumbnail, e.to_string()))?;
        self.log.push(Event::Thumbnail(output.to_path_buf()));
        Ok(())
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
