//! Capture-side buffering
//!
//! Keeps the camera and audio callbacks free of I/O and long locks:
//! - `CaptureBufferPool` re-arms the camera's reusable byte buffer
//! - `FrameBuffer` double-buffers video frames between capture and consumer
//! - `SampleBuffer` keeps recorded audio chunks in order

use super::{AudioChunk, VideoFrame};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Pool of byte buffers handed to the camera for its next write
#[derive(Debug)]
pub struct CaptureBufferPool {
    spare: Mutex<Vec<Vec<u8>>>,
    buffer_len: AtomicUsize,
    max_spare: usize,
}

impl CaptureBufferPool {
    pub fn new(buffer_len: usize, preallocate: usize) -> Self {
        let spare = (0..preallocate).map(|_| vec![0u8; buffer_len]).collect();
        Self {
            spare: Mutex::new(spare),
            buffer_len: AtomicUsize::new(buffer_len),
            max_spare: preallocate.max(2),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len.load(Ordering::SeqCst)
    }

    /// Change the buffer size after a preview size change; old spares are dropped
    pub fn resize(&self, buffer_len: usize) {
        if self.buffer_len.swap(buffer_len, Ordering::SeqCst) != buffer_len {
            self.spare.lock().clear();
        }
    }

    /// Swap a fresh buffer into `camera_buffer` and return the filled one.
    ///
    /// Must run inside the camera callback, before it returns.
    pub fn rearm(&self, camera_buffer: &mut Vec<u8>) -> Vec<u8> {
        let len = self.buffer_len();
        let fresh = self
            .spare
            .lock()
            .pop()
            .filter(|buf| buf.len() == len)
            .unwrap_or_else(|| vec![0u8; len]);
        std::mem::replace(camera_buffer, fresh)
    }

    /// Return a consumed buffer for reuse
    pub fn recycle(&self, mut buffer: Vec<u8>) {
        let len = self.buffer_len();
        if buffer.capacity() < len {
            return;
        }
        buffer.resize(len, 0);
        let mut spare = self.spare.lock();
        if spare.len() < self.max_spare {
            spare.push(buffer);
        }
    }

    pub fn spare_count(&self) -> usize {
        self.spare.lock().len()
    }
}

/// Double-buffered frame list
///
/// The capture thread appends to the front list; the consumer swaps it with
/// an empty back list and works on the filled one without holding a lock.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    front: Mutex<Vec<VideoFrame>>,
    back: Mutex<Vec<VideoFrame>>,
    bytes: AtomicUsize,
    total_pushed: AtomicU64,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(frames: usize) -> Self {
        Self {
            front: Mutex::new(Vec::with_capacity(frames)),
            back: Mutex::new(Vec::with_capacity(frames)),
            ..Default::default()
        }
    }

    /// Append a frame (capture thread)
    pub fn push(&self, frame: VideoFrame) {
        self.bytes.fetch_add(frame.data.len(), Ordering::SeqCst);
        self.total_pushed.fetch_add(1, Ordering::SeqCst);
        self.front.lock().push(frame);
    }

    /// Take every pending frame in arrival order (consumer)
    pub fn drain(&self) -> Vec<VideoFrame> {
        let mut swapped = std::mem::take(&mut *self.back.lock());
        {
            let mut front = self.front.lock();
            std::mem::swap(&mut *front, &mut swapped);
        }
        let drained_bytes: usize = swapped.iter().map(|f| f.data.len()).sum();
        self.bytes.fetch_sub(drained_bytes, Ordering::SeqCst);
        swapped
    }

    /// Hand a drained list back so its allocation can serve as the next back list
    pub fn recycle(&self, mut drained: Vec<VideoFrame>) {
        drained.clear();
        let mut back = self.back.lock();
        if drained.capacity() > back.capacity() {
            *back = drained;
        }
    }

    pub fn len(&self) -> usize {
        self.front.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes of pixel data waiting to be drained
    pub fn byte_size(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn total_pushed(&self) -> u64 {
        self.total_pushed.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.front.lock().clear();
        self.bytes.store(0, Ordering::SeqCst);
    }
}

/// Ordered audio chunks of one session
#[derive(Debug, Default)]
pub struct SampleBuffer {
    chunks: Mutex<Vec<AudioChunk>>,
    frames: AtomicU64,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, chunk: AudioChunk) {
        self.frames.fetch_add(chunk.frames(), Ordering::SeqCst);
        self.chunks.lock().push(chunk);
    }

    /// Take all chunks, leaving the buffer empty
    pub fn take_all(&self) -> Vec<AudioChunk> {
        self.frames.store(0, Ordering::SeqCst);
        std::mem::take(&mut *self.chunks.lock())
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples per channel across all chunks
    pub fn total_frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.chunks.lock().clear();
        self.frames.store(0, Ordering::SeqCst);
    }

    /// Drop everything after the first `frames` samples per channel.
    ///
    /// A chunk straddling the cut is shortened.
    pub fn truncate_frames(&self, frames: u64) {
        let mut chunks = self.chunks.lock();
        let mut kept = 0u64;
        let mut keep_chunks = 0;
        for chunk in chunks.iter_mut() {
            if kept >= frames {
                break;
            }
            let remaining = frames - kept;
            if chunk.frames() > remaining {
                chunk.samples.truncate(remaining as usize * chunk.channels as usize);
            }
            kept += chunk.frames();
            keep_chunks += 1;
        }
        chunks.truncate(keep_chunks);
        self.frames.store(kept, Ordering::SeqCst);
    }
}
