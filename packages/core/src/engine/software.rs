//! Pure-Rust filter chains and spool decoding
//!
//! Filters run the chain ops directly on packed pixel buffers: mirror,
//! quarter turns, crop, nearest-neighbour scale and black padding.

use super::{ClipDecoder, FrameFilter};
use crate::capture::{PixelFormat, VideoFrame};
use crate::error::{CodecError, CodecOp, CodecResult};
use crate::filter::{FilterOp, Rotation};
use crate::spool::SpoolReader;
use std::collections::VecDeque;
use std::path::Path;

/// Filter chain applied in-process
pub struct SoftwareFilter {
    description: String,
    ops: Vec<FilterOp>,
    format: PixelFormat,
    pending: VecDeque<VideoFrame>,
    released: bool,
}

impl SoftwareFilter {
    pub fn new(description: &str, format: PixelFormat) -> CodecResult<Self> {
        let ops = FilterOp::parse_chain(description)?;
        Ok(Self {
            description: description.to_string(),
            ops,
            format,
            pending: VecDeque::new(),
            released: false,
        })
    }

    pub fn ops(&self) -> &[FilterOp] {
        &self.ops
    }
}

impl FrameFilter for SoftwareFilter {
    fn description(&self) -> &str {
        &self.description
    }

    fn push(&mut self, frame: VideoFrame) -> CodecResult<()> {
        if self.released {
            return Err(CodecError::new(CodecOp::FilterPush, "filter already released"));
        }
        if frame.format != self.format {
            return Err(CodecError::new(
                CodecOp::FilterPush,
                format!(
                    "frame format {:?} does not match filter format {:?}",
                    frame.format, self.format
                ),
            ));
        }
        let expected = VideoFrame::byte_len(frame.size(), frame.format);
        if frame.data.len() != expected {
            return Err(CodecError::new(
                CodecOp::FilterPush,
                format!(
                    "{}x{} frame holds {} bytes, expected {}",
                    frame.width,
                    frame.height,
                    frame.data.len(),
                    expected
                ),
            ));
        }

        let mut current = frame;
        for op in &self.ops {
            current = apply_op(current, op)?;
        }
        self.pending.push_back(current);
        Ok(())
    }

    fn pull(&mut self) -> CodecResult<Option<VideoFrame>> {
        if self.released {
            return Err(CodecError::new(CodecOp::FilterPull, "filter already released"));
        }
        Ok(self.pending.pop_front())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.pending.clear();
        self.released = true;
        Ok(())
    }
}

/// Apply one op to a frame
pub fn apply_op(frame: VideoFrame, op: &FilterOp) -> CodecResult<VideoFrame> {
    match *op {
        FilterOp::HFlip => Ok(hflip(frame)),
        FilterOp::Transpose(rotation) => Ok(transpose(&frame, rotation)),
        FilterOp::Scale { width, height } => scale(frame, width, height),
        FilterOp::Crop {
            width,
            height,
            x,
            y,
        } => crop(&frame, width, height, x, y),
        FilterOp::Pad {
            width,
            height,
            x,
            y,
        } => pad(&frame, width, height, x, y),
    }
}

fn hflip(mut frame: VideoFrame) -> VideoFrame {
    let bpp = frame.format.bytes_per_pixel();
    let row_len = frame.width as usize * bpp;
    if row_len == 0 {
        return frame;
    }
    for row in frame.data.chunks_exact_mut(row_len) {
        let pixels = row.len() / bpp;
        for i in 0..pixels / 2 {
            let j = pixels - 1 - i;
            for b in 0..bpp {
                row.swap(i * bpp + b, j * bpp + b);
            }
        }
    }
    frame
}

fn transpose(frame: &VideoFrame, rotation: Rotation) -> VideoFrame {
    let bpp = frame.format.bytes_per_pixel();
    let (w, h) = (frame.width as usize, frame.height as usize);
    let mut data = vec![0u8; frame.data.len()];

    // Output is h × w.
    for oy in 0..w {
        for ox in 0..h {
            let (sx, sy) = match rotation {
                Rotation::Clockwise => (oy, h - 1 - ox),
                Rotation::CounterClockwise => (w - 1 - oy, ox),
            };
            let src = (sy * w + sx) * bpp;
            let dst = (oy * h + ox) * bpp;
            data[dst..dst + bpp].copy_from_slice(&frame.data[src..src + bpp]);
        }
    }

    with_pixels(frame, data, frame.height, frame.width)
}

fn scale(frame: VideoFrame, width: u32, height: u32) -> CodecResult<VideoFrame> {
    if frame.width == width && frame.height == height {
        return Ok(frame);
    }
    if width == 0 || height == 0 || frame.width == 0 || frame.height == 0 {
        return Err(CodecError::new(
            CodecOp::FilterPush,
            format!(
                "cannot scale {}x{} to {}x{}",
                frame.width, frame.height, width, height
            ),
        ));
    }

    let bpp = frame.format.bytes_per_pixel();
    let mut data = vec![0u8; width as usize * height as usize * bpp];

    for ty in 0..height as u64 {
        let sy = ty * frame.height as u64 / height as u64;
        for tx in 0..width as u64 {
            let sx = tx * frame.width as u64 / width as u64;
            let src = ((sy * frame.width as u64 + sx) as usize) * bpp;
            let dst = ((ty * width as u64 + tx) as usize) * bpp;
            data[dst..dst + bpp].copy_from_slice(&frame.data[src..src + bpp]);
        }
    }

    Ok(with_pixels(&frame, data, width, height))
}

fn crop(frame: &VideoFrame, width: u32, height: u32, x: u32, y: u32) -> CodecResult<VideoFrame> {
    if x as u64 + width as u64 > frame.width as u64 || y as u64 + height as u64 > frame.height as u64
    {
        return Err(CodecError::new(
            CodecOp::FilterPush,
            format!(
                "crop {}x{}+{}+{} exceeds {}x{} frame",
                width, height, x, y, frame.width, frame.height
            ),
        ));
    }

    let bpp = frame.format.bytes_per_pixel();
    let src_stride = frame.width as usize * bpp;
    let row_len = width as usize * bpp;
    let mut data = Vec::with_capacity(row_len * height as usize);
    for row in y as usize..(y + height) as usize {
        let start = row * src_stride + x as usize * bpp;
        data.extend_from_slice(&frame.data[start..start + row_len]);
    }

    Ok(with_pixels(frame, data, width, height))
}

fn pad(frame: &VideoFrame, width: u32, height: u32, x: u32, y: u32) -> CodecResult<VideoFrame> {
    if x as u64 + frame.width as u64 > width as u64 || y as u64 + frame.height as u64 > height as u64
    {
        return Err(CodecError::new(
            CodecOp::FilterPush,
            format!(
                "{}x{} frame does not fit pad {}x{}+{}+{}",
                frame.width, frame.height, width, height, x, y
            ),
        ));
    }

    let bpp = frame.format.bytes_per_pixel();
    let black = black_pixel(frame.format);
    let mut data = black.repeat(width as usize * height as usize);

    let src_stride = frame.width as usize * bpp;
    let dst_stride = width as usize * bpp;
    for row in 0..frame.height as usize {
        let src = row * src_stride;
        let dst = (row + y as usize) * dst_stride + x as usize * bpp;
        data[dst..dst + src_stride].copy_from_slice(&frame.data[src..src + src_stride]);
    }

    Ok(with_pixels(frame, data, width, height))
}

fn black_pixel(format: PixelFormat) -> &'static [u8] {
    match format {
        PixelFormat::Bgra | PixelFormat::Rgba => &[0, 0, 0, 255],
        PixelFormat::Rgb24 => &[0, 0, 0],
        PixelFormat::Gray8 => &[0],
    }
}

/// New frame with `frame`'s metadata and the given pixels
fn with_pixels(frame: &VideoFrame, data: Vec<u8>, width: u32, height: u32) -> VideoFrame {
    VideoFrame {
        data,
        width,
        height,
        format: frame.format,
        timestamp_ns: frame.timestamp_ns,
        orientation: frame.orientation,
        facing: frame.facing,
    }
}

/// Reads frames back from a spool clip
pub struct SpoolDecoder {
    reader: Option<SpoolReader>,
    format: PixelFormat,
}

impl SpoolDecoder {
    pub fn open(path: &Path, format: PixelFormat) -> CodecResult<Self> {
        let reader =
            SpoolReader::open(path).map_err(|e| CodecError::new(CodecOp::Decode, e.to_string()))?;
        Ok(Self {
            reader: Some(reader),
            format,
        })
    }
}

impl ClipDecoder for SpoolDecoder {
    fn next_frame(&mut self) -> CodecResult<Option<VideoFrame>> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| CodecError::new(CodecOp::Decode, "decoder already released"))?;
        let frame = reader
            .next_frame()
            .map_err(|e| CodecError::new(CodecOp::Decode, e.to_string()))?;

        match frame {
            Some(frame) if frame.format != self.format => Err(CodecError::new(
                CodecOp::Decode,
                format!(
                    "spooled frame is {:?}, expected {:?}",
                    frame.format, self.format
                ),
            )),
            other => Ok(other),
        }
    }

    fn release(&mut self) -> CodecResult<()> {
        self.reader = None;
        Ok(())
    }
}
