//! On-disk spool of raw frames for one clip
//!
//! Layout: `CLPS` magic, u32 LE format version, then one record per frame:
//!
//! | field       | type   |
//! |-------------|--------|
//! | timestamp   | u64 ns |
//! | orientation | u8     |
//! | facing      | u8     |
//! | format      | u8     |
//! | width       | u32    |
//! | height      | u32    |
//! | payload len | u32    |
//! | payload     | bytes  |
//!
//! All integers are little-endian.

use crate::capture::{CameraFacing, Orientation, PixelFormat, VideoFrame};
use crate::geometry::Size;
use crate::{RecorderError, RecorderResult};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Current spool format version
pub const SPOOL_FORMAT_VERSION: u32 = 1;

/// Oldest spool version this build can read
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Magic bytes identifying a spool file
pub const SPOOL_MAGIC: &[u8; 4] = b"CLPS";

const RECORD_HEADER_LEN: usize = 8 + 1 + 1 + 1 + 4 + 4 + 4;

/// Totals for a finished spool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoolSummary {
    pub path: PathBuf,
    pub frames: u64,
    pub bytes: u64,
    pub first_timestamp_ns: Option<u64>,
    pub last_timestamp_ns: Option<u64>,
}

/// Appends frames to a spool file
pub struct SpoolWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    frames: u64,
    bytes: u64,
    first_timestamp_ns: Option<u64>,
    last_timestamp_ns: Option<u64>,
}

impl SpoolWriter {
    /// Create (or truncate) the spool at `path` and write its header
    pub fn create(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut writer = BufWriter::new(File::create(&path)?);
        writer.write_all(SPOOL_MAGIC)?;
        writer.write_all(&SPOOL_FORMAT_VERSION.to_le_bytes())?;

        tracing::debug!("Created spool {:?}", path);

        Ok(Self {
            path,
            writer,
            frames: 0,
            bytes: (SPOOL_MAGIC.len() + 4) as u64,
            first_timestamp_ns: None,
            last_timestamp_ns: None,
        })
    }

    pub fn append(&mut self, frame: &VideoFrame) -> RecorderResult<()> {
        let payload_len = u32::try_from(frame.data.len())
            .map_err(|_| RecorderError::spool("Frame payload exceeds 4 GiB"))?;

        let mut header = [0u8; RECORD_HEADER_LEN];
        header[0..8].copy_from_slice(&frame.timestamp_ns.to_le_bytes());
        header[8] = orientation_tag(frame.orientation);
        header[9] = facing_tag(frame.facing);
        header[10] = frame.format.to_tag();
        header[11..15].copy_from_slice(&frame.width.to_le_bytes());
        header[15..19].copy_from_slice(&frame.height.to_le_bytes());
        header[19..23].copy_from_slice(&payload_len.to_le_bytes());

        self.writer.write_all(&header)?;
        self.writer.write_all(&frame.data)?;

        self.frames += 1;
        self.bytes += (RECORD_HEADER_LEN + frame.data.len()) as u64;
        self.first_timestamp_ns.get_or_insert(frame.timestamp_ns);
        self.last_timestamp_ns = Some(frame.timestamp_ns);
        Ok(())
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Bytes written so far, header included
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the spool
    pub fn finish(mut self) -> RecorderResult<SpoolSummary> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        tracing::debug!("Finished spool {:?}: {} frames", self.path, self.frames);

        Ok(SpoolSummary {
            path: self.path,
            frames: self.frames,
            bytes: self.bytes,
            first_timestamp_ns: self.first_timestamp_ns,
            last_timestamp_ns: self.last_timestamp_ns,
        })
    }
}

/// Reads frames back from a spool file in recorded order
pub struct SpoolReader {
    path: PathBuf,
    reader: BufReader<File>,
    version: u32,
}

impl SpoolReader {
    pub fn open(path: impl AsRef<Path>) -> RecorderResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = BufReader::new(File::open(&path)?);

        let mut magic = [0u8; 4];
        let mut version_bytes = [0u8; 4];
        if reader.read_exact(&mut magic).is_err() || reader.read_exact(&mut version_bytes).is_err()
        {
            return Err(RecorderError::spool("File too small to be a valid spool"));
        }

        if &magic != SPOOL_MAGIC {
            return Err(RecorderError::spool("Invalid spool magic bytes"));
        }

        let version = u32::from_le_bytes(version_bytes);
        if version > SPOOL_FORMAT_VERSION {
            return Err(RecorderError::spool(format!(
                "Spool version {} is newer than supported version {}",
                version, SPOOL_FORMAT_VERSION
            )));
        }
        if version < MIN_SUPPORTED_VERSION {
            return Err(RecorderError::spool(format!(
                "Spool version {} is too old. Minimum supported: {}",
                version, MIN_SUPPORTED_VERSION
            )));
        }

        Ok(Self {
            path,
            reader,
            version,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next frame, or `None` at a clean end of file
    pub fn next_frame(&mut self) -> RecorderResult<Option<VideoFrame>> {
        let mut header = [0u8; RECORD_HEADER_LEN];
        match self.reader.read(&mut header[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => return self.next_frame(),
            Err(e) => return Err(e.into()),
        }
        self.reader
            .read_exact(&mut header[1..])
            .map_err(|e| truncated(&self.path, e))?;

        let timestamp_ns = u64::from_le_bytes(le_array(&header[0..8]));
        let orientation = orientation_from_tag(header[8])?;
        let facing = facing_from_tag(header[9])?;
        let format = PixelFormat::from_tag(header[10])
            .ok_or_else(|| RecorderError::spool(format!("Unknown pixel format tag {}", header[10])))?;
        let width = u32::from_le_bytes(le_array(&header[11..15]));
        let height = u32::from_le_bytes(le_array(&header[15..19]));
        let payload_len = u32::from_le_bytes(le_array(&header[19..23])) as usize;

        let size = Size::new(width, height);
        let expected = VideoFrame::byte_len(size, format);
        if payload_len != expected {
            return Err(RecorderError::spool(format!(
                "Frame payload is {} bytes, {} expected for {} {:?}",
                payload_len, expected, size, format
            )));
        }

        let mut data = vec![0u8; payload_len];
        self.reader
            .read_exact(&mut data)
            .map_err(|e| truncated(&self.path, e))?;

        Ok(Some(VideoFrame {
            data,
            width,
            height,
            format,
            timestamp_ns,
            orientation,
            facing,
        }))
    }
}

impl Iterator for SpoolReader {
    type Item = RecorderResult<VideoFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}

fn truncated(path: &Path, e: std::io::Error) -> RecorderError {
    if e.kind() == ErrorKind::UnexpectedEof {
        RecorderError::spool(format!("Spool {:?} ends mid-frame", path))
    } else {
        e.into()
    }
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn orientation_tag(orientation: Orientation) -> u8 {
    match orientation {
        Orientation::Portrait => 0,
        Orientation::Landscape => 1,
    }
}

fn orientation_from_tag(tag: u8) -> RecorderResult<Orientation> {
    match tag {
        0 => Ok(Orientation::Portrait),
        1 => Ok(Orientation::Landscape),
        other => Err(RecorderError::spool(format!("Unknown orientation tag {}", other))),
    }
}

fn facing_tag(facing: CameraFacing) -> u8 {
    match facing {
        CameraFacing::Front => 0,
        CameraFacing::Back => 1,
    }
}

fn facing_from_tag(tag: u8) -> RecorderResult<CameraFacing> {
    match tag {
        0 => Ok(CameraFacing::Front),
        1 => Ok(CameraFacing::Back),
        other => Err(RecorderError::spool(format!("Unknown camera facing tag {}", other))),
    }
}
