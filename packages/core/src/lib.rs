pub mod capture;
pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod geometry;
pub mod ledger;
pub mod mux;
pub mod recorder;
pub mod session;
pub mod spool;
pub mod sync;

pub use capture::{
    AudioChunk, CameraDevice, CameraFacing, MediaSource, Orientation, PixelFormat, PreviewInfo,
    VideoFrame,
};
pub use config::{
    AudioCodec, CameraConfig, ContainerFormat, EncoderConfig, InteractionLimits, OutputConfig,
    QualityPreset, RecorderConfig, VideoCodec,
};
pub use engine::{ClipDecoder, FrameFilter, MediaEngine, MediaWriter, WriterConfig};
pub use error::{
    CodecError, CodecOp, CodecResult, EncodeStage, ErrorCategory, RecorderError, RecorderResult,
};
pub use filter::{BaseTransform, FilterKey, FilterOp, FilterSet};
pub use geometry::{ScalePolicy, Size, TargetGeometry, TargetSize};
pub use ledger::{Clip, ClipLedger, ClipSource};
pub use mux::{
    save_recording, spawn_save, CancelToken, ProgressListener, ProgressSplit, SaveHandle,
    SaveOutcome, SaveRequest, SaveStage,
};
pub use recorder::{ClipRecorder, FrameSink};
pub use session::{RecorderState, SessionPhase};
pub use sync::{Clock, ManualClock, MonotonicClock, TimestampSynchronizer};

#[cfg(feature = "encoding")]
pub use engine::ffmpeg::FfmpegEngine;
