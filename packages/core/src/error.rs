use std::fmt;
use thiserror::Error;

/// Primitive of the media codec engine that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOp {
    Configure,
    Start,
    Record,
    RecordSamples,
    Stop,
    Release,
    FilterInit,
    FilterPush,
    FilterPull,
    Decode,
    Thumbnail,
}

impl fmt::Display for CodecOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CodecOp::Configure => "configure",
            CodecOp::Start => "start",
            CodecOp::Record => "record",
            CodecOp::RecordSamples => "record samples",
            CodecOp::Stop => "stop",
            CodecOp::Release => "release",
            CodecOp::FilterInit => "filter init",
            CodecOp::FilterPush => "filter push",
            CodecOp::FilterPull => "filter pull",
            CodecOp::Decode => "decode",
            CodecOp::Thumbnail => "thumbnail",
        };
        f.write_str(name)
    }
}

/// Failure reported by a codec engine primitive.
///
/// Engine implementations never panic or unwind on a codec failure; they return
/// this value and let the orchestrator decide what to do.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{op} failed: {reason}")]
pub struct CodecError {
    pub op: CodecOp,
    pub reason: String,
}

impl CodecError {
    pub fn new(op: CodecOp, reason: impl Into<String>) -> Self {
        Self {
            op,
            reason: reason.into(),
        }
    }
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Where in the save pipeline a transform/encode error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStage {
    Filter,
    Decode,
    Writer,
    Audio,
    Finalize,
}

impl fmt::Display for EncodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncodeStage::Filter => "filter",
            EncodeStage::Decode => "decode",
            EncodeStage::Writer => "writer",
            EncodeStage::Audio => "audio",
            EncodeStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

/// Coarse classification used by callers deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Capture,
    Encode,
    Cancelled,
    State,
    Io,
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Encoding error ({stage}): {message}")]
    Encode { stage: EncodeStage, message: String },

    #[error("Spool error: {0}")]
    Spool(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Recording already in progress")]
    RecordingInProgress,

    #[error("No recording in progress")]
    NoRecordingInProgress,

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl RecorderError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture(message.into())
    }

    pub fn encode(stage: EncodeStage, message: impl Into<String>) -> Self {
        Self::Encode {
            stage,
            message: message.into(),
        }
    }

    pub fn spool(message: impl Into<String>) -> Self {
        Self::Spool(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RecorderError::Configuration(_) => ErrorCategory::Configuration,
            RecorderError::Capture(_) => ErrorCategory::Capture,
            RecorderError::Encode { .. } | RecorderError::Spool(_) => ErrorCategory::Encode,
            RecorderError::Cancelled => ErrorCategory::Cancelled,
            RecorderError::RecordingInProgress
            | RecorderError::NoRecordingInProgress
            | RecorderError::InvalidState(_) => ErrorCategory::State,
            RecorderError::Io(_) | RecorderError::Serialization(_) => ErrorCategory::Io,
        }
    }

    /// Whether the user can simply try the same action again.
    ///
    /// Nothing in this crate retries on its own; this only informs the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Capture | ErrorCategory::Cancelled | ErrorCategory::State
        )
    }
}

impl From<CodecError> for RecorderError {
    fn from(err: CodecError) -> Self {
        let stage = match err.op {
            CodecOp::FilterInit | CodecOp::FilterPush | CodecOp::FilterPull => EncodeStage::Filter,
            CodecOp::Decode => EncodeStage::Decode,
            CodecOp::RecordSamples => EncodeStage::Audio,
            CodecOp::Stop | CodecOp::Release | CodecOp::Thumbnail => EncodeStage::Finalize,
            CodecOp::Configure | CodecOp::Start | CodecOp::Record => EncodeStage::Writer,
        };
        RecorderError::Encode {
            stage,
            message: err.to_string(),
        }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_maps_to_stage() {
        let err: RecorderError = CodecError::new(CodecOp::FilterPush, "bad frame").into();
        match err {
            RecorderError::Encode { stage, message } => {
                assert_eq!(stage, EncodeStage::Filter);
                assert!(message.contains("filter push failed"));
                assert!(message.contains("bad frame"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let err: RecorderError = CodecError::new(CodecOp::RecordSamples, "closed").into();
        assert!(matches!(
            err,
            RecorderError::Encode {
                stage: EncodeStage::Audio,
                ..
            }
        ));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(
            RecorderError::configuration("no output").category(),
            ErrorCategory::Configuration
        );
        assert!(!RecorderError::configuration("no output").is_recoverable());
        assert!(RecorderError::capture("camera busy").is_recoverable());
        assert!(RecorderError::Cancelled.is_recoverable());
        assert!(!RecorderError::encode(EncodeStage::Writer, "x").is_recoverable());
    }

    #[test]
    fn test_display() {
        let err = RecorderError::encode(EncodeStage::Decode, "truncated clip");
        assert_eq!(err.to_string(), "Encoding error (decode): truncated clip");
    }
}
