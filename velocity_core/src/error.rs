//! Errors surfaced by frame processing.

use thiserror::Error;

/// Per-frame failures. None of these is fatal to the process: the frame
/// (or snapshot) is dropped and the loop moves on to the next message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessError {
    /// Inbound bytes are not a well-formed frame. The store is untouched.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A detection lacks a usable position. The store is untouched and the
    /// frame is not forwarded.
    #[error("Invalid detection #{index}: {reason}")]
    InvalidDetection { index: usize, reason: String },

    /// The outbound frame or a snapshot could not be serialized.
    #[error("Encode failure: {0}")]
    EncodeFailure(String),
}

impl ProcessError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessError::DecodeFailure(_) => "decode",
            ProcessError::InvalidDetection { .. } => "invalid_detection",
            ProcessError::EncodeFailure(_) => "encode",
        }
    }

    pub(crate) fn invalid_detection(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidDetection {
            index,
            reason: reason.into(),
        }
    }
}
