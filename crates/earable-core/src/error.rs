//! Error handling for the acquisition core
//!
//! Frame-level decode failures are kept in their own enum so the ingestion
//! loop can count and drop them without unwinding anything else.

use crate::modality::Modality;
use thiserror::Error;

/// Result type alias for core operations
pub type EarableResult<T> = Result<T, EarableError>;

/// Reasons a notification payload cannot be interpreted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame header declares a different channel count than configured
    #[error("declared channel count {declared} does not match expected {expected}")]
    ChannelCountMismatch { declared: usize, expected: usize },

    /// A fixed offset points past the end of the payload
    #[error("frame truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Encoder input does not describe a whole frame
    #[error("invalid frame layout: {reason}")]
    InvalidLayout { reason: &'static str },
}

/// Error type for all core operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EarableError {
    /// Decoder could not interpret a frame; fatal to that frame only
    #[error("malformed {modality} frame: {source}")]
    MalformedFrame {
        modality: Modality,
        #[source]
        source: FrameError,
    },

    /// Configuration value out of range
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Batch shape does not match the stream it is appended to
    #[error("channel count mismatch for {modality}: expected {expected}, got {actual}")]
    ChannelMismatch {
        modality: Modality,
        expected: usize,
        actual: usize,
    },

    /// Read outside the logical size of a stream
    #[error("range {start}..{end} outside {modality} stream of {size} samples")]
    RangeOutOfBounds {
        modality: Modality,
        start: usize,
        end: usize,
        size: usize,
    },

    /// Persistence sink failure
    #[error("persistence failed: {0}")]
    Persistence(#[from] std::io::Error),
}

impl EarableError {
    /// Convenience constructor for configuration errors
    pub fn config(reason: impl Into<String>) -> Self {
        EarableError::InvalidConfig { reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EarableError::MalformedFrame {
            modality: Modality::Eeg,
            source: FrameError::ChannelCountMismatch { declared: 4, expected: 6 },
        };
        let display = format!("{}", error);
        assert!(display.contains("EEG"));
        assert!(display.contains("declared channel count 4"));
    }

    #[test]
    fn test_frame_error_equality() {
        let a = FrameError::Truncated { needed: 176, actual: 20 };
        let b = FrameError::Truncated { needed: 176, actual: 20 };
        assert_eq!(a, b);
    }
}
