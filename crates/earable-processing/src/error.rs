//! Errors raised while building processing stages

use thiserror::Error;

pub type ProcessingResult<T> = Result<T, ProcessingError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProcessingError {
    /// Filter parameters outside what the design equations accept
    #[error("invalid filter design: {0}")]
    InvalidDesign(String),

    /// Detector or gate parameters that cannot produce a window
    #[error("invalid detector parameters: {0}")]
    InvalidParameters(String),
}

impl ProcessingError {
    pub fn design(reason: impl Into<String>) -> Self {
        ProcessingError::InvalidDesign(reason.into())
    }

    pub fn parameters(reason: impl Into<String>) -> Self {
        ProcessingError::InvalidParameters(reason.into())
    }
}

impl From<ProcessingError> for earable_core::EarableError {
    fn from(err: ProcessingError) -> Self {
        earable_core::EarableError::config(err.to_string())
    }
}
