//! Worker error types.

use thiserror::Error;

use bgswap_matting::MattingError;
use bgswap_media::MediaError;
use bgswap_models::RequestError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Matting failed for frame {index}: {message}")]
    FrameFailed { index: u64, message: String },

    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    #[error("Job cancelled")]
    Cancelled,

    #[error("Job timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Matting error: {0}")]
    Matting(#[from] MattingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RequestError> for WorkerError {
    fn from(e: RequestError) -> Self {
        Self::InvalidInput(e.to_string())
    }
}

impl WorkerError {
    pub fn processing_failed(msg: impl Into<String>) -> Self {
        Self::ProcessingFailed(msg.into())
    }

    /// Whether the caller supplied unusable input (reported as 400).
    pub fn is_invalid_input(&self) -> bool {
        match self {
            WorkerError::InvalidInput(_) => true,
            WorkerError::Media(e) => e.is_input_error(),
            _ => false,
        }
    }

    /// Whether the job stopped because cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Cancelled | WorkerError::Media(MediaError::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_classification() {
        assert!(WorkerError::from(RequestError::MissingField).is_invalid_input());
        assert!(WorkerError::Media(MediaError::download_failed("404")).is_invalid_input());
        assert!(WorkerError::Media(MediaError::InvalidImage("garbage".into())).is_invalid_input());
        assert!(!WorkerError::Media(MediaError::FfmpegNotFound).is_invalid_input());
        assert!(!WorkerError::processing_failed("boom").is_invalid_input());
    }

    #[test]
    fn test_cancelled_classification() {
        assert!(WorkerError::Cancelled.is_cancelled());
        assert!(WorkerError::Media(MediaError::Cancelled).is_cancelled());
        assert!(!WorkerError::Timeout(5).is_cancelled());
    }

    #[test]
    fn test_missing_field_message() {
        let e = WorkerError::from(RequestError::MissingField);
        assert_eq!(e.to_string(), "Both video URL and background URL are required.");
    }
}
