//! Matting client error types.

use thiserror::Error;

pub type MattingResult<T> = Result<T, MattingError>;

#[derive(Debug, Error)]
pub enum MattingError {
    #[error("Matting service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl MattingError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MattingError::ServiceUnavailable(_) | MattingError::Timeout(_) | MattingError::Network(_)
        )
    }
}
