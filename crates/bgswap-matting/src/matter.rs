//! The matting seam used by the frame pipeline.

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};

use crate::error::MattingResult;

/// Turns a frame into an image whose alpha channel marks the foreground.
///
/// Implementations may return an image without alpha; callers treat it as
/// fully opaque.
#[async_trait]
pub trait Matter: Send + Sync {
    async fn matte(&self, frame: &RgbImage) -> MattingResult<DynamicImage>;

    /// Whether the backing model is reachable.
    async fn is_ready(&self) -> bool {
        true
    }
}
