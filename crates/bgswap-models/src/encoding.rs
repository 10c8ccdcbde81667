//! Output video encoding configuration.

use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 18;
/// Pixel format for broad player compatibility
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "mpeg4")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "fast", "medium", "slow")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Output pixel format
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
        }
    }
}

impl EncodingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            codec: std::env::var("VIDEO_CODEC").unwrap_or_else(|_| DEFAULT_VIDEO_CODEC.to_string()),
            preset: std::env::var("VIDEO_PRESET").unwrap_or_else(|_| DEFAULT_PRESET.to_string()),
            crf: std::env::var("VIDEO_CRF")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|crf| *crf <= 51)
                .unwrap_or(DEFAULT_CRF),
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
        }
    }

    /// Whether the codec understands `-preset`/`-crf` (x264/x265 family).
    pub fn uses_crf(&self) -> bool {
        self.codec.starts_with("libx26")
    }

    /// FFmpeg output arguments for this configuration.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let mut args = vec!["-c:v".to_string(), self.codec.clone()];
        if self.uses_crf() {
            args.extend([
                "-preset".to_string(),
                self.preset.clone(),
                "-crf".to_string(),
                self.crf.to_string(),
            ]);
        }
        args.extend(["-pix_fmt".to_string(), self.pixel_format.clone()]);
        args
    }
}
