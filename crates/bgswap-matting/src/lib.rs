//! Client for the matting (background removal) service.
//!
//! Frames are sent as PNG to a rembg-compatible HTTP server, which replies
//! with the same frame carrying a foreground alpha channel. The pipeline only
//! sees the [`Matter`] trait, so tests can substitute an in-process matter.

pub mod client;
pub mod error;
pub mod matter;

pub use client::{MattingConfig, RembgClient};
pub use error::{MattingError, MattingResult};
pub use matter::Matter;
