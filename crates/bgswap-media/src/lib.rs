//! FFmpeg CLI wrapper and frame compositing for background replacement.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Cancellation support via tokio
//! - Streaming rawvideo decode and PNG-sequence re-encode
//! - HTTP input acquisition
//! - Alpha compositing over a resized background

pub mod command;
pub mod composite;
pub mod decode;
pub mod download;
pub mod encode;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod progress;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use composite::{composite_frame, ensure_alpha, fit_background, load_background};
pub use decode::{FfmpegFrameReader, FrameSource, VecFrameSource};
pub use download::{resolve_download_url, DownloadConfig, Downloader};
pub use encode::{assemble_video, list_frame_files, AssemblyParams};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{clear_directory, remove_dir_if_exists, write_atomic};
pub use probe::{probe_video, VideoInfo};
pub use progress::FfmpegProgress;
