//! On-disk layout of a job's working directory.

use std::path::{Path, PathBuf};

use crate::job::JobId;

/// Downloaded source video
pub const INPUT_VIDEO_FILE: &str = "input_video.mp4";
/// Downloaded background image
pub const BACKGROUND_FILE: &str = "new_background.jpg";
/// Directory holding composited frames
pub const FRAMES_DIR: &str = "output_frames";
/// Assembled output video
pub const OUTPUT_VIDEO_FILE: &str = "output_video.mp4";
/// Marker written once the whole pipeline succeeded
pub const COMPLETION_MARKER_FILE: &str = "processing_complete.txt";
/// Contents of the completion marker
pub const COMPLETION_MARKER_TEXT: &str = "Processing complete";
/// Extension of frame images
pub const FRAME_EXTENSION: &str = "png";

/// Paths of every artifact a job produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    root: PathBuf,
}

impl JobPaths {
    /// Paths for `job_id` under `work_root`.
    pub fn new(work_root: impl AsRef<Path>, job_id: &JobId) -> Self {
        Self {
            root: work_root.as_ref().join(job_id.as_str()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn input_video(&self) -> PathBuf {
        self.root.join(INPUT_VIDEO_FILE)
    }

    pub fn background(&self) -> PathBuf {
        self.root.join(BACKGROUND_FILE)
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.root.join(FRAMES_DIR)
    }

    pub fn output_video(&self) -> PathBuf {
        self.root.join(OUTPUT_VIDEO_FILE)
    }

    pub fn completion_marker(&self) -> PathBuf {
        self.root.join(COMPLETION_MARKER_FILE)
    }

    /// Path of the frame image for `index`.
    pub fn frame(&self, index: u64) -> PathBuf {
        self.frames_dir().join(frame_file_name(index))
    }
}

/// Zero-padded frame file name; sorts in frame order up to 9999 and stays
/// unique beyond.
pub fn frame_file_name(index: u64) -> String {
    format!("{:04}.{}", index, FRAME_EXTENSION)
}
