//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use bgswap_media::DownloadConfig;
use bgswap_models::{EncodingConfig, FrameFailurePolicy};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Root under which every job gets its own directory
    pub work_root: PathBuf,
    /// Maximum jobs processing frames at once
    pub max_concurrent_jobs: usize,
    /// Job timeout, measured from the start of frame processing
    pub job_timeout: Duration,
    /// Finished job directories kept on disk before the oldest are evicted
    pub retained_jobs: usize,
    /// What to do with a frame whose matting fails
    pub frame_failure_policy: FrameFailurePolicy,
    /// Input download settings
    pub download: DownloadConfig,
    /// Output video encoding
    pub encoding: EncodingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("srv"),
            max_concurrent_jobs: 2,
            job_timeout: Duration::from_secs(3600), // 1 hour
            retained_jobs: 10,
            frame_failure_policy: FrameFailurePolicy::default(),
            download: DownloadConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            work_root: std::env::var("WORK_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("srv")),
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(2),
            job_timeout: Duration::from_secs(
                std::env::var("WORKER_JOB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
            ),
            retained_jobs: std::env::var("WORKER_RETAINED_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            frame_failure_policy: std::env::var("FRAME_FAILURE_POLICY")
                .ok()
                .and_then(|s| match s.parse() {
                    Ok(policy) => Some(policy),
                    Err(e) => {
                        tracing::warn!("Ignoring FRAME_FAILURE_POLICY: {}", e);
                        None
                    }
                })
                .unwrap_or_default(),
            download: DownloadConfig::from_env(),
            encoding: EncodingConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.work_root, PathBuf::from("srv"));
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.frame_failure_policy, FrameFailurePolicy::Skip);
        assert_eq!(config.encoding.codec, "libx264");
    }
}
