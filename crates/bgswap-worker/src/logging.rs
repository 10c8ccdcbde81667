//! Structured job logging.
//!
//! Every lifecycle line carries the same `job_id` and `stage` fields so a
//! job can be followed through the logs with one filter.

use tracing::{error, info, warn, Span};

use bgswap_models::{FrameOutcome, JobId, JobState};

/// Logger bound to one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Log job submission.
    pub fn log_start(&self, video_url: &str, background_url: &str) {
        info!(
            job_id = %self.job_id,
            video_url = %video_url,
            background_url = %background_url,
            "Job submitted"
        );
    }

    /// Log a state change.
    pub fn log_stage(&self, state: JobState) {
        info!(job_id = %self.job_id, stage = %state, "Job stage: {}", state);
    }

    /// Log a frame that was not composited.
    pub fn log_frame_issue(&self, outcome: &FrameOutcome) {
        match outcome {
            FrameOutcome::Written { .. } => {}
            FrameOutcome::Skipped { index, reason } => {
                warn!(job_id = %self.job_id, frame = index, "Skipping frame: {}", reason);
            }
            FrameOutcome::Substituted { index, reason } => {
                warn!(
                    job_id = %self.job_id,
                    frame = index,
                    "Writing background-only frame: {}", reason
                );
            }
        }
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, "Job warning: {}", message);
    }

    pub fn log_error(&self, stage: JobState, message: &str) {
        error!(job_id = %self.job_id, stage = %stage, "Job failed: {}", message);
    }

    pub fn log_completion(&self, frames_encoded: u64, elapsed_secs: f64) {
        info!(
            job_id = %self.job_id,
            frames = frames_encoded,
            elapsed_secs = elapsed_secs,
            "Job completed"
        );
    }

    /// Span wrapping the job's background task.
    pub fn span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_creation() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id);
        assert_eq!(logger.job_id(), job_id.as_str());
    }
}
