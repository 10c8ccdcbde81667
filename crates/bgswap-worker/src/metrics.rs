//! Job and frame metrics.

use metrics::{counter, histogram};

use bgswap_models::FrameOutcome;

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "bgswap_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "bgswap_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "bgswap_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "bgswap_jobs_cancelled_total";
    pub const JOB_DURATION_SECONDS: &str = "bgswap_job_duration_seconds";
    pub const FRAMES_TOTAL: &str = "bgswap_frames_total";
}

pub fn record_job_started() {
    counter!(names::JOBS_STARTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job; `stage` is where it failed.
pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_job_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

pub fn record_frame(outcome: &FrameOutcome) {
    let result = match outcome {
        FrameOutcome::Written { .. } => "written",
        FrameOutcome::Skipped { .. } => "skipped",
        FrameOutcome::Substituted { .. } => "substituted",
    };
    counter!(names::FRAMES_TOTAL, "result" => result).increment(1);
}
