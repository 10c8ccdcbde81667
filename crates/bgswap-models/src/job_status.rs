//! Job status snapshots for polling.
//!
//! A `JobSnapshot` is the read-only view of a job that the status store hands
//! out to the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobState};
use crate::report::JobReport;

/// Point-in-time view of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Unique job identifier
    pub job_id: JobId,
    /// Current state
    pub state: JobState,
    /// Frames handled so far (written, skipped or substituted)
    pub frames_processed: u64,
    /// Frame count reported by the probe (0 if unknown)
    pub frames_total: u64,
    /// Frames skipped so far
    pub frames_skipped: u64,
    /// Error message if the job failed
    pub error_message: Option<String>,
    /// Path of the output video
    pub output_path: String,
    /// Final report once the job is done
    pub report: Option<JobReport>,
    /// When the job was created
    pub started_at: DateTime<Utc>,
    /// When the snapshot was last updated
    pub updated_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Create a snapshot for a freshly registered job.
    pub fn new(job_id: JobId, output_path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            state: JobState::Idle,
            frames_processed: 0,
            frames_total: 0,
            frames_skipped: 0,
            error_message: None,
            output_path: output_path.into(),
            report: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Progress percentage (0-100) based on processed frames.
    pub fn progress(&self) -> u8 {
        match self.state {
            JobState::Done => 100,
            JobState::AssemblingVideo => 99,
            _ if self.frames_total == 0 => 0,
            _ => {
                let pct = self.frames_processed.saturating_mul(100) / self.frames_total;
                pct.min(98) as u8
            }
        }
    }

    /// Move to a new state. Returns `false` and leaves the snapshot untouched if
    /// the transition is not allowed.
    pub fn transition(&mut self, to: JobState) -> bool {
        if !self.state.can_transition_to(to) {
            return false;
        }
        self.state = to;
        self.updated_at = Utc::now();
        true
    }

    /// Record one processed frame.
    pub fn record_frame(&mut self, skipped: bool) {
        self.frames_processed += 1;
        if skipped {
            self.frames_skipped += 1;
        }
        self.updated_at = Utc::now();
    }

    /// Mark job as done with its report.
    pub fn complete(&mut self, report: JobReport) -> bool {
        if !self.transition(JobState::Done) {
            return false;
        }
        self.report = Some(report);
        true
    }

    /// Mark job as failed with an error message.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(JobState::Failed) {
            return false;
        }
        self.error_message = Some(error.into());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_creation() {
        let snapshot = JobSnapshot::new(JobId::new(), "/tmp/out.mp4");
        assert_eq!(snapshot.state, JobState::Idle);
        assert_eq!(snapshot.progress(), 0);
        assert!(!snapshot.is_terminal());
    }

    #[test]
    fn test_snapshot_progress() {
        let mut snapshot = JobSnapshot::new(JobId::new(), "/tmp/out.mp4");
        snapshot.transition(JobState::Downloading);
        snapshot.transition(JobState::ExtractingFrames);
        snapshot.frames_total = 10;
        snapshot.transition(JobState::ProcessingFrames);

        for i in 0..5 {
            snapshot.record_frame(i == 2);
        }
        assert_eq!(snapshot.progress(), 50);
        assert_eq!(snapshot.frames_skipped, 1);

        snapshot.transition(JobState::AssemblingVideo);
        assert!(snapshot.complete(JobReport::default()));
        assert_eq!(snapshot.progress(), 100);
        assert!(snapshot.report.is_some());
    }

    #[test]
    fn test_terminal_snapshot_is_frozen() {
        let mut snapshot = JobSnapshot::new(JobId::new(), "/tmp/out.mp4");
        assert!(snapshot.fail("download failed"));
        assert!(!snapshot.transition(JobState::Downloading));
        assert!(!snapshot.fail("again"));
        assert_eq!(snapshot.error_message.as_deref(), Some("download failed"));
    }
}
