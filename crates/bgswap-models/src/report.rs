//! Per-frame outcomes and the aggregated job report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What to do with a frame whose matting step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FrameFailurePolicy {
    /// Write nothing for the frame; the output video gets shorter.
    #[default]
    Skip,
    /// Write the resized background alone for the frame.
    Background,
    /// Fail the whole job.
    Abort,
}

impl FrameFailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameFailurePolicy::Skip => "skip",
            FrameFailurePolicy::Background => "background",
            FrameFailurePolicy::Abort => "abort",
        }
    }
}

impl fmt::Display for FrameFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FrameFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "skip" => Ok(FrameFailurePolicy::Skip),
            "background" | "substitute" => Ok(FrameFailurePolicy::Background),
            "abort" => Ok(FrameFailurePolicy::Abort),
            other => Err(format!("unknown frame failure policy '{}'", other)),
        }
    }
}

/// Result of processing a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FrameOutcome {
    /// Composited frame written to disk
    Written { index: u64 },
    /// No frame written for this index
    Skipped { index: u64, reason: String },
    /// Background-only frame written in place of the composite
    Substituted { index: u64, reason: String },
}

impl FrameOutcome {
    pub fn index(&self) -> u64 {
        match self {
            FrameOutcome::Written { index }
            | FrameOutcome::Skipped { index, .. }
            | FrameOutcome::Substituted { index, .. } => *index,
        }
    }

    /// Whether a frame image exists on disk for this index.
    pub fn produced_frame(&self) -> bool {
        !matches!(self, FrameOutcome::Skipped { .. })
    }
}

/// Aggregated result of a finished job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobReport {
    /// Frames decoded from the source
    pub frames_decoded: u64,
    /// Frames written with a composite
    pub frames_written: u64,
    /// Frames skipped entirely
    pub frames_skipped: u64,
    /// Frames replaced by the background alone
    pub frames_substituted: u64,
    /// Frames encoded into the output video
    pub frames_encoded: u64,
    /// Frame rate of the output video
    pub fps: f64,
    /// Non-written frames with their reasons
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<FrameOutcome>,
}

impl JobReport {
    /// Build a report from per-frame outcomes.
    pub fn from_outcomes(outcomes: &[FrameOutcome], fps: f64) -> Self {
        let mut report = JobReport {
            fps,
            ..Default::default()
        };

        for outcome in outcomes {
            report.record(outcome.clone());
        }

        report
    }

    /// Add one frame outcome to the counts.
    pub fn record(&mut self, outcome: FrameOutcome) {
        self.frames_decoded += 1;
        match outcome {
            FrameOutcome::Written { .. } => self.frames_written += 1,
            FrameOutcome::Skipped { .. } => {
                self.frames_skipped += 1;
                self.issues.push(outcome);
            }
            FrameOutcome::Substituted { .. } => {
                self.frames_substituted += 1;
                self.issues.push(outcome);
            }
        }
    }

    /// Frames that ended up on disk.
    pub fn frames_produced(&self) -> u64 {
        self.frames_written + self.frames_substituted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parse() {
        assert_eq!("skip".parse::<FrameFailurePolicy>(), Ok(FrameFailurePolicy::Skip));
        assert_eq!(" Background ".parse::<FrameFailurePolicy>(), Ok(FrameFailurePolicy::Background));
        assert_eq!("ABORT".parse::<FrameFailurePolicy>(), Ok(FrameFailurePolicy::Abort));
        assert!("retry".parse::<FrameFailurePolicy>().is_err());
        assert_eq!(FrameFailurePolicy::default(), FrameFailurePolicy::Skip);
    }

    #[test]
    fn test_report_counts() {
        let outcomes = vec![
            FrameOutcome::Written { index: 0 },
            FrameOutcome::Skipped { index: 1, reason: "matting failed".into() },
            FrameOutcome::Written { index: 2 },
            FrameOutcome::Substituted { index: 3, reason: "size mismatch".into() },
        ];

        let report = JobReport::from_outcomes(&outcomes, 25.0);
        assert_eq!(report.frames_decoded, 4);
        assert_eq!(report.frames_written, 2);
        assert_eq!(report.frames_skipped, 1);
        assert_eq!(report.frames_substituted, 1);
        assert_eq!(report.frames_produced(), 3);
        assert_eq!(report.issues.len(), 2);
        assert_eq!(report.issues[0].index(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = FrameOutcome::Skipped { index: 5, reason: "boom".into() };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "skipped");
        assert_eq!(json["index"], 5);
        assert!(!outcome.produced_frame());
    }
}
