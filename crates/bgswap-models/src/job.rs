//! Job identifiers, requests and the job state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Unique identifier for a background replacement job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Errors raised while validating a job request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("Both video URL and background URL are required.")]
    MissingField,

    #[error("Invalid {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// A request to replace the background of a video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    /// URL of the source video
    pub video_url: String,
    /// URL of the replacement background image
    pub background_url: String,
}

impl JobRequest {
    /// Build a request from optional fields, treating blank values as missing.
    pub fn from_fields(
        video_url: Option<String>,
        background_url: Option<String>,
    ) -> Result<Self, RequestError> {
        let video_url = non_blank(video_url).ok_or(RequestError::MissingField)?;
        let background_url = non_blank(background_url).ok_or(RequestError::MissingField)?;

        let request = Self {
            video_url,
            background_url,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check that both URLs parse and use http(s).
    pub fn validate(&self) -> Result<(), RequestError> {
        validate_url("video_url", &self.video_url)?;
        validate_url("background_url", &self.background_url)?;
        Ok(())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_url(field: &'static str, raw: &str) -> Result<(), RequestError> {
    let parsed = Url::parse(raw).map_err(|e| RequestError::InvalidUrl {
        field,
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RequestError::InvalidUrl {
            field,
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Lifecycle state of a job.
///
/// `Idle → Downloading → ExtractingFrames → ProcessingFrames → AssemblingVideo → Done`,
/// with `Failed` and `Cancelled` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Downloading,
    ExtractingFrames,
    ProcessingFrames,
    AssemblingVideo,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Idle => "idle",
            JobState::Downloading => "downloading",
            JobState::ExtractingFrames => "extracting_frames",
            JobState::ProcessingFrames => "processing_frames",
            JobState::AssemblingVideo => "assembling_video",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// The state that follows this one on the happy path.
    pub fn next(&self) -> Option<JobState> {
        match self {
            JobState::Idle => Some(JobState::Downloading),
            JobState::Downloading => Some(JobState::ExtractingFrames),
            JobState::ExtractingFrames => Some(JobState::ProcessingFrames),
            JobState::ProcessingFrames => Some(JobState::AssemblingVideo),
            JobState::AssemblingVideo => Some(JobState::Done),
            JobState::Done | JobState::Failed | JobState::Cancelled => None,
        }
    }

    /// Whether moving from `self` to `to` is allowed.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            JobState::Failed | JobState::Cancelled => true,
            other => self.next() == Some(other),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_missing_fields() {
        assert_eq!(
            JobRequest::from_fields(None, Some("https://a/b.jpg".into())),
            Err(RequestError::MissingField)
        );
        assert_eq!(
            JobRequest::from_fields(Some("   ".into()), Some("https://a/b.jpg".into())),
            Err(RequestError::MissingField)
        );
    }

    #[test]
    fn test_request_rejects_non_http() {
        let err = JobRequest::from_fields(
            Some("file:///etc/passwd".into()),
            Some("https://example.com/bg.jpg".into()),
        )
        .unwrap_err();
        assert!(matches!(err, RequestError::InvalidUrl { field: "video_url", .. }));
    }

    #[test]
    fn test_request_trims_values() {
        let request = JobRequest::from_fields(
            Some(" https://example.com/v.mp4 ".into()),
            Some("https://example.com/bg.jpg".into()),
        )
        .unwrap();
        assert_eq!(request.video_url, "https://example.com/v.mp4");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut state = JobState::Idle;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(state.can_transition_to(next));
            state = next;
            visited.push(state);
        }
        assert_eq!(state, JobState::Done);
        assert_eq!(visited.len(), 6);
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!JobState::Idle.can_transition_to(JobState::AssemblingVideo));
        assert!(!JobState::Done.can_transition_to(JobState::Failed));
        assert!(!JobState::Cancelled.can_transition_to(JobState::Downloading));
        assert!(JobState::ProcessingFrames.can_transition_to(JobState::Cancelled));
        assert!(JobState::Downloading.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_job_id_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
