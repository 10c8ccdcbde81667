//! Shared data models for the background replacement service.
//!
//! This crate provides Serde-serializable types for:
//! - Job requests, identifiers and the job state machine
//! - Status snapshots and per-frame job reports
//! - Output encoding configuration
//! - The on-disk layout of a job directory

pub mod encoding;
pub mod job;
pub mod job_status;
pub mod layout;
pub mod report;

pub use encoding::EncodingConfig;
pub use job::{JobId, JobRequest, JobState, RequestError};
pub use job_status::JobSnapshot;
pub use layout::{frame_file_name, JobPaths};
pub use report::{FrameFailurePolicy, FrameOutcome, JobReport};
