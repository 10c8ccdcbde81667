//! Background replacement pipeline.
//!
//! Acquires the inputs of a job, mattes and composites every frame, assembles
//! the output video and tracks job state for the HTTP layer.

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod store;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobRunner;
pub use logging::JobLogger;
pub use pipeline::{assemble_output, prepare_job, process_frames, PreparedJob};
pub use store::{JobHandle, JobStore, LatestJob};
