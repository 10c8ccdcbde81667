//! Per-job status, output and cancellation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use bgswap_models::{JobId, JobSnapshot, JobState};

use crate::error::ApiResult;
use crate::handlers::background::video_attachment;
use crate::state::AppState;

/// Job snapshot with its progress percentage.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub snapshot: JobSnapshot,
    pub progress: u8,
}

impl From<JobSnapshot> for JobStatusResponse {
    fn from(snapshot: JobSnapshot) -> Self {
        let progress = snapshot.progress();
        Self { snapshot, progress }
    }
}

/// Get the status of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let snapshot = state.runner.status(&JobId::from_string(job_id)).await?;
    Ok(Json(snapshot.into()))
}

#[derive(Serialize)]
struct PendingOutputResponse {
    message: String,
    state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Download a job's video; 202 with the job state until it is done.
pub async fn get_job_output(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let (snapshot, paths) = state.runner.job(&JobId::from_string(job_id)).await?;

    if snapshot.state == JobState::Done {
        return video_attachment(&paths.output_video()).await;
    }

    let message = match snapshot.state {
        JobState::Failed => "Processing failed.",
        JobState::Cancelled => "Processing was cancelled.",
        _ => "Processing is still in progress. Please wait.",
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(PendingOutputResponse {
            message: message.to_string(),
            state: snapshot.state,
            error: snapshot.error_message,
        }),
    )
        .into_response())
}

/// Cancel a running job.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let snapshot = state.runner.cancel(&JobId::from_string(job_id)).await?;
    Ok(Json(snapshot.into()))
}
