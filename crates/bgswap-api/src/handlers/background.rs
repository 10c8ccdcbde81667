//! Background replacement endpoints.
//!
//! `POST /change_background` starts a job; the two `GET` endpoints poll the
//! most recently submitted job.

use std::path::Path;

use axum::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::info;

use bgswap_models::layout::OUTPUT_VIDEO_FILE;
use bgswap_models::JobRequest;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const STARTED_MESSAGE: &str = "Video processing started. Check the status for completion.";
const IN_PROGRESS_MESSAGE: &str = "Processing is still in progress. Please wait.";

/// Fields of a background replacement request.
#[derive(Debug, Default, Deserialize)]
pub struct ChangeBackgroundParams {
    pub video_url: Option<String>,
    pub background_url: Option<String>,
}

impl ChangeBackgroundParams {
    /// Fill fields missing here from `fallback`.
    fn or(self, fallback: Self) -> Self {
        Self {
            video_url: non_blank(self.video_url).or(fallback.video_url),
            background_url: non_blank(self.background_url).or(fallback.background_url),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Request fields read from a form or JSON body, falling back to the query
/// string for anything the body does not carry.
pub struct ChangeBackgroundInput(pub ChangeBackgroundParams);

#[async_trait]
impl<S> FromRequest<S> for ChangeBackgroundInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let query = Query::<ChangeBackgroundParams>::try_from_uri(req.uri())
            .map(|Query(params)| params)
            .unwrap_or_default();

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let body = if content_type.starts_with("application/json") {
            let Json(params) = Json::<ChangeBackgroundParams>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            params
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(params) = Form::<ChangeBackgroundParams>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            params
        } else if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            read_multipart(multipart).await?
        } else {
            ChangeBackgroundParams::default()
        };

        Ok(Self(body.or(query)))
    }
}

/// Collect the URL fields of a multipart form; file parts and unknown fields
/// are skipped.
async fn read_multipart(mut multipart: Multipart) -> ApiResult<ChangeBackgroundParams> {
    let mut params = ChangeBackgroundParams::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.body_text()))?
    {
        let slot = match field.name() {
            Some("video_url") => &mut params.video_url,
            Some("background_url") => &mut params.background_url,
            _ => continue,
        };
        if field.file_name().is_some() {
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        *slot = Some(value);
    }

    Ok(params)
}

/// Response to an accepted job.
#[derive(Debug, Serialize)]
pub struct ChangeBackgroundResponse {
    pub message: String,
    pub job_id: String,
    pub video_input: String,
    pub image_back: String,
    pub output_path: String,
}

/// Start a background replacement job.
///
/// Inputs are downloaded and checked before this returns, so unusable URLs
/// and unreadable files are reported as 400.
pub async fn change_background(
    State(state): State<AppState>,
    ChangeBackgroundInput(params): ChangeBackgroundInput,
) -> ApiResult<(StatusCode, Json<ChangeBackgroundResponse>)> {
    let request = JobRequest::from_fields(params.video_url, params.background_url)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let snapshot = state.runner.submit(request).await?;
    let (_, paths) = state.runner.job(&snapshot.job_id).await?;

    info!(job_id = %snapshot.job_id, "Video processing started");

    Ok((
        StatusCode::ACCEPTED,
        Json(ChangeBackgroundResponse {
            message: STARTED_MESSAGE.to_string(),
            job_id: snapshot.job_id.to_string(),
            video_input: paths.input_video().to_string_lossy().to_string(),
            image_back: paths.background().to_string_lossy().to_string(),
            output_path: snapshot.output_path,
        }),
    ))
}

/// Output path lookup response.
#[derive(Debug, Serialize)]
pub struct OutputPathResponse {
    pub status: &'static str,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

/// Report whether the latest job's output video exists.
pub async fn get_path_change_bg(State(state): State<AppState>) -> Json<OutputPathResponse> {
    let output = match state.runner.latest().await {
        Some(latest) => {
            let path = latest.paths.output_video();
            tokio::fs::try_exists(&path)
                .await
                .unwrap_or(false)
                .then(|| path.to_string_lossy().to_string())
        }
        None => None,
    };

    Json(match output {
        Some(output_path) => OutputPathResponse {
            status: "success",
            message: "Output file path retrieved successfully",
            output_path: Some(output_path),
        },
        None => OutputPathResponse {
            status: "error",
            message: "Output file not found",
            output_path: None,
        },
    })
}

/// Return the latest job's video once it is complete, 202 until then.
pub async fn get_video_output_bg(State(state): State<AppState>) -> ApiResult<Response> {
    if let Some(latest) = state.runner.latest().await {
        let complete = tokio::fs::try_exists(latest.paths.completion_marker())
            .await
            .unwrap_or(false);
        if complete {
            return video_attachment(&latest.paths.output_video()).await;
        }
    }

    Ok(in_progress())
}

#[derive(Serialize)]
struct MessageResponse {
    message: &'static str,
}

pub(crate) fn in_progress() -> Response {
    (
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: IN_PROGRESS_MESSAGE,
        }),
    )
        .into_response()
}

/// Stream an output video as an `output_video.mp4` attachment.
pub(crate) async fn video_attachment(path: &Path) -> ApiResult<Response> {
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::not_found("Output file not found")
        } else {
            ApiError::internal(format!("Failed to open output video: {}", e))
        }
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read output video: {}", e)))?
        .len();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "video/mp4")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", OUTPUT_VIDEO_FILE),
        )
        .header("Cross-Origin-Resource-Policy", "cross-origin")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_fields_win_over_query() {
        let body = ChangeBackgroundParams {
            video_url: Some("https://a/video.mp4".into()),
            background_url: Some("  ".into()),
        };
        let query = ChangeBackgroundParams {
            video_url: Some("https://b/video.mp4".into()),
            background_url: Some("https://b/bg.jpg".into()),
        };

        let merged = body.or(query);
        assert_eq!(merged.video_url.as_deref(), Some("https://a/video.mp4"));
        assert_eq!(merged.background_url.as_deref(), Some("https://b/bg.jpg"));
    }
}
