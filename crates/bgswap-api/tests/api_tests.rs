//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use image::{DynamicImage, RgbImage};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bgswap_api::{create_router, ApiConfig, AppState};
use bgswap_matting::{Matter, MattingError, MattingResult};
use bgswap_media::{check_ffmpeg, check_ffprobe, probe_video};
use bgswap_models::{EncodingConfig, JobId, JobPaths};
use bgswap_worker::{JobRunner, WorkerConfig};

/// Matting stand-in that returns the frame unchanged.
struct PassthroughMatter;

#[async_trait]
impl Matter for PassthroughMatter {
    async fn matte(&self, frame: &RgbImage) -> MattingResult<DynamicImage> {
        Ok(DynamicImage::ImageRgb8(frame.clone()))
    }
}

struct TestApp {
    router: Router,
    runner: Arc<JobRunner>,
    _work_root: TempDir,
}

/// Passes frames through but fails the matting call at `fail_at`.
struct FlakyMatter {
    calls: AtomicUsize,
    fail_at: usize,
}

#[async_trait]
impl Matter for FlakyMatter {
    async fn matte(&self, frame: &RgbImage) -> MattingResult<DynamicImage> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_at {
            return Err(MattingError::InvalidResponse("not a png".into()));
        }
        Ok(DynamicImage::ImageRgb8(frame.clone()))
    }
}

fn test_app() -> TestApp {
    let work_root = TempDir::new().unwrap();
    let config = WorkerConfig {
        work_root: work_root.path().to_path_buf(),
        ..Default::default()
    };
    app_with(work_root, config, Arc::new(PassthroughMatter))
}

fn app_with(work_root: TempDir, config: WorkerConfig, matter: Arc<dyn Matter>) -> TestApp {
    let runner = Arc::new(JobRunner::new(config, matter).unwrap());
    let state = AppState::with_runner(ApiConfig::default(), Arc::clone(&runner));

    TestApp {
        router: create_router(state, None),
        runner,
        _work_root: work_root,
    }
}

async fn send(router: &Router, request: Request<Body>) -> Response {
    router.clone().oneshot(request).await.unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

const BOUNDARY: &str = "bgswap-test-boundary";

fn post_multipart(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (name, value) in fields {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Register a job and lay out a finished output on disk.
async fn finished_job(runner: &JobRunner, video: &[u8]) -> (JobId, JobPaths) {
    let job_id = JobId::new();
    let paths = JobPaths::new(&runner.config().work_root, &job_id);
    runner.store().register(job_id.clone(), paths.clone()).await;

    std::fs::create_dir_all(paths.root()).unwrap();
    std::fs::write(paths.output_video(), video).unwrap();
    std::fs::write(paths.completion_marker(), "Processing complete").unwrap();

    (job_id, paths)
}

#[tokio::test]
async fn test_health() {
    let app = test_app();

    let response = send(&app.router, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_video_output_before_any_job() {
    let app = test_app();

    let response = send(&app.router, get("/get_video_output_bg")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(body["message"], "Processing is still in progress. Please wait.");
}

#[tokio::test]
async fn test_output_path_before_any_job() {
    let app = test_app();

    let response = send(&app.router, get("/get_path_change_bg")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "error");
    assert_eq!(body["message"], "Output file not found");
    assert!(body.get("output_path").is_none());
}

#[tokio::test]
async fn test_change_background_missing_fields() {
    let app = test_app();

    let requests = [
        post_json("/change_background", serde_json::json!({})),
        post_json(
            "/change_background",
            serde_json::json!({ "video_url": "https://example.com/v.mp4", "background_url": "" }),
        ),
        post_form("/change_background", "video_url=https%3A%2F%2Fexample.com%2Fv.mp4"),
        post_form("/change_background", ""),
    ];

    for request in requests {
        let response = send(&app.router, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        assert_eq!(body["error"], "Both video URL and background URL are required.");
    }

    assert!(app.runner.latest().await.is_none());
}

#[tokio::test]
async fn test_change_background_rejects_unsupported_scheme() {
    let app = test_app();

    let response = send(
        &app.router,
        post_json(
            "/change_background",
            serde_json::json!({
                "video_url": "ftp://example.com/v.mp4",
                "background_url": "https://example.com/bg.jpg"
            }),
        ),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().contains("video_url"));
}

#[tokio::test]
async fn test_change_background_download_failure_is_bad_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = test_app();
    let body = format!(
        "video_url={}/missing.mp4&background_url={}/bg.jpg",
        server.uri(),
        server.uri()
    );

    let response = send(&app.router, post_form("/change_background", &body)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Failed to download file"));

    let latest = app.runner.latest().await.unwrap();
    assert_eq!(latest.snapshot.state.as_str(), "failed");
}

#[tokio::test]
async fn test_change_background_reads_query_string() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = test_app();
    let uri = format!(
        "/change_background?video_url={}/v.mp4&background_url={}/bg.jpg",
        server.uri(),
        server.uri()
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    // Fields were found, so the failure comes from the download, not validation
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Failed to download file"));
}

#[tokio::test]
async fn test_change_background_reads_multipart_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = test_app();
    let video_url = format!("{}/v.mp4", server.uri());
    let background_url = format!("{}/bg.jpg", server.uri());

    let response = send(
        &app.router,
        post_multipart(
            "/change_background",
            &[
                ("video_url", video_url.as_str()),
                ("background_url", background_url.as_str()),
            ],
        ),
    )
    .await;

    // Both fields were read, so the failure comes from the download
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Failed to download file"));

    let response = send(
        &app.router,
        post_multipart("/change_background", &[("video_url", video_url.as_str())]),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Both video URL and background URL are required.");
}

#[tokio::test]
async fn test_unknown_job() {
    let app = test_app();
    let id = JobId::new();

    let response = send(&app.router, get(&format!("/jobs/{}", id))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(json_body(response).await["error"].is_string());

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/jobs/{}/cancel", id))
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_latest_output_served_as_attachment() {
    let app = test_app();
    let video = b"\x00\x00\x00\x18ftypmp42 fake video".to_vec();
    let (_, paths) = finished_job(&app.runner, &video).await;

    let response = send(&app.router, get("/get_video_output_bg")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        video.len().to_string().as_str()
    );
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"output_video.mp4\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), video.as_slice());

    let response = send(&app.router, get("/get_path_change_bg")).await;
    let body = json_body(response).await;
    assert_eq!(body["status"], "success");
    let expected = paths.output_video().to_string_lossy().to_string();
    assert_eq!(body["output_path"].as_str(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_output_without_marker_is_in_progress() {
    let app = test_app();
    let (_, paths) = finished_job(&app.runner, b"partial").await;
    std::fs::remove_file(paths.completion_marker()).unwrap();

    let response = send(&app.router, get("/get_video_output_bg")).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_job_status_and_cancel() {
    let app = test_app();
    let (job_id, _) = finished_job(&app.runner, b"video").await;

    let response = send(&app.router, get(&format!("/jobs/{}", job_id))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["state"], "idle");
    assert_eq!(body["progress"], 0);

    let response = send(&app.router, get(&format!("/jobs/{}/output", job_id))).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(json_body(response).await["state"], "idle");

    let cancel = || {
        Request::builder()
            .method(Method::POST)
            .uri(format!("/jobs/{}/cancel", job_id))
            .body(Body::empty())
            .unwrap()
    };

    let response = send(&app.router, cancel()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["state"], "cancelled");

    let response = send(&app.router, cancel()).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cors_preflight() {
    let app = test_app();

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/change_background")
        .header(header::ORIGIN, "https://app.example.com")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = send(&app.router, request).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "*"
    );
}

#[tokio::test]
async fn test_security_headers_and_request_id() {
    let app = test_app();

    let response = send(&app.router, get("/health")).await;
    let headers = response.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("x-request-id"));

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "abc-123")
        .body(Body::empty())
        .unwrap();
    let response = send(&app.router, request).await;
    assert_eq!(response.headers()["x-request-id"], "abc-123");
}

#[tokio::test]
async fn test_metrics_disabled() {
    let app = test_app();

    let response = send(&app.router, get("/metrics")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Ten-frame 64x48 clip encoded with mpeg4 so no external codec library is needed.
fn generate_clip(dir: &TempDir) -> Vec<u8> {
    let ffmpeg = check_ffmpeg().unwrap();
    let clip = dir.path().join("clip.mp4");
    let status = Command::new(ffmpeg)
        .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=size=64x48:rate=10"])
        .args(["-frames:v", "10", "-c:v", "mpeg4"])
        .arg(&clip)
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::read(clip).unwrap()
}

fn generate_background(dir: &TempDir) -> Vec<u8> {
    let background = dir.path().join("bg.png");
    RgbImage::from_pixel(80, 60, image::Rgb([0, 120, 255]))
        .save(&background)
        .unwrap();
    std::fs::read(background).unwrap()
}

#[tokio::test]
async fn test_change_background_end_to_end() {
    if check_ffmpeg().is_err() || check_ffprobe().is_err() {
        eprintln!("skipping: ffmpeg/ffprobe not installed");
        return;
    }

    let assets = TempDir::new().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(generate_clip(&assets)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bg.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(generate_background(&assets)))
        .mount(&server)
        .await;

    let work_root = TempDir::new().unwrap();
    let config = WorkerConfig {
        work_root: work_root.path().to_path_buf(),
        encoding: EncodingConfig {
            codec: "mpeg4".to_string(),
            ..Default::default()
        },
        ..Default::default()
    };
    let matter = Arc::new(FlakyMatter {
        calls: AtomicUsize::new(0),
        fail_at: 5,
    });
    let app = app_with(work_root, config, matter);

    let response = send(
        &app.router,
        post_json(
            "/change_background",
            serde_json::json!({
                "video_url": format!("{}/clip.mp4", server.uri()),
                "background_url": format!("{}/bg.png", server.uri()),
            }),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    assert_eq!(
        body["message"],
        "Video processing started. Check the status for completion."
    );
    let job_id = JobId::from_string(body["job_id"].as_str().unwrap());
    let (_, paths) = app.runner.job(&job_id).await.unwrap();
    let lossy = |p: std::path::PathBuf| p.to_string_lossy().to_string();
    assert_eq!(body["video_input"], lossy(paths.input_video()));
    assert_eq!(body["image_back"], lossy(paths.background()));
    assert_eq!(body["output_path"], lossy(paths.output_video()));

    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let response = send(&app.router, get(&format!("/jobs/{}", job_id))).await;
        let status = json_body(response).await;
        match status["state"].as_str().unwrap() {
            "done" => {
                assert_eq!(status["frames_skipped"], 1);
                assert_eq!(status["progress"], 100);
                break;
            }
            "failed" | "cancelled" => panic!("job did not finish: {}", status),
            _ => {}
        }
        assert!(Instant::now() < deadline, "job still running: {}", status);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let output = probe_video(paths.output_video()).await.unwrap();
    assert_eq!(output.frame_count, 9);
    assert!(paths.completion_marker().exists());

    let response = send(&app.router, get("/get_video_output_bg")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
}
