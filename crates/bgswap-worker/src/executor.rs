//! Job runner.
//!
//! Input acquisition runs in the caller's task so bad input surfaces as an
//! error from [`JobRunner::submit`]; frame processing and assembly run on a
//! spawned task gated by a semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tracing::{info, warn, Instrument};

use bgswap_matting::Matter;
use bgswap_media::command::wait_cancelled;
use bgswap_media::{remove_dir_if_exists, Downloader};
use bgswap_models::{
    EncodingConfig, FrameFailurePolicy, JobId, JobPaths, JobReport, JobRequest, JobSnapshot,
    JobState,
};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pipeline::{prepare_job, render_job, PreparedJob};
use crate::store::{JobHandle, JobStore, LatestJob};

/// Accepts jobs and drives them to a terminal state.
pub struct JobRunner {
    config: WorkerConfig,
    store: Arc<JobStore>,
    matter: Arc<dyn Matter>,
    downloader: Downloader,
    job_semaphore: Arc<Semaphore>,
}

impl JobRunner {
    /// Create a new job runner.
    pub fn new(config: WorkerConfig, matter: Arc<dyn Matter>) -> WorkerResult<Self> {
        let downloader = Downloader::new(config.download.clone())?;
        let store = Arc::new(JobStore::new(config.retained_jobs));
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));

        info!(
            "Job runner ready: work root {}, {} concurrent jobs, frame failure policy '{}'",
            config.work_root.display(),
            config.max_concurrent_jobs.max(1),
            config.frame_failure_policy
        );

        Ok(Self {
            config,
            store,
            matter,
            downloader,
            job_semaphore,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn matter(&self) -> &Arc<dyn Matter> {
        &self.matter
    }

    /// Register a job, acquire and check its inputs, then start processing in
    /// the background.
    ///
    /// Returns the job's snapshot once processing has been handed off.
    /// Acquisition runs on its own task, so a caller that stops waiting does
    /// not strand the job: it still ends up processing or failed.
    pub async fn submit(&self, request: JobRequest) -> WorkerResult<JobSnapshot> {
        let job_id = JobId::new();
        let paths = JobPaths::new(&self.config.work_root, &job_id);
        let logger = JobLogger::new(&job_id);
        logger.log_start(&request.video_url, &request.background_url);

        let (cancel_rx, evicted) = self.store.register(job_id.clone(), paths.clone()).await;
        for old in evicted {
            if let Err(e) = remove_dir_if_exists(old.root()).await {
                logger.log_warning(&format!(
                    "Failed to remove evicted job directory {}: {}",
                    old.root().display(),
                    e
                ));
            }
        }
        metrics::record_job_started();

        let handle = self.store.handle(job_id.clone());
        let downloader = self.downloader.clone();
        let render = self.render_context();
        let span = logger.span();

        let acquisition = tokio::spawn(
            async move {
                let prepared = match prepare_job(&request, &paths, &downloader, &handle).await {
                    Ok(prepared) => prepared,
                    Err(e) => {
                        let stage = handle.state().await.unwrap_or_default();
                        logger.log_error(stage, &e.to_string());
                        if handle.fail(e.to_string()).await {
                            metrics::record_job_failed(stage.as_str());
                        }
                        return Err(e);
                    }
                };

                let Some(snapshot) = handle.snapshot().await else {
                    return Err(WorkerError::NotFound(handle.job_id().to_string()));
                };

                render.spawn(prepared, handle, cancel_rx, logger);
                Ok(snapshot)
            }
            .instrument(span),
        );

        acquisition
            .await
            .map_err(|e| WorkerError::processing_failed(format!("Acquisition task failed: {}", e)))?
    }

    fn render_context(&self) -> RenderContext {
        RenderContext {
            semaphore: Arc::clone(&self.job_semaphore),
            matter: Arc::clone(&self.matter),
            policy: self.config.frame_failure_policy,
            encoding: self.config.encoding.clone(),
            job_timeout: self.config.job_timeout,
        }
    }

    /// Snapshot of one job.
    pub async fn status(&self, job_id: &JobId) -> WorkerResult<JobSnapshot> {
        self.store
            .get(job_id)
            .await
            .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))
    }

    /// Snapshot and file layout of one job.
    pub async fn job(&self, job_id: &JobId) -> WorkerResult<(JobSnapshot, JobPaths)> {
        let snapshot = self.status(job_id).await?;
        let paths = self
            .store
            .paths(job_id)
            .await
            .ok_or_else(|| WorkerError::NotFound(job_id.to_string()))?;
        Ok((snapshot, paths))
    }

    /// The most recently submitted job.
    pub async fn latest(&self) -> Option<LatestJob> {
        self.store.latest().await
    }

    /// Request cancellation of a running job.
    pub async fn cancel(&self, job_id: &JobId) -> WorkerResult<JobSnapshot> {
        let snapshot = self.store.cancel(job_id).await?;
        info!(job_id = %job_id, "Cancellation requested");
        Ok(snapshot)
    }

    /// Wait up to `grace` for running jobs to finish, then cancel the rest.
    pub async fn shutdown(&self, grace: Duration) {
        let permits = self.config.max_concurrent_jobs.max(1) as u32;
        match tokio::time::timeout(grace, self.job_semaphore.acquire_many(permits)).await {
            Ok(Ok(_all)) => info!("All running jobs finished"),
            _ => {
                let cancelled = self.store.cancel_active().await;
                warn!("Cancelled {} unfinished jobs at shutdown", cancelled);
            }
        }
    }
}

/// Everything a spawned render needs from the runner.
struct RenderContext {
    semaphore: Arc<Semaphore>,
    matter: Arc<dyn Matter>,
    policy: FrameFailurePolicy,
    encoding: EncodingConfig,
    job_timeout: Duration,
}

impl RenderContext {
    /// Process frames and assemble on a background task once a permit is free.
    fn spawn(
        self,
        prepared: PreparedJob,
        handle: JobHandle,
        cancel_rx: watch::Receiver<bool>,
        logger: JobLogger,
    ) {
        let span = logger.span();

        tokio::spawn(
            async move {
                let started = Instant::now();

                let mut waiter = Some(cancel_rx.clone());
                let permit = tokio::select! {
                    permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
                    _ = wait_cancelled(&mut waiter) => None,
                };
                let Some(_permit) = permit else {
                    finish_job(&handle, &logger, Err(WorkerError::Cancelled), started).await;
                    return;
                };

                let render = render_job(
                    &prepared,
                    self.matter.as_ref(),
                    self.policy,
                    &self.encoding,
                    &handle,
                    &cancel_rx,
                );
                let result = match tokio::time::timeout(self.job_timeout, render).await {
                    Ok(result) => result,
                    Err(_) => Err(WorkerError::Timeout(self.job_timeout.as_secs())),
                };

                finish_job(&handle, &logger, result, started).await;
            }
            .instrument(span),
        );
    }
}

async fn finish_job(
    handle: &JobHandle,
    logger: &JobLogger,
    result: WorkerResult<JobReport>,
    started: Instant,
) {
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(report) => {
            let frames = report.frames_encoded;
            if handle.complete(report).await {
                metrics::record_job_completed(elapsed);
                logger.log_completion(frames, elapsed);
            } else {
                logger.log_warning("Output finished after the job was cancelled");
            }
        }
        Err(e) if e.is_cancelled() => {
            handle.set_state(JobState::Cancelled).await;
            metrics::record_job_cancelled();
            logger.log_warning("Job cancelled");
        }
        Err(e) => {
            let stage = handle.state().await.unwrap_or_default();
            logger.log_error(stage, &e.to_string());
            if handle.fail(e.to_string()).await {
                metrics::record_job_failed(stage.as_str());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bgswap_matting::MattingResult;
    use image::{DynamicImage, RgbImage};
    use tempfile::TempDir;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct PassthroughMatter;

    #[async_trait]
    impl Matter for PassthroughMatter {
        async fn matte(&self, frame: &RgbImage) -> MattingResult<DynamicImage> {
            Ok(DynamicImage::ImageRgb8(frame.clone()))
        }
    }

    fn runner(dir: &TempDir, retained_jobs: usize) -> JobRunner {
        let config = WorkerConfig {
            work_root: dir.path().to_path_buf(),
            retained_jobs,
            ..Default::default()
        };
        JobRunner::new(config, Arc::new(PassthroughMatter)).unwrap()
    }

    fn missing_inputs(server: &MockServer) -> JobRequest {
        JobRequest::from_fields(
            Some(format!("{}/video.mp4", server.uri())),
            Some(format!("{}/bg.jpg", server.uri())),
        )
        .unwrap()
    }

    async fn not_found_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_submit_with_unreachable_input_fails_job() {
        let dir = TempDir::new().unwrap();
        let server = not_found_server().await;
        let runner = runner(&dir, 0);

        let err = runner.submit(missing_inputs(&server)).await.unwrap_err();
        assert!(err.is_invalid_input());

        let latest = runner.latest().await.unwrap();
        assert_eq!(latest.snapshot.state, JobState::Failed);
        assert!(latest
            .snapshot
            .error_message
            .unwrap()
            .contains("Failed to download"));
        assert!(!latest.paths.completion_marker().exists());
    }

    #[tokio::test]
    async fn test_evicted_job_directory_removed() {
        let dir = TempDir::new().unwrap();
        let server = not_found_server().await;
        let runner = runner(&dir, 1);

        runner.submit(missing_inputs(&server)).await.unwrap_err();
        let first = runner.latest().await.unwrap();
        assert!(first.paths.root().is_dir());

        runner.submit(missing_inputs(&server)).await.unwrap_err();
        assert!(!first.paths.root().exists());
        assert!(runner.status(&first.snapshot.job_id).await.is_err());
        assert_eq!(runner.store().len().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_and_finished_jobs() {
        let dir = TempDir::new().unwrap();
        let server = not_found_server().await;
        let runner = runner(&dir, 0);

        assert!(matches!(
            runner.cancel(&JobId::from_string("nope")).await,
            Err(WorkerError::NotFound(_))
        ));

        runner.submit(missing_inputs(&server)).await.unwrap_err();
        let failed = runner.latest().await.unwrap().snapshot.job_id;
        assert!(matches!(
            runner.cancel(&failed).await,
            Err(WorkerError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_abandoned_submit_still_settles_job() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(800)))
            .mount(&server)
            .await;
        let runner = runner(&dir, 0);

        let abandoned =
            tokio::time::timeout(Duration::from_millis(200), runner.submit(missing_inputs(&server)))
                .await;
        assert!(abandoned.is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let latest = runner.latest().await.unwrap();
            if latest.snapshot.state == JobState::Failed {
                assert!(latest
                    .snapshot
                    .error_message
                    .unwrap()
                    .contains("Failed to download"));
                break;
            }
            assert!(
                Instant::now() < deadline,
                "job stuck in {:?}",
                latest.snapshot.state
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_shutdown_without_jobs_returns() {
        let dir = TempDir::new().unwrap();
        let runner = runner(&dir, 0);
        runner.shutdown(Duration::from_millis(100)).await;
        assert!(runner.store().is_empty().await);
    }
}
