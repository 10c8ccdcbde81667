//! The per-job pipeline: acquire, decode, matte, composite, assemble.

use std::path::PathBuf;
use std::sync::Arc;

use image::{RgbImage, RgbaImage};
use tokio::sync::watch;
use tracing::debug;

use bgswap_matting::Matter;
use bgswap_media::{
    assemble_video, clear_directory, composite_frame, ensure_alpha, fit_background, load_background,
    probe_video, write_atomic, AssemblyParams, Downloader, FfmpegFrameReader, FrameSource, MediaResult,
    VideoInfo,
};
use bgswap_models::layout::COMPLETION_MARKER_TEXT;
use bgswap_models::{
    EncodingConfig, FrameFailurePolicy, FrameOutcome, JobPaths, JobReport, JobRequest, JobState,
};

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::store::JobHandle;

/// A job whose inputs are on disk and readable.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub paths: JobPaths,
    pub video: VideoInfo,
    /// Background already resized to the frame size
    pub background: Arc<RgbImage>,
}

/// Download both inputs into a fresh job directory, probe the video and fit
/// the background to it.
pub async fn prepare_job(
    request: &JobRequest,
    paths: &JobPaths,
    downloader: &Downloader,
    handle: &JobHandle,
) -> WorkerResult<PreparedJob> {
    let logger = JobLogger::new(handle.job_id());

    clear_directory(paths.root()).await?;
    clear_directory(paths.frames_dir()).await?;

    handle.set_state(JobState::Downloading).await;
    logger.log_stage(JobState::Downloading);
    downloader
        .download(&request.video_url, paths.input_video())
        .await?;
    downloader
        .download(&request.background_url, paths.background())
        .await?;

    handle.set_state(JobState::ExtractingFrames).await;
    logger.log_stage(JobState::ExtractingFrames);

    let video = probe_video(paths.input_video()).await?;
    handle.set_frames_total(video.frame_count).await;
    debug!(
        job_id = %handle.job_id(),
        "Video {}x{} at {} fps, ~{} frames",
        video.width, video.height, video.frame_rate, video.frame_count
    );

    let background_path = paths.background();
    let (width, height) = (video.width, video.height);
    let background = run_blocking(move || {
        let image = load_background(&background_path)?;
        Ok(fit_background(&image, width, height))
    })
    .await?;

    Ok(PreparedJob {
        paths: paths.clone(),
        video,
        background: Arc::new(background),
    })
}

/// Matte and composite every frame of `source` into the job's frames
/// directory, in frame order.
///
/// A frame whose matting fails, or whose matte does not match the frame
/// size, is handled according to `policy`.
pub async fn process_frames(
    source: &mut dyn FrameSource,
    matter: &dyn Matter,
    prepared: &PreparedJob,
    policy: FrameFailurePolicy,
    handle: &JobHandle,
    cancel_rx: &watch::Receiver<bool>,
) -> WorkerResult<Vec<FrameOutcome>> {
    let logger = JobLogger::new(handle.job_id());
    handle.set_state(JobState::ProcessingFrames).await;
    logger.log_stage(JobState::ProcessingFrames);

    let mut outcomes = Vec::new();
    let mut index = 0u64;

    loop {
        if *cancel_rx.borrow() {
            return Err(WorkerError::Cancelled);
        }
        let Some(frame) = source.next_frame().await? else {
            break;
        };

        let outcome = match matte_frame(matter, &frame).await {
            Ok(foreground) => {
                let background = Arc::clone(&prepared.background);
                let path = prepared.paths.frame(index);
                run_blocking(move || {
                    composite_frame(&foreground, &background)?.save(&path)?;
                    Ok(())
                })
                .await?;
                FrameOutcome::Written { index }
            }
            Err(reason) => match policy {
                FrameFailurePolicy::Skip => FrameOutcome::Skipped { index, reason },
                FrameFailurePolicy::Background => {
                    write_background(&prepared.background, prepared.paths.frame(index)).await?;
                    FrameOutcome::Substituted { index, reason }
                }
                FrameFailurePolicy::Abort => {
                    return Err(WorkerError::FrameFailed {
                        index,
                        message: reason,
                    });
                }
            },
        };

        logger.log_frame_issue(&outcome);
        metrics::record_frame(&outcome);
        handle.record_frame(&outcome).await;
        outcomes.push(outcome);
        index += 1;
    }

    debug!(job_id = %handle.job_id(), "Processed {} frames", outcomes.len());
    Ok(outcomes)
}

/// Encode the written frames into the output video and drop the completion
/// marker next to it.
pub async fn assemble_output(
    prepared: &PreparedJob,
    outcomes: &[FrameOutcome],
    encoding: &EncodingConfig,
    handle: &JobHandle,
    cancel_rx: &watch::Receiver<bool>,
) -> WorkerResult<JobReport> {
    let mut report = JobReport::from_outcomes(outcomes, prepared.video.fps);
    if report.frames_produced() == 0 {
        return Err(WorkerError::processing_failed(
            "No frames were produced; nothing to assemble",
        ));
    }

    handle.set_state(JobState::AssemblingVideo).await;
    JobLogger::new(handle.job_id()).log_stage(JobState::AssemblingVideo);

    let params = AssemblyParams {
        width: prepared.video.width,
        height: prepared.video.height,
        frame_rate: prepared.video.frame_rate.clone(),
        encoding: encoding.clone(),
    };

    let job_id = handle.job_id().clone();
    let total = report.frames_produced();
    report.frames_encoded = assemble_video(
        prepared.paths.frames_dir(),
        prepared.paths.output_video(),
        &params,
        Some(cancel_rx.clone()),
        move |progress| {
            debug!(
                job_id = %job_id,
                "Encoding {:.0}% ({} fps)",
                progress.frame_percentage(total),
                progress.fps
            );
        },
    )
    .await?;

    write_atomic(
        prepared.paths.completion_marker(),
        COMPLETION_MARKER_TEXT.as_bytes(),
    )
    .await?;

    Ok(report)
}

/// Decode the input video and run frame processing and assembly.
pub async fn render_job(
    prepared: &PreparedJob,
    matter: &dyn Matter,
    policy: FrameFailurePolicy,
    encoding: &EncodingConfig,
    handle: &JobHandle,
    cancel_rx: &watch::Receiver<bool>,
) -> WorkerResult<JobReport> {
    let mut reader = FfmpegFrameReader::open(
        prepared.paths.input_video(),
        &prepared.video,
        Some(cancel_rx.clone()),
    )?;

    let outcomes = process_frames(&mut reader, matter, prepared, policy, handle, cancel_rx).await?;
    reader.finish().await?;

    assemble_output(prepared, &outcomes, encoding, handle, cancel_rx).await
}

/// Matte one frame. Errors come back as a reason string for the failure policy.
async fn matte_frame(matter: &dyn Matter, frame: &RgbImage) -> Result<RgbaImage, String> {
    let matted = matter.matte(frame).await.map_err(|e| e.to_string())?;
    let foreground = ensure_alpha(matted);

    if foreground.dimensions() != frame.dimensions() {
        let (mw, mh) = foreground.dimensions();
        let (fw, fh) = frame.dimensions();
        return Err(format!("matte is {}x{}, frame is {}x{}", mw, mh, fw, fh));
    }
    Ok(foreground)
}

async fn write_background(background: &Arc<RgbImage>, path: PathBuf) -> WorkerResult<()> {
    let background = Arc::clone(background);
    run_blocking(move || Ok(background.save(&path)?)).await
}

async fn run_blocking<T, F>(f: F) -> WorkerResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> MediaResult<T> + Send + 'static,
{
    let result = tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WorkerError::processing_failed(format!("Blocking task failed: {}", e)))?;
    Ok(result?)
}
