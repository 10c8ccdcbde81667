//! Video assembly: re-reads written frame images and encodes them with FFmpeg.

use std::path::{Path, PathBuf};

use image::RgbImage;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use bgswap_models::layout::FRAME_EXTENSION;
use bgswap_models::EncodingConfig;

use crate::command::{FfmpegCommand, FfmpegRunner, PIPE_STDIN};
use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

/// Parameters of the output video.
#[derive(Debug, Clone)]
pub struct AssemblyParams {
    pub width: u32,
    pub height: u32,
    /// Frame rate passed to FFmpeg verbatim (e.g. "25/1")
    pub frame_rate: String,
    pub encoding: EncodingConfig,
}

/// Frame images in `dir`, ordered by their numeric file stem.
///
/// Names that are not numbers sort after numbered frames, by name.
pub async fn list_frame_files(dir: impl AsRef<Path>) -> MediaResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
    let mut frames = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_frame = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(FRAME_EXTENSION));
        if is_frame && entry.file_type().await?.is_file() {
            frames.push(path);
        }
    }

    frames.sort_by_cached_key(|p| {
        let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or_default().to_string();
        (stem.parse::<u64>().unwrap_or(u64::MAX), stem)
    });

    Ok(frames)
}

/// Encode every frame image in `frames_dir` into `output`. Returns the number
/// of frames encoded.
pub async fn assemble_video<F>(
    frames_dir: impl AsRef<Path>,
    output: impl AsRef<Path>,
    params: &AssemblyParams,
    cancel_rx: Option<watch::Receiver<bool>>,
    progress_callback: F,
) -> MediaResult<u64>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    let output = output.as_ref();
    let frames = list_frame_files(frames_dir.as_ref()).await?;
    if frames.is_empty() {
        return Err(MediaError::InvalidVideo(
            "No frames were produced; nothing to assemble".to_string(),
        ));
    }

    let mut cmd = FfmpegCommand::new(PIPE_STDIN, output)
        .raw_rgb_input(params.width, params.height, &params.frame_rate)
        .encoding(&params.encoding)
        .faststart();

    // yuv420p needs even dimensions
    if params.width % 2 != 0 || params.height % 2 != 0 {
        cmd = cmd.video_filter("pad=ceil(iw/2)*2:ceil(ih/2)*2");
    }

    let mut runner = FfmpegRunner::new();
    if let Some(rx) = cancel_rx.clone() {
        runner = runner.with_cancel(rx);
    }

    info!(
        "Assembling {} frames into {} at {} fps",
        frames.len(),
        output.display(),
        params.frame_rate
    );

    let mut process = runner.spawn_with_progress(&cmd, progress_callback)?;
    let mut stdin = process
        .child_mut()
        .stdin
        .take()
        .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdin", None, None))?;

    let mut encoded = 0u64;
    for path in &frames {
        if cancel_rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            drop(stdin);
            let _ = runner.wait(process).await;
            return Err(MediaError::Cancelled);
        }

        let frame = read_frame(path.clone(), params.width, params.height).await?;
        if let Err(e) = stdin.write_all(frame.as_raw()).await {
            // FFmpeg exited early; its exit status carries the real error
            warn!("FFmpeg stopped accepting frames after {}: {}", encoded, e);
            break;
        }
        encoded += 1;
    }

    stdin.shutdown().await.ok();
    drop(stdin);
    runner.wait(process).await?;

    debug!("Encoded {} frames into {}", encoded, output.display());
    Ok(encoded)
}

async fn read_frame(path: PathBuf, width: u32, height: u32) -> MediaResult<RgbImage> {
    let frame = tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| MediaError::internal(format!("Frame reader task failed: {}", e)))??;

    if frame.dimensions() != (width, height) {
        return Err(MediaError::DimensionMismatch {
            expected: (width, height),
            actual: frame.dimensions(),
        });
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_frame_files_numeric_order() {
        let dir = TempDir::new().unwrap();
        for name in ["0002.png", "0000.png", "10000.png", "9999.png", "notes.txt", "0001.PNG"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("0003.png")).unwrap();

        let frames = list_frame_files(dir.path()).await.unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(names, vec!["0000.png", "0001.PNG", "0002.png", "9999.png", "10000.png"]);
    }

    #[tokio::test]
    async fn test_assemble_without_frames_fails() {
        let dir = TempDir::new().unwrap();
        let params = AssemblyParams {
            width: 4,
            height: 4,
            frame_rate: "25/1".to_string(),
            encoding: EncodingConfig::default(),
        };

        let result = assemble_video(dir.path(), dir.path().join("out.mp4"), &params, None, |_| {}).await;
        assert!(matches!(result, Err(MediaError::InvalidVideo(_))));
    }

    #[tokio::test]
    async fn test_read_frame_checks_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("0000.png");
        RgbImage::new(4, 2).save(&path).unwrap();

        assert!(read_frame(path.clone(), 4, 2).await.is_ok());
        assert!(matches!(
            read_frame(path, 8, 8).await,
            Err(MediaError::DimensionMismatch { .. })
        ));
    }
}
