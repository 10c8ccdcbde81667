//! Frame extraction: streams decoded RGB frames out of FFmpeg.

use std::path::Path;

use async_trait::async_trait;
use image::RgbImage;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::ChildStdout;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::command::{FfmpegCommand, FfmpegProcess, FfmpegRunner, PIPE_STDOUT};
use crate::error::{MediaError, MediaResult};
use crate::probe::VideoInfo;

/// An ordered source of decoded frames.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame in presentation order, or `None` at end of stream.
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>>;
}

/// Reads `rgb24` rawvideo frames from an FFmpeg child process.
pub struct FfmpegFrameReader {
    runner: FfmpegRunner,
    process: Option<FfmpegProcess>,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frames_read: u64,
}

impl FfmpegFrameReader {
    /// Start decoding `path`. Frames come out at the probed size.
    pub fn open(
        path: impl AsRef<Path>,
        info: &VideoInfo,
        cancel_rx: Option<watch::Receiver<bool>>,
    ) -> MediaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MediaError::FileNotFound(path.to_path_buf()));
        }

        let cmd = FfmpegCommand::new(path, PIPE_STDOUT)
            .no_autorotate()
            .no_audio()
            .raw_rgb_output()
            .without_progress();

        let mut runner = FfmpegRunner::new();
        if let Some(rx) = cancel_rx {
            runner = runner.with_cancel(rx);
        }

        let mut process = runner.spawn(&cmd)?;
        let stdout = process
            .child_mut()
            .stdout
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stdout", None, None))?;

        debug!(
            "Decoding {} at {}x{} ({} frames expected)",
            path.display(),
            info.width,
            info.height,
            info.frame_count
        );

        Ok(Self {
            runner,
            process: Some(process),
            stdout,
            width: info.width,
            height: info.height,
            frames_read: 0,
        })
    }

    /// Wait for the decoder to exit and surface its status.
    pub async fn finish(mut self) -> MediaResult<()> {
        match self.process.take() {
            Some(process) => self.runner.wait(process).await,
            None => Ok(()),
        }
    }

    fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameReader {
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        let mut buf = vec![0u8; self.frame_len()];
        let filled = read_full(&mut self.stdout, &mut buf).await?;

        if filled == 0 {
            return Ok(None);
        }
        if filled < buf.len() {
            warn!(
                "Truncated frame {} ({} of {} bytes), treating as end of stream",
                self.frames_read,
                filled,
                buf.len()
            );
            return Ok(None);
        }

        let frame = RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| MediaError::internal("Frame buffer size does not match dimensions"))?;
        self.frames_read += 1;
        Ok(Some(frame))
    }
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// In-memory frame source.
pub struct VecFrameSource {
    frames: std::vec::IntoIter<RgbImage>,
}

impl VecFrameSource {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self {
            frames: frames.into_iter(),
        }
    }
}

#[async_trait]
impl FrameSource for VecFrameSource {
    async fn next_frame(&mut self) -> MediaResult<Option<RgbImage>> {
        Ok(self.frames.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_full_exact_and_short() {
        let data = vec![7u8; 10];
        let mut reader = &data[..];

        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_vec_frame_source_order() {
        let frames = (0..3u8)
            .map(|i| RgbImage::from_pixel(2, 2, image::Rgb([i, i, i])))
            .collect();
        let mut source = VecFrameSource::new(frames);

        for i in 0..3u8 {
            let frame = source.next_frame().await.unwrap().unwrap();
            assert_eq!(frame.get_pixel(0, 0).0, [i, i, i]);
        }
        assert!(source.next_frame().await.unwrap().is_none());
    }
}
