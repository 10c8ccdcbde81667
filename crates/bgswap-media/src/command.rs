//! FFmpeg command builder and runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use bgswap_models::EncodingConfig;

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, FfmpegProgress};

/// FFmpeg pseudo-path for reading from stdin.
pub const PIPE_STDIN: &str = "pipe:0";
/// FFmpeg pseudo-path for writing to stdout.
pub const PIPE_STDOUT: &str = "pipe:1";

/// FFmpeg `-v` level.
const LOG_LEVEL: &str = "error";
/// Number of stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path or pipe
    input: PathBuf,
    /// Output file path or pipe
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Whether to emit `-progress pipe:2`
    progress: bool,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            progress: true,
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Keep coded frame orientation; probed dimensions refer to it.
    pub fn no_autorotate(self) -> Self {
        self.input_arg("-noautorotate")
    }

    /// Declare stdin as packed RGB24 frames of the given size and rate.
    pub fn raw_rgb_input(self, width: u32, height: u32, frame_rate: &str) -> Self {
        self.input_args([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-s".to_string(),
            format!("{}x{}", width, height),
            "-framerate".to_string(),
            frame_rate.to_string(),
        ])
    }

    /// Emit packed RGB24 frames.
    pub fn raw_rgb_output(self) -> Self {
        self.output_args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
    }

    /// Drop audio streams.
    pub fn no_audio(self) -> Self {
        self.output_arg("-an")
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Apply codec, quality and pixel format settings.
    pub fn encoding(self, config: &EncodingConfig) -> Self {
        self.output_args(config.to_ffmpeg_args())
    }

    /// Move the moov atom to the front for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_args(["-movflags", "+faststart"])
    }

    /// Disable `-progress` output.
    pub fn without_progress(mut self) -> Self {
        self.progress = false;
        self
    }

    fn reads_stdin(&self) -> bool {
        self.input == Path::new(PIPE_STDIN) || self.input == Path::new("-")
    }

    fn writes_stdout(&self) -> bool {
        self.output == Path::new(PIPE_STDOUT) || self.output == Path::new("-")
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(LOG_LEVEL.to_string());

        if self.progress {
            args.push("-progress".to_string());
            args.push("pipe:2".to_string());
        }

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }
}

/// A spawned FFmpeg process whose stderr is being drained.
pub struct FfmpegProcess {
    child: Child,
    stderr_task: JoinHandle<Vec<String>>,
}

impl FfmpegProcess {
    /// Access the child to take its stdin/stdout.
    pub fn child_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self { cancel_rx: None }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Spawn an FFmpeg command. Stdin/stdout are piped when the command reads
    /// from or writes to a pipe; the process is killed if dropped.
    pub fn spawn_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<FfmpegProcess>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        check_ffmpeg()?;

        let args = cmd.build_args();
        debug!("Running FFmpeg: ffmpeg {}", args.join(" "));

        let mut child = Command::new("ffmpeg")
            .args(&args)
            .stdin(if cmd.reads_stdin() { Stdio::piped() } else { Stdio::null() })
            .stdout(if cmd.writes_stdout() { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("Failed to capture FFmpeg stderr", None, None))?;

        let stderr_task = tokio::spawn(drain_stderr(stderr, progress_callback));

        Ok(FfmpegProcess { child, stderr_task })
    }

    /// Spawn without a progress callback.
    pub fn spawn(&self, cmd: &FfmpegCommand) -> MediaResult<FfmpegProcess> {
        self.spawn_with_progress(cmd, |_| {})
    }

    /// Wait for a spawned process, honouring cancellation.
    pub async fn wait(&self, mut process: FfmpegProcess) -> MediaResult<()> {
        let result = self.wait_for_completion(&mut process.child).await;
        let stderr_tail = process.stderr_task.await.unwrap_or_default();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status",
                (!stderr_tail.is_empty()).then(|| stderr_tail.join("\n")),
                status.code(),
            )),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = wait_cancelled(&mut cancel_rx) => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
        }
    }
}

/// Resolve once the cancel flag flips to `true`; never resolves without a receiver.
pub async fn wait_cancelled(cancel_rx: &mut Option<watch::Receiver<bool>>) {
    match cancel_rx {
        Some(rx) => {
            let cancelled = rx.wait_for(|cancelled| *cancelled).await.is_ok();
            if !cancelled {
                // Sender dropped without cancelling
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

async fn drain_stderr<F>(stderr: ChildStderr, progress_callback: F) -> Vec<String>
where
    F: Fn(FfmpegProgress) + Send + 'static,
{
    let mut reader = BufReader::new(stderr).lines();
    let mut current = FfmpegProgress::default();
    let mut tail = Vec::new();

    while let Ok(Some(line)) = reader.next_line().await {
        if line.contains('=') && !line.contains(' ') {
            if let Some(progress) = parse_progress_line(&line, &mut current) {
                progress_callback(progress);
            }
            continue;
        }

        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }

    tail
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("input.mp4", PIPE_STDOUT)
            .no_autorotate()
            .raw_rgb_output()
            .without_progress();

        let args = cmd.build_args();
        assert!(!args.contains(&"-progress".to_string()));
        let level_pos = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[level_pos + 1], LOG_LEVEL);
        assert_eq!(args.last().map(String::as_str), Some(PIPE_STDOUT));

        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let rotate_pos = args.iter().position(|a| a == "-noautorotate").unwrap();
        assert!(rotate_pos < input_pos);
        assert!(cmd.writes_stdout());
        assert!(!cmd.reads_stdin());
    }

    #[test]
    fn test_raw_input_args() {
        let cmd = FfmpegCommand::new(PIPE_STDIN, "out.mp4")
            .raw_rgb_input(640, 360, "30000/1001")
            .encoding(&EncodingConfig::default());

        let args = cmd.build_args();
        assert!(args.contains(&"640x360".to_string()));
        assert!(args.contains(&"30000/1001".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert!(cmd.reads_stdin());

        let size_pos = args.iter().position(|a| a == "640x360").unwrap();
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        let codec_pos = args.iter().position(|a| a == "libx264").unwrap();
        assert!(size_pos < input_pos && input_pos < codec_pos);
    }

    #[tokio::test]
    async fn test_wait_cancelled_without_receiver_is_pending() {
        let mut none = None;
        let result = tokio::time::timeout(Duration::from_millis(20), wait_cancelled(&mut none)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_wait_cancelled_resolves() {
        let (tx, rx) = watch::channel(false);
        let mut rx = Some(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(100), wait_cancelled(&mut rx))
            .await
            .expect("cancellation should resolve");
    }
}
