//! FFprobe video information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Frame rate assumed when the container reports none.
const FALLBACK_FPS: f64 = 30.0;

/// Video stream properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub fps: f64,
    /// Frame rate as FFmpeg reported it (e.g. "30000/1001")
    pub frame_rate: String,
    /// Number of frames (exact if the container stores it, else estimated)
    pub frame_count: u64,
    /// Duration in seconds
    pub duration: f64,
    /// Video codec
    pub codec: String,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

/// Probe a video file for its stream properties.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<VideoInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    check_ffprobe()?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("Could not open video {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

/// Parse `ffprobe -print_format json` output.
pub fn parse_probe_output(json: &[u8]) -> MediaResult<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(json)?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::InvalidVideo("No video stream found".to_string()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::InvalidVideo(format!(
            "Video stream has invalid dimensions {}x{}",
            width, height
        )));
    }

    // Nominal rate first; the average only when it is unusable
    let (fps, frame_rate) = [stream.r_frame_rate.as_ref(), stream.avg_frame_rate.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|r| parse_frame_rate(r).map(|fps| (fps, r.clone())))
        .unwrap_or((FALLBACK_FPS, FALLBACK_FPS.to_string()));

    let duration = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_count = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| (duration * fps).round().max(0.0) as u64);

    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_rate,
        frame_count,
        duration,
        codec: stream.codec_name.clone().unwrap_or_default(),
    })
}

/// Parse frame rate string (e.g., "30/1" or "29.97"). Zero rates are rejected.
fn parse_frame_rate(s: &str) -> Option<f64> {
    let fps = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => s.parse().ok()?,
    };

    (fps > 0.0 && fps.is_finite()).then_some(fps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
        assert!(parse_frame_rate("0/1").is_none());
    }

    #[test]
    fn test_parse_probe_output() {
        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "30000/1001",
                "avg_frame_rate": "30000/1001",
                "nb_frames": "300",
                "duration": "10.010000"
            }],
            "format": { "duration": "10.010000" }
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.frame_count, 300);
        assert_eq!(info.frame_rate, "30000/1001");
        assert_eq!(info.codec, "h264");
    }

    #[test]
    fn test_frame_count_estimated_without_nb_frames() {
        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "width": 640,
                "height": 360,
                "avg_frame_rate": "0/0",
                "r_frame_rate": "25/1"
            }],
            "format": { "duration": "4.0" }
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_rate, "25/1");
        assert_eq!(info.frame_count, 100);
    }

    #[test]
    fn test_nominal_frame_rate_preferred_over_average() {
        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "width": 640,
                "height": 360,
                "r_frame_rate": "30/1",
                "avg_frame_rate": "2997/100",
                "nb_frames": "90"
            }]
        }"#;

        let info = parse_probe_output(json).unwrap();
        assert_eq!(info.frame_rate, "30/1");
        assert!((info.fps - 30.0).abs() < f64::EPSILON);

        let json = br#"{
            "streams": [{
                "codec_type": "video",
                "width": 640,
                "height": 360,
                "r_frame_rate": "0/0",
                "avg_frame_rate": "24/1",
                "nb_frames": "48"
            }]
        }"#;
        assert_eq!(parse_probe_output(json).unwrap().frame_rate, "24/1");
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{ "streams": [{ "codec_type": "audio" }] }"#;
        assert!(matches!(parse_probe_output(json), Err(MediaError::InvalidVideo(_))));
    }
}
