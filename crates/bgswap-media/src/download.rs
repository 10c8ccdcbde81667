//! Input acquisition over HTTP(S).
//!
//! Google Drive share links (`/file/d/<id>/view`) are rewritten to the
//! direct-download endpoint; every other URL is fetched as-is.

use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use metrics::histogram;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

use crate::error::{MediaError, MediaResult};

/// Download settings.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Whole-request timeout
    pub timeout: Duration,
    /// Largest accepted body in bytes
    pub max_bytes: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_bytes: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

impl DownloadConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout: std::env::var("DOWNLOAD_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_bytes: std::env::var("DOWNLOAD_MAX_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_bytes),
        }
    }
}

/// Rewrite a Google Drive share link into a direct-download URL.
///
/// Returns the input unchanged for any other URL.
pub fn resolve_download_url(raw: &str) -> MediaResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| MediaError::download_failed(format!("Invalid URL {}: {}", raw, e)))?;

    if url.host_str() != Some("drive.google.com") {
        return Ok(url);
    }

    let file_id = url
        .path_segments()
        .and_then(|mut segments| {
            segments.by_ref().find(|s| *s == "d")?;
            segments.next()
        })
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .or_else(|| {
            url.query_pairs()
                .find(|(k, _)| k == "id")
                .map(|(_, v)| v.into_owned())
        });

    match file_id {
        Some(id) => {
            let mut direct = Url::parse("https://drive.google.com/uc")
                .map_err(|e| MediaError::internal(e.to_string()))?;
            direct
                .query_pairs_mut()
                .append_pair("export", "download")
                .append_pair("id", &id)
                .append_pair("confirm", "t");
            Ok(direct)
        }
        None => Ok(url),
    }
}

/// HTTP downloader for job inputs.
#[derive(Clone)]
pub struct Downloader {
    http: Client,
    config: DownloadConfig,
}

impl Downloader {
    /// Create a new downloader.
    pub fn new(config: DownloadConfig) -> MediaResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MediaError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// The body is streamed to a `.part` file that is renamed on success.
    pub async fn download(&self, url: &str, dest: impl AsRef<Path>) -> MediaResult<u64> {
        let dest = dest.as_ref();
        let resolved = resolve_download_url(url)?;
        let started = Instant::now();

        debug!("Downloading {} -> {}", resolved, dest.display());

        let response = self
            .http
            .get(resolved.clone())
            .send()
            .await
            .map_err(|e| MediaError::download_failed(format!("Failed to download file from {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaError::download_failed(format!(
                "Failed to download file from {}: HTTP {}",
                url, status
            )));
        }

        if resolved.host_str() == Some("drive.google.com") && is_html(&response) {
            return Err(MediaError::download_failed(format!(
                "Google Drive returned a web page instead of the file for {} (is it shared publicly?)",
                url
            )));
        }

        if let Some(len) = response.content_length() {
            if len > self.config.max_bytes {
                return Err(MediaError::download_failed(format!(
                    "File at {} is {} bytes, limit is {}",
                    url, len, self.config.max_bytes
                )));
            }
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = dest.with_extension("part");
        let written = match self.stream_to_file(response, &part, url).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(MediaError::download_failed(format!("Empty response body from {}", url)));
        }

        tokio::fs::rename(&part, dest).await?;

        let elapsed = started.elapsed();
        histogram!("bgswap_download_duration_seconds").record(elapsed.as_secs_f64());
        info!(
            "File downloaded successfully to {} ({} bytes in {:.1}s)",
            dest.display(),
            written,
            elapsed.as_secs_f64()
        );

        Ok(written)
    }

    async fn stream_to_file(&self, response: reqwest::Response, part: &Path, url: &str) -> MediaResult<u64> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                MediaError::download_failed(format!("Connection lost while downloading {}: {}", url, e))
            })?;

            written += chunk.len() as u64;
            if written > self.config.max_bytes {
                return Err(MediaError::download_failed(format!(
                    "File at {} exceeds the {} byte limit",
                    url, self.config.max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        Ok(written)
    }
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/html"))
}
