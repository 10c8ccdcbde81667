//! rembg HTTP client.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::png::PngEncoder;
use image::{ColorType, DynamicImage, ImageEncoder, RgbImage};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use tracing::{debug, warn};

use crate::error::{MattingError, MattingResult};
use crate::matter::Matter;

/// Configuration for the matting client.
#[derive(Debug, Clone)]
pub struct MattingConfig {
    /// Base URL of the rembg server
    pub base_url: String,
    /// Model name forwarded to the server; server default when unset
    pub model: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:7000".to_string(),
            model: None,
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

impl MattingConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("REMBG_URL")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:7000".to_string()),
            model: std::env::var("REMBG_MODEL").ok().filter(|s| !s.is_empty()),
            timeout: Duration::from_secs(
                std::env::var("REMBG_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("REMBG_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        }
    }
}

/// Client for a rembg-compatible server.
pub struct RembgClient {
    http: Client,
    config: MattingConfig,
}

impl RembgClient {
    /// Create a new matting client.
    pub fn new(config: MattingConfig) -> MattingResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(MattingError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MattingResult<Self> {
        Self::new(MattingConfig::from_env())
    }

    pub fn config(&self) -> &MattingConfig {
        &self.config
    }

    /// Check if the matting server answers.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Matting service health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Matting service health check error: {}", e);
                false
            }
        }
    }

    /// Remove the background of a PNG-encoded image, returning the server's
    /// PNG reply undecoded.
    pub async fn remove_background(&self, png: Vec<u8>) -> MattingResult<Vec<u8>> {
        let url = format!("{}/api/remove", self.config.base_url);

        debug!("Sending {} byte frame to {}", png.len(), url);

        let response = self
            .with_retry(|| async {
                let mut form = Form::new().part(
                    "file",
                    Part::bytes(png.clone())
                        .file_name("frame.png")
                        .mime_str("image/png")
                        .map_err(MattingError::Network)?,
                );
                if let Some(model) = &self.config.model {
                    form = form.text("model", model.clone());
                }

                let response = self
                    .http
                    .post(&url)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| self.classify(e))?;
                check_status(response).await
            })
            .await?;

        let body = response.bytes().await.map_err(|e| self.classify(e))?;
        if body.is_empty() {
            return Err(MattingError::InvalidResponse("Empty response body".to_string()));
        }
        Ok(body.to_vec())
    }

    fn classify(&self, e: reqwest::Error) -> MattingError {
        if e.is_timeout() {
            MattingError::Timeout(self.config.timeout.as_secs())
        } else {
            MattingError::Network(e)
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> MattingResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = MattingResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        "Matting request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(MattingError::RequestFailed("Unknown error".to_string())))
    }
}

/// Upper bound on a single retry wait.
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Exponential backoff starting at 200ms, capped at `MAX_BACKOFF`.
fn backoff_delay(attempt: u32) -> Duration {
    let millis = 200u64.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(millis).min(MAX_BACKOFF)
}

async fn check_status(response: Response) -> MattingResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_server_error() {
        Err(MattingError::ServiceUnavailable(format!("{}: {}", status, body)))
    } else {
        Err(MattingError::RequestFailed(format!(
            "Matting service returned {}: {}",
            status, body
        )))
    }
}

/// Encode an RGB frame as PNG.
pub fn encode_png(frame: &RgbImage) -> MattingResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    PngEncoder::new(&mut buf).write_image(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        ColorType::Rgb8,
    )?;
    Ok(buf.into_inner())
}

#[async_trait]
impl Matter for RembgClient {
    async fn matte(&self, frame: &RgbImage) -> MattingResult<DynamicImage> {
        let png = encode_png(frame)?;
        let reply = self.remove_background(png).await?;

        image::load_from_memory(&reply)
            .map_err(|e| MattingError::InvalidResponse(format!("Reply is not an image: {}", e)))
    }

    async fn is_ready(&self) -> bool {
        self.health_check().await
    }
}
