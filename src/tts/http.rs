//! Cloud synthesis over a generic JSON/HTTP speech endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{AudioFormat, BackendProfile, SynthesisBackend, TimedAudio, require_audio};
use crate::error::{BackendError, BackendErrorKind, parse_retry_delay};
use crate::timing::{SegmentType, TextSegment};

/// Endpoint and voice settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// URL that returns raw audio for a speech request.
    pub endpoint: String,
    /// URL that returns base64 audio plus segment timestamps, if the service has one.
    pub timestamps_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub voice: String,
    pub model: String,
    pub format: AudioFormat,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    input: &'a str,
    voice: &'a str,
    model: &'a str,
    response_format: &'a str,
}

#[derive(Debug, Deserialize)]
struct TimestampedResponse {
    audio_base64: String,
    #[serde(default)]
    segments: Vec<NativeSegment>,
}

#[derive(Debug, Deserialize)]
struct NativeSegment {
    text: String,
    start_time: f64,
    duration: f64,
    #[serde(default)]
    segment_type: SegmentType,
}

/// Speech service reached over HTTP.
pub struct HttpBackend {
    config: HttpConfig,
    client: Client,
}

impl HttpBackend {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: HttpConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn post(&self, url: &str, text: &str) -> Result<reqwest::Response, BackendError> {
        let body = SpeechRequest { input: text, voice: &self.config.voice, model: &self.config.model, response_format: self.config.format.extension() };

        let mut request = self.client.post(url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| BackendError::transient(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after_header(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status, &body, retry_after))
    }
}

/// Map an unsuccessful HTTP response to a backend error.
fn classify_response(status: StatusCode, body: &str, retry_after: Option<Duration>) -> BackendError {
    let message = format!("speech API error ({}): {}", status, body.trim());

    if status == StatusCode::TOO_MANY_REQUESTS {
        return BackendError::rate_limited(message, retry_after.or_else(|| parse_retry_delay(body)));
    }

    let fallback = if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT { BackendErrorKind::Transient } else { BackendErrorKind::Fatal };
    let mut error = BackendError::classify(message, fallback);
    if error.kind == BackendErrorKind::RateLimited && retry_after.is_some() {
        error.retry_after = retry_after;
    }
    error
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    let seconds: f64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

#[async_trait]
impl SynthesisBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    fn profile(&self) -> BackendProfile {
        BackendProfile::cloud(self.config.format)
    }

    fn supports_timestamps(&self) -> bool {
        self.config.timestamps_endpoint.is_some()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        let response = self.post(&self.config.endpoint, text).await?;
        let bytes = response.bytes().await.map_err(|e| BackendError::transient(format!("failed to read audio body: {}", e)))?;
        debug!("Received {} bytes of audio", bytes.len());
        require_audio(bytes.to_vec())
    }

    async fn synthesize_with_timestamps(&self, text: &str) -> Result<TimedAudio, BackendError> {
        let Some(url) = &self.config.timestamps_endpoint else {
            return Err(BackendError::fatal("no timestamps endpoint configured"));
        };

        let response = self.post(url, text).await?;
        let payload: TimestampedResponse = response.json().await.map_err(|e| BackendError::transient(format!("malformed timestamp response: {}", e)))?;
        let audio = STANDARD.decode(payload.audio_base64.as_bytes()).map_err(|e| BackendError::transient(format!("invalid base64 audio: {}", e)))?;

        let segments = payload
            .segments
            .into_iter()
            .enumerate()
            .map(|(i, s)| TextSegment { text: s.text, start_time: s.start_time, duration: s.duration, segment_type: s.segment_type, chunk_index: 0, sentence_index: i })
            .collect();

        Ok(TimedAudio { audio: require_audio(audio)?, segments })
    }
}
