//! Error taxonomy shared by the synthesis, timing and combination stages.
//!
//! Per-chunk failures (`BackendError`) and infrastructure gaps (`ProbeError`,
//! `CombineError`) degrade the result; only `NarrationError` reaches the caller.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Substrings that identify a rate-limit or quota rejection (matched lowercase).
const RATE_LIMIT_INDICATORS: &[&str] = &["429", "resource_exhausted", "quota", "rate limit", "too many requests"];

/// How a backend failure should be treated by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Rate limit or quota signal; always retried.
    RateLimited,
    /// Network hiccup, 5xx, empty audio, crashed subprocess.
    Transient,
    /// Bad request, missing program, unsupported operation.
    Fatal,
}

/// A failed call to a synthesis backend.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    /// Delay suggested by the backend before the next attempt.
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self { kind: BackendErrorKind::RateLimited, message: message.into(), retry_after }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self { kind: BackendErrorKind::Transient, message: message.into(), retry_after: None }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { kind: BackendErrorKind::Fatal, message: message.into(), retry_after: None }
    }

    /// Classify a free-form failure message.
    ///
    /// Rate-limit and quota indicators win over the supplied fallback kind, and
    /// any `retryDelay` hint embedded in the payload is extracted.
    pub fn classify(message: impl Into<String>, fallback: BackendErrorKind) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            let retry_after = parse_retry_delay(&message);
            return Self::rate_limited(message, retry_after);
        }
        Self { kind: fallback, message, retry_after: None }
    }

    /// Whether another attempt may succeed.
    pub fn retryable(&self) -> bool {
        self.kind != BackendErrorKind::Fatal
    }
}

/// Check whether an error payload signals rate limiting or quota exhaustion.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_INDICATORS.iter().any(|indicator| lower.contains(indicator))
}

/// Extract a suggested retry delay such as `'retryDelay': '16s'` or
/// `"retryDelay": "2.5s"` from an error payload.
pub fn parse_retry_delay(message: &str) -> Option<Duration> {
    static RETRY_DELAY: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RETRY_DELAY.get_or_init(|| Regex::new(r#"["']retryDelay["']\s*:\s*["'](\d+(?:\.\d+)?)s["']"#).ok()).as_ref()?;

    let seconds: f64 = re.captures(message)?.get(1)?.as_str().parse().ok()?;
    (seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

/// Failure to measure the duration of an audio file.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The measuring tool is not installed or cannot run.
    #[error("duration probe unavailable: {0}")]
    Unavailable(String),
    /// The tool ran but could not read this file.
    #[error("duration probe failed: {0}")]
    Failed(String),
}

/// Failure to combine audio parts into one deliverable.
#[derive(Debug, Error)]
pub enum CombineError {
    /// The concatenation tool is missing; an infrastructure gap, not a content error.
    #[error("audio combiner unavailable: {0}")]
    Unavailable(String),
    /// The combiner cannot handle the supplied container format.
    #[error("unsupported input for combiner: {0}")]
    Unsupported(String),
    #[error("audio combination failed: {0}")]
    Failed(String),
    #[error("audio combination I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level failure of a narration request.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("input text is empty")]
    EmptyInput,
    /// Not a single chunk produced audio.
    #[error("no audio could be produced ({dropped} of {attempted} synthesis units failed)")]
    NoAudio { attempted: usize, dropped: usize },
    #[error("narration cancelled before any audio was produced")]
    Cancelled,
    #[error("output storage error: {0}")]
    Storage(#[from] std::io::Error),
}
