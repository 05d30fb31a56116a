//! The contract every synthesis backend implements.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::timing::TextSegment;

/// Minimum spacing between calls for backends running on this machine.
pub const LOCAL_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum spacing between calls for remote, quota-limited backends.
pub const CLOUD_MIN_INTERVAL: Duration = Duration::from_millis(500);

/// Audio container produced by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Mp3,
    Ogg,
    Flac,
}

impl AudioFormat {
    /// File extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Properties a backend declares about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendProfile {
    pub format: AudioFormat,
    /// Remote service invoked over the network.
    pub cloud: bool,
    /// Recommended minimum delay between the starts of two calls.
    pub min_interval: Duration,
}

impl BackendProfile {
    pub fn local(format: AudioFormat) -> Self {
        Self { format, cloud: false, min_interval: LOCAL_MIN_INTERVAL }
    }

    pub fn cloud(format: AudioFormat) -> Self {
        Self { format, cloud: true, min_interval: CLOUD_MIN_INTERVAL }
    }
}

/// Audio together with the backend's own segment timestamps (relative to the audio start).
#[derive(Debug, Clone, PartialEq)]
pub struct TimedAudio {
    pub audio: Vec<u8>,
    pub segments: Vec<TextSegment>,
}

/// A text-to-speech engine the coordinator can drive.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn profile(&self) -> BackendProfile;

    /// Whether `synthesize_with_timestamps` is implemented.
    fn supports_timestamps(&self) -> bool {
        false
    }

    /// Turn one text unit into encoded audio.
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError>;

    /// Turn one text unit into audio plus native segment timestamps.
    async fn synthesize_with_timestamps(&self, _text: &str) -> Result<TimedAudio, BackendError> {
        Err(BackendError::fatal(format!("{} does not provide native timestamps", self.name())))
    }
}

/// Reject empty audio so it is retried like any other transient failure.
pub fn require_audio(audio: Vec<u8>) -> Result<Vec<u8>, BackendError> {
    if audio.is_empty() {
        return Err(BackendError::transient("backend returned empty audio"));
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendErrorKind;

    struct PlainBackend;

    #[async_trait]
    impl SynthesisBackend for PlainBackend {
        fn name(&self) -> &str {
            "plain"
        }

        fn profile(&self) -> BackendProfile {
            BackendProfile::local(AudioFormat::Wav)
        }

        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    #[tokio::test]
    async fn test_timestamps_unsupported_by_default() {
        let backend = PlainBackend;
        assert!(!backend.supports_timestamps());
        let err = backend.synthesize_with_timestamps("hi").await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Fatal);
    }

    #[test]
    fn test_profiles() {
        let cloud = BackendProfile::cloud(AudioFormat::Mp3);
        let local = BackendProfile::local(AudioFormat::Wav);
        assert!(cloud.cloud && !local.cloud);
        assert!(cloud.min_interval > local.min_interval);
        assert_eq!(cloud.format.extension(), "mp3");
    }

    #[test]
    fn test_require_audio() {
        assert_eq!(require_audio(vec![1, 2]).unwrap(), vec![1, 2]);
        assert_eq!(require_audio(Vec::new()).unwrap_err().kind, BackendErrorKind::Transient);
    }
}
