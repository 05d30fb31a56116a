//! Audio duration measurement.
//!
//! Probes are tried in order; when none can read a file, the duration is
//! estimated from its size.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::ProbeError;

/// Bytes per second assumed when estimating from size (22.05 kHz, 16-bit mono).
pub const ESTIMATE_BYTES_PER_SECOND: f64 = 22050.0 * 2.0;

const FFPROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can tell how long an audio file plays.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    fn name(&self) -> &str;

    /// Duration of the file in seconds.
    async fn duration(&self, path: &Path) -> Result<f64, ProbeError>;
}

/// Asks `ffprobe` for the container duration.
pub struct FfprobeProbe {
    binary: PathBuf,
    available: OnceCell<bool>,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self { binary: binary.into(), available: OnceCell::new() }
    }

    async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let ok = Command::new(&self.binary).arg("-version").output().await.is_ok_and(|output| output.status.success());
                if !ok {
                    warn!("ffprobe not available at {}, durations will be read from headers or estimated", self.binary.display());
                }
                ok
            })
            .await
    }
}

#[async_trait]
impl DurationProbe for FfprobeProbe {
    fn name(&self) -> &str {
        "ffprobe"
    }

    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        if !self.is_available().await {
            return Err(ProbeError::Unavailable(self.binary.display().to_string()));
        }

        let run = Command::new(&self.binary)
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(path)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(FFPROBE_TIMEOUT, run).await {
            Err(_) => return Err(ProbeError::Failed(format!("ffprobe timed out on {}", path.display()))),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Err(ProbeError::Unavailable(e.to_string())),
            Ok(Err(e)) => return Err(ProbeError::Failed(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ProbeError::Failed(format!("ffprobe exited with {} for {}", output.status, path.display())));
        }

        parse_seconds(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| ProbeError::Failed(format!("no duration reported for {}", path.display())))
    }
}

fn parse_seconds(text: &str) -> Option<f64> {
    let seconds: f64 = text.trim().parse().ok()?;
    (seconds.is_finite() && seconds > 0.0).then_some(seconds)
}

/// Reads the duration from a WAV header.
pub struct WavHeaderProbe;

#[async_trait]
impl DurationProbe for WavHeaderProbe {
    fn name(&self) -> &str {
        "wav-header"
    }

    async fn duration(&self, path: &Path) -> Result<f64, ProbeError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let reader = hound::WavReader::open(&path).map_err(|e| ProbeError::Failed(format!("{}: {}", path.display(), e)))?;
            let sample_rate = reader.spec().sample_rate;
            if sample_rate == 0 {
                return Err(ProbeError::Failed(format!("{}: zero sample rate", path.display())));
            }
            Ok(reader.duration() as f64 / sample_rate as f64)
        })
        .await
        .map_err(|e| ProbeError::Failed(e.to_string()))?
    }
}

/// Estimate duration from encoded size.
pub fn estimate_from_bytes(len: usize) -> f64 {
    len as f64 / ESTIMATE_BYTES_PER_SECOND
}

/// Chain of probes with a size-based fallback; never fails.
pub struct DurationMeter {
    probes: Vec<Box<dyn DurationProbe>>,
}

impl DurationMeter {
    pub fn new(probes: Vec<Box<dyn DurationProbe>>) -> Self {
        Self { probes }
    }

    /// `ffprobe` (when given) followed by the WAV header reader.
    pub fn standard(ffprobe: Option<PathBuf>) -> Self {
        let mut probes: Vec<Box<dyn DurationProbe>> = Vec::new();
        if let Some(binary) = ffprobe {
            probes.push(Box::new(FfprobeProbe::new(binary)));
        }
        probes.push(Box::new(WavHeaderProbe));
        Self::new(probes)
    }

    /// Duration of `path` in seconds; `byte_len` feeds the estimate when every probe fails.
    pub async fn measure(&self, path: &Path, byte_len: usize) -> f64 {
        for probe in &self.probes {
            match probe.duration(path).await {
                Ok(seconds) if seconds > 0.0 => return seconds,
                Ok(_) => debug!("{} reported an empty duration for {}", probe.name(), path.display()),
                Err(e) => debug!("{}: {}", probe.name(), e),
            }
        }

        let estimate = estimate_from_bytes(byte_len);
        debug!("Estimated {:.2}s for {} from {} bytes", estimate, path.display(), byte_len);
        estimate
    }
}

impl Default for DurationMeter {
    fn default() -> Self {
        Self::standard(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tts::fake::wav_bytes;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("12.5\n"), Some(12.5));
        assert_eq!(parse_seconds("N/A"), None);
        assert_eq!(parse_seconds("0"), None);
    }

    #[test]
    fn test_estimate_from_bytes() {
        assert_eq!(estimate_from_bytes(44100), 1.0);
        assert_eq!(estimate_from_bytes(0), 0.0);
    }

    #[tokio::test]
    async fn test_wav_header_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, wav_bytes(1.5, 8000)).unwrap();

        let seconds = WavHeaderProbe.duration(&path).await.unwrap();
        assert!((seconds - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_ffprobe_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, wav_bytes(0.5, 8000)).unwrap();

        let probe = FfprobeProbe::new("/nonexistent/ffprobe");
        assert!(matches!(probe.duration(&path).await, Err(ProbeError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_meter_falls_back_through_chain() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("clip.wav");
        std::fs::write(&wav, wav_bytes(2.0, 8000)).unwrap();
        let mp3 = dir.path().join("clip.mp3");
        std::fs::write(&mp3, vec![0u8; 88200]).unwrap();

        let meter = DurationMeter::standard(Some(PathBuf::from("/nonexistent/ffprobe")));
        assert!((meter.measure(&wav, 0).await - 2.0).abs() < 1e-9);
        assert!((meter.measure(&mp3, 88200).await - 2.0).abs() < 1e-9);
    }
}
