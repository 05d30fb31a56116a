//! Concatenation and MP3 transcoding through the `ffmpeg` binary.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::combiner::AudioCombiner;
use crate::error::CombineError;
use crate::store::{OutputStore, file_name};

/// Output encoding and tool location.
#[derive(Debug, Clone)]
pub struct FfmpegSettings {
    pub binary: PathBuf,
    pub bitrate: String,
    pub sample_rate: u32,
    pub codec: String,
    /// Upper bound for one ffmpeg run.
    pub timeout: Duration,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            bitrate: "128k".to_string(),
            sample_rate: 22050,
            codec: "libmp3lame".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct FfmpegCombiner {
    settings: FfmpegSettings,
    store: Arc<dyn OutputStore>,
    available: OnceCell<bool>,
}

impl FfmpegCombiner {
    pub fn new(settings: FfmpegSettings, store: Arc<dyn OutputStore>) -> Self {
        Self { settings, store, available: OnceCell::new() }
    }

    /// Whether the ffmpeg binary runs; checked once.
    pub async fn is_available(&self) -> bool {
        *self
            .available
            .get_or_init(|| async {
                let ok = Command::new(&self.settings.binary).arg("-version").output().await.is_ok_and(|output| output.status.success());
                if !ok {
                    warn!("ffmpeg not available at {}", self.settings.binary.display());
                }
                ok
            })
            .await
    }

    fn encoding_args(&self) -> Vec<String> {
        vec![
            "-c:a".to_string(),
            self.settings.codec.clone(),
            "-b:a".to_string(),
            self.settings.bitrate.clone(),
            "-ar".to_string(),
            self.settings.sample_rate.to_string(),
        ]
    }

    async fn run(&self, args: Vec<String>, output: &Path) -> Result<(), CombineError> {
        debug!("Running {} {}", self.settings.binary.display(), args.join(" "));
        let run = Command::new(&self.settings.binary).args(&args).arg(output).kill_on_drop(true).output();

        let result = match tokio::time::timeout(self.settings.timeout, run).await {
            Err(_) => return Err(CombineError::Failed(format!("ffmpeg timed out after {}s", self.settings.timeout.as_secs()))),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => return Err(CombineError::Unavailable(e.to_string())),
            Ok(Err(e)) => return Err(CombineError::Io(e)),
            Ok(Ok(result)) => result,
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(3).collect();
            return Err(CombineError::Failed(format!(
                "ffmpeg exited with {}: {}",
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        Ok(())
    }
}

/// Quote a path for the concat demuxer list.
fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

/// Concat demuxer input listing `parts` in order.
pub fn concat_list(parts: &[PathBuf]) -> std::io::Result<String> {
    let mut list = String::new();
    for part in parts {
        let absolute = std::path::absolute(part)?;
        list.push_str(&format!("file {}\n", quote(&absolute.to_string_lossy())));
    }
    Ok(list)
}

#[async_trait]
impl AudioCombiner for FfmpegCombiner {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn combine(&self, parts: &[PathBuf], name: &str) -> Result<PathBuf, CombineError> {
        if parts.is_empty() {
            return Err(CombineError::Failed("no audio parts to combine".to_string()));
        }
        if !self.is_available().await {
            return Err(CombineError::Unavailable(format!("{} -version failed", self.settings.binary.display())));
        }

        let output = self.store.output_dir().join(format!("{}_combined.mp3", name));

        if let [single] = parts {
            let mut args = vec!["-y".to_string(), "-i".to_string(), single.to_string_lossy().to_string()];
            args.extend(self.encoding_args());
            self.run(args, &output).await?;
            info!("🔗 Transcoded {} into {}", file_name(single), file_name(&output));
            return Ok(output);
        }

        let list = self.store.temp_save(concat_list(parts)?.as_bytes(), ".txt").await?;
        let mut args = vec!["-y", "-f", "concat", "-safe", "0", "-i"].into_iter().map(String::from).collect::<Vec<_>>();
        args.push(list.to_string_lossy().to_string());
        args.extend(self.encoding_args());
        args.extend(["-write_xing".to_string(), "1".to_string()]);

        let result = self.run(args, &output).await;
        if let Err(e) = self.store.remove(&list).await {
            warn!("Failed to remove concat list {}: {}", list.display(), e);
        }
        result?;

        info!("🔗 Combined {} part(s) into {}", parts.len(), file_name(&output));
        Ok(output)
    }
}
