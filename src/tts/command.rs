//! Local synthesis through an external TTS program (piper, espeak-ng, ...).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use super::backend::{AudioFormat, BackendProfile, SynthesisBackend, require_audio};
use crate::error::BackendError;

/// Argument placeholder replaced by a temporary output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// How to invoke the external program.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Container the program writes.
    pub format: AudioFormat,
    pub timeout: Duration,
}

/// Runs one process per synthesis call.
///
/// Text is written to the program's stdin. Audio is read from the file named
/// by [`OUTPUT_PLACEHOLDER`] when an argument contains it, otherwise from stdout.
pub struct CommandBackend {
    config: CommandConfig,
    name: String,
}

impl CommandBackend {
    pub fn new(config: CommandConfig) -> Self {
        let name = config.program.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| "command".to_string());
        Self { config, name }
    }

    fn writes_to_file(&self) -> bool {
        self.config.args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER))
    }
}

#[async_trait]
impl SynthesisBackend for CommandBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn profile(&self) -> BackendProfile {
        BackendProfile::local(self.config.format)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BackendError> {
        let output_path = self
            .writes_to_file()
            .then(|| std::env::temp_dir().join(format!("readalong-{}.{}", Uuid::new_v4(), self.config.format.extension())));

        let args: Vec<String> = match &output_path {
            Some(path) => self.config.args.iter().map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &path.to_string_lossy())).collect(),
            None => self.config.args.clone(),
        };

        debug!("Running {} for {} chars", self.name, text.chars().count());
        let mut child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => BackendError::fatal(format!("cannot run {}: {}", self.config.program.display(), e)),
                _ => BackendError::transient(format!("failed to start {}: {}", self.name, e)),
            })?;

        // Feed stdin concurrently so a program streaming to stdout cannot block on a full pipe.
        if let Some(mut stdin) = child.stdin.take() {
            let input = text.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Failed to write synthesis input: {}", e);
                }
            });
        }

        let waited = tokio::time::timeout(self.config.timeout, child.wait_with_output()).await;
        let audio = match waited {
            Err(_) => Err(BackendError::transient(format!("{} timed out after {:?}", self.name, self.config.timeout))),
            Ok(Err(e)) => Err(BackendError::transient(format!("{} failed: {}", self.name, e))),
            Ok(Ok(output)) if !output.status.success() => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(BackendError::transient(format!("{} exited with {}: {}", self.name, output.status, stderr.trim())))
            }
            Ok(Ok(output)) => match &output_path {
                Some(path) => tokio::fs::read(path).await.map_err(|e| BackendError::transient(format!("{} produced no output file: {}", self.name, e))),
                None => Ok(output.stdout),
            },
        };

        if let Some(path) = &output_path {
            remove_output(path).await;
        }

        require_audio(audio?)
    }
}

/// Delete a scratch output file; a file the program never wrote is not an error.
async fn remove_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => debug!("No output file to remove at {}", path.display()),
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
