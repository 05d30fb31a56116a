use std::path::PathBuf;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CombineError;

/// Joins ordered audio parts into one deliverable file.
///
/// Implementations must keep the input order and must not trim or pad any
/// part, so offsets computed against the parts stay valid for the result.
#[async_trait]
pub trait AudioCombiner: Send + Sync {
    fn name(&self) -> &str;

    /// Combine `parts` into `<name>_combined.<ext>` and return its path.
    async fn combine(&self, parts: &[PathBuf], name: &str) -> Result<PathBuf, CombineError>;
}

/// Which combiner the CLI builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CombinerKind {
    /// Concatenate and transcode to MP3 with ffmpeg
    #[default]
    Ffmpeg,
    /// Concatenate WAV parts in-process
    Wav,
    /// Keep only the individual parts
    None,
}
