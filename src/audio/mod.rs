//! Audio combination and WAV handling.
//!
//! Parts produced by synthesis are joined either by ffmpeg (MP3 output) or
//! in-process for WAV parts, with rubato resampling when rates differ.

mod combiner;
pub mod ffmpeg;
pub mod resampler;
pub mod wav;

pub use combiner::{AudioCombiner, CombinerKind};
pub use ffmpeg::{FfmpegCombiner, FfmpegSettings};
pub use wav::{WavCombiner, encode_pcm16};
