//! Readalong - narrated audio with a synchronized read-along transcript.
//!
//! Long text is split into chunks, synthesized concurrently against a
//! rate-limited backend, timed per sentence and joined into one file.

pub mod audio;
pub mod error;
pub mod narrator;
pub mod store;
pub mod synthesis;
pub mod text;
pub mod timing;
pub mod tts;

pub use error::{BackendError, CombineError, NarrationError};
pub use narrator::{NarrationSettings, Narrator};
pub use timing::{TextSegment, TimedAudioResult, TimingMetadata};
