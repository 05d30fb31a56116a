//! Synthesis backends.
//!
//! Every engine implements [`SynthesisBackend`]; the rest of the crate only
//! sees that trait and the profile it declares.

mod backend;
mod command;
mod http;
#[cfg(feature = "kokoro")]
mod kokoro;

#[cfg(test)]
pub mod fake;

pub use backend::{AudioFormat, BackendProfile, CLOUD_MIN_INTERVAL, LOCAL_MIN_INTERVAL, SynthesisBackend, TimedAudio, require_audio};
pub use command::{CommandBackend, CommandConfig, OUTPUT_PLACEHOLDER};
pub use http::{HttpBackend, HttpConfig};
#[cfg(feature = "kokoro")]
pub use kokoro::{KokoroBackend, KokoroConfig};
