pub mod engine;
pub mod estimation;
pub mod measurement;
pub mod model;
pub mod probe;

pub use engine::{TimedParts, TimingEngine, TimingMode, TimingSettings};
pub use model::{SegmentType, TextSegment, TimedAudioResult, TimingMetadata};
pub use probe::{DurationMeter, DurationProbe, FfprobeProbe, WavHeaderProbe};
