//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::info;

use readalong::audio::{CombinerKind, FfmpegSettings};
use readalong::narrator::NarrationSettings;
use readalong::synthesis::{RetryPolicy, SynthesisSettings};
use readalong::text::ChunkingPolicy;
use readalong::timing::{TimingMode, TimingSettings};
use readalong::tts::{AudioFormat, CommandConfig, HttpConfig, OUTPUT_PLACEHOLDER};

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Provider {
    /// Provider string understood by sherpa-rs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Synthesis engine used for narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External TTS program (espeak-ng, piper, ...)
    #[default]
    Command,
    /// HTTP speech service
    Http,
    /// In-process Kokoro model (requires the `kokoro` feature)
    Kokoro,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "readalong")]
#[command(author, version, about = "Narrate long-form text with a synchronized read-along transcript", long_about = None)]
pub struct AppConfig {
    /// Enable verbose logging
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Narrate a text file (or stdin) into audio parts, a combined file and a timing document
    Narrate(Box<NarrateArgs>),
    /// Print the segment playing at a given time of a timing document
    Locate(LocateArgs),
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
pub struct NarrateArgs {
    /// UTF-8 text file to narrate, or '-' for stdin
    pub input: PathBuf,

    /// Base name for output files (defaults to the input file stem)
    #[arg(long)]
    pub name: Option<String>,

    /// Directory receiving audio parts, combined audio and timing documents
    #[arg(long, short = 'o', env = "READALONG_OUTPUT_DIR", default_value = "audio_outputs")]
    pub output_dir: PathBuf,

    /// Largest chunk sent to the backend, in characters
    #[arg(long, default_value = "3000")]
    pub chunk_size: usize,

    /// Chunking policy: 'sentence' packs whole sentences, 'word' packs words only
    #[arg(long, value_enum, default_value = "sentence")]
    pub chunking: ChunkingPolicy,

    /// Backend calls allowed in flight at once (1-20)
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub max_concurrent: usize,

    /// Retries after the first attempt of each call
    #[arg(long, default_value = "3")]
    pub max_retries: u32,

    /// First retry delay in milliseconds (doubles on every retry)
    #[arg(long, default_value = "2000")]
    pub retry_base_delay_ms: u64,

    /// Longest retry delay in milliseconds
    #[arg(long, default_value = "30000")]
    pub retry_max_delay_ms: u64,

    /// Minimum delay between backend calls in milliseconds (overrides the backend default)
    #[arg(long)]
    pub min_interval_ms: Option<u64>,

    /// Give up on outstanding synthesis after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Chunks starting with this marker are not synthesized (repeatable)
    #[arg(long = "skip-marker", default_values = ["Error", "LLM cleaning skipped"])]
    pub skip_markers: Vec<String>,

    /// Timing strategy: auto, estimation (native timestamps), measurement or hybrid
    #[arg(long, value_enum, default_value = "auto")]
    pub timing_mode: TimingMode,

    /// Longest chunk sent for native timestamps; longer chunks are measured
    #[arg(long, default_value = "3000")]
    pub estimation_max_chars: usize,

    /// Shortest duration given to a measured sentence, in seconds
    #[arg(long, default_value = "0.3")]
    pub min_sentence_secs: f64,

    /// Do not write <name>_timing.json
    #[arg(long)]
    pub no_timing_file: bool,

    /// How parts are joined: ffmpeg (MP3), wav (in-process) or none
    #[arg(long, value_enum, default_value = "ffmpeg")]
    pub combiner: CombinerKind,

    /// Path to the ffmpeg binary
    #[arg(long, env = "FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    /// Path to the ffprobe binary
    #[arg(long, env = "FFPROBE", default_value = "ffprobe")]
    pub ffprobe: PathBuf,

    /// Measure durations from WAV headers or file size only
    #[arg(long)]
    pub no_ffprobe: bool,

    /// Bitrate of the combined MP3
    #[arg(long, default_value = "128k")]
    pub audio_bitrate: String,

    /// Sample rate of the combined MP3
    #[arg(long, default_value = "22050")]
    pub audio_sample_rate: u32,

    /// Encoder for the combined MP3
    #[arg(long, default_value = "libmp3lame")]
    pub mp3_codec: String,

    /// Upper bound for one ffmpeg run, in seconds
    #[arg(long, default_value = "300")]
    pub ffmpeg_timeout_secs: u64,

    /// Synthesis backend
    #[arg(long, short = 'b', value_enum, default_value = "command")]
    pub backend: BackendKind,

    /// TTS program run by the command backend (text on stdin)
    #[arg(long = "command", env = "TTS_COMMAND", default_value = "espeak-ng")]
    pub tts_command: PathBuf,

    /// Argument for the TTS program (repeatable); '{output}' is replaced by the audio path
    #[arg(long = "command-arg", allow_hyphen_values = true, default_values = ["--stdin", "-w", "{output}"])]
    pub command_args: Vec<String>,

    /// Container written by the TTS program
    #[arg(long, value_enum, default_value = "wav")]
    pub command_format: AudioFormat,

    /// Upper bound for one TTS program run, in seconds
    #[arg(long, default_value = "120")]
    pub command_timeout_secs: u64,

    /// Speech endpoint returning raw audio
    #[arg(long, env = "TTS_ENDPOINT")]
    pub http_endpoint: Option<String>,

    /// Speech endpoint returning audio plus sentence timestamps
    #[arg(long, env = "TTS_TIMESTAMPS_ENDPOINT")]
    pub http_timestamps_endpoint: Option<String>,

    /// Bearer token for the speech service
    #[arg(long, env = "TTS_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Voice requested from the speech service
    #[arg(long, default_value = "alloy")]
    pub http_voice: String,

    /// Model requested from the speech service
    #[arg(long, default_value = "tts-1")]
    pub http_model: String,

    /// Audio format requested from the speech service
    #[arg(long, value_enum, default_value = "mp3")]
    pub http_format: AudioFormat,

    /// Request timeout for the speech service, in seconds
    #[arg(long, default_value = "120")]
    pub http_timeout_secs: u64,

    /// Directory containing Kokoro model files
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Kokoro voice name (e.g., af_bella for high-quality American female).
    /// See <https://huggingface.co/hexgrad/Kokoro-82M/blob/main/VOICES.md>
    #[arg(long, default_value = "af_bella")]
    pub tts_voice: String,

    /// Kokoro speaker ID (af_bella=2 in v1.0, bf_emma=21)
    #[arg(long, default_value = "2")]
    pub tts_speaker_id: i32,

    /// Kokoro speed multiplier
    #[arg(long, default_value = "1.0")]
    pub tts_speed: f32,

    /// Hardware acceleration provider for Kokoro (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Kokoro threads (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub threads: usize,
}

#[derive(Args, Debug, Clone)]
pub struct LocateArgs {
    /// Timing document written by 'narrate'
    pub timing_file: PathBuf,

    /// Playback position in seconds
    pub seconds: f64,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        if let Command::Narrate(args) = &mut config.command {
            args.normalize_thread_counts();
        }
        config
    }
}

impl NarrateArgs {
    /// Pick a thread count for Kokoro when none was given.
    ///
    /// With CUDA a single thread is used (the GPU handles parallelism);
    /// on CPU a third of the cores leaves room for the rest of the pipeline.
    fn normalize_thread_counts(&mut self) {
        if self.threads == 0 {
            self.threads = if self.effective_provider() == Provider::Cuda { 1 } else { (num_cpus::get() / 3).max(1) };
        }
    }

    pub fn effective_provider(&self) -> Provider {
        self.provider.unwrap_or_else(|| detect_provider().0)
    }

    /// Where the provider came from, for the startup log.
    pub fn provider_origin(&self) -> String {
        match self.provider {
            Some(_) => "requested".to_string(),
            None => format!("detected: {}", detect_provider().1),
        }
    }

    pub fn reads_stdin(&self) -> bool {
        self.input.as_os_str() == "-"
    }

    /// Base name for every output file.
    pub fn output_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if self.reads_stdin() {
            return "narration".to_string();
        }
        self.input.file_stem().map(|stem| stem.to_string_lossy().to_string()).unwrap_or_else(|| "narration".to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Deadline for the whole request.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn narration_settings(&self) -> NarrationSettings {
        NarrationSettings {
            chunk_size: self.chunk_size,
            chunking: self.chunking,
            synthesis: SynthesisSettings {
                max_concurrent: self.max_concurrent,
                retry: self.retry_policy(),
                min_interval: self.min_interval_ms.map(Duration::from_millis),
                skip_markers: self.skip_markers.clone(),
                timeout: None,
            },
            timing: TimingSettings {
                mode: self.timing_mode,
                estimation_max_chars: self.estimation_max_chars,
                min_sentence_secs: self.min_sentence_secs,
            },
            write_timing_file: !self.no_timing_file,
        }
    }

    pub fn ffmpeg_settings(&self) -> FfmpegSettings {
        FfmpegSettings {
            binary: self.ffmpeg.clone(),
            bitrate: self.audio_bitrate.clone(),
            sample_rate: self.audio_sample_rate,
            codec: self.mp3_codec.clone(),
            timeout: Duration::from_secs(self.ffmpeg_timeout_secs),
        }
    }

    /// ffprobe binary for duration measurement, unless disabled.
    pub fn ffprobe_binary(&self) -> Option<PathBuf> {
        (!self.no_ffprobe).then(|| self.ffprobe.clone())
    }

    pub fn command_config(&self) -> CommandConfig {
        CommandConfig {
            program: self.tts_command.clone(),
            args: self.command_args.clone(),
            format: self.command_format,
            timeout: Duration::from_secs(self.command_timeout_secs),
        }
    }

    pub fn http_config(&self) -> Result<HttpConfig> {
        let endpoint = self.http_endpoint.clone().context("--http-endpoint (or TTS_ENDPOINT) is required for the http backend")?;
        Ok(HttpConfig {
            endpoint,
            timestamps_endpoint: self.http_timestamps_endpoint.clone(),
            api_key: self.api_key.clone(),
            voice: self.http_voice.clone(),
            model: self.http_model.clone(),
            format: self.http_format,
            timeout: Duration::from_secs(self.http_timeout_secs),
        })
    }

    #[cfg(feature = "kokoro")]
    pub fn kokoro_config(&self) -> readalong::tts::KokoroConfig {
        readalong::tts::KokoroConfig {
            model_dir: self.model_dir.clone(),
            voice: self.tts_voice.clone(),
            speaker_id: self.tts_speaker_id,
            speed: self.tts_speed,
            provider: self.effective_provider().as_str().to_string(),
            threads: self.threads,
            debug: false,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.reads_stdin() && !self.input.is_file() {
            anyhow::bail!("Input file does not exist: {}", self.input.display());
        }

        if self.chunk_size == 0 {
            anyhow::bail!("Chunk size must be positive");
        }

        if self.estimation_max_chars == 0 {
            anyhow::bail!("Estimation max chars must be positive");
        }

        if !self.min_sentence_secs.is_finite() || self.min_sentence_secs < 0.0 {
            anyhow::bail!("Minimum sentence duration must be zero or positive");
        }

        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            anyhow::bail!("Retry base delay ({}ms) exceeds the maximum delay ({}ms)", self.retry_base_delay_ms, self.retry_max_delay_ms);
        }

        if self.name.as_deref().is_some_and(|name| name.is_empty() || name.contains(['/', '\\'])) {
            anyhow::bail!("Output name must be a plain file name");
        }

        match self.backend {
            BackendKind::Command => {
                if self.command_args.iter().filter(|arg| arg.contains(OUTPUT_PLACEHOLDER)).count() > 1 {
                    anyhow::bail!("Only one --command-arg may contain {}", OUTPUT_PLACEHOLDER);
                }
            }
            BackendKind::Http => {
                self.http_config()?;
            }
            BackendKind::Kokoro => validate_kokoro(self)?,
        }

        if self.tts_speed <= 0.0 {
            anyhow::bail!("TTS speed must be positive");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Input: {}", if self.reads_stdin() { "<stdin>".to_string() } else { self.input.display().to_string() });
        info!("  Output: {} ({})", self.output_dir.display(), self.output_name());
        info!("  Backend: {:?}", self.backend);
        match self.backend {
            BackendKind::Command => info!("  Command: {} {}", self.tts_command.display(), self.command_args.join(" ")),
            BackendKind::Http => {
                info!("  Endpoint: {}", self.http_endpoint.as_deref().unwrap_or("-"));
                if let Some(ref endpoint) = self.http_timestamps_endpoint {
                    info!("  Timestamps endpoint: {}", endpoint);
                }
                info!("  Voice: {} ({})", self.http_voice, self.http_model);
            }
            BackendKind::Kokoro => {
                info!("  Model directory: {}", self.model_dir.display());
                info!("  Voice: {} (speaker ID: {})", self.tts_voice, self.tts_speaker_id);
                info!("  Provider: {} ({}), threads: {}", self.effective_provider(), self.provider_origin(), self.threads);
            }
        }
        info!("  Chunking: {:?}, max {} chars", self.chunking, self.chunk_size);
        info!("  Concurrency: {}, retries: {} ({}ms..{}ms)", self.max_concurrent, self.max_retries, self.retry_base_delay_ms, self.retry_max_delay_ms);
        if let Some(ms) = self.min_interval_ms {
            info!("  Minimum call interval: {}ms", ms);
        }
        if let Some(secs) = self.timeout_secs {
            info!("  Timeout: {}s", secs);
        }
        info!("  Timing mode: {:?}", self.timing_mode);
        info!("  Combiner: {:?}", self.combiner);
    }
}

#[cfg(feature = "kokoro")]
fn validate_kokoro(args: &NarrateArgs) -> Result<()> {
    if !args.model_dir.exists() {
        anyhow::bail!("Model directory does not exist: {}", args.model_dir.display());
    }
    for path in &args.kokoro_config().required_files() {
        if !path.exists() {
            anyhow::bail!("Required model file not found: {}", path.display());
        }
    }
    Ok(())
}

#[cfg(not(feature = "kokoro"))]
fn validate_kokoro(_args: &NarrateArgs) -> Result<()> {
    anyhow::bail!("This build does not include the kokoro backend (rebuild with --features kokoro)")
}

/// Get the default model directory (~/.readalong/models).
fn default_model_dir() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        home_dir.join(".readalong").join("models")
    } else {
        PathBuf::from("models")
    }
}

/// Device nodes and release files that reveal an NVIDIA GPU (desktop and Jetson).
#[cfg(target_os = "linux")]
const NVIDIA_MARKERS: &[&str] = &["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvidia-uvm", "/dev/nvhost-ctrl", "/dev/nvhost-ctrl-gpu", "/etc/nv_tegra_release"];

/// Best acceleration provider for this machine and what it was inferred from.
///
/// Side-effect free: callers log the result once tracing is set up.
fn detect_provider() -> (Provider, &'static str) {
    #[cfg(target_os = "macos")]
    {
        (Provider::CoreMl, "macOS")
    }

    #[cfg(target_os = "linux")]
    {
        match NVIDIA_MARKERS.iter().copied().find(|marker| std::path::Path::new(marker).exists()) {
            Some(marker) => (Provider::Cuda, marker),
            None => (Provider::Cpu, "no GPU found"),
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        (Provider::Cpu, "no accelerator support on this platform")
    }
}

/// Parse and validate the concurrency limit (1-20).
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s.parse().map_err(|_| format!("'{}' is not a valid number", s))?;
    if (1..=20).contains(&value) {
        Ok(value)
    } else {
        Err(format!("max concurrent must be between 1 and 20, got {}", value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrate(extra: &[&str]) -> NarrateArgs {
        let args = ["readalong", "narrate", "-"].iter().chain(extra).copied();
        match AppConfig::try_parse_from(args).unwrap().command {
            Command::Narrate(args) => *args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let args = narrate(&[]);
        assert!(args.reads_stdin());
        assert_eq!(args.output_name(), "narration");
        assert_eq!(args.output_dir, PathBuf::from("audio_outputs"));
        assert_eq!(args.backend, BackendKind::Command);
        assert_eq!(args.command_args, vec!["--stdin", "-w", "{output}"]);
        assert_eq!(args.skip_markers, vec!["Error", "LLM cleaning skipped"]);

        let settings = args.narration_settings();
        assert_eq!(settings.chunk_size, 3000);
        assert_eq!(settings.chunking, ChunkingPolicy::Sentence);
        assert_eq!(settings.synthesis.max_concurrent, 4);
        assert_eq!(settings.synthesis.retry, RetryPolicy::default());
        assert_eq!(settings.synthesis.min_interval, None);
        assert_eq!(settings.timing, TimingSettings::default());
        assert!(settings.write_timing_file);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_overrides_map_to_settings() {
        let args = narrate(&[
            "--max-concurrent",
            "8",
            "--retry-base-delay-ms",
            "500",
            "--min-interval-ms",
            "250",
            "--timing-mode",
            "hybrid",
            "--chunking",
            "word",
            "--no-timing-file",
            "--skip-marker",
            "FAILED",
            "--name",
            "chapter",
        ]);
        let settings = args.narration_settings();

        assert_eq!(settings.synthesis.max_concurrent, 8);
        assert_eq!(settings.synthesis.retry.base_delay, Duration::from_millis(500));
        assert_eq!(settings.synthesis.min_interval, Some(Duration::from_millis(250)));
        assert_eq!(settings.synthesis.skip_markers, vec!["FAILED"]);
        assert_eq!(settings.timing.mode, TimingMode::Hybrid);
        assert_eq!(settings.chunking, ChunkingPolicy::Word);
        assert!(!settings.write_timing_file);
        assert_eq!(args.output_name(), "chapter");
    }

    #[test]
    fn test_requested_provider_skips_detection() {
        let mut args = narrate(&["--backend", "kokoro", "--provider", "cuda"]);
        args.normalize_thread_counts();
        assert_eq!(args.effective_provider(), Provider::Cuda);
        assert_eq!(args.provider_origin(), "requested");
        assert_eq!(args.threads, 1);

        let detected = narrate(&[]);
        assert_eq!(detected.effective_provider(), detect_provider().0);
        assert!(detected.provider_origin().starts_with("detected: "));
    }

    #[test]
    fn test_concurrency_range() {
        assert!(AppConfig::try_parse_from(["readalong", "narrate", "-", "--max-concurrent", "0"]).is_err());
        assert!(AppConfig::try_parse_from(["readalong", "narrate", "-", "--max-concurrent", "21"]).is_err());
        assert_eq!(parse_concurrency("20"), Ok(20));
    }

    #[test]
    fn test_output_name_from_input_stem() {
        let args = AppConfig::try_parse_from(["readalong", "narrate", "books/moby_dick.txt"]).unwrap();
        let Command::Narrate(args) = args.command else { panic!("expected narrate") };
        assert_eq!(args.output_name(), "moby_dick");
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let mut args = narrate(&["--backend", "http"]);
        args.http_endpoint = None;
        assert!(args.validate().is_err());

        args.http_endpoint = Some("http://localhost:8880/v1/audio/speech".to_string());
        let config = args.http_config().unwrap();
        assert_eq!(config.format, AudioFormat::Mp3);
        assert_eq!(config.voice, "alloy");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut args = narrate(&[]);
        args.retry_base_delay_ms = 60_000;
        assert!(args.validate().is_err());

        let mut args = narrate(&[]);
        args.name = Some("../escape".to_string());
        assert!(args.validate().is_err());

        let args = narrate(&["--command-arg", "{output}", "--command-arg", "{output}.wav"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_locate_arguments() {
        let config = AppConfig::try_parse_from(["readalong", "-v", "locate", "book_timing.json", "12.5"]).unwrap();
        assert!(config.verbose);
        let Command::Locate(args) = config.command else { panic!("expected locate") };
        assert_eq!(args.timing_file, PathBuf::from("book_timing.json"));
        assert_eq!(args.seconds, 12.5);
    }

    #[test]
    fn test_ffmpeg_settings() {
        let args = narrate(&["--audio-bitrate", "192k", "--no-ffprobe"]);
        let settings = args.ffmpeg_settings();
        assert_eq!(settings.bitrate, "192k");
        assert_eq!(settings.sample_rate, 22050);
        assert_eq!(settings.codec, "libmp3lame");
        assert_eq!(args.ffprobe_binary(), None);
    }
}
