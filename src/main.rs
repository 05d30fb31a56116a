//! Readalong - turn long-form text into narrated audio with a read-along transcript.
//!
//! `narrate` runs the whole pipeline (chunking, concurrent synthesis, timing,
//! combination); `locate` looks up the sentence playing at a given time.

mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::LocalTime;

use config::{AppConfig, BackendKind, Command, LocateArgs, NarrateArgs};
use readalong::audio::{AudioCombiner, CombinerKind, FfmpegCombiner, WavCombiner};
use readalong::store::{LocalStore, OutputStore};
use readalong::timing::DurationMeter;
use readalong::tts::{CommandBackend, HttpBackend, SynthesisBackend};
use readalong::{Narrator, TimedAudioResult, TimingMetadata};

/// Build the synthesis backend selected on the command line.
fn build_backend(args: &NarrateArgs) -> Result<Arc<dyn SynthesisBackend>> {
    let backend: Arc<dyn SynthesisBackend> = match args.backend {
        BackendKind::Command => Arc::new(CommandBackend::new(args.command_config())),
        BackendKind::Http => Arc::new(HttpBackend::new(args.http_config()?).context("Failed to create HTTP client")?),
        #[cfg(feature = "kokoro")]
        BackendKind::Kokoro => Arc::new(readalong::tts::KokoroBackend::new(&args.kokoro_config())?),
        #[cfg(not(feature = "kokoro"))]
        BackendKind::Kokoro => anyhow::bail!("This build does not include the kokoro backend"),
    };
    info!("🗣️  Backend: {} (native timestamps: {})", backend.name(), backend.supports_timestamps());
    Ok(backend)
}

fn build_combiner(kind: CombinerKind, args: &NarrateArgs, store: Arc<dyn OutputStore>) -> Option<Arc<dyn AudioCombiner>> {
    match kind {
        CombinerKind::Ffmpeg => Some(Arc::new(FfmpegCombiner::new(args.ffmpeg_settings(), store))),
        CombinerKind::Wav => Some(Arc::new(WavCombiner::new(store))),
        CombinerKind::None => None,
    }
}

async fn read_input(args: &NarrateArgs) -> Result<String> {
    if args.reads_stdin() {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await.context("Failed to read text from stdin")?;
        return Ok(text);
    }
    tokio::fs::read_to_string(&args.input).await.with_context(|| format!("Failed to read {}", args.input.display()))
}

/// Cancel `token` on Ctrl+C or SIGTERM.
async fn wait_for_shutdown(token: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("🛑 Received Ctrl+C, cancelling outstanding synthesis...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("🛑 Received SIGTERM, cancelling outstanding synthesis...");
        }
    }

    token.cancel();
}

/// Cancel `token` once `timeout` has passed.
async fn cancel_after(token: CancellationToken, timeout: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            warn!("⏱️  Request timeout of {}s reached, cancelling outstanding synthesis", timeout.as_secs());
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

fn print_summary(result: &TimedAudioResult, output_dir: &Path) {
    println!();
    println!("Output directory: {}", output_dir.display());
    println!("Audio parts:      {}", result.audio_files.len());
    for file in &result.audio_files {
        println!("  {}", file);
    }
    match &result.combined_file {
        Some(file) => println!("Combined file:    {}", file),
        None => println!("Combined file:    -"),
    }
    match &result.timing_data {
        Some(timing) if !timing.is_empty() => {
            println!("Duration:         {:.2}s", timing.total_duration());
            println!("Timed segments:   {}", timing.segments().len());
        }
        _ => println!("Timed segments:   0"),
    }
    if let Some(file) = &result.timing_file {
        println!("Timing file:      {}", file);
    }
    if !result.dropped_chunks.is_empty() {
        println!("Dropped chunks:   {:?}", result.dropped_chunks);
    }
    if !result.incomplete_chunks.is_empty() {
        println!("Incomplete:       {:?}", result.incomplete_chunks);
    }
}

async fn narrate(args: NarrateArgs) -> Result<()> {
    if let Err(e) = args.validate() {
        error!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }
    args.log_config();

    let text = read_input(&args).await?;
    let name = args.output_name();

    let store: Arc<dyn OutputStore> =
        Arc::new(LocalStore::create(&args.output_dir).await.with_context(|| format!("Failed to create {}", args.output_dir.display()))?);
    let backend = build_backend(&args)?;
    let combiner = build_combiner(args.combiner, &args, store.clone());
    let meter = DurationMeter::standard(args.ffprobe_binary());

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));
    if let Some(timeout) = args.timeout() {
        tokio::spawn(cancel_after(cancel.clone(), timeout));
    }

    let narrator = Narrator::new(backend, store.clone(), meter, combiner, args.narration_settings(), cancel);
    match narrator.narrate(&text, &name).await {
        Ok(result) => {
            print_summary(&result, store.output_dir());
            Ok(())
        }
        Err(e) => {
            error!("❌ Narration failed: {}", e);
            Err(e.into())
        }
    }
}

async fn locate(args: &LocateArgs) -> Result<()> {
    let json = tokio::fs::read_to_string(&args.timing_file).await.with_context(|| format!("Failed to read {}", args.timing_file.display()))?;
    let timing = TimingMetadata::from_json(&json).with_context(|| format!("{} is not a timing document", args.timing_file.display()))?;

    match timing.segment_at(args.seconds) {
        Some(segment) => println!(
            "[{:.2}s - {:.2}s] chunk {}, sentence {} ({:?}): {}",
            segment.start_time,
            segment.end_time(),
            segment.chunk_index,
            segment.sentence_index,
            segment.segment_type,
            segment.text
        ),
        None => println!("No segment at {:.2}s (document covers 0.00s - {:.2}s)", args.seconds, timing.total_duration()),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_args();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| if config.verbose { EnvFilter::try_new("debug") } else { EnvFilter::try_new("info") })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(LocalTime::new(time::macros::format_description!("[hour]:[minute]:[second]")))
        .init();

    match config.command {
        Command::Narrate(args) => {
            info!("📖 Readalong v{}", env!("CARGO_PKG_VERSION"));
            narrate(*args).await
        }
        Command::Locate(args) => locate(&args).await,
    }
}
