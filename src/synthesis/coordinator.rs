//! Bounded-concurrency fan-out of synthesis calls with indexed reassembly.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::limiter::{RateLimiter, RetryExecutor, RetryPolicy};
use crate::error::BackendError;
use crate::text::TextChunk;
use crate::tts::{SynthesisBackend, require_audio};

/// Markers that upstream text steps emit in place of content when they fail.
pub const DEFAULT_SKIP_MARKERS: &[&str] = &["Error", "LLM cleaning skipped"];

/// Knobs for one coordinator.
#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    /// Backend calls allowed in flight at once.
    pub max_concurrent: usize,
    pub retry: RetryPolicy,
    /// Overrides the backend-declared minimum spacing between calls.
    pub min_interval: Option<Duration>,
    /// Chunks starting with any of these are not synthesized.
    pub skip_markers: Vec<String>,
    /// Deadline for each batch of calls; outstanding calls are cancelled when it passes.
    pub timeout: Option<Duration>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retry: RetryPolicy::default(),
            min_interval: None,
            skip_markers: DEFAULT_SKIP_MARKERS.iter().map(|m| m.to_string()).collect(),
            timeout: None,
        }
    }
}

/// What happened to each unit of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisReport {
    /// Calls made per unit (0 for skipped or cancelled-before-start units).
    pub attempts: Vec<u32>,
    /// Units that failed terminally.
    pub dropped: Vec<usize>,
    /// Units filtered out before dispatch.
    pub skipped: Vec<usize>,
    /// Units abandoned because of cancellation or timeout.
    pub cancelled: Vec<usize>,
}

impl SynthesisReport {
    pub fn succeeded(&self) -> usize {
        self.attempts.len() - self.dropped.len() - self.skipped.len() - self.cancelled.len()
    }
}

/// Ordered results of a batch: `outputs[i]` belongs to input unit `i`.
#[derive(Debug)]
pub struct Batch<T> {
    pub outputs: Vec<Option<T>>,
    pub report: SynthesisReport,
}

enum Outcome<T> {
    Done(Result<T, BackendError>, u32),
    Cancelled,
}

/// Drives a backend for one request, keeping results in input order.
pub struct Coordinator {
    backend: Arc<dyn SynthesisBackend>,
    executor: Arc<RetryExecutor>,
    skip_markers: Vec<String>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator sharing one permit pool and call clock across all of its batches.
    pub fn new(backend: Arc<dyn SynthesisBackend>, settings: SynthesisSettings, cancel: CancellationToken) -> Self {
        let profile = backend.profile();
        let min_interval = settings.min_interval.unwrap_or(profile.min_interval);
        debug!(
            backend = backend.name(),
            max_concurrent = settings.max_concurrent,
            min_interval_ms = min_interval.as_millis() as u64,
            cloud = profile.cloud,
            "Synthesis coordinator ready"
        );

        let limiter = Arc::new(RateLimiter::new(settings.max_concurrent, min_interval));
        Self {
            backend,
            executor: Arc::new(RetryExecutor::new(limiter, settings.retry)),
            skip_markers: settings.skip_markers,
            timeout: settings.timeout,
            cancel,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SynthesisBackend> {
        &self.backend
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether a chunk is empty or an upstream failure marker.
    pub fn is_placeholder(&self, text: &str) -> bool {
        let text = text.trim();
        text.is_empty() || self.skip_markers.iter().any(|marker| !marker.is_empty() && text.starts_with(marker.as_str()))
    }

    /// Synthesize every chunk, returning audio in chunk order.
    ///
    /// Placeholder chunks and chunks that fail after retries come back as `None`.
    pub async fn synthesize(&self, chunks: &[TextChunk]) -> Batch<Vec<u8>> {
        let units = chunks.iter().map(|chunk| (!self.is_placeholder(&chunk.text)).then(|| chunk.text.clone())).collect();
        let backend = self.backend.clone();

        self.run(units, move |text: String| {
            let backend = backend.clone();
            async move { backend.synthesize(&text).await.and_then(require_audio) }
        })
        .await
    }

    /// Run `operation` once per present unit, concurrently and with retries.
    ///
    /// `None` units are recorded as skipped. Each task owns its unit and its
    /// retry loop; results are placed by index as tasks complete.
    pub async fn run<U, T, F, Fut>(&self, units: Vec<Option<U>>, operation: F) -> Batch<T>
    where
        U: Clone + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let total = units.len();
        let mut outputs: Vec<Option<T>> = (0..total).map(|_| None).collect();
        let mut report = SynthesisReport { attempts: vec![0; total], ..Default::default() };

        let operation = Arc::new(operation);
        let token = self.cancel.child_token();
        let mut tasks = JoinSet::new();

        for (index, unit) in units.into_iter().enumerate() {
            let Some(unit) = unit else {
                report.skipped.push(index);
                continue;
            };

            let executor = self.executor.clone();
            let operation = operation.clone();
            let token = token.clone();
            tasks.spawn(async move {
                let label = format!("unit {}", index);
                let outcome = tokio::select! {
                    biased;
                    _ = token.cancelled() => Outcome::Cancelled,
                    attempted = executor.run(&label, || operation(unit.clone())) => Outcome::Done(attempted.result, attempted.attempts),
                };
                (index, outcome)
            });
        }

        if !report.skipped.is_empty() {
            info!("⏭️  Skipping {} placeholder unit(s)", report.skipped.len());
        }

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, Outcome::Done(Ok(value), attempts)))) => {
                        report.attempts[index] = attempts;
                        outputs[index] = Some(value);
                    }
                    Some(Ok((index, Outcome::Done(Err(e), attempts)))) => {
                        report.attempts[index] = attempts;
                        warn!(unit = index, attempts, error = %e, "Dropping unit after failed synthesis");
                    }
                    Some(Ok((index, Outcome::Cancelled))) => report.cancelled.push(index),
                    Some(Err(e)) => warn!("Synthesis task failed: {}", e),
                    None => break,
                },
                _ = &mut deadline, if !token.is_cancelled() => {
                    warn!("⏱️  Synthesis deadline reached, cancelling outstanding calls");
                    token.cancel();
                }
            }
        }

        report.cancelled.sort_unstable();
        report.dropped = (0..total)
            .filter(|i| outputs[*i].is_none() && report.skipped.binary_search(i).is_err() && report.cancelled.binary_search(i).is_err())
            .collect();

        debug!(
            total,
            succeeded = report.succeeded(),
            dropped = report.dropped.len(),
            cancelled = report.cancelled.len(),
            "Synthesis batch finished"
        );
        Batch { outputs, report }
    }
}
