//! Concurrent, rate-limited synthesis.
//!
//! The coordinator fans chunks out to a backend through a shared permit pool
//! and reassembles results in input order.

mod coordinator;
mod limiter;

pub use coordinator::{Batch, Coordinator, DEFAULT_SKIP_MARKERS, SynthesisReport, SynthesisSettings};
pub use limiter::{Attempted, RateLimiter, RetryExecutor, RetryPolicy};
