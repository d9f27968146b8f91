//! Dead-letter store and partitioned replay workers (§4.8).
//!
//! On terminal outbound failure the outbound gateway captures a
//! [`DeadLetter`] through [`DeadLetterStore`] (it implements
//! `jm_outbound::DeadLetterSink`). Replay is idempotent: replaying a
//! record already at `replay.status == succeeded` is a no-op, and
//! replaying a still-open one re-submits the exact captured request
//! through the same outbound gateway under the same idempotency key, so a
//! replay that lands after the original eventually succeeded is itself a
//! sent-cache hit rather than a second side effect.

pub mod replay;
pub mod store;

pub use replay::{ReplayWorkerPool, ReplayWorkerPoolConfig};
pub use store::{DeadLetterStore, ReplayError, ReplayOutcome};
