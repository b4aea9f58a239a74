//! Durable fan-out job queue for the Herald pipeline.
//!
//! Jobs live in the `fanout_jobs` table, which gives the queue its
//! guarantees for free from SQLite's atomicity:
//!
//! - **Dedup enqueue**: `job_key` (`"{event id}:{attempt}"`) is unique;
//!   enqueueing an existing key is a no-op.
//! - **Single delivery in flight**: claiming is one `UPDATE ... WHERE id IN
//!   (SELECT ... LIMIT 1) RETURNING` statement, so two workers can never
//!   lease the same job. A lease that expires without completion simply
//!   becomes claimable again as an ordinary retry.
//! - **Bounded retry with exponential backoff**: a failed job is requeued
//!   with `attempt + 1` and a deferred `run_at`, until `max_attempts` is
//!   reached and the job parks as `EXHAUSTED` for the reconciliation sweep.
//!
//! Deadline columns are unix milliseconds passed in by the caller, so retry
//! and lease arithmetic is exact and fully controllable from tests.
//!
//! [`WorkSignal`] is the wakeup half: producers nudge it after an enqueue,
//! consumers wait on it with a polling fallback for anything the nudge
//! missed (expired leases, deferred retries coming due).

mod signal;
mod store;

pub use signal::WorkSignal;
pub use store::{
    claim_next, complete, discard, enqueue, fail, get_job, job_key, sweep_job_key, EnqueueOutcome,
    FanoutJob, JobStatus, QueueError, RetryOutcome, DEFAULT_BACKOFF_BASE_MS, DEFAULT_LEASE_MS,
    DEFAULT_MAX_ATTEMPTS,
};
