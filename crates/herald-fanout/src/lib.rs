//! Fan-out for the Herald pipeline: turning one accepted event into
//! per-recipient notification records and best-effort live pushes.
//!
//! [`resolve_recipients`] is the pure half, taking the event and its
//! pre-fetched context and returning recipient ids with no I/O. [`process_job`] is the state machine a worker runs per claimed
//! job, built so that re-execution after any partial failure is safe.
//! [`spawn_workers`] runs a fixed-size pool of consumers over the shared
//! queue.

mod resolver;
mod worker;

pub use resolver::{notification_details, resolve_recipients, RecipientContext};
pub use worker::{
    process_job, spawn_workers, FanoutError, ProcessOutcome, WorkerSettings,
};
