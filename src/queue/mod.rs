//! Durable reply queue: job model and the rate-limited worker.

pub mod job;
pub mod worker;

pub use job::{JobCounts, JobPayload, JobStatus, MessageKind, NewJob, QueueJob};
pub use worker::{QueueWorker, TickOutcome, spawn_worker_loop};
