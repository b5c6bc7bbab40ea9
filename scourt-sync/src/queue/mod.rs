//! Sync job queue
//!
//! SQLite-backed job store with a partial unique index enforcing at most one
//! live job per dedup key, a scheduler that spreads per-case slots across the
//! progress interval, and a worker that drains claimed jobs under a portal
//! rate budget with exponential backoff.

pub mod scheduler;
pub mod store;
pub mod worker;

pub use scheduler::{hash_to_offset_minutes, run_scheduler_pass, SchedulerReport};
pub use store::*;
pub use worker::{backoff_delay_ms, run_worker_pass, JobExecutor, JobOutcome, WorkerReport};
