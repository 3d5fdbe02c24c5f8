//! Durable job queue on SQLite: at-least-once delivery with one retry,
//! plus periodic cron jobs that enqueue through the same table so every
//! execution path is uniform and survives restarts.

pub mod db;
pub mod error;
pub mod queue;
pub mod types;
pub mod worker;

pub use error::{QueueError, Result};
pub use queue::JobQueue;
pub use types::{Job, JobStatus};
pub use worker::{JobHandler, QueueWorker};
