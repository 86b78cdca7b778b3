//! Background job engine: copy/move/delete with progress reporting.
//!
//! A [`Scheduler`] accepts job requests, parks them in a bounded queue
//! and executes them on a fixed pool of workers against the filesystem
//! abstraction. State lives in the [`JobStore`]; every transition is
//! pushed through a publisher callback so the notification hub can fan
//! it out to observers.

mod scheduler;
mod store;
mod worker;

pub use scheduler::{Scheduler, SchedulerConfig, UpdatePublisher};
pub use store::JobStore;

/// Errors produced by the job engine.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("source path must not be empty")]
    EmptySourcePath,

    #[error("destination path required for this job type")]
    MissingDestPath,

    #[error("job queue full")]
    QueueFull,

    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("job not found: {0}")]
    NotFound(String),

    #[error("job not cancellable: {0}")]
    NotCancellable(String),
}
