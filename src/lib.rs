//! A Tokio-based scheduler that bounds how many futures run at once.
//!
//! Submissions beyond the concurrency limit wait in a FIFO queue and are
//! admitted in submission order as running tasks finish. Each submission gets
//! a [`TaskHandle`] that resolves with the task's value or error.

mod config;
mod error;
mod handle;
mod notifier;
mod scheduler;
mod slots;
mod task;

pub use config::SchedulerConfig;
pub use error::{BoxError, SchedulerError, TaskError};
pub use handle::TaskHandle;
pub use notifier::{TaskCompletionInfo, TaskCompletionStatus};
pub use scheduler::{Scheduler, ShutdownMode};
pub use slots::SchedulerStatus;
