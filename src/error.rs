use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A type-erased error produced by a submitted task.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors that can occur within the `futures_gatekeeper` scheduler.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
  #[error("Invalid concurrency limit {limit}: the scheduler needs at least one slot")]
  InvalidLimit { limit: usize },

  #[error("Task failed: {0}")]
  TaskFailed(#[source] TaskError),

  #[error("Submitted task panicked")]
  TaskPanicked,

  #[error("Task was cancelled before it started")]
  TaskCancelled,

  #[error("Scheduler is shutting down or already shut down, cannot accept new tasks")]
  SchedulerShutDown,

  #[error("Task result channel error (completion sender dropped without an outcome): {0}")]
  ResultChannelError(String),
}

/// The failure a task reported through its own `Err` output.
///
/// Cloneable so completion outcomes can be inspected by observers as well as
/// the submitter. Two `TaskError`s compare equal when they render the same
/// message.
#[derive(Clone)]
pub struct TaskError {
  inner: Arc<dyn StdError + Send + Sync + 'static>,
}

impl TaskError {
  pub fn new(error: impl Into<BoxError>) -> Self {
    let boxed: BoxError = error.into();
    Self { inner: Arc::from(boxed) }
  }

  /// Returns the error the task produced.
  pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.inner
  }
}

impl fmt::Debug for TaskError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Debug::fmt(&*self.inner, f)
  }
}

impl fmt::Display for TaskError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&*self.inner, f)
  }
}

impl StdError for TaskError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.inner.source()
  }
}

impl PartialEq for TaskError {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner) || self.inner.to_string() == other.inner.to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io;

  #[test]
  fn task_error_keeps_message_and_source_chain() {
    #[derive(Debug)]
    struct Wrapped(io::Error);
    impl fmt::Display for Wrapped {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fetch failed")
      }
    }
    impl StdError for Wrapped {
      fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.0)
      }
    }

    let err = TaskError::new(Wrapped(io::Error::new(io::ErrorKind::Other, "connection reset")));
    assert_eq!(err.to_string(), "fetch failed");
    assert_eq!(err.source().map(|s| s.to_string()), Some("connection reset".to_string()));

    let outer = SchedulerError::TaskFailed(err.clone());
    assert_eq!(outer.to_string(), "Task failed: fetch failed");
    assert_eq!(outer.source().map(|s| s.to_string()), Some("fetch failed".to_string()));
  }

  #[test]
  fn task_errors_compare_by_message() {
    assert_eq!(TaskError::new("boom"), TaskError::new("boom"));
    assert_ne!(TaskError::new("boom"), TaskError::new("bang"));
  }

  #[test]
  fn invalid_limit_renders_the_offending_value() {
    let err = SchedulerError::InvalidLimit { limit: 0 };
    assert_eq!(
      err.to_string(),
      "Invalid concurrency limit 0: the scheduler needs at least one slot"
    );
  }
}
