use crate::error::SchedulerError;

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use tokio::sync::oneshot;

/// The type of future the scheduler drives once a task is admitted.
/// It must be `Send` and `'static`, and produce either a value or a
/// scheduler-level error.
pub(crate) type TaskToExecute<R> = Pin<Box<dyn Future<Output = Result<R, SchedulerError>> + Send + 'static>>;

/// Deferred constructor for a task's future. Nothing runs until admission
/// invokes it.
pub(crate) type TaskFactory<R> = Box<dyn FnOnce() -> TaskToExecute<R> + Send + 'static>;

/// Sender half of a task's completion handle.
pub(crate) type ResultSender<R> = oneshot::Sender<Result<R, SchedulerError>>;

/// Internal representation of a submitted task, owned by the pending queue
/// until it is admitted.
pub(crate) struct TaskEntry<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) factory: TaskFactory<R>,
  pub(crate) result_sender: ResultSender<R>,
  /// Diagnostics only; admission order is the queue order.
  pub(crate) submitted_at: Instant,
}

impl<R: Send + 'static> TaskEntry<R> {
  pub(crate) fn new(task_id: u64, factory: TaskFactory<R>, result_sender: ResultSender<R>) -> Self {
    Self {
      task_id,
      factory,
      result_sender,
      submitted_at: Instant::now(),
    }
  }
}

impl<R: Send + 'static> std::fmt::Debug for TaskEntry<R> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskEntry")
      .field("task_id", &self.task_id)
      .field("submitted_at", &self.submitted_at)
      .finish_non_exhaustive()
  }
}
