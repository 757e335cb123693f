use crate::error::SchedulerError;

use tokio::sync::oneshot;
use tracing;

/// A handle to a task submitted to a [`Scheduler`](crate::Scheduler).
///
/// The handle is the task's one-shot completion channel: it yields the task's
/// value, its failure, or `SchedulerError::TaskCancelled` if the task was
/// cleared from the queue before it started. Dropping the handle does not
/// cancel the task.
#[derive(Debug)]
pub struct TaskHandle<R: Send + 'static> {
  pub(crate) task_id: u64,
  pub(crate) result_receiver: oneshot::Receiver<Result<R, SchedulerError>>,
}

impl<R: Send + 'static> TaskHandle<R> {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> u64 {
    self.task_id
  }

  /// Awaits the completion of the task and returns its result of type `R`.
  ///
  /// # Errors
  /// Returns `SchedulerError::TaskFailed` if the task returned an error.
  /// Returns `SchedulerError::TaskPanicked` if the task panicked during execution.
  /// Returns `SchedulerError::TaskCancelled` if the task was removed from the queue.
  /// Returns `SchedulerError::ResultChannelError` if the outcome was lost (e.g. the runtime dropped the task).
  pub async fn await_result(self) -> Result<R, SchedulerError> {
    match self.result_receiver.await {
      Ok(task_outcome) => task_outcome,
      Err(recv_error) => {
        tracing::warn!(task_id = %self.task_id, "Result channel receive error: {}", recv_error);
        Err(SchedulerError::ResultChannelError(format!(
          "Task (id: {}) result channel unexpectedly closed: {}",
          self.task_id, recv_error
        )))
      }
    }
  }
}
