use crate::error::SchedulerError;

use fibre::mpsc::{self, AsyncReceiver, AsyncSender, RecvError};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle as TokioHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

/// How a task left the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCompletionStatus {
  Success,
  Failed,
  Panicked,
  /// Removed from the queue before it started.
  Cancelled,
}

impl<R> From<&Result<R, SchedulerError>> for TaskCompletionStatus {
  fn from(result: &Result<R, SchedulerError>) -> Self {
    match result {
      Ok(_) => TaskCompletionStatus::Success,
      Err(SchedulerError::TaskCancelled) => TaskCompletionStatus::Cancelled,
      Err(SchedulerError::TaskPanicked) => TaskCompletionStatus::Panicked,
      Err(_) => TaskCompletionStatus::Failed,
    }
  }
}

/// Event passed to completion handlers registered with
/// [`Scheduler::add_completion_handler`](crate::Scheduler::add_completion_handler).
#[derive(Debug, Clone)]
pub struct TaskCompletionInfo {
  pub task_id: u64,
  pub scheduler_name: Arc<String>,
  pub status: TaskCompletionStatus,
  /// Time between submission and admission (or removal, for cancelled tasks).
  pub queued_for: Duration,
  /// Execution time; `None` if the task never started.
  pub ran_for: Option<Duration>,
  pub completion_time: SystemTime,
}

#[derive(Debug)]
pub(crate) struct InternalCompletionMessage {
  pub(crate) task_id: u64,
  pub(crate) status: TaskCompletionStatus,
  pub(crate) queued_for: Duration,
  pub(crate) ran_for: Option<Duration>,
}

type CompletionHandler = Arc<dyn Fn(TaskCompletionInfo) + Send + Sync + 'static>;

struct NotifierInternalState {
  rx_for_init: Option<AsyncReceiver<InternalCompletionMessage>>,
  worker_join_handle: Option<JoinHandle<()>>,
}

/// Fans completion events out to user handlers off the admission path.
///
/// The worker is started on the first `add_handler` call. Until then events are
/// dropped at the source, so a scheduler without observers never buffers them.
/// The worker stops once the channel is closed and drained.
pub(crate) struct CompletionNotifier {
  scheduler_name: Arc<String>,
  handlers: Arc<RwLock<Vec<CompletionHandler>>>,
  tx: AsyncSender<InternalCompletionMessage>,
  tokio_handle: TokioHandle,
  shutdown_token: CancellationToken,
  internal_state: Mutex<NotifierInternalState>,
}

impl fmt::Debug for CompletionNotifier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.handlers.try_read().map_or(0, |guard| guard.len());
    let worker_started = self.internal_state.try_lock().map_or(true, |state| state.rx_for_init.is_none());

    f.debug_struct("CompletionNotifier")
      .field("scheduler_name", &self.scheduler_name)
      .field("handler_count", &handler_count)
      .field("worker_started", &worker_started)
      .finish()
  }
}

impl CompletionNotifier {
  pub(crate) fn new(
    scheduler_name: Arc<String>,
    tokio_handle: TokioHandle,
    shutdown_token: CancellationToken,
  ) -> Arc<Self> {
    let (tx, rx) = mpsc::unbounded_async();
    Arc::new(Self {
      scheduler_name,
      handlers: Arc::new(RwLock::new(Vec::new())),
      tx,
      tokio_handle,
      shutdown_token,
      internal_state: Mutex::new(NotifierInternalState {
        rx_for_init: Some(rx),
        worker_join_handle: None,
      }),
    })
  }

  pub(crate) fn has_handlers(&self) -> bool {
    !self.handlers.read().is_empty()
  }

  pub(crate) fn add_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.ensure_worker_started();

    let mut handlers_guard = self.handlers.write();
    handlers_guard.push(Arc::new(handler));
    info!(scheduler = %*self.scheduler_name, "Added completion handler. Total handlers: {}", handlers_guard.len());
  }

  fn ensure_worker_started(&self) {
    let mut state = self.internal_state.lock();
    if let Some(rx) = state.rx_for_init.take() {
      info!(scheduler = %*self.scheduler_name, "First completion handler registered. Starting notification worker.");
      let worker = Self::run_notification_worker_loop(
        rx,
        self.scheduler_name.clone(),
        self.handlers.clone(),
        self.tokio_handle.clone(),
        self.shutdown_token.clone(),
      )
      .instrument(info_span!("notification_worker_loop", scheduler = %*self.scheduler_name));
      state.worker_join_handle = Some(self.tokio_handle.spawn(worker));
    }
  }

  /// Queues an event for the worker. No-op while no handler is registered.
  pub(crate) async fn publish(&self, message: InternalCompletionMessage) {
    if !self.has_handlers() {
      trace!(scheduler = %*self.scheduler_name, task_id = %message.task_id, "No completion handlers registered, dropping notification.");
      return;
    }
    let task_id = message.task_id;
    if self.tx.send(message).await.is_err() {
      debug!(scheduler = %*self.scheduler_name, %task_id, "Notification channel closed, completion event dropped.");
    }
  }

  async fn run_notification_worker_loop(
    queue_rx: AsyncReceiver<InternalCompletionMessage>,
    scheduler_name: Arc<String>,
    handlers: Arc<RwLock<Vec<CompletionHandler>>>,
    tokio_handle: TokioHandle,
    shutdown_token: CancellationToken,
  ) {
    info!("Notification worker started.");
    let mut shutdown_logged = false;

    loop {
      tokio::select! {
        biased;

        recv_result = queue_rx.recv() => {
          match recv_result {
            Ok(message) => Self::dispatch(&scheduler_name, &handlers, &tokio_handle, message),
            Err(RecvError::Disconnected) => {
              info!("Notification worker: queue closed and drained. Terminating.");
              break;
            }
          }
        },
        _ = shutdown_token.cancelled(), if !shutdown_logged => {
          info!("Notification worker: scheduler is shutting down, delivering remaining events until the queue closes.");
          shutdown_logged = true;
        }
      }
    }

    info!("Notification worker stopped.");
  }

  fn dispatch(
    scheduler_name: &Arc<String>,
    handlers: &RwLock<Vec<CompletionHandler>>,
    tokio_handle: &TokioHandle,
    message: InternalCompletionMessage,
  ) {
    // Snapshot so handler registration never waits on a slow dispatch.
    let handlers_snapshot: Vec<CompletionHandler> = handlers.read().clone();
    if handlers_snapshot.is_empty() {
      return;
    }

    let public_info = TaskCompletionInfo {
      task_id: message.task_id,
      scheduler_name: scheduler_name.clone(),
      status: message.status,
      queued_for: message.queued_for,
      ran_for: message.ran_for,
      completion_time: SystemTime::now(),
    };
    debug!(task_id = %public_info.task_id, status = ?public_info.status, "Dispatching notification to {} handlers.", handlers_snapshot.len());

    for handler in handlers_snapshot {
      let info = public_info.clone();
      tokio_handle.spawn(async move {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(info.clone())));
        if result.is_err() {
          error!(
            "A completion handler panicked. Scheduler: {}, Task ID: {}",
            info.scheduler_name, info.task_id
          );
        }
      });
    }
  }

  /// Closes the event channel. The worker delivers what is already queued, then exits.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }

  /// Waits for the worker to exit. Call `close` first.
  pub(crate) async fn await_shutdown(&self) {
    let handle_option = self.internal_state.lock().worker_join_handle.take();

    if let Some(handle) = handle_option {
      info!(scheduler = %*self.scheduler_name, "Waiting for notification worker to join.");
      if let Err(e) = handle.await {
        error!(scheduler = %*self.scheduler_name, "Error joining notification worker: {:?}", e);
      }
    } else {
      trace!(scheduler = %*self.scheduler_name, "Notification worker was never started or is already joined.");
    }
  }
}
