use crate::config::SchedulerConfig;
use crate::error::{BoxError, SchedulerError, TaskError};
use crate::handle::TaskHandle;
use crate::notifier::{CompletionNotifier, InternalCompletionMessage, TaskCompletionInfo, TaskCompletionStatus};
use crate::slots::{SchedulerStatus, SlotState};
use crate::task::{TaskEntry, TaskFactory, TaskToExecute};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Defines what happens to queued work when the scheduler shuts down.
/// Running tasks always run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop accepting submissions but admit everything already queued.
  Drain,
  /// Stop accepting submissions and cancel everything still queued.
  DiscardQueued,
}

/// A bounded-concurrency scheduler for futures.
///
/// At most `limit` tasks run at once. Further submissions wait in a FIFO queue
/// and are admitted, in submission order, as running tasks finish. Tasks are
/// spawned onto the Tokio runtime the scheduler was built with.
///
/// `Scheduler` is a cheap handle; clones share the same queue and slots.
pub struct Scheduler<R: Send + 'static> {
  shared: Arc<Shared<R>>,
}

struct Shared<R: Send + 'static> {
  name: Arc<String>,
  state: Mutex<SlotState<R>>,
  idle: Notify,
  shutdown_token: CancellationToken,
  /// Cancelled once the notification worker has been drained and joined.
  shutdown_complete: CancellationToken,
  tokio_handle: TokioHandle,
  notifier: Arc<CompletionNotifier>,
  /// Tasks still publishing cancellation events; shutdown awaits them before closing the notifier.
  pending_publishers: Mutex<Vec<JoinHandle<()>>>,
}

impl<R: Send + 'static> Clone for Scheduler<R> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<R: Send + 'static> fmt::Debug for Scheduler<R> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Scheduler")
      .field("name", &self.shared.name)
      .field("status", &self.status())
      .field("shut_down", &self.is_shut_down())
      .finish_non_exhaustive()
  }
}

impl<R: Send + 'static> Scheduler<R> {
  /// Fails with `SchedulerError::InvalidLimit` if `limit` is 0.
  pub fn new(limit: usize, tokio_handle: TokioHandle, name: &str) -> Result<Self, SchedulerError> {
    Self::from_config(SchedulerConfig::new(name, limit), tokio_handle)
  }

  pub fn from_config(config: SchedulerConfig, tokio_handle: TokioHandle) -> Result<Self, SchedulerError> {
    let state = SlotState::new(config.limit)?;
    let name = Arc::new(config.name);
    let shutdown_token = CancellationToken::new();
    let notifier = CompletionNotifier::new(name.clone(), tokio_handle.clone(), shutdown_token.clone());

    info!(scheduler = %*name, limit = config.limit, "Scheduler created.");
    Ok(Self {
      shared: Arc::new(Shared {
        name,
        state: Mutex::new(state),
        idle: Notify::new(),
        shutdown_token,
        shutdown_complete: CancellationToken::new(),
        tokio_handle,
        notifier,
        pending_publishers: Mutex::new(Vec::new()),
      }),
    })
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// Queues `task` behind every earlier submission and returns its handle
  /// without waiting. `task` is only invoked once admitted.
  ///
  /// # Errors
  /// Returns `SchedulerError::SchedulerShutDown` if `shutdown` has been called.
  pub fn submit<F, Fut, E>(&self, task: F) -> Result<TaskHandle<R>, SchedulerError>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let task_id = NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let (result_tx, result_rx) = oneshot::channel::<Result<R, SchedulerError>>();
    let factory: TaskFactory<R> = Box::new(move || -> TaskToExecute<R> {
      Box::pin(async move { task().await.map_err(|e| SchedulerError::TaskFailed(TaskError::new(e))) })
    });
    let entry = TaskEntry::new(task_id, factory, result_tx);

    let (admitted, status) = {
      let mut state = self.shared.state.lock();
      // Checked under the lock so a submission cannot slip past a discarding shutdown.
      if self.shared.shutdown_token.is_cancelled() {
        warn!(scheduler = %*self.shared.name, "Submit: Attempted to submit task to a scheduler that is shutting down.");
        return Err(SchedulerError::SchedulerShutDown);
      }
      state.enqueue(entry);
      let admitted = state.admit_ready();
      (admitted, state.status())
    };

    debug!(
      scheduler = %*self.shared.name,
      %task_id,
      running = status.running,
      queued = status.queued,
      "Task submitted."
    );
    Shared::start(&self.shared, admitted);

    Ok(TaskHandle {
      task_id,
      result_receiver: result_rx,
    })
  }

  pub fn status(&self) -> SchedulerStatus {
    self.shared.state.lock().status()
  }

  pub fn running_count(&self) -> usize {
    self.status().running
  }

  pub fn queued_count(&self) -> usize {
    self.status().queued
  }

  pub fn limit(&self) -> usize {
    self.status().limit
  }

  pub fn is_idle(&self) -> bool {
    self.shared.state.lock().is_idle()
  }

  /// Resolves once nothing is running or queued. Event driven, never polls.
  pub async fn wait_for_idle(&self) {
    loop {
      let notified = self.shared.idle.notified();
      tokio::pin!(notified);
      // Register before checking so a transition between the check and the
      // await is not missed.
      notified.as_mut().enable();
      if self.is_idle() {
        return;
      }
      notified.await;
    }
  }

  /// Cancels every task that has not started yet (`SchedulerError::TaskCancelled`)
  /// and returns how many were removed. Running tasks are unaffected.
  pub fn clear_queue(&self) -> usize {
    Shared::discard_pending(&self.shared)
  }

  /// Raising the limit admits queued tasks immediately; lowering it never
  /// interrupts running tasks.
  ///
  /// # Errors
  /// Returns `SchedulerError::InvalidLimit` if `new_limit` is 0; the old limit is kept.
  pub fn set_limit(&self, new_limit: usize) -> Result<(), SchedulerError> {
    let (old_limit, admitted) = {
      let mut state = self.shared.state.lock();
      let old_limit = state.status().limit;
      (old_limit, state.set_limit(new_limit)?)
    };
    info!(
      scheduler = %*self.shared.name,
      old_limit,
      new_limit,
      admitted = admitted.len(),
      "Concurrency limit changed."
    );
    Shared::start(&self.shared, admitted);
    Ok(())
  }

  /// Registers a handler invoked once for every task that finishes or is
  /// cancelled from the queue. A panicking handler is logged and ignored.
  pub fn add_completion_handler(&self, handler: impl Fn(TaskCompletionInfo) + Send + Sync + 'static) {
    self.shared.notifier.add_handler(handler);
  }

  pub fn is_shut_down(&self) -> bool {
    self.shared.shutdown_token.is_cancelled()
  }

  /// Stops accepting submissions and waits until the scheduler is idle and every
  /// completion event has been handed to the handlers. Every caller, not just
  /// the first, waits for that.
  pub async fn shutdown(&self, mode: ShutdownMode) {
    let already_initiating_shutdown = {
      let _state = self.shared.state.lock();
      let already = self.shared.shutdown_token.is_cancelled();
      self.shared.shutdown_token.cancel();
      already
    };

    if already_initiating_shutdown {
      info!(scheduler = %*self.shared.name, "Shutdown already in progress or completed (mode: {:?}).", mode);
    } else {
      info!(scheduler = %*self.shared.name, "Initiating scheduler shutdown (mode: {:?}).", mode);
    }

    if mode == ShutdownMode::DiscardQueued {
      let cleared = Shared::discard_pending(&self.shared);
      info!(scheduler = %*self.shared.name, cleared, "Shutdown discarded queued tasks.");
    }

    self.wait_for_idle().await;

    if already_initiating_shutdown {
      self.shared.shutdown_complete.cancelled().await;
      return;
    }

    self.await_pending_publishers().await;
    self.shared.notifier.close();
    self.shared.notifier.await_shutdown().await;
    self.shared.shutdown_complete.cancel();
    info!(scheduler = %*self.shared.name, "Scheduler shutdown completed.");
  }

  async fn await_pending_publishers(&self) {
    loop {
      let publishers = std::mem::take(&mut *self.shared.pending_publishers.lock());
      if publishers.is_empty() {
        return;
      }
      for handle in publishers {
        if let Err(join_error) = handle.await {
          error!(scheduler = %*self.shared.name, "Cancellation notifications failed: {:?}", join_error);
        }
      }
    }
  }
}

impl<R: Send + 'static> Shared<R> {
  /// Spawns tasks that already hold a slot.
  fn start(shared: &Arc<Self>, admitted: Vec<TaskEntry<R>>) {
    for entry in admitted {
      let task_id = entry.task_id;
      trace!(scheduler = %*shared.name, %task_id, "Admitting task.");
      shared.tokio_handle.spawn(
        Self::run_task(shared.clone(), entry).instrument(info_span!("scheduled_task", scheduler = %*shared.name, %task_id)),
      );
    }
  }

  async fn run_task(shared: Arc<Self>, entry: TaskEntry<R>) {
    let TaskEntry {
      task_id,
      factory,
      result_sender,
      submitted_at,
    } = entry;
    let queued_for = submitted_at.elapsed();
    debug!(%task_id, ?queued_for, "Task started.");

    let started_at = Instant::now();
    let outcome = match AssertUnwindSafe(async move { factory().await }).catch_unwind().await {
      Ok(result) => result,
      Err(_panic_payload) => {
        error!(%task_id, "Task panicked during execution.");
        Err(SchedulerError::TaskPanicked)
      }
    };
    let ran_for = started_at.elapsed();
    let status = TaskCompletionStatus::from(&outcome);

    match &outcome {
      Ok(_) => trace!(%task_id, "Task completed successfully."),
      Err(e) => debug!(%task_id, error = %e, "Task failed."),
    }
    if result_sender.send(outcome).is_err() {
      trace!(%task_id, "Result receiver for task was dropped. Outcome discarded.");
    }

    // Published before the slot is released so that idleness implies every
    // event of a finished task is already queued for observers.
    shared
      .notifier
      .publish(InternalCompletionMessage {
        task_id,
        status,
        queued_for,
        ran_for: Some(ran_for),
      })
      .await;

    shared.finish_task();
  }

  fn finish_task(self: &Arc<Self>) {
    let (admitted, now_idle) = {
      let mut state = self.state.lock();
      let admitted = state.release();
      (admitted, state.is_idle())
    };
    Self::start(self, admitted);
    if now_idle {
      trace!(scheduler = %*self.name, "Scheduler became idle.");
      self.idle.notify_waiters();
    }
  }

  /// Empties the queue and rejects every removed handle. Cancellation events are
  /// published by a task tracked in `pending_publishers`.
  fn discard_pending(shared: &Arc<Self>) -> usize {
    let (drained, now_idle) = {
      let mut state = shared.state.lock();
      let drained = state.drain_pending();
      (drained, state.is_idle())
    };
    let cleared = drained.len();
    if cleared == 0 {
      return 0;
    }

    let mut messages = Vec::with_capacity(cleared);
    for entry in drained {
      let queued_for = entry.submitted_at.elapsed();
      if entry.result_sender.send(Err(SchedulerError::TaskCancelled)).is_err() {
        trace!(scheduler = %*shared.name, task_id = %entry.task_id, "Cancelled task's handle was already dropped.");
      }
      messages.push(InternalCompletionMessage {
        task_id: entry.task_id,
        status: TaskCompletionStatus::Cancelled,
        queued_for,
        ran_for: None,
      });
    }
    info!(scheduler = %*shared.name, cleared, "Cleared pending queue.");

    if now_idle {
      shared.idle.notify_waiters();
    }

    if shared.notifier.has_handlers() {
      let notifier = shared.notifier.clone();
      let publisher = shared.tokio_handle.spawn(async move {
        for message in messages {
          notifier.publish(message).await;
        }
      });
      let mut publishers = shared.pending_publishers.lock();
      publishers.retain(|handle| !handle.is_finished());
      publishers.push(publisher);
    }
    cleared
  }
}
