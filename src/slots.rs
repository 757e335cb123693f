use crate::config::validate_limit;
use crate::error::SchedulerError;
use crate::task::TaskEntry;

use std::collections::VecDeque;

/// Point-in-time view of a scheduler's slot accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
  /// Tasks admitted and not yet finished.
  pub running: usize,
  /// Tasks waiting in the pending queue.
  pub queued: usize,
  /// Maximum number of tasks allowed to run at once.
  pub limit: usize,
}

/// Slot accounting and the FIFO pending queue.
///
/// Every method is a single transition of the admission state machine; the
/// scheduler calls them while holding its state lock, so a decision to admit
/// and the matching counter mutation are never observed separately. Entries
/// returned by `admit_ready` already hold a slot and must be started by the
/// caller.
pub(crate) struct SlotState<R: Send + 'static> {
  limit: usize,
  running: usize,
  pending: VecDeque<TaskEntry<R>>,
}

impl<R: Send + 'static> SlotState<R> {
  pub(crate) fn new(limit: usize) -> Result<Self, SchedulerError> {
    Ok(Self {
      limit: validate_limit(limit)?,
      running: 0,
      pending: VecDeque::new(),
    })
  }

  /// Appends a submission at the tail. This is the only place FIFO order is decided.
  pub(crate) fn enqueue(&mut self, entry: TaskEntry<R>) {
    self.pending.push_back(entry);
  }

  /// Moves entries from the head of the queue into free slots.
  pub(crate) fn admit_ready(&mut self) -> Vec<TaskEntry<R>> {
    let mut admitted = Vec::new();
    while self.running < self.limit {
      match self.pending.pop_front() {
        Some(entry) => {
          self.running += 1;
          admitted.push(entry);
        }
        None => break,
      }
    }
    admitted
  }

  /// Frees the slot of a finished task and refills free slots from the queue.
  pub(crate) fn release(&mut self) -> Vec<TaskEntry<R>> {
    debug_assert!(self.running > 0, "released a slot that was never taken");
    self.running = self.running.saturating_sub(1);
    self.admit_ready()
  }

  /// Changes the limit. Raising it admits queued work immediately; lowering it
  /// below `running` only blocks further admissions.
  pub(crate) fn set_limit(&mut self, new_limit: usize) -> Result<Vec<TaskEntry<R>>, SchedulerError> {
    self.limit = validate_limit(new_limit)?;
    Ok(self.admit_ready())
  }

  /// Removes every entry that has not started yet, in queue order.
  pub(crate) fn drain_pending(&mut self) -> Vec<TaskEntry<R>> {
    self.pending.drain(..).collect()
  }

  pub(crate) fn is_idle(&self) -> bool {
    self.running == 0 && self.pending.is_empty()
  }

  pub(crate) fn status(&self) -> SchedulerStatus {
    SchedulerStatus {
      running: self.running,
      queued: self.pending.len(),
      limit: self.limit,
    }
  }
}
