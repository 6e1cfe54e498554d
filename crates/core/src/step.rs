//! A scheduled build step and its completion state machine.
//!
//! States move forward only:
//!
//! ```text
//! Pending ──► Running ──► Done
//!    │           │
//!    └───────────┴──────► ForcedDone
//! ```
//!
//! The worker executing a step drives `Pending → Running → Done`. A controller
//! aborting the build calls [`ExecutionStep::force_complete`] so that threads
//! blocked in a wait are released even though the step never ran. Every
//! transition and the wake-up of all current waiters happen under the same lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::error::WaitError;

/// How often an interruptible wait re-checks its interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(20);

/// Completion state of an [`ExecutionStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
  Pending,
  Running,
  Done,
  ForcedDone,
}

impl StepState {
  /// `Done` and `ForcedDone` are terminal; waits return once one is reached.
  pub fn is_terminal(self) -> bool {
    matches!(self, StepState::Done | StepState::ForcedDone)
  }
}

impl std::fmt::Display for StepState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      StepState::Pending => "pending",
      StepState::Running => "running",
      StepState::Done => "done",
      StepState::ForcedDone => "forced-done",
    };
    f.write_str(s)
  }
}

/// Cancellation handle for threads blocked in an interruptible wait.
///
/// Clones share the same flag. Once interrupted, the handle stays interrupted.
#[derive(Debug, Clone, Default)]
pub struct WaitInterrupt {
  flag: Arc<AtomicBool>,
}

impl WaitInterrupt {
  pub fn new() -> Self {
    Self::default()
  }

  /// Interrupt every wait using this handle (or a clone of it).
  pub fn interrupt(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_interrupted(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

/// One scheduled unit of build work bound to a phase.
#[derive(Debug)]
pub struct ExecutionStep<A> {
  action: A,
  phase: String,
  state: Mutex<StepState>,
  changed: Condvar,
}

impl<A: Action> ExecutionStep<A> {
  /// Create a pending step bound to the action's phase.
  pub fn new(action: A) -> Self {
    let phase = action.phase().to_string();
    Self {
      action,
      phase,
      state: Mutex::new(StepState::Pending),
      changed: Condvar::new(),
    }
  }
}

impl<A> ExecutionStep<A> {
  pub fn action(&self) -> &A {
    &self.action
  }

  pub fn phase(&self) -> &str {
    &self.phase
  }

  /// Snapshot of the current state.
  pub fn state(&self) -> StepState {
    *self.lock()
  }

  pub fn is_done(&self) -> bool {
    self.state().is_terminal()
  }

  /// Move `Pending → Running`.
  ///
  /// Returns `false` if the step had already left `Pending` (for example it
  /// was force-completed), in which case the caller must not run it.
  pub fn mark_running(&self) -> bool {
    self.transition(|state| (state == StepState::Pending).then_some(StepState::Running))
  }

  /// Move `Pending | Running → Done` and release all waiters.
  ///
  /// Returns `false` if the step was already terminal.
  pub fn mark_done(&self) -> bool {
    self.transition(|state| (!state.is_terminal()).then_some(StepState::Done))
  }

  /// Resolve the step without running it and release all waiters.
  ///
  /// Idempotent. A step that already finished normally stays `Done`.
  pub fn force_complete(&self) {
    self.transition(|state| (!state.is_terminal()).then_some(StepState::ForcedDone));
  }

  /// Block until the step is `Done` or `ForcedDone`.
  pub fn wait_until_done(&self) -> StepState {
    let guard = self
      .changed
      .wait_while(self.lock(), |state| !state.is_terminal())
      .unwrap_or_else(PoisonError::into_inner);
    *guard
  }

  /// Block until the step is terminal or `timeout` elapses.
  pub fn wait_until_done_timeout(&self, timeout: Duration) -> Result<StepState, WaitError> {
    let (guard, _) = self
      .changed
      .wait_timeout_while(self.lock(), timeout, |state| !state.is_terminal())
      .unwrap_or_else(PoisonError::into_inner);

    if guard.is_terminal() {
      Ok(*guard)
    } else {
      Err(WaitError::TimedOut(timeout))
    }
  }

  /// Block until the step is terminal, giving up once `interrupt` fires.
  pub fn wait_until_done_interruptibly(&self, interrupt: &WaitInterrupt) -> Result<StepState, WaitError> {
    self.wait_until(interrupt, None)
  }

  /// Shared wait loop for the plan-level deadline and interrupt variants.
  pub(crate) fn wait_until(&self, interrupt: &WaitInterrupt, deadline: Option<Instant>) -> Result<StepState, WaitError> {
    let mut guard = self.lock();
    loop {
      if guard.is_terminal() {
        return Ok(*guard);
      }
      if interrupt.is_interrupted() {
        return Err(WaitError::Interrupted);
      }

      let slice = match deadline {
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Err(WaitError::TimedOut(Duration::ZERO));
          }
          INTERRUPT_POLL.min(deadline - now)
        }
        None => INTERRUPT_POLL,
      };

      guard = self
        .changed
        .wait_timeout_while(guard, slice, |state| !state.is_terminal())
        .unwrap_or_else(PoisonError::into_inner)
        .0;
    }
  }

  // The state is a plain enum, so a panic while the lock was held cannot leave
  // it half-updated.
  fn lock(&self) -> MutexGuard<'_, StepState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn transition(&self, next: impl FnOnce(StepState) -> Option<StepState>) -> bool {
    let mut guard = self.lock();
    match next(*guard) {
      Some(state) => {
        *guard = state;
        self.changed.notify_all();
        true
      }
      None => false,
    }
  }
}
