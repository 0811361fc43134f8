//! Repeating tasks for periodic controllers.
//!
//! A [`Scheduler`] runs a task every `period` until the [`TaskHandle`] it
//! returned is cancelled. What runs is decided by the caller, how it gets
//! re-armed is decided by the scheduler: [`EventScheduler`] advances a virtual
//! clock for simulations and tests, [`TokioScheduler`] spawns onto a tokio
//! runtime.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub mod event;
pub mod runtime;

pub use event::EventScheduler;
pub use runtime::TokioScheduler;

pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

// A zero period would re-arm forever without time advancing.
pub(crate) const MIN_PERIOD: Duration = Duration::from_nanos(1);

/// Cancellable handle of a scheduled task. Clones refer to the same task.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    token: CancellationToken,
}

impl TaskHandle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

pub trait Scheduler {
    /// Invoke `task` every `period`, the first time one period from now.
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TaskHandle;
}
