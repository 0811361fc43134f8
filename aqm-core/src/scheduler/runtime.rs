use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::{RepeatingTask, Scheduler, TaskHandle, MIN_PERIOD};
use crate::error::{Error, TokioRuntimeError};

/// Runs repeating tasks as tokio tasks on a runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Handle,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running in (or has entered).
    pub fn current() -> Result<Self, Error> {
        let handle = Handle::try_current().map_err(TokioRuntimeError::from)?;
        Ok(Self::new(handle))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, period: Duration, mut task: RepeatingTask) -> TaskHandle {
        let period = period.max(MIN_PERIOD);
        let handle = TaskHandle::new();
        let token = handle.token();
        debug!(?period, "Spawn repeating task");
        self.handle.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => task(),
                }
            }
            trace!("Repeating task cancelled");
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test_log::test(tokio::test(start_paused = true))]
    async fn ticks_until_cancelled() -> Result<(), Error> {
        let scheduler = TokioScheduler::current()?;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handle = scheduler.schedule_repeating(
            Duration::from_millis(10),
            Box::new(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );

        tokio::time::sleep(Duration::from_millis(55)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 5);

        handle.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::Relaxed), 5);
        Ok(())
    }

    #[test]
    fn no_runtime_is_an_error() {
        assert!(matches!(
            TokioScheduler::current(),
            Err(Error::TokioRuntimeError(TokioRuntimeError::NoRuntime(_)))
        ));
    }
}
