use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{RepeatingTask, Scheduler, TaskHandle, MIN_PERIOD};

enum Job {
    Once(Box<dyn FnOnce() + Send + 'static>),
    Repeating { period: Duration, task: RepeatingTask },
}

struct Entry {
    at: Duration,
    seq: u64,
    token: CancellationToken,
    job: Job,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Reversed so that the max-heap pops the earliest entry, ties in insertion order.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Inner {
    now: Duration,
    next_seq: u64,
    queue: BinaryHeap<Entry>,
}

impl Inner {
    fn push(&mut self, at: Duration, token: CancellationToken, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            at,
            seq,
            token,
            job,
        });
    }
}

/// Single-threaded discrete-event scheduler over a virtual clock that starts
/// at zero. Time only moves inside [`EventScheduler::run_until`] and friends.
///
/// Clones share the same timeline, so a task may keep a clone and book
/// further events while it runs.
#[derive(Clone, Default)]
pub struct EventScheduler {
    inner: Arc<Mutex<Inner>>,
}

impl EventScheduler {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    pub fn schedule_once<F>(&self, delay: Duration, f: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = TaskHandle::new();
        let mut inner = self.inner.lock();
        let at = inner.now + delay;
        inner.push(at, handle.token(), Job::Once(Box::new(f)));
        handle
    }

    /// Number of booked events that have not been cancelled.
    pub fn pending(&self) -> usize {
        self.inner
            .lock()
            .queue
            .iter()
            .filter(|entry| !entry.token.is_cancelled())
            .count()
    }

    /// Fire the earliest event if it is due no later than `until`.
    /// Returns `false` when nothing was due.
    fn fire_next(&self, until: Duration) -> bool {
        let entry = {
            let mut inner = self.inner.lock();
            if !inner.queue.peek().is_some_and(|entry| entry.at <= until) {
                return false;
            }
            let Some(entry) = inner.queue.pop() else {
                return false;
            };
            if !entry.token.is_cancelled() {
                inner.now = entry.at;
            }
            entry
        };
        if entry.token.is_cancelled() {
            trace!(at = ?entry.at, "Skip cancelled event");
            return true;
        }

        // The lock is released while the job runs so it can book new events.
        match entry.job {
            Job::Once(f) => f(),
            Job::Repeating { period, mut task } => {
                task();
                if !entry.token.is_cancelled() {
                    self.inner.lock().push(
                        entry.at + period,
                        entry.token,
                        Job::Repeating { period, task },
                    );
                }
            }
        }
        true
    }

    /// Fire every event due at or before `until`, then move the clock to
    /// `until`. Returns how many events were processed.
    pub fn run_until(&self, until: Duration) -> usize {
        let mut fired = 0;
        while self.fire_next(until) {
            fired += 1;
        }
        let mut inner = self.inner.lock();
        if inner.now < until {
            inner.now = until;
        }
        fired
    }

    pub fn run_for(&self, duration: Duration) -> usize {
        let until = self.now() + duration;
        self.run_until(until)
    }

    /// Cancel and forget every booked event. Tasks that hold a clone of the
    /// scheduler are released this way.
    pub fn clear(&self) -> usize {
        let entries = std::mem::take(&mut self.inner.lock().queue);
        let count = entries.len();
        for entry in &entries {
            entry.token.cancel();
        }
        trace!(count, "Clear pending events");
        count
    }
}

impl Scheduler for EventScheduler {
    fn schedule_repeating(&self, period: Duration, task: RepeatingTask) -> TaskHandle {
        let period = period.max(MIN_PERIOD);
        let handle = TaskHandle::new();
        let mut inner = self.inner.lock();
        let at = inner.now + period;
        inner.push(at, handle.token(), Job::Repeating { period, task });
        handle
    }
}
