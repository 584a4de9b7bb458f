#![forbid(unsafe_code)]

//! Cooperative one-shot timers driven by the host clock.
//!
//! There are no threads and no OS timers. The host owns time: it calls
//! [`TimerQueue::advance_to`] (or [`advance_by`](TimerQueue::advance_by))
//! from its own event loop, and every timer whose deadline has been reached
//! runs synchronously inside that call. Tests drive the same queue with
//! virtual time.
//!
//! ```text
//! release()                 // schedule(timeout, flush)
//!   → host event loop turn
//!   → queue.advance_to(now) // due timers run here, in deadline order
//! ```
//!
//! # Invariants
//!
//! 1. Timers fire in deadline order; equal deadlines fire in scheduling order.
//! 2. A timer never fires inside the call that scheduled it, even with a zero
//!    delay.
//! 3. `now()` never moves backwards.
//! 4. A timer scheduled while an advance is running waits for the next
//!    advance, so a task that reschedules itself cannot starve the host.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::trace;

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw sequence number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Something that can run a task once after a delay.
///
/// Scheduled tasks cannot be cancelled; the returned [`TimerId`] identifies
/// the timer for diagnostics.
pub trait Scheduler {
    /// Run `task` once, no earlier than `delay` from now and never
    /// synchronously inside this call.
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId;
}

type Task = Box<dyn FnOnce()>;

struct TimerQueueInner {
    now: Duration,
    next_id: u64,
    /// Keyed by (deadline, id) so iteration order is firing order.
    entries: BTreeMap<(Duration, u64), Task>,
}

/// Host-driven timer queue on a monotonic virtual clock.
///
/// Cloning a `TimerQueue` creates another handle to the same queue.
#[derive(Clone)]
pub struct TimerQueue {
    inner: Rc<RefCell<TimerQueueInner>>,
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("TimerQueue")
            .field("now", &inner.now)
            .field("pending", &inner.entries.len())
            .finish()
    }
}

impl TimerQueue {
    /// Create an empty queue with the clock at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    /// Create an empty queue with the clock at `now`.
    #[must_use]
    pub fn starting_at(now: Duration) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TimerQueueInner {
                now,
                next_id: 0,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Current clock reading.
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.borrow().now
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    /// Deadline of the earliest waiting timer.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner
            .borrow()
            .entries
            .keys()
            .next()
            .map(|(deadline, _)| *deadline)
    }

    /// Move the clock forward by `delta`, firing every timer that comes due.
    ///
    /// Returns the number of timers fired.
    pub fn advance_by(&self, delta: Duration) -> usize {
        let target = self.now().saturating_add(delta);
        self.advance_to(target)
    }

    /// Move the clock to `target`, firing every timer whose deadline is at or
    /// before it. A `target` in the past fires only what is already due.
    ///
    /// Timers scheduled by tasks during this call are left for the next one.
    /// Returns the number of timers fired.
    pub fn advance_to(&self, target: Duration) -> usize {
        let horizon = self.inner.borrow().next_id;
        let mut fired = 0;
        loop {
            let task = {
                let mut inner = self.inner.borrow_mut();
                let due = inner
                    .entries
                    .keys()
                    .find(|&&(_, id)| id < horizon)
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match due {
                    Some((deadline, id)) => {
                        inner.now = inner.now.max(deadline);
                        trace!(timer = id, "timer fired");
                        inner.entries.remove(&(deadline, id))
                    }
                    None => {
                        inner.now = inner.now.max(target);
                        break;
                    }
                }
            };
            if let Some(task) = task {
                task();
                fired += 1;
            }
        }
        fired
    }

    /// Fire every timer already due without moving the clock.
    pub fn run_due(&self) -> usize {
        self.advance_to(self.now())
    }
}

impl Scheduler for TimerQueue {
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id;
        inner.next_id += 1;
        let deadline = inner.now.saturating_add(delay);
        inner.entries.insert((deadline, id), task);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        trace!(timer = id, delay_ms, "timer scheduled");
        TimerId(id)
    }
}
