#![forbid(unsafe_code)]

//! Hold/release damping of a source store.
//!
//! A [`Damper`] is a derived store that mirrors its source except while
//! *held*. During a hold, source changes are not forwarded; only the latest
//! one is buffered. [`release`](Damper::release) flushes that buffered value,
//! synchronously or after the configured timeout.
//!
//! ```text
//!             set/update (always immediate)
//!   Damper ─────────────────────────────────▶ source
//!     ▲                                         │
//!     │ emit            held?  ┌── no ── forward value
//!     └─────────────────────── ┤
//!                              └── yes ─ pending = value
//! ```
//!
//! # State machine
//!
//! | Event           | `held` | `pending`            | Emits                    |
//! |-----------------|--------|----------------------|--------------------------|
//! | source v, free  | false  | cleared              | v                        |
//! | source v, held  | true   | v (overwrites)       | nothing                  |
//! | `hold()`        | true   | unchanged            | nothing                  |
//! | `release()`     | false  | taken at flush time  | pending, now or on timer |
//! | last unsubscribe| true   | unchanged            | nothing                  |
//!
//! # Invariants
//!
//! 1. At most one source subscription exists per damper, and it exists iff
//!    the damper has at least one subscriber.
//! 2. Observers never see a value that was superseded during a hold.
//! 3. A flush reaches observers only while the damper is active.
//!
//! # Failure Modes
//!
//! - **Overlapping timed releases**: a second `release()` schedules a second
//!   timer; timers are not cancelled or deduplicated. Whichever fires first
//!   flushes whatever is pending at that moment, so a hold started between a
//!   release and its timer can be flushed early.
//! - **Re-activation after teardown**: teardown leaves the damper held, so a
//!   new subscriber sees the last emitted value until the next `release()`.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::DamperConfig;
use crate::store::{Observer, Observers, Readable, Subscription, Writable, deliver};
use crate::timer::{Scheduler, TimerId};

struct DamperState<T> {
    held: bool,
    timeout: Option<Duration>,
    pending: Option<T>,
    /// Current value of the derived store.
    value: T,
    observers: Observers<T>,
    /// The emit function is registered: set before the source subscription is
    /// opened, cleared at teardown.
    live: bool,
    source_subscription: Option<Subscription>,
    last_timer: Option<TimerId>,
}

fn damper_observers<T>(state: &mut DamperState<T>) -> &mut Observers<T> {
    &mut state.observers
}

/// A store that can hold back its source's changes.
///
/// Cloning a `Damper` creates another handle to the same damper state.
pub struct Damper<S: Writable> {
    source: S,
    scheduler: Rc<dyn Scheduler>,
    state: Rc<RefCell<DamperState<S::Value>>>,
}

/// Wrap `source` in a damper with an optional release delay.
pub fn damper<S>(
    source: S,
    scheduler: impl Scheduler + 'static,
    timeout: Option<Duration>,
) -> Damper<S>
where
    S: Writable,
    S::Value: PartialEq,
{
    Damper::with_config(source, scheduler, &DamperConfig { timeout })
}

impl<S: Writable + Clone> Clone for Damper<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            scheduler: Rc::clone(&self.scheduler),
            state: Rc::clone(&self.state),
        }
    }
}

impl<S> fmt::Debug for Damper<S>
where
    S: Writable,
    S::Value: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Damper")
            .field("value", &state.value)
            .field("held", &state.held)
            .field("pending", &state.pending)
            .field("timeout", &state.timeout)
            .field("subscriber_count", &state.observers.len())
            .finish_non_exhaustive()
    }
}

impl<S> Damper<S>
where
    S: Writable,
    S::Value: PartialEq,
{
    /// Wrap `source` with no release delay.
    pub fn new(source: S, scheduler: impl Scheduler + 'static) -> Self {
        Self::with_config(source, scheduler, &DamperConfig::default())
    }

    /// Wrap `source` using `config`.
    pub fn with_config(
        source: S,
        scheduler: impl Scheduler + 'static,
        config: &DamperConfig,
    ) -> Self {
        let value = source.get();
        Self {
            source,
            scheduler: Rc::new(scheduler),
            state: Rc::new(RefCell::new(DamperState {
                held: false,
                timeout: config.timeout,
                pending: None,
                value,
                observers: Observers::new(),
                live: false,
                source_subscription: None,
                last_timer: None,
            })),
        }
    }

    /// Current value of the damped store.
    ///
    /// An inactive, unheld damper reads through to the source without
    /// opening a subscription.
    pub fn get(&self) -> S::Value {
        {
            let state = self.state.borrow();
            if state.live || state.held {
                return state.value.clone();
            }
        }
        let current = self.source.get();
        let mut state = self.state.borrow_mut();
        state.pending = None;
        state.value = current.clone();
        current
    }

    /// Subscribe to the damped value. The first subscriber opens the source
    /// subscription; the last one to leave closes it and leaves the damper
    /// held.
    pub fn subscribe(&self, observer: impl Fn(&S::Value) + 'static) -> Subscription {
        let observer: Observer<S::Value> = Rc::new(observer);
        let (id, activate) = {
            let mut state = self.state.borrow_mut();
            let id = state.observers.insert(Rc::clone(&observer));
            (id, !state.live)
        };
        if activate {
            self.activate();
        }

        let current = self.state.borrow().value.clone();
        observer(&current);

        let state = Rc::clone(&self.state);
        Subscription::new(move || deactivate(&state, id))
    }

    fn activate(&self) {
        self.state.borrow_mut().live = true;
        let weak = Rc::downgrade(&self.state);
        let subscription = self.source.subscribe(move |value: &S::Value| {
            if let Some(state) = weak.upgrade() {
                on_source_value(&state, value);
            }
        });
        self.state.borrow_mut().source_subscription = Some(subscription);
        debug!("damper activated");
    }

    /// Write through to the source, regardless of hold state.
    pub fn set(&self, value: S::Value) {
        self.source.set(value);
    }

    /// Functional update through to the source, regardless of hold state.
    pub fn update(&self, f: impl FnOnce(&mut S::Value)) {
        self.source.update(f);
    }

    /// Stop forwarding source changes. Idempotent.
    pub fn hold(&self) {
        let mut state = self.state.borrow_mut();
        if !state.held {
            trace!("damper hold");
        }
        state.held = true;
    }

    /// Resume forwarding and flush the buffered value, now or after the
    /// timeout.
    pub fn release(&self) {
        let timeout = {
            let mut state = self.state.borrow_mut();
            state.held = false;
            state.timeout
        };

        let Some(delay) = timeout else {
            flush(&self.state);
            return;
        };

        let weak = Rc::downgrade(&self.state);
        let timer = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(state) = weak.upgrade() {
                    flush(&state);
                }
            }),
        );
        self.state.borrow_mut().last_timer = Some(timer);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(timer = timer.get(), delay_ms, "damper release scheduled");
    }

    /// Release delay applied by [`release`](Self::release).
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.state.borrow().timeout
    }

    /// Reconfigure the release delay. Takes effect on the next `release()`;
    /// already scheduled flushes keep their deadline.
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.state.borrow_mut().timeout = timeout;
    }

    #[must_use]
    pub fn is_held(&self) -> bool {
        self.state.borrow().held
    }

    /// True while a suppressed source value is waiting for a flush.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.state.borrow().pending.is_some()
    }

    /// True while the damper is subscribed to its source.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state.borrow().live
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.borrow().observers.len()
    }

    /// The wrapped source store.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Timer scheduled by the most recent timed `release()`.
    #[must_use]
    pub fn last_release_timer(&self) -> Option<TimerId> {
        self.state.borrow().last_timer
    }
}

/// Source observer: forward or buffer one source value.
fn on_source_value<T: Clone + PartialEq + 'static>(cell: &RefCell<DamperState<T>>, value: &T) {
    {
        let mut state = cell.borrow_mut();
        if !state.live {
            return;
        }
        if state.held {
            trace!("damper buffered source value");
            state.pending = Some(value.clone());
            return;
        }
        state.pending = None;
    }
    emit(cell, value.clone());
}

/// Deliver the pending value, if any, to a live damper.
fn flush<T: Clone + PartialEq + 'static>(cell: &RefCell<DamperState<T>>) {
    let value = {
        let mut state = cell.borrow_mut();
        if !state.live {
            if state.pending.is_some() {
                debug!("damper flush dropped: no subscribers");
            }
            return;
        }
        match state.pending.take() {
            Some(value) => value,
            None => return,
        }
    };
    trace!("damper flush");
    emit(cell, value);
}

/// Record `value` as the derived value and notify observers if it changed.
///
/// While activation is still opening the source subscription the value is
/// recorded silently; the new subscriber receives it right after.
fn emit<T: Clone + PartialEq + 'static>(cell: &RefCell<DamperState<T>>, value: T) {
    let notify = {
        let mut state = cell.borrow_mut();
        if state.value == value {
            return;
        }
        state.value = value.clone();
        state.source_subscription.is_some()
    };
    if notify {
        deliver(cell, damper_observers, value);
    }
}

/// Remove observer `id`; the last one out closes the source subscription.
///
/// Subscriptions own a strong reference, so the state outlives every
/// `Damper` handle while anyone is still subscribed.
fn deactivate<T>(cell: &RefCell<DamperState<T>>, id: u64) {
    let source_subscription = {
        let mut state = cell.borrow_mut();
        state.observers.remove(id);
        if !state.observers.is_empty() || !state.live {
            return;
        }
        state.live = false;
        state.held = true;
        state.source_subscription.take()
    };
    // Dropped outside the borrow: the source may run arbitrary teardown.
    drop(source_subscription);
    debug!("damper deactivated");
}

impl<S> Readable for Damper<S>
where
    S: Writable,
    S::Value: PartialEq,
{
    type Value = S::Value;

    fn get(&self) -> S::Value {
        Damper::get(self)
    }

    fn subscribe(&self, observer: impl Fn(&S::Value) + 'static) -> Subscription {
        Damper::subscribe(self, observer)
    }
}

impl<S> Writable for Damper<S>
where
    S: Writable,
    S::Value: PartialEq,
{
    fn set(&self, value: S::Value) {
        Damper::set(self, value);
    }

    fn update(&self, f: impl FnOnce(&mut S::Value)) {
        Damper::update(self, f);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Observable;
    use crate::timer::TimerQueue;
    use std::cell::Cell;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Subscribe and record every value the damper emits.
    fn watch<S>(damped: &Damper<S>) -> (Rc<RefCell<Vec<S::Value>>>, Subscription)
    where
        S: Writable,
        S::Value: PartialEq,
    {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let sub = damped.subscribe(move |v| seen_clone.borrow_mut().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn timeout_is_reflected() {
        let timers = TimerQueue::new();
        let source = Observable::new(());
        let timed = damper(source.clone(), timers.clone(), Some(ms(100)));
        assert_eq!(timed.timeout(), Some(ms(100)));
        assert_eq!(damper(source, timers, None).timeout(), None);
    }

    #[test]
    fn passes_through_while_free() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (seen, _sub) = watch(&damped);

        source.set(1);
        source.set(2);
        assert_eq!(damped.get(), 2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn hold_suppresses_and_release_flushes() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (seen, _sub) = watch(&damped);

        source.set(1);
        damped.hold();
        source.set(2);
        assert_eq!(damped.get(), 1);
        assert!(damped.has_pending());

        damped.release();
        assert_eq!(damped.get(), 2);
        assert!(!damped.has_pending());
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn release_delivers_latest_value_only() {
        let source = Observable::new(2);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (seen, _sub) = watch(&damped);

        damped.hold();
        source.set(3);
        source.set(4);
        assert_eq!(damped.get(), 2);

        damped.release();
        assert_eq!(damped.get(), 4);
        assert_eq!(*seen.borrow(), vec![2, 4]);
    }

    #[test]
    fn writes_through_damper_apply_immediately() {
        let source = Observable::new(4);
        let inner = Rc::new(Cell::new(0));
        let inner_clone = Rc::clone(&inner);
        let _raw = source.subscribe(move |v| inner_clone.set(*v));

        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (seen, _sub) = watch(&damped);
        damped.hold();

        source.set(5);
        damped.set(6);
        assert_eq!(inner.get(), 6);
        assert_eq!(damped.get(), 4);

        damped.release();
        assert_eq!(damped.get(), 6);
        assert_eq!(*seen.borrow(), vec![4, 6]);
    }

    #[test]
    fn source_write_after_damper_write_wins() {
        let source = Observable::new(6);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (_seen, _sub) = watch(&damped);
        damped.hold();

        damped.update(|v| *v += 1);
        source.set(8);
        assert_eq!(source.get(), 8);
        assert_eq!(damped.get(), 6);

        damped.release();
        assert_eq!(damped.get(), 8);
    }

    #[test]
    fn empty_hold_release_is_silent() {
        let source = Observable::new(1);
        let damped = Damper::new(source, TimerQueue::new());
        let (seen, _sub) = watch(&damped);

        damped.hold();
        damped.release();
        damped.release();
        assert_eq!(*seen.borrow(), vec![1]);
    }

    #[test]
    fn hold_is_idempotent() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (_seen, _sub) = watch(&damped);

        damped.hold();
        damped.hold();
        source.set(3);
        assert!(damped.is_held());
        damped.release();
        assert!(!damped.is_held());
        assert_eq!(damped.get(), 3);
    }

    #[test]
    fn timed_release_waits_for_timer() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = damper(source.clone(), timers.clone(), Some(ms(100)));
        let (seen, _sub) = watch(&damped);

        damped.hold();
        source.set(10);
        damped.release();
        assert_eq!(damped.get(), 0);
        assert!(damped.last_release_timer().is_some());

        timers.advance_by(ms(99));
        assert_eq!(damped.get(), 0);

        timers.advance_by(ms(2));
        assert_eq!(damped.get(), 10);
        assert_eq!(*seen.borrow(), vec![0, 10]);
    }

    #[test]
    fn change_after_timed_release_flows_through() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = damper(source.clone(), timers.clone(), Some(ms(50)));
        let (seen, _sub) = watch(&damped);

        damped.hold();
        source.set(1);
        damped.release();
        source.set(2);
        assert_eq!(damped.get(), 2);

        timers.advance_by(ms(50));
        assert_eq!(*seen.borrow(), vec![0, 2]);
    }

    #[test]
    fn overlapping_timers_both_fire() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = damper(source.clone(), timers.clone(), Some(ms(100)));
        let (seen, _sub) = watch(&damped);

        damped.hold();
        source.set(1);
        damped.release();
        timers.advance_by(ms(10));

        damped.hold();
        source.set(2);
        damped.release();
        assert_eq!(timers.pending(), 2);

        // The first timer flushes the second cycle's value early.
        timers.advance_by(ms(90));
        assert_eq!(damped.get(), 2);
        assert_eq!(timers.advance_by(ms(10)), 1);
        assert_eq!(*seen.borrow(), vec![0, 2]);
    }

    #[test]
    fn rehold_before_timer_is_flushed_by_it() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = damper(source.clone(), timers.clone(), Some(ms(20)));
        let (_seen, _sub) = watch(&damped);

        damped.hold();
        damped.release();
        damped.hold();
        source.set(5);
        timers.advance_by(ms(20));
        assert_eq!(damped.get(), 5);
        assert!(damped.is_held());
    }

    #[test]
    fn set_timeout_applies_to_next_release() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), timers.clone());
        let (_seen, _sub) = watch(&damped);

        damped.set_timeout(Some(ms(30)));
        damped.hold();
        source.set(1);
        damped.release();
        assert_eq!(damped.get(), 0);
        timers.advance_by(ms(30));
        assert_eq!(damped.get(), 1);
    }

    #[test]
    fn single_source_subscription_for_many_subscribers() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        assert_eq!(source.subscriber_count(), 0);
        assert!(!damped.is_active());

        let (_a, sub_a) = watch(&damped);
        let (_b, sub_b) = watch(&damped);
        assert_eq!(source.subscriber_count(), 1);
        assert_eq!(damped.subscriber_count(), 2);

        drop(sub_a);
        assert_eq!(source.subscriber_count(), 1);
        drop(sub_b);
        assert_eq!(source.subscriber_count(), 0);
        assert!(!damped.is_active());
    }

    #[test]
    fn fan_out_reaches_every_subscriber() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        let (a, _sub_a) = watch(&damped);
        let (b, _sub_b) = watch(&damped);

        damped.hold();
        source.set(9);
        damped.release();
        assert_eq!(*a.borrow(), vec![0, 9]);
        assert_eq!(*b.borrow(), vec![0, 9]);
    }

    #[test]
    fn teardown_forces_hold() {
        let source = Observable::new(0);
        let damped = Damper::new(source, TimerQueue::new());
        let (_seen, sub) = watch(&damped);
        assert!(!damped.is_held());
        drop(sub);
        assert!(damped.is_held());
    }

    #[test]
    fn timer_after_teardown_is_dropped() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let damped = damper(source.clone(), timers.clone(), Some(ms(10)));
        let (seen, sub) = watch(&damped);

        damped.hold();
        source.set(1);
        damped.release();
        drop(sub);

        assert_eq!(timers.advance_by(ms(10)), 1);
        assert_eq!(*seen.borrow(), vec![0]);
    }

    #[test]
    fn timer_after_damper_dropped_is_harmless() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        {
            let damped = damper(source.clone(), timers.clone(), Some(ms(10)));
            damped.hold();
            damped.release();
        }
        assert_eq!(timers.advance_by(ms(10)), 1);
    }

    #[test]
    fn subscription_keeps_damper_alive_after_handle_drop() {
        let source = Observable::new(0);
        let (seen, sub) = {
            let damped = Damper::new(source.clone(), TimerQueue::new());
            watch(&damped)
        };
        assert_eq!(source.subscriber_count(), 1);

        source.set(1);
        source.set(2);
        assert_eq!(*seen.borrow(), vec![0, 1, 2]);

        drop(sub);
        assert_eq!(source.subscriber_count(), 0);
    }

    #[test]
    fn reactivation_starts_held() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        drop(watch(&damped).1);

        source.set(3);
        let (seen, _sub) = watch(&damped);
        assert_eq!(*seen.borrow(), vec![0]);
        assert!(damped.has_pending());

        damped.release();
        assert_eq!(*seen.borrow(), vec![0, 3]);
    }

    #[test]
    fn inactive_get_reads_source() {
        let source = Observable::new(1);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        source.set(2);
        assert_eq!(damped.get(), 2);
        assert_eq!(source.subscriber_count(), 0);
        assert!(!damped.is_held());
    }

    #[test]
    fn late_first_subscriber_sees_current_value_once() {
        let source = Observable::new(1);
        let damped = Damper::new(source.clone(), TimerQueue::new());
        source.set(2);
        let (seen, _sub) = watch(&damped);
        assert_eq!(*seen.borrow(), vec![2]);
    }

    #[test]
    fn subscriber_may_write_back() {
        let source = Observable::new(0);
        let damped = Damper::new(source.clone(), TimerQueue::new());

        let writer = damped.clone();
        let _clamp = damped.subscribe(move |v| {
            if *v > 10 {
                writer.set(10);
            }
        });
        let (seen, _sub) = watch(&damped);

        source.set(42);
        assert_eq!(source.get(), 10);
        assert_eq!(*seen.borrow(), vec![0, 42, 10]);
    }

    #[test]
    fn damper_of_damper() {
        let timers = TimerQueue::new();
        let source = Observable::new(0);
        let inner = Damper::new(source.clone(), timers.clone());
        let outer = Damper::new(inner.clone(), timers);
        let (seen, _sub) = watch(&outer);

        inner.hold();
        source.set(1);
        assert_eq!(outer.get(), 0);
        outer.hold();
        inner.release();
        assert_eq!(inner.get(), 1);
        assert_eq!(outer.get(), 0);
        outer.release();
        assert_eq!(*seen.borrow(), vec![0, 1]);
    }

    #[test]
    fn debug_format() {
        let damped = Damper::new(Observable::new(5), TimerQueue::new());
        let dbg = format!("{damped:?}");
        assert!(dbg.contains("Damper"));
        assert!(dbg.contains("held"));
    }
}
