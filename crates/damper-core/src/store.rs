#![forbid(unsafe_code)]

//! Store contract and a concrete single-threaded observable cell.
//!
//! # Design
//!
//! A store holds one current value and notifies observers when it changes.
//! [`Readable`] and [`Writable`] describe the contract every store in this
//! crate speaks; [`Observable<T>`] is the concrete cell that backs it with
//! shared, reference-counted storage (`Rc<RefCell<..>>`).
//!
//! `subscribe` invokes the observer synchronously with the current value
//! before returning, then again on every change. The returned
//! [`Subscription`] detaches the observer when dropped.
//!
//! # Ordering
//!
//! A write issued from inside an observer does not recurse into the
//! notification loop. The value is queued and delivered once the current
//! round finishes, so every observer sees values in the order they were
//! written.
//!
//! # Failure Modes
//!
//! - **Observer panics**: the panic propagates to the writer unmodified.
//! - **Subscription leak**: a `Subscription` stored forever keeps its
//!   observer registered forever. There is no weak fallback.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::{Rc, Weak};

pub(crate) type Observer<T> = Rc<dyn Fn(&T)>;

/// Read side of a store.
pub trait Readable {
    /// The value held by the store.
    type Value: Clone + 'static;

    /// Current value.
    fn get(&self) -> Self::Value;

    /// Register `observer`. It is called immediately with the current value,
    /// then after every change until the returned [`Subscription`] is dropped.
    fn subscribe(&self, observer: impl Fn(&Self::Value) + 'static) -> Subscription;
}

/// Write side of a store.
pub trait Writable: Readable {
    /// Replace the current value.
    fn set(&self, value: Self::Value);

    /// Functional update: derive the next value from the current one.
    fn update(&self, f: impl FnOnce(&mut Self::Value));
}

/// RAII handle for a registered observer.
///
/// Dropping the handle (or calling [`unsubscribe`](Self::unsubscribe))
/// removes the observer. Observers already snapshotted for an in-flight
/// notification round may still see that round's value.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    stop: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap a teardown closure. Store implementations outside this crate use
    /// this to hand out subscriptions.
    pub fn new(stop: impl FnOnce() + 'static) -> Self {
        Self {
            stop: Some(Box::new(stop)),
        }
    }

    /// Unsubscribe now. Equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.stop.is_some())
            .finish()
    }
}

/// Registered observers plus the re-entrancy queue for one store.
pub(crate) struct Observers<T> {
    next_id: u64,
    entries: Vec<(u64, Observer<T>)>,
    notifying: bool,
    queue: VecDeque<T>,
}

impl<T> Observers<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
            notifying: false,
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn insert(&mut self, observer: Observer<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn snapshot(&self) -> Vec<Observer<T>> {
        self.entries.iter().map(|(_, cb)| Rc::clone(cb)).collect()
    }
}

/// Deliver `value` to the observers `select` picks out of `cell`.
///
/// No borrow of `cell` is held while observers run. If a delivery is already
/// in progress for the same observer list, `value` is queued behind it.
pub(crate) fn deliver<S, T>(cell: &RefCell<S>, select: fn(&mut S) -> &mut Observers<T>, value: T) {
    {
        let mut state = cell.borrow_mut();
        let observers = select(&mut *state);
        observers.queue.push_back(value);
        if observers.notifying {
            return;
        }
        observers.notifying = true;
    }

    loop {
        let (value, batch) = {
            let mut state = cell.borrow_mut();
            let observers = select(&mut *state);
            let Some(value) = observers.queue.pop_front() else {
                observers.notifying = false;
                return;
            };
            (value, observers.snapshot())
        };
        for observer in &batch {
            observer(&value);
        }
    }
}

/// Shared interior for [`Observable<T>`].
struct ObservableInner<T> {
    value: T,
    version: u64,
    observers: Observers<T>,
}

fn observable_observers<T>(inner: &mut ObservableInner<T>) -> &mut Observers<T> {
    &mut inner.observers
}

/// A shared, version-tracked writable cell.
///
/// Cloning an `Observable` creates a new handle to the **same** inner state.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing write.
/// 2. A write equal to the current value (by `PartialEq`) is a no-op.
/// 3. Observers are notified in registration order.
/// 4. `subscriber_count` counts exactly the live subscriptions.
pub struct Observable<T> {
    inner: Rc<RefCell<ObservableInner<T>>>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("value", &inner.value)
            .field("version", &inner.version)
            .field("subscriber_count", &inner.observers.len())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Observable<T> {
    /// Create a new observable with the given initial value.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ObservableInner {
                value,
                version: 0,
                observers: Observers::new(),
            })),
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Set a new value, notifying observers if it differs from the current one.
    pub fn set(&self, value: T) {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.value == value {
                return;
            }
            inner.value = value.clone();
            inner.version += 1;
        }
        deliver(&self.inner, observable_observers, value);
    }

    /// Modify a copy of the value and write it back.
    ///
    /// The closure runs without any borrow held, so it may read this
    /// observable.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut next = self.get();
        f(&mut next);
        self.set(next);
    }

    /// Subscribe to the value. See [`Readable::subscribe`].
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        let observer: Observer<T> = Rc::new(observer);
        let (id, current) = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.observers.insert(Rc::clone(&observer));
            (id, inner.value.clone())
        };
        observer(&current);

        let weak: Weak<RefCell<ObservableInner<T>>> = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().observers.remove(id);
            }
        })
    }

    /// Current version number.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }
}

impl<T: Clone + PartialEq + 'static> Readable for Observable<T> {
    type Value = T;

    fn get(&self) -> T {
        Observable::get(self)
    }

    fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        Observable::subscribe(self, observer)
    }
}

impl<T: Clone + PartialEq + 'static> Writable for Observable<T> {
    fn set(&self, value: T) {
        Observable::set(self, value);
    }

    fn update(&self, f: impl FnOnce(&mut T)) {
        Observable::update(self, f);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
