#![forbid(unsafe_code)]

//! Press-and-hold binding between an element and a damper.
//!
//! [`bind`] wires an element's pointer press to [`Damper::hold`] and its
//! pointer release to [`Damper::release`]. While the pointer is down the
//! damped store stops following its source; letting go flushes the latest
//! source value.
//!
//! # Lifecycle
//!
//! ```text
//! bind ──▶ attached ──update──▶ (detach, swap store, attach) ──▶ attached
//!              │
//!              └──destroy / drop──▶ release() + listeners removed
//! ```
//!
//! Teardown always releases the bound damper, so a value buffered by a press
//! that never saw its release is not stranded.

use std::rc::Rc;
use std::time::Duration;

use damper_core::{Damper, Writable};
use tracing::debug;

use crate::event::{EventTarget, ListenerId, PointerEvent, PointerEventKind};

/// Parameters for [`bind`] and [`HoldBinding::update`].
pub struct BindingOptions<S: Writable> {
    /// Damper to drive. `None` binds nothing.
    pub store: Option<Damper<S>>,
    /// Release delay to install on the damper. `None` keeps whatever the
    /// binding (or the damper) already has.
    pub timeout: Option<Duration>,
}

impl<S: Writable> Default for BindingOptions<S> {
    fn default() -> Self {
        Self {
            store: None,
            timeout: None,
        }
    }
}

impl<S: Writable> BindingOptions<S> {
    /// Bind `store` with no timeout override.
    #[must_use]
    pub fn new(store: Damper<S>) -> Self {
        Self {
            store: Some(store),
            timeout: None,
        }
    }

    /// Override the damper's release delay.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Live binding returned by [`bind`]. Dropping it tears the binding down.
#[must_use = "dropping a HoldBinding detaches it immediately"]
pub struct HoldBinding<E, S>
where
    E: EventTarget,
    S: Writable + Clone + 'static,
    S::Value: PartialEq,
{
    element: E,
    store: Option<Damper<S>>,
    timeout: Option<Duration>,
    listeners: Option<(ListenerId, ListenerId)>,
}

/// Attach press/release listeners on `element` that hold and release the
/// damper in `options`.
///
/// If `options.timeout` is set it overwrites the damper's timeout. With no
/// store nothing is registered.
pub fn bind<E, S>(element: &E, options: BindingOptions<S>) -> HoldBinding<E, S>
where
    E: EventTarget + Clone,
    S: Writable + Clone + 'static,
    S::Value: PartialEq,
{
    let mut binding = HoldBinding {
        element: element.clone(),
        store: options.store,
        timeout: options.timeout,
        listeners: None,
    };
    binding.attach();
    binding
}

impl<E, S> HoldBinding<E, S>
where
    E: EventTarget,
    S: Writable + Clone + 'static,
    S::Value: PartialEq,
{
    /// Rebind to the store in `options`.
    ///
    /// The current damper is released and unbound first. A timeout in
    /// `options` replaces the binding's timeout; otherwise the previous
    /// override carries over to the new damper.
    pub fn update(&mut self, options: BindingOptions<S>) {
        if let Some(timeout) = options.timeout {
            self.timeout = Some(timeout);
        }
        self.detach();
        self.store = options.store;
        self.attach();
    }

    /// Release the bound damper and remove the listeners.
    pub fn destroy(mut self) {
        self.detach();
    }

    /// True while listeners are registered on the element.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.listeners.is_some()
    }

    /// Timeout override the binding applies on attach.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The damper currently bound, if any.
    pub fn store(&self) -> Option<&Damper<S>> {
        self.store.as_ref()
    }

    fn attach(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        if let Some(timeout) = self.timeout {
            store.set_timeout(Some(timeout));
        }

        let on_press = store.clone();
        let press = self.element.add_listener(
            PointerEventKind::Press,
            Rc::new(move |_: &PointerEvent| on_press.hold()),
        );
        let on_release = store.clone();
        let release = self.element.add_listener(
            PointerEventKind::Release,
            Rc::new(move |_: &PointerEvent| on_release.release()),
        );
        self.listeners = Some((press, release));
        debug!(timeout = ?store.timeout(), "hold binding attached");
    }

    fn detach(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        store.release();
        if let Some((press, release)) = self.listeners.take() {
            self.element.remove_listener(PointerEventKind::Press, press);
            self.element.remove_listener(PointerEventKind::Release, release);
            debug!("hold binding detached");
        }
    }
}

impl<E, S> Drop for HoldBinding<E, S>
where
    E: EventTarget,
    S: Writable + Clone + 'static,
    S::Value: PartialEq,
{
    fn drop(&mut self) {
        if self.listeners.is_some() {
            self.detach();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
