#![forbid(unsafe_code)]

//! Pointer events and the listener registry they are dispatched through.
//!
//! [`EventTarget`] is the add/remove-listener surface a binding needs from a
//! UI element. Listeners are identified by the [`ListenerId`] returned at
//! registration, so removal does not depend on closure identity.
//!
//! [`Element`] is an in-memory target with synchronous [`dispatch`]. Hosts
//! that already own an event system implement [`EventTarget`] for their own
//! element type instead.
//!
//! [`dispatch`]: Element::dispatch

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Phase of a pointer interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerEventKind {
    /// Button went down.
    Press,
    /// Button came up.
    Release,
}

/// Which pointer button changed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerButton {
    #[default]
    Primary,
    Secondary,
    Auxiliary,
}

/// A pointer press or release on an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerEvent {
    pub kind: PointerEventKind,
    pub button: PointerButton,
}

impl PointerEvent {
    #[must_use]
    pub const fn new(kind: PointerEventKind, button: PointerButton) -> Self {
        Self { kind, button }
    }

    /// Primary-button press.
    #[must_use]
    pub const fn press() -> Self {
        Self::new(PointerEventKind::Press, PointerButton::Primary)
    }

    /// Primary-button release.
    #[must_use]
    pub const fn release() -> Self {
        Self::new(PointerEventKind::Release, PointerButton::Primary)
    }
}

/// Identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A pointer event callback.
pub type Listener = Rc<dyn Fn(&PointerEvent)>;

/// Something pointer listeners can be attached to.
pub trait EventTarget {
    /// Register `listener` for events of `kind`.
    fn add_listener(&self, kind: PointerEventKind, listener: Listener) -> ListenerId;

    /// Remove a listener previously registered for `kind`. Returns false if
    /// no such listener was registered.
    fn remove_listener(&self, kind: PointerEventKind, id: ListenerId) -> bool;
}

struct ElementInner {
    next_id: u64,
    listeners: Vec<(PointerEventKind, ListenerId, Listener)>,
}

/// In-memory event target.
///
/// Cloning an `Element` creates another handle to the same listener list.
#[derive(Clone)]
pub struct Element {
    inner: Rc<RefCell<ElementInner>>,
}

impl Default for Element {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element")
            .field("listeners", &self.inner.borrow().listeners.len())
            .finish()
    }
}

impl Element {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ElementInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    /// Deliver `event` to every listener registered for its kind, in
    /// registration order. Returns how many listeners ran.
    ///
    /// Listeners added or removed during dispatch take effect on the next
    /// dispatch.
    pub fn dispatch(&self, event: &PointerEvent) -> usize {
        let batch: Vec<Listener> = self
            .inner
            .borrow()
            .listeners
            .iter()
            .filter(|(kind, _, _)| *kind == event.kind)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();
        for listener in &batch {
            listener(event);
        }
        batch.len()
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: PointerEventKind) -> usize {
        self.inner
            .borrow()
            .listeners
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

impl EventTarget for Element {
    fn add_listener(&self, kind: PointerEventKind, listener: Listener) -> ListenerId {
        let mut inner = self.inner.borrow_mut();
        let id = ListenerId(inner.next_id);
        inner.next_id += 1;
        inner.listeners.push((kind, id, listener));
        id
    }

    fn remove_listener(&self, kind: PointerEventKind, id: ListenerId) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.listeners.len();
        inner
            .listeners
            .retain(|(k, listener_id, _)| !(*k == kind && *listener_id == id));
        inner.listeners.len() != before
    }
}
