#![forbid(unsafe_code)]

//! Pointer press/release bindings for dampers.
//!
//! A press on the bound element holds the damper; the matching release lets
//! it go. This keeps a value from jittering under the user's pointer while
//! a control is being dragged, then publishes the final value once.
//!
//! ```
//! use damper_action::{BindingOptions, Element, PointerEvent, bind};
//! use damper_core::{Damper, Observable, TimerQueue};
//!
//! let source = Observable::new(0);
//! let damped = Damper::new(source.clone(), TimerQueue::new());
//! let _sub = damped.subscribe(|_| {});
//!
//! let element = Element::new();
//! let binding = bind(&element, BindingOptions::new(damped.clone()));
//!
//! element.dispatch(&PointerEvent::press());
//! source.set(1);
//! assert_eq!(damped.get(), 0);
//! element.dispatch(&PointerEvent::release());
//! assert_eq!(damped.get(), 1);
//!
//! binding.destroy();
//! ```

pub mod binding;
pub mod event;

pub use binding::{BindingOptions, HoldBinding, bind};
pub use event::{
    Element, EventTarget, Listener, ListenerId, PointerButton, PointerEvent, PointerEventKind,
};
