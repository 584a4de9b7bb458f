#![forbid(unsafe_code)]

//! Core: single-threaded stores, cooperative timers, and the damper.
//!
//! # Role
//! `damper-core` owns the value side of press-and-hold interactions. A
//! [`Damper`] wraps any [`Writable`] store and can *hold* back the source's
//! changes while a user is mid-gesture, then *release* the latest one,
//! immediately or after a delay.
//!
//! # Primary responsibilities
//! - **Store contract**: [`Readable`] / [`Writable`] and the RAII
//!   [`Subscription`] handle.
//! - **Observable**: a concrete writable cell with ordered notification.
//! - **Timers**: a host-driven [`TimerQueue`] behind the [`Scheduler`] trait.
//! - **Damper**: the hold/release state machine.
//! - **Config**: [`DamperConfig`] with an environment loader.
//!
//! # Execution model
//! Everything runs on one thread. Store writes and notifications are
//! synchronous; the only deferred work is a timed release, which runs when
//! the host advances the [`TimerQueue`].
//!
//! ```
//! use damper_core::{Observable, TimerQueue, damper};
//! use std::time::Duration;
//!
//! let timers = TimerQueue::new();
//! let source = Observable::new(0);
//! let damped = damper(source.clone(), timers.clone(), Some(Duration::from_millis(100)));
//! let _sub = damped.subscribe(|_| {});
//!
//! damped.hold();
//! source.set(10);
//! damped.release();
//! assert_eq!(damped.get(), 0);
//!
//! timers.advance_by(Duration::from_millis(101));
//! assert_eq!(damped.get(), 10);
//! ```

pub mod config;
pub mod damper;
pub mod store;
pub mod timer;

pub use config::{DamperConfig, DamperConfigError};
pub use damper::{Damper, damper};
pub use store::{Observable, Readable, Subscription, Writable};
pub use timer::{Scheduler, TimerId, TimerQueue};
