//! Managed threads on top of the host layer.
//!
//! ## Modules
//!
//! - [`managed`]: the [`ManagedThread`] identity, its builder, and priorities
//! - [`group`]: thread groups and uncaught-exception handlers
//! - [`lifecycle`]: create/run/cleanup, interrupts, joins, stop/suspend
//! - [`adopt`]: current-thread cache, foreign-thread adoption, detach
//! - [`locals`]: inheritable per-thread values
//! - [`ops`]: operations on the current thread (sleep, wait, ...)

pub mod adopt;
pub mod group;
pub mod lifecycle;
pub mod locals;
pub mod managed;
pub mod ops;

pub use adopt::{current_thread, detach_current};
pub use group::{ThreadGroup, UncaughtExceptionHandler};
pub use locals::InheritableLocal;
pub(crate) use locals::InheritedValues;
pub use managed::{
    priority_from_native, priority_to_native, ManagedThread, ThreadBuilder, MAX_PRIORITY,
    MIN_PRIORITY, NORM_PRIORITY,
};
pub use ops::{
    checkpoint, enter_interruptable_wait, holds_lock, interrupted, leave_interruptable_wait,
    object_wait, sleep, yield_now,
};
