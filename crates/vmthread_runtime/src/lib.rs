//! Managed thread runtime for the vmthread project.
//!
//! This crate maps a managed thread abstraction ([`ManagedThread`]) onto host
//! threads while keeping a richer contract than the host offers:
//!
//! - cooperative interrupts with no lost wakeups
//! - timed, interruptible joins
//! - monitor wait/notify with sub-millisecond timeouts
//! - suspend/resume and restricted asynchronous `stop`
//! - "run until the last non-daemon thread" shutdown
//!
//! ## Modules
//!
//! - [`native`]: host thread primitives (interrupt, abort, suspend, join)
//! - [`monitor`]: host monitor with pulse and timed wait
//! - [`registry`]: non-daemon accounting and shutdown wait
//! - [`thread`]: managed threads and their lifecycle controller
//!
//! # Example
//!
//! ```
//! use vmthread_runtime::{sleep, ThreadBuilder, ThreadResult};
//!
//! fn main() -> ThreadResult<()> {
//!     let worker = ThreadBuilder::new().name("worker").spawn(|| {
//!         sleep(50, 0)?;
//!         Ok(())
//!     })?;
//!     worker.join(0, 0)?;
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

// ---------------------------------------------------------------------------
// Conditional trace logging
// ---------------------------------------------------------------------------

macro_rules! thread_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "thread-debug")]
        tracing::trace!($($arg)*);
    };
}

pub mod config;
pub mod error;
pub mod monitor;
pub mod native;
pub mod registry;
pub mod thread;

pub use config::RuntimeConfig;
pub use error::{NativeError, ThreadError, ThreadResult, Throwable, ThrowableKind};
pub use monitor::{Monitor, MonitorGuard};
pub use native::{NativeHandle, NativePriority, NativeThread};
pub use registry::Registry;
pub use thread::{
    checkpoint, current_thread, detach_current, enter_interruptable_wait, holds_lock,
    interrupted, leave_interruptable_wait, object_wait, sleep, yield_now, InheritableLocal,
    ManagedThread, ThreadBuilder, ThreadGroup, UncaughtExceptionHandler, MAX_PRIORITY,
    MIN_PRIORITY, NORM_PRIORITY,
};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// User code never runs while runtime locks are held, so a poisoned lock
/// still guards consistent state.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
