//! Operations on the current thread.

use std::time::{Duration, Instant};

use super::adopt::current_thread;
use super::managed::ManagedThread;
use crate::error::{NativeError, NativeResult, ThreadError, ThreadResult};
use crate::monitor::Monitor;
use crate::native::{self, NativeThread};

/// Read and clear the current thread's interrupt flag.
pub fn interrupted() -> bool {
    current_thread()
        .lifecycle()
        .is_some_and(|lifecycle| lifecycle.take_interrupt())
}

/// Mark the current thread as blocked in an interruptible call.
///
/// Fails with [`ThreadError::Interrupted`] if an interrupt is already
/// pending, clearing it.
pub fn enter_interruptable_wait() -> ThreadResult<()> {
    match current_thread().lifecycle() {
        Some(lifecycle) => lifecycle.enter_interruptable_wait(),
        None => Ok(()),
    }
}

/// End an interruptible call on the current thread.
///
/// Fails with [`ThreadError::Interrupted`] if an interrupt arrived while
/// inside, clearing it.
pub fn leave_interruptable_wait() -> ThreadResult<()> {
    match current_thread().lifecycle() {
        Some(lifecycle) => lifecycle.leave_interruptable_wait(),
        None => Ok(()),
    }
}

/// Run `op` as an interruptible call of the current thread.
fn interruptible<T>(
    thread: &ManagedThread,
    op: impl FnMut() -> NativeResult<T>,
) -> ThreadResult<T> {
    match thread.lifecycle() {
        Some(lifecycle) => lifecycle.interruptible(op),
        None => {
            let mut op = op;
            op().map_err(ThreadError::from)
        }
    }
}

/// Sleep for `ms` milliseconds plus `ns` nanoseconds.
///
/// `sleep(0, 0)` only yields and leaves a pending interrupt alone. Any
/// other duration is an interruptible call and a safepoint.
pub fn sleep(ms: u64, ns: u32) -> ThreadResult<()> {
    let thread = current_thread();
    let config = thread.registry().config();
    if ms == 0 && ns == 0 {
        std::thread::yield_now();
        return Ok(());
    }
    let timeout = config.join_timeout(ms, ns)?;
    let chunk_max = config.native_timeout_max;

    let native = NativeThread::current();
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    interruptible(&thread, || {
        let Some(deadline) = deadline else {
            return native.block(None, || false).map(|_| ());
        };
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            native::sleep((deadline - now).min(chunk_max))?;
        }
    })
}

/// Offer the processor to another thread.
pub fn yield_now() {
    std::thread::yield_now();
}

/// Whether the current thread owns `monitor`.
///
/// Checks by pulsing, which only the owner may do. A waiter may see the
/// pulse as a spurious wakeup.
pub fn holds_lock(monitor: &Monitor) -> bool {
    match monitor.pulse() {
        Ok(()) => true,
        Err(NativeError::NotOwner) => false,
        Err(err) => {
            tracing::debug!(%err, "unexpected monitor ownership check failure");
            false
        }
    }
}

/// Wait on `monitor`, which the current thread must own, until pulsed,
/// interrupted, or `ms` milliseconds plus `ns` nanoseconds pass.
///
/// `object_wait(m, 0, 0)` waits indefinitely. Spurious wakeups are
/// possible, as with any monitor wait.
pub fn object_wait(monitor: &Monitor, ms: u64, ns: u32) -> ThreadResult<()> {
    let thread = current_thread();
    let config = thread.registry().config();
    let timeout = config.wait_timeout(ms, ns)?;
    if !monitor.is_owned_by_current() {
        return Err(ThreadError::InvalidMonitorState);
    }
    let chunk_max = config.native_timeout_max;

    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
    let mut pulsed = false;
    let result = interruptible(&thread, || {
        pulsed = wait_chunked(monitor, deadline, chunk_max)?;
        Ok(())
    });
    // Woken by a pulse but failing anyway: the pulse goes to the next waiter.
    if pulsed && result.is_err() {
        let _ = monitor.pulse();
    }
    result
}

/// Returns whether the wait ended on a pulse.
fn wait_chunked(
    monitor: &Monitor,
    deadline: Option<Instant>,
    chunk_max: Duration,
) -> NativeResult<bool> {
    let Some(deadline) = deadline else {
        return monitor.wait(None);
    };
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        if monitor.wait(Some((deadline - now).min(chunk_max)))? {
            return Ok(true);
        }
    }
}

/// Explicit safepoint: parks while the current thread is suspended and
/// raises a pending stop.
pub fn checkpoint() -> ThreadResult<()> {
    native::checkpoint().map_err(ThreadError::from)
}
