//! Host monitor: a reentrant lock with wait, pulse, and pulse-all.
//!
//! Ownership is tracked per native thread. Waiters are woken in FIFO order.
//! A wait is cut short by an interrupt or abort of the waiting thread, and
//! the monitor is always reacquired before `wait` returns.

use std::{
    collections::VecDeque,
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    time::Duration,
};

use crate::error::{NativeError, NativeResult};
use crate::lock;
use crate::native::{NativeThread, NATIVE_TIMEOUT_MAX};

struct WaitSlot {
    thread: Arc<NativeThread>,
    signaled: AtomicBool,
}

#[derive(Default)]
struct MonitorState {
    owner: Option<u64>,
    recursion: usize,
    waiters: VecDeque<Arc<WaitSlot>>,
}

/// A monitor object, as attached to every object in a managed runtime.
#[derive(Default)]
pub struct Monitor {
    state: Mutex<MonitorState>,
    entry: Condvar,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Monitor")
            .field("owner", &state.owner)
            .field("recursion", &state.recursion)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Holds a monitor entered by the current thread; exits it on drop.
#[must_use = "the monitor is released as soon as the guard is dropped"]
pub struct MonitorGuard<'a> {
    monitor: &'a Monitor,
    // Ownership is per thread; the guard must be dropped where it was taken.
    _not_send: PhantomData<*const ()>,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        self.monitor.exit();
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the monitor, blocking while another thread owns it.
    pub fn enter(&self) -> MonitorGuard<'_> {
        let me = NativeThread::current().id();
        let mut state = lock(&self.state);
        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.recursion = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.recursion += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .entry
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }
        self.guard()
    }

    /// Enter the monitor only if that does not block.
    pub fn try_enter(&self) -> Option<MonitorGuard<'_>> {
        let me = NativeThread::current().id();
        let mut state = lock(&self.state);
        match state.owner {
            None => {
                state.owner = Some(me);
                state.recursion = 1;
            }
            Some(owner) if owner == me => state.recursion += 1,
            Some(_) => return None,
        }
        Some(self.guard())
    }

    fn guard(&self) -> MonitorGuard<'_> {
        MonitorGuard {
            monitor: self,
            _not_send: PhantomData,
        }
    }

    fn exit(&self) {
        let mut state = lock(&self.state);
        state.recursion = state.recursion.saturating_sub(1);
        if state.recursion == 0 {
            state.owner = None;
            self.entry.notify_all();
        }
    }

    /// Whether the calling thread owns the monitor.
    pub fn is_owned_by_current(&self) -> bool {
        lock(&self.state).owner == Some(NativeThread::current().id())
    }

    /// Wake the longest-waiting thread. The caller must own the monitor.
    pub fn pulse(&self) -> NativeResult<()> {
        Self::pass_pulse(&mut *self.owned_state()?);
        Ok(())
    }

    /// Wake every waiting thread. The caller must own the monitor.
    pub fn pulse_all(&self) -> NativeResult<()> {
        let mut state = self.owned_state()?;
        for slot in state.waiters.drain(..) {
            slot.signaled.store(true, Ordering::Release);
            slot.thread.unpark();
        }
        Ok(())
    }

    fn owned_state(&self) -> NativeResult<std::sync::MutexGuard<'_, MonitorState>> {
        let me = NativeThread::current().id();
        let state = lock(&self.state);
        if state.owner != Some(me) {
            return Err(NativeError::NotOwner);
        }
        Ok(state)
    }

    /// Release the monitor fully, wait for a pulse or the timeout, then
    /// reacquire it at the previous recursion depth.
    ///
    /// Returns `Ok(true)` when pulsed and `Ok(false)` on timeout. `None`
    /// waits indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> NativeResult<bool> {
        if matches!(timeout, Some(t) if t > NATIVE_TIMEOUT_MAX) {
            return Err(NativeError::TimeoutOutOfRange);
        }

        let current = NativeThread::current();
        let slot = Arc::new(WaitSlot {
            thread: current.clone(),
            signaled: AtomicBool::new(false),
        });

        let depth = {
            let mut state = lock(&self.state);
            if state.owner != Some(current.id()) {
                return Err(NativeError::NotOwner);
            }
            let depth = state.recursion;
            state.owner = None;
            state.recursion = 0;
            state.waiters.push_back(slot.clone());
            self.entry.notify_all();
            depth
        };

        let outcome = current.block(timeout, || slot.signaled.load(Ordering::Acquire));

        let mut state = lock(&self.state);
        let signaled = slot.signaled.load(Ordering::Acquire);
        if !signaled {
            state.waiters.retain(|s| !Arc::ptr_eq(s, &slot));
        }
        while state.owner.is_some() {
            state = self
                .entry
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        state.owner = Some(current.id());
        state.recursion = depth;

        // A pulse taken by a wait that then fails belongs to the next waiter.
        if signaled && outcome.is_err() {
            Self::pass_pulse(&mut state);
        }

        outcome
    }

    fn pass_pulse(state: &mut MonitorState) {
        if let Some(next) = state.waiters.pop_front() {
            next.signaled.store(true, Ordering::Release);
            next.thread.unpark();
        }
    }
}
