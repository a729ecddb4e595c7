//! Lifecycle controller for managed threads.
//!
//! One [`Lifecycle`] exists per started (or adopted) [`ManagedThread`]. It
//! holds the weak native handle, the `running` flag, the interrupt flags,
//! and the join-waiter set, all behind one state lock. The operations in
//! this file fall into four groups:
//!
//! - create / run / cleanup
//! - the interruptible-wait protocol (`enter`, `leave`, `interrupt`)
//! - join and the waiter set, including the external detach path
//! - stop / suspend / resume
//!
//! Lock order: thread lock, then lifecycle lock, then native signal lock.
//! Detach interrupts joiners while holding the target's lifecycle lock, so
//! a target's lock may be held while taking a joiner's; never the reverse.
//! The registry counter lock is taken on its own.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::{Duration, Instant},
};

use indexmap::IndexMap;

use super::adopt;
use super::group::UncaughtExceptionHandler;
use super::managed::{priority_to_native, ManagedThread};
use crate::error::{NativeError, NativeResult, ThreadError, ThreadResult, Throwable};
use crate::lock;
use crate::native::{NativeHandle, NativeThread};

// ---------------------------------------------------------------------------
// Lifecycle state
// ---------------------------------------------------------------------------

pub(crate) struct LifecycleState {
    /// `None` once the thread has been cleaned up.
    native: Option<NativeHandle>,
    interrupt_pending: bool,
    interruptable: bool,
    /// Whether this thread still holds a slot in the non-daemon count.
    counted: bool,
    /// Threads currently blocked joining this one.
    join_waiters: IndexMap<u64, Weak<ManagedThread>>,
}

/// Adapter-owned record linking a managed thread to its native thread.
pub(crate) struct Lifecycle {
    running: AtomicBool,
    state: Mutex<LifecycleState>,
}

impl Lifecycle {
    pub(crate) fn new(native: NativeHandle, counted: bool, running: bool) -> Self {
        Self {
            running: AtomicBool::new(running),
            state: Mutex::new(LifecycleState {
                native: Some(native),
                interrupt_pending: false,
                interruptable: false,
                counted,
                join_waiters: IndexMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, LifecycleState> {
        lock(&self.state)
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state().native.is_some()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn native(&self) -> Option<Arc<NativeThread>> {
        self.state().native.as_ref().and_then(NativeHandle::upgrade)
    }

    // -----------------------------------------------------------------------
    // Interruptible-wait protocol
    // -----------------------------------------------------------------------

    /// Enter an interruptible region. Fails if an interrupt is already
    /// pending, consuming it.
    pub(crate) fn enter_interruptable_wait(&self) -> ThreadResult<()> {
        let mut state = self.state();
        if state.interrupt_pending {
            state.interrupt_pending = false;
            return Err(ThreadError::Interrupted);
        }
        state.interruptable = true;
        Ok(())
    }

    /// Leave an interruptible region. Fails if an interrupt arrived during
    /// the region, consuming it.
    ///
    /// Called on the current thread only. Any native signal still queued
    /// belongs to this region and is discarded here.
    pub(crate) fn leave_interruptable_wait(&self) -> ThreadResult<()> {
        let mut state = self.state();
        state.interruptable = false;
        NativeThread::current().clear_interrupt();
        if state.interrupt_pending {
            state.interrupt_pending = false;
            return Err(ThreadError::Interrupted);
        }
        Ok(())
    }

    /// Post an interrupt; forwarded natively only inside a region.
    pub(crate) fn interrupt(&self) {
        let mut state = self.state();
        state.interrupt_pending = true;
        if state.interruptable
            && let Some(native) = state.native.as_ref().and_then(NativeHandle::upgrade)
        {
            native.interrupt();
        }
    }

    /// Read and clear the pending flag.
    pub(crate) fn take_interrupt(&self) -> bool {
        std::mem::replace(&mut self.state().interrupt_pending, false)
    }

    pub(crate) fn is_interrupt_pending(&self) -> bool {
        self.state().interrupt_pending
    }

    /// Run a native blocking call inside an interruptible region.
    ///
    /// A native interrupt seen while no managed interrupt is pending is
    /// spurious and `op` is retried; `op` must therefore work from a fixed
    /// deadline. If the call was aborted, an interrupt consumed on the way
    /// out is put back so it is not lost.
    pub(crate) fn interruptible<T>(
        &self,
        op: impl FnMut() -> NativeResult<T>,
    ) -> ThreadResult<T> {
        self.interruptible_then(op, || ())
    }

    /// Like [`Lifecycle::interruptible`], running `on_exit` after the last
    /// attempt and before the region is left.
    pub(crate) fn interruptible_then<T>(
        &self,
        mut op: impl FnMut() -> NativeResult<T>,
        on_exit: impl FnOnce(),
    ) -> ThreadResult<T> {
        self.enter_interruptable_wait()?;
        let outcome = loop {
            match op() {
                Err(NativeError::Interrupted) if !self.is_interrupt_pending() => {
                    thread_trace!("suppressed spurious native interrupt");
                }
                other => break other,
            }
        };
        on_exit();
        let left = self.leave_interruptable_wait();

        match outcome {
            Err(NativeError::Aborted(payload)) => {
                if left.is_err() {
                    self.state().interrupt_pending = true;
                }
                Err(ThreadError::Stopped(payload))
            }
            Err(NativeError::Interrupted) => left.and(Err(ThreadError::Interrupted)),
            Err(other) => {
                left?;
                Err(other.into())
            }
            Ok(value) => left.map(|()| value),
        }
    }

    // -----------------------------------------------------------------------
    // Join waiters
    // -----------------------------------------------------------------------

    fn add_join_waiter(&self, owner: u64, waiter: &Arc<ManagedThread>) {
        if waiter.id() == owner {
            return;
        }
        self.state()
            .join_waiters
            .insert(waiter.id(), Arc::downgrade(waiter));
    }

    fn remove_join_waiter(&self, owner: u64, waiter: &ManagedThread) {
        if waiter.id() == owner {
            return;
        }
        self.state().join_waiters.shift_remove(&waiter.id());
    }

    pub(crate) fn join_waiter_ids(&self) -> Vec<u64> {
        self.state().join_waiters.keys().copied().collect()
    }

    /// Give up this thread's non-daemon slot if it still holds one.
    fn release_slot(&self) -> bool {
        std::mem::replace(&mut self.state().counted, false)
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

impl ManagedThread {
    pub(crate) fn lifecycle(&self) -> Option<&Lifecycle> {
        self.lifecycle.get()
    }

    /// The live native thread, if started and not yet cleaned up.
    pub fn native_thread(&self) -> Option<Arc<NativeThread>> {
        self.lifecycle().and_then(Lifecycle::native)
    }

    /// Start the thread on a new native thread.
    ///
    /// Returns once the spawn request is issued. Fails if the thread was
    /// already started.
    pub fn start(self: &Arc<Self>) -> ThreadResult<()> {
        self.create(self.stack_size())
    }

    fn create(self: &Arc<Self>, stack_size: Option<usize>) -> ThreadResult<()> {
        let (name, priority, group) = {
            let fields = self.fields();
            (fields.name.clone(), fields.priority, fields.group.clone())
        };
        let native = NativeThread::new(Some(name), priority_to_native(priority), self.is_daemon());

        let lifecycle = Lifecycle::new(NativeHandle::new(&native), !self.is_daemon(), false);
        if self.lifecycle.set(lifecycle).is_err() {
            return Err(ThreadError::IllegalThreadState(format!(
                "thread {} already started",
                self.id()
            )));
        }
        if !self.is_daemon() {
            self.registry().thread_started();
        }
        group.add_thread(self);

        let stack_size = stack_size.or(self.registry().config().default_stack_size);
        let thread = Arc::clone(self);
        thread_trace!(thread_id = self.id(), "starting managed thread");
        if let Err(err) = native.start(stack_size, move || thread.run()) {
            tracing::error!(thread_id = self.id(), %err, "failed to start native thread");
            self.cleanup();
            return Err(err.into());
        }
        Ok(())
    }

    /// Native entry point.
    fn run(self: Arc<Self>) {
        adopt::install_current(self.clone());
        let Some(lifecycle) = self.lifecycle() else {
            return;
        };
        lifecycle.running.store(true, Ordering::SeqCst);

        if let Err(error) = self.run_body() {
            thread_trace!(thread_id = self.id(), %error, "thread body raised");
            self.dispatch_uncaught(&error);
        }

        lifecycle.running.store(false, Ordering::SeqCst);
        self.cleanup();
    }

    fn run_body(&self) -> Result<(), Throwable> {
        let body = {
            let mut fields = self.fields();
            if let Some(stillborn) = fields.stillborn.take() {
                return Err(stillborn);
            }
            fields.body.take()
        };
        let Some(body) = body else {
            return Ok(());
        };
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(result) => result,
            Err(payload) => Err(Throwable::panic(panic_message(payload.as_ref()))),
        }
    }

    fn dispatch_uncaught(&self, error: &Throwable) {
        let handler = {
            let fields = self.fields();
            fields
                .handler
                .clone()
                .unwrap_or_else(|| fields.group.clone() as Arc<dyn UncaughtExceptionHandler>)
        };
        let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.uncaught_exception(self, error);
        }));
        if delivered.is_err() {
            tracing::debug!(thread_id = self.id(), "uncaught-exception handler panicked");
        }
    }

    /// Mark the thread dead. Safe to call any number of times; only the
    /// first call after start has effects.
    pub(crate) fn cleanup(&self) {
        self.retire(false);
    }

    fn retire(&self, wake_joiners: bool) {
        let Some(lifecycle) = self.lifecycle() else {
            return;
        };
        let release = {
            let mut state = lifecycle.state();
            if state.native.take().is_none() {
                return;
            }
            if wake_joiners {
                // Joiners deregister under this lock before leaving their
                // interruptible region, so each interrupt lands inside it.
                let waiters: Vec<_> = state
                    .join_waiters
                    .values()
                    .filter_map(Weak::upgrade)
                    .collect();
                tracing::debug!(
                    thread_id = self.id(),
                    waiters = waiters.len(),
                    "thread detached"
                );
                for waiter in waiters {
                    waiter.interrupt();
                }
            }
            std::mem::replace(&mut state.counted, false)
        };

        self.group().remove_thread(self.id());
        if release && !self.is_daemon() {
            self.registry().thread_finished();
        }
        thread_trace!(thread_id = self.id(), "thread cleaned up");
    }

    /// Drop this thread's non-daemon slot without cleaning it up.
    pub(crate) fn release_non_daemon_slot(&self) {
        if self.is_daemon() {
            return;
        }
        if self.lifecycle().is_some_and(Lifecycle::release_slot) {
            self.registry().thread_finished();
        }
    }

    /// Termination from outside the run/cleanup sequence: clean up, then
    /// interrupt every joiner so it notices the death.
    pub(crate) fn detach(&self) {
        self.retire(true);
    }

    // -----------------------------------------------------------------------
    // Interrupts
    // -----------------------------------------------------------------------

    /// Interrupt the thread.
    ///
    /// If it is blocked in an interruptible call, the call is woken now.
    /// Otherwise the interrupt stays pending until its next interruptible
    /// call or an [`crate::interrupted`] poll.
    pub fn interrupt(&self) {
        if let Some(lifecycle) = self.lifecycle() {
            lifecycle.interrupt();
        }
    }

    /// Whether an interrupt is pending. Does not clear it.
    pub fn is_interrupted(&self) -> bool {
        self.lifecycle()
            .is_some_and(Lifecycle::is_interrupt_pending)
    }

    // -----------------------------------------------------------------------
    // Join
    // -----------------------------------------------------------------------

    /// Wait for the thread to die, at most `ms` milliseconds plus `ns`
    /// nanoseconds. `join(0, 0)` waits indefinitely.
    pub fn join(&self, ms: u64, ns: u32) -> ThreadResult<()> {
        let config = self.registry().config();
        let timeout = config.join_timeout(ms, ns)?;
        let chunk_max = config.native_timeout_max;

        let Some(lifecycle) = self.lifecycle() else {
            return Ok(());
        };
        let Some(native) = lifecycle.native() else {
            return Ok(());
        };

        let current = adopt::current_thread();
        let Some(current_lifecycle) = current.lifecycle() else {
            return Ok(());
        };

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut registered = false;
        let outcome = current_lifecycle.interruptible_then(
            || {
                if !registered {
                    lifecycle.add_join_waiter(self.id(), &current);
                    registered = true;
                }
                if !lifecycle.is_attached() {
                    return Ok(true);
                }
                join_chunked(&native, deadline, chunk_max)
            },
            || lifecycle.remove_join_waiter(self.id(), &current),
        );

        match outcome {
            Ok(_) => {}
            Err(ThreadError::Interrupted) if registered && !lifecycle.is_attached() => {
                thread_trace!(thread_id = self.id(), "join woken by detach");
            }
            Err(err) => return Err(err),
        }

        if !native.is_alive() {
            self.cleanup();
        }
        Ok(())
    }

    /// IDs of threads currently blocked joining this one.
    pub fn join_waiters(&self) -> Vec<u64> {
        self.lifecycle()
            .map(Lifecycle::join_waiter_ids)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Stop / suspend / resume
    // -----------------------------------------------------------------------

    /// Force the thread to raise `throwable`.
    ///
    /// - On the calling thread, returns `Err(Stopped(throwable))` now.
    /// - Before the body has begun, stores it to be raised instead of the
    ///   body.
    /// - Otherwise posts an abort, but only for the terminal category
    ///   (`ThreadDeath`). Other kinds are accepted and dropped.
    pub fn stop(&self, throwable: Throwable) -> ThreadResult<()> {
        if adopt::is_current(self) {
            return Err(ThreadError::Stopped(throwable));
        }

        {
            let mut fields = self.fields();
            let running = self.lifecycle().is_some_and(Lifecycle::is_running);
            if !running {
                thread_trace!(thread_id = self.id(), "stop before body, storing stillborn");
                fields.stillborn = Some(throwable);
                return Ok(());
            }
        }

        self.native_stop(throwable);
        Ok(())
    }

    fn native_stop(&self, throwable: Throwable) {
        if !throwable.is_terminal() {
            tracing::debug!(
                thread_id = self.id(),
                error = %throwable,
                "dropping non-terminal stop aimed at another thread"
            );
            return;
        }
        let Some(native) = self.native_thread() else {
            return;
        };
        loop {
            match native.abort(throwable.clone()) {
                Ok(()) => return,
                Err(NativeError::Suspended) => {
                    let _ = native.resume();
                    std::thread::yield_now();
                }
                Err(err) => {
                    thread_trace!(thread_id = self.id(), %err, "abort not delivered");
                    return;
                }
            }
        }
    }

    /// Suspend the thread at its next safepoint. Best effort.
    pub fn suspend(&self) {
        if let Some(native) = self.native_thread()
            && let Err(err) = native.suspend()
        {
            thread_trace!(thread_id = self.id(), %err, "suspend ignored");
        }
    }

    /// Resume a suspended thread. Best effort.
    pub fn resume(&self) {
        if let Some(native) = self.native_thread()
            && let Err(err) = native.resume()
        {
            thread_trace!(thread_id = self.id(), %err, "resume ignored");
        }
    }
}

/// Native join split into calls the host accepts.
fn join_chunked(
    native: &NativeThread,
    deadline: Option<Instant>,
    chunk_max: Duration,
) -> NativeResult<bool> {
    let Some(deadline) = deadline else {
        return native.join(None);
    };
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Ok(!native.is_alive());
        }
        if native.join(Some((deadline - now).min(chunk_max)))? {
            return Ok(true);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::registry::Registry;
    use crate::thread::ThreadBuilder;

    fn unstarted(registry: &Arc<Registry>) -> Arc<ManagedThread> {
        ThreadBuilder::new()
            .registry(registry.clone())
            .daemon(false)
            .build(|| Ok(()))
            .unwrap()
    }

    #[test]
    fn cleanup_is_idempotent() {
        let registry = Registry::new(RuntimeConfig::default());
        let thread = unstarted(&registry);
        let native = NativeThread::new(None, crate::NativePriority::Normal, false);
        assert!(thread
            .lifecycle
            .set(Lifecycle::new(NativeHandle::new(&native), true, true))
            .is_ok());
        registry.thread_started();

        thread.cleanup();
        assert_eq!(registry.non_daemon_count(), 0);
        assert!(!thread.is_alive());
        thread.cleanup();
        assert_eq!(registry.non_daemon_count(), 0);
    }

    #[test]
    fn enter_fails_after_interrupt_and_clears_flag() {
        let lifecycle = Lifecycle::new(NativeHandle::new(&NativeThread::current()), false, true);
        lifecycle.interrupt();
        assert!(matches!(
            lifecycle.enter_interruptable_wait(),
            Err(ThreadError::Interrupted)
        ));
        assert!(!lifecycle.is_interrupt_pending());
        lifecycle.enter_interruptable_wait().unwrap();
        lifecycle.leave_interruptable_wait().unwrap();
    }

    #[test]
    fn leave_reports_interrupt_once() {
        let lifecycle = Lifecycle::new(NativeHandle::new(&NativeThread::current()), false, true);
        lifecycle.enter_interruptable_wait().unwrap();
        lifecycle.interrupt();
        assert!(matches!(
            lifecycle.leave_interruptable_wait(),
            Err(ThreadError::Interrupted)
        ));
        lifecycle.enter_interruptable_wait().unwrap();
        assert!(lifecycle.leave_interruptable_wait().is_ok());
    }

    #[test]
    fn leave_discards_leftover_native_signal() {
        let native = NativeThread::current();
        let lifecycle = Lifecycle::new(NativeHandle::new(&native), false, true);
        lifecycle.enter_interruptable_wait().unwrap();
        lifecycle.interrupt();
        let _ = lifecycle.leave_interruptable_wait();
        // no stale native signal survives the region
        assert!(crate::native::sleep(Duration::from_millis(1)).is_ok());
    }

    #[test]
    fn spurious_native_interrupt_is_retried() {
        let native = NativeThread::current();
        let lifecycle = Lifecycle::new(NativeHandle::new(&native), false, true);
        let mut calls = 0;
        let result = lifecycle.interruptible(|| {
            calls += 1;
            if calls == 1 {
                Err(NativeError::Interrupted)
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn waiter_set_never_links_self() {
        let registry = Registry::new(RuntimeConfig::default());
        let target = unstarted(&registry);
        let other = unstarted(&registry);
        let lifecycle = Lifecycle::new(NativeHandle::new(&NativeThread::current()), false, true);

        lifecycle.add_join_waiter(target.id(), &target);
        assert!(lifecycle.join_waiter_ids().is_empty());

        lifecycle.add_join_waiter(target.id(), &other);
        assert_eq!(lifecycle.join_waiter_ids(), vec![other.id()]);

        lifecycle.remove_join_waiter(target.id(), &other);
        lifecycle.remove_join_waiter(target.id(), &other);
        assert!(lifecycle.join_waiter_ids().is_empty());
    }

    #[test]
    fn waiter_removal_handles_head_and_interior() {
        let registry = Registry::new(RuntimeConfig::default());
        let target = unstarted(&registry);
        let waiters: Vec<_> = (0..3).map(|_| unstarted(&registry)).collect();
        let lifecycle = Lifecycle::new(NativeHandle::new(&NativeThread::current()), false, true);
        for w in &waiters {
            lifecycle.add_join_waiter(target.id(), w);
        }

        lifecycle.remove_join_waiter(target.id(), &waiters[1]);
        assert_eq!(
            lifecycle.join_waiter_ids(),
            vec![waiters[0].id(), waiters[2].id()]
        );
        lifecycle.remove_join_waiter(target.id(), &waiters[0]);
        assert_eq!(lifecycle.join_waiter_ids(), vec![waiters[2].id()]);
    }

    #[test]
    fn stop_before_start_stores_stillborn() {
        let registry = Registry::new(RuntimeConfig::default());
        let thread = unstarted(&registry);
        thread.stop(Throwable::thread_death()).unwrap();
        assert_eq!(thread.fields().stillborn, Some(Throwable::thread_death()));
    }

    #[test]
    fn start_twice_is_rejected() {
        let registry = Registry::new(RuntimeConfig::default());
        let thread = unstarted(&registry);
        thread.start().unwrap();
        assert!(matches!(
            thread.start(),
            Err(ThreadError::IllegalThreadState(_))
        ));
        thread.join(0, 0).unwrap();
        assert_eq!(registry.non_daemon_count(), 0);
    }
}
