//! Host native-thread layer.
//!
//! `std::thread` has no interrupt, abort, or suspend. This module supplies
//! them the way a managed host runtime does:
//!
//! - [`NativeThread::interrupt`] wakes the target from its current blocking
//!   call, or from the next one if it is not blocked. The signal stays queued
//!   until a blocking call consumes it or [`NativeThread::clear_interrupt`]
//!   discards it.
//! - [`NativeThread::abort`] posts a [`Throwable`] that surfaces from the
//!   target's next safepoint. An abort is refused while the target is
//!   suspended.
//! - [`NativeThread::suspend`] parks the target at its next safepoint until
//!   [`NativeThread::resume`].
//!
//! Every blocking call made by the current thread goes through one primitive
//! that waits on the caller's own signal lock. Other threads' exit state is
//! read through atomics, so mutual joins cannot deadlock on these locks.

use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Condvar, Mutex, MutexGuard, Weak,
    },
    thread,
    time::{Duration, Instant},
};

use crate::error::{NativeError, NativeResult, Throwable};
use crate::lock;

/// Longest timeout a single native join, sleep, or monitor wait accepts.
pub const NATIVE_TIMEOUT_MAX: Duration = Duration::from_millis(i32::MAX as u64);

/// Global native thread ID counter.
static NEXT_NATIVE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_NATIVE: RefCell<Option<CurrentNative>> = const { RefCell::new(None) };
}

// ---------------------------------------------------------------------------
// NativePriority
// ---------------------------------------------------------------------------

/// The host's five scheduling priority levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum NativePriority {
    Lowest = 0,
    BelowNormal = 1,
    Normal = 2,
    AboveNormal = 3,
    Highest = 4,
}

impl NativePriority {
    /// All levels, lowest first.
    pub const ALL: [NativePriority; 5] = [
        NativePriority::Lowest,
        NativePriority::BelowNormal,
        NativePriority::Normal,
        NativePriority::AboveNormal,
        NativePriority::Highest,
    ];

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => NativePriority::Lowest,
            1 => NativePriority::BelowNormal,
            2 => NativePriority::Normal,
            3 => NativePriority::AboveNormal,
            _ => NativePriority::Highest,
        }
    }
}

// ---------------------------------------------------------------------------
// NativeThread
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Signals {
    interrupt: bool,
    abort: Option<Throwable>,
    suspend_requested: bool,
}

/// A host thread record.
///
/// Created unstarted with [`NativeThread::new`] and launched with
/// [`NativeThread::start`], or captured for an already running thread with
/// [`NativeThread::current`].
pub struct NativeThread {
    id: u64,
    name: Mutex<Option<String>>,
    priority: AtomicU8,
    background: AtomicBool,
    started: AtomicBool,
    alive: AtomicBool,
    signals: Mutex<Signals>,
    wakeup: Condvar,
    joiners: Mutex<Vec<Weak<NativeThread>>>,
}

impl std::fmt::Debug for NativeThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeThread")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Thread-local owner of the current native record; marks it exited when
/// the OS thread tears down.
struct CurrentNative(Arc<NativeThread>);

impl Drop for CurrentNative {
    fn drop(&mut self) {
        self.0.exit();
    }
}

/// Marks a spawned thread exited as soon as its entry returns or unwinds.
struct ExitGuard(Arc<NativeThread>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.exit();
    }
}

impl NativeThread {
    /// Create an unstarted native thread.
    pub fn new(name: Option<String>, priority: NativePriority, background: bool) -> Arc<Self> {
        Arc::new(Self::record(name, priority, background))
    }

    fn record(name: Option<String>, priority: NativePriority, background: bool) -> Self {
        Self {
            id: NEXT_NATIVE_ID.fetch_add(1, Ordering::Relaxed),
            name: Mutex::new(name),
            priority: AtomicU8::new(priority as u8),
            background: AtomicBool::new(background),
            started: AtomicBool::new(false),
            alive: AtomicBool::new(false),
            signals: Mutex::new(Signals::default()),
            wakeup: Condvar::new(),
            joiners: Mutex::new(Vec::new()),
        }
    }

    /// The record for the calling OS thread, created on first use.
    pub fn current() -> Arc<NativeThread> {
        CURRENT_NATIVE
            .try_with(|slot| {
                let mut slot = slot.borrow_mut();
                if let Some(current) = slot.as_ref() {
                    return current.0.clone();
                }
                let native = Arc::new(Self::foreign());
                *slot = Some(CurrentNative(native.clone()));
                native
            })
            // Thread-local storage is being torn down; hand out a detached record.
            .unwrap_or_else(|_| Arc::new(Self::foreign()))
    }

    fn foreign() -> Self {
        let name = thread::current().name().map(str::to_owned);
        let record = Self::record(name, NativePriority::Normal, false);
        record.started.store(true, Ordering::Relaxed);
        record.alive.store(true, Ordering::Relaxed);
        record
    }

    /// Launch the thread. `entry` runs on the new OS thread.
    pub fn start<F>(self: &Arc<Self>, stack_size: Option<usize>, entry: F) -> NativeResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(NativeError::AlreadyStarted);
        }
        self.alive.store(true, Ordering::Release);

        let mut builder = thread::Builder::new();
        if let Some(name) = self.name() {
            builder = builder.name(name.replace('\0', ""));
        }
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let native = Arc::clone(self);
        let spawned = builder.spawn(move || {
            let _exit = ExitGuard(native.clone());
            let _ = CURRENT_NATIVE.try_with(|slot| {
                *slot.borrow_mut() = Some(CurrentNative(native));
            });
            entry();
        });

        match spawned {
            Ok(_detached) => Ok(()),
            Err(err) => {
                self.alive.store(false, Ordering::Release);
                Err(NativeError::Spawn(err))
            }
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> Option<String> {
        lock(&self.name).clone()
    }

    pub fn set_name(&self, name: Option<String>) {
        *lock(&self.name) = name;
    }

    pub fn priority(&self) -> NativePriority {
        NativePriority::from_raw(self.priority.load(Ordering::Relaxed))
    }

    pub fn set_priority(&self, priority: NativePriority) {
        self.priority.store(priority as u8, Ordering::Relaxed);
    }

    /// Background threads do not keep the process alive.
    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::Relaxed)
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Whether a suspension has been requested and not yet resumed.
    pub fn is_suspended(&self) -> bool {
        lock(&self.signals).suspend_requested
    }

    /// Whether this record belongs to the calling OS thread.
    pub fn is_current(&self) -> bool {
        CURRENT_NATIVE
            .try_with(|slot| {
                slot.borrow()
                    .as_ref()
                    .is_some_and(|current| current.0.id == self.id)
            })
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Signals
    // -----------------------------------------------------------------------

    /// Queue an interrupt and wake the thread if it is blocked.
    pub fn interrupt(&self) {
        let mut signals = lock(&self.signals);
        signals.interrupt = true;
        self.wakeup.notify_all();
    }

    /// Discard a queued interrupt that no blocking call consumed.
    pub fn clear_interrupt(&self) {
        lock(&self.signals).interrupt = false;
    }

    /// Post an abort carrying `payload`.
    ///
    /// Fails with [`NativeError::Suspended`] while a suspension is pending
    /// and with [`NativeError::NotAlive`] once the thread has exited.
    pub fn abort(&self, payload: Throwable) -> NativeResult<()> {
        if !self.is_alive() {
            return Err(NativeError::NotAlive);
        }
        let mut signals = lock(&self.signals);
        if signals.suspend_requested {
            return Err(NativeError::Suspended);
        }
        signals.abort = Some(payload);
        self.wakeup.notify_all();
        Ok(())
    }

    /// Request suspension at the thread's next safepoint.
    ///
    /// A thread suspending itself parks before this returns.
    pub fn suspend(&self) -> NativeResult<()> {
        if !self.is_alive() {
            return Err(NativeError::NotAlive);
        }
        let mut signals = lock(&self.signals);
        signals.suspend_requested = true;
        if self.is_current() {
            drop(self.park_while_suspended(signals));
        }
        Ok(())
    }

    /// Release a suspended thread.
    pub fn resume(&self) -> NativeResult<()> {
        let mut signals = lock(&self.signals);
        if !signals.suspend_requested {
            return Err(NativeError::NotSuspended);
        }
        signals.suspend_requested = false;
        self.wakeup.notify_all();
        Ok(())
    }

    /// Wake the thread so it re-evaluates its blocking condition.
    pub(crate) fn unpark(&self) {
        let _signals = lock(&self.signals);
        self.wakeup.notify_all();
    }

    // -----------------------------------------------------------------------
    // Blocking
    // -----------------------------------------------------------------------

    /// Block until the thread exits or `timeout` elapses.
    ///
    /// Must be called from the thread doing the waiting. Returns `Ok(true)`
    /// once the target is dead and `Ok(false)` on timeout. `None` waits
    /// indefinitely.
    pub fn join(&self, timeout: Option<Duration>) -> NativeResult<bool> {
        check_timeout(timeout)?;
        if !self.is_alive() {
            return Ok(true);
        }

        let current = NativeThread::current();
        lock(&self.joiners).push(Arc::downgrade(&current));
        let joined = current.block(timeout, || !self.is_alive());
        lock(&self.joiners).retain(|w| w.upgrade().is_some_and(|j| j.id != current.id));
        joined
    }

    /// Check for a pending abort and park while suspended.
    ///
    /// Must be called on the current thread's own record.
    pub(crate) fn safepoint(&self) -> NativeResult<()> {
        let mut signals = self.park_while_suspended(lock(&self.signals));
        match signals.abort.take() {
            Some(payload) => Err(NativeError::Aborted(payload)),
            None => Ok(()),
        }
    }

    /// The one blocking primitive.
    ///
    /// Waits on the current thread's own signal lock until `ready` holds,
    /// the deadline passes, or an abort or interrupt arrives. `ready` is
    /// evaluated while that lock is held and must only read atomics.
    pub(crate) fn block(
        &self,
        timeout: Option<Duration>,
        mut ready: impl FnMut() -> bool,
    ) -> NativeResult<bool> {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut signals = lock(&self.signals);
        loop {
            signals = self.park_while_suspended(signals);
            if let Some(payload) = signals.abort.take() {
                return Err(NativeError::Aborted(payload));
            }
            if signals.interrupt {
                signals.interrupt = false;
                return Err(NativeError::Interrupted);
            }
            if ready() {
                return Ok(true);
            }

            match (timeout, deadline) {
                (None, _) | (Some(_), None) => {
                    signals = self
                        .wakeup
                        .wait(signals)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    signals = self
                        .wakeup
                        .wait_timeout(signals, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0;
                }
            }
        }
    }

    fn park_while_suspended<'a>(
        &'a self,
        mut signals: MutexGuard<'a, Signals>,
    ) -> MutexGuard<'a, Signals> {
        while signals.suspend_requested {
            signals = self
                .wakeup
                .wait(signals)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        signals
    }

    /// Mark the thread dead and wake every joiner.
    fn exit(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        let joiners = std::mem::take(&mut *lock(&self.joiners));
        for joiner in joiners.iter().filter_map(Weak::upgrade) {
            joiner.unpark();
        }
    }
}

fn check_timeout(timeout: Option<Duration>) -> NativeResult<()> {
    match timeout {
        Some(t) if t > NATIVE_TIMEOUT_MAX => Err(NativeError::TimeoutOutOfRange),
        _ => Ok(()),
    }
}

/// Sleep the current thread. Interrupts and aborts cut the sleep short.
pub fn sleep(duration: Duration) -> NativeResult<()> {
    check_timeout(Some(duration))?;
    NativeThread::current()
        .block(Some(duration), || false)
        .map(|_| ())
}

/// Safepoint for the current thread: honours suspension and pending aborts.
pub fn checkpoint() -> NativeResult<()> {
    NativeThread::current().safepoint()
}

// ---------------------------------------------------------------------------
// NativeHandle
// ---------------------------------------------------------------------------

/// A non-owning reference to a native thread.
///
/// Holding one does not keep a terminated thread's record alive.
#[derive(Clone, Debug)]
pub struct NativeHandle(Weak<NativeThread>);

impl NativeHandle {
    pub fn new(native: &Arc<NativeThread>) -> Self {
        Self(Arc::downgrade(native))
    }

    /// Resolve to the live record, or `None` once it is gone.
    pub fn upgrade(&self) -> Option<Arc<NativeThread>> {
        self.0.upgrade()
    }
}
