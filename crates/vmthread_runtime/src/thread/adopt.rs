//! Current-thread cache and adoption of foreign threads.
//!
//! A thread not started through [`ThreadBuilder`](super::ThreadBuilder) gets
//! a managed identity the first time it asks for one. The identity is
//! cleaned up when the OS thread's thread-local storage is destroyed, or
//! earlier through [`detach_current`].

use std::{cell::RefCell, sync::Arc};

use super::lifecycle::Lifecycle;
use super::managed::{next_thread_id, priority_from_native, ManagedThread, ThreadFields};
use crate::native::{NativeHandle, NativeThread};
use crate::registry::Registry;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ManagedThread>>> = const { RefCell::new(None) };
    static CLEANUP: RefCell<Option<CleanupGuard>> = const { RefCell::new(None) };
}

/// Runs cleanup for an adopted thread when its thread-local storage dies.
struct CleanupGuard(Arc<ManagedThread>);

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        thread_trace!(thread_id = self.0.id(), "adopted thread exiting");
        self.0.cleanup();
    }
}

/// The managed thread for the caller, adopting the OS thread on first use.
pub fn current_thread() -> Arc<ManagedThread> {
    if let Some(current) = cached_current() {
        return current;
    }
    let thread = adopt(Registry::global());
    if !install_current(thread.clone()) {
        // No thread-local storage left to hang the identity on.
        thread.cleanup();
        return thread;
    }
    let installed = CLEANUP
        .try_with(|slot| *slot.borrow_mut() = Some(CleanupGuard(thread.clone())))
        .is_ok();
    if !installed {
        thread.cleanup();
    }
    thread
}

fn adopt(registry: &Arc<Registry>) -> Arc<ManagedThread> {
    let native = NativeThread::current();
    let daemon = native.is_background();
    let id = next_thread_id();
    let fields = ThreadFields {
        name: native
            .name()
            .unwrap_or_else(|| format!("Thread-{}", id)),
        priority: priority_from_native(native.priority()),
        group: registry.root_group().clone(),
        handler: None,
        stillborn: None,
        body: None,
        inherited: registry.root_values(),
    };
    let thread = ManagedThread::new(id, registry.clone(), daemon, None, fields);

    let lifecycle = Lifecycle::new(NativeHandle::new(&native), !daemon, true);
    if thread.lifecycle.set(lifecycle).is_ok() && !daemon {
        registry.thread_started();
    }
    registry.root_group().add_thread(&thread);

    tracing::debug!(
        thread_id = id,
        native_id = native.id(),
        daemon,
        "adopted foreign thread"
    );
    thread
}

/// Bind `thread` as the caller's managed identity. Returns false during
/// thread-local teardown.
pub(crate) fn install_current(thread: Arc<ManagedThread>) -> bool {
    CURRENT
        .try_with(|slot| *slot.borrow_mut() = Some(thread))
        .is_ok()
}

pub(crate) fn cached_current() -> Option<Arc<ManagedThread>> {
    CURRENT.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

/// Whether `thread` is the caller's managed identity.
pub(crate) fn is_current(thread: &ManagedThread) -> bool {
    CURRENT
        .try_with(|slot| {
            slot.borrow()
                .as_ref()
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), thread))
        })
        .unwrap_or(false)
}

/// Detach the caller's managed identity ahead of OS thread exit.
///
/// The thread is marked dead and anyone joining it is woken. The next call
/// to [`current_thread`] on this OS thread adopts a fresh identity.
pub fn detach_current() {
    let Some(thread) = CURRENT.try_with(|slot| slot.borrow_mut().take()).ok().flatten() else {
        return;
    };
    thread.detach();
    let _ = CLEANUP.try_with(|slot| slot.borrow_mut().take());
}
