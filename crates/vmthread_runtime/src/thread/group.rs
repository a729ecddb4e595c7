//! Thread groups and uncaught-exception handling.

use std::sync::{Arc, Mutex, Weak};

use super::managed::ManagedThread;
use crate::error::Throwable;
use crate::lock;

/// Receives throwables that escape a thread's body.
///
/// Handlers run on the dying thread. A panic inside a handler is discarded.
pub trait UncaughtExceptionHandler: Send + Sync {
    fn uncaught_exception(&self, thread: &ManagedThread, error: &Throwable);
}

impl<F> UncaughtExceptionHandler for F
where
    F: Fn(&ManagedThread, &Throwable) + Send + Sync,
{
    fn uncaught_exception(&self, thread: &ManagedThread, error: &Throwable) {
        self(thread, error)
    }
}

/// A named set of threads, forming a tree under a registry's root group.
///
/// Also the fallback handler for members without their own handler.
pub struct ThreadGroup {
    name: String,
    parent: Option<Arc<ThreadGroup>>,
    threads: Mutex<Vec<(u64, Weak<ManagedThread>)>>,
}

impl std::fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("name", &self.name)
            .field("active", &self.active_count())
            .finish()
    }
}

impl ThreadGroup {
    pub(crate) fn root(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            parent: None,
            threads: Mutex::new(Vec::new()),
        })
    }

    /// Create a child group.
    pub fn new(parent: &Arc<ThreadGroup>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            parent: Some(parent.clone()),
            threads: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<&Arc<ThreadGroup>> {
        self.parent.as_ref()
    }

    pub(crate) fn add_thread(&self, thread: &Arc<ManagedThread>) {
        let mut threads = lock(&self.threads);
        threads.retain(|(_, w)| w.strong_count() > 0);
        threads.push((thread.id(), Arc::downgrade(thread)));
    }

    pub(crate) fn remove_thread(&self, id: u64) {
        lock(&self.threads).retain(|(tid, _)| *tid != id);
    }

    /// Number of live member threads.
    pub fn active_count(&self) -> usize {
        lock(&self.threads)
            .iter()
            .filter(|(_, w)| w.strong_count() > 0)
            .count()
    }

    /// Snapshot of live member threads.
    pub fn threads(&self) -> Vec<Arc<ManagedThread>> {
        lock(&self.threads)
            .iter()
            .filter_map(|(_, w)| w.upgrade())
            .collect()
    }
}

impl UncaughtExceptionHandler for ThreadGroup {
    fn uncaught_exception(&self, thread: &ManagedThread, error: &Throwable) {
        if let Some(parent) = &self.parent {
            parent.uncaught_exception(thread, error);
        } else if !error.is_terminal() {
            tracing::error!(
                thread_id = thread.id(),
                thread = %thread.name(),
                %error,
                "uncaught exception in thread"
            );
        }
    }
}
