//! Process-wide thread registry: non-daemon accounting and shutdown wait.

use std::{
    sync::{Arc, Condvar, LazyLock, Mutex},
    time::{Duration, Instant},
};

use crate::config::RuntimeConfig;
use crate::lock;
use crate::thread::{current_thread, InheritedValues, ThreadGroup};

/// Name of every registry's root thread group.
pub const ROOT_GROUP_NAME: &str = "main";

/// Registry shared by the threads it accounts for.
///
/// The process-wide instance ([`Registry::global`]) is what foreign threads
/// are adopted into. Embedders and tests can build isolated registries with
/// [`Registry::new`] and hand them to [`crate::ThreadBuilder::registry`].
pub struct Registry {
    config: RuntimeConfig,
    non_daemon: Mutex<usize>,
    all_done: Condvar,
    root_group: Arc<ThreadGroup>,
    root_values: Mutex<InheritedValues>,
}

/// The global singleton instance.
static GLOBAL: LazyLock<Arc<Registry>> =
    LazyLock::new(|| Registry::new(RuntimeConfig::default()));

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("non_daemon", &self.non_daemon_count())
            .field("config", &self.config)
            .finish()
    }
}

impl Registry {
    pub fn new(config: RuntimeConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            non_daemon: Mutex::new(0),
            all_done: Condvar::new(),
            root_group: ThreadGroup::root(ROOT_GROUP_NAME),
            root_values: Mutex::new(InheritedValues::new()),
        })
    }

    /// Returns the process-wide registry.
    pub fn global() -> &'static Arc<Registry> {
        &GLOBAL
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn root_group(&self) -> &Arc<ThreadGroup> {
        &self.root_group
    }

    /// Number of live non-daemon threads accounted here.
    pub fn non_daemon_count(&self) -> usize {
        *lock(&self.non_daemon)
    }

    pub(crate) fn thread_started(&self) {
        *lock(&self.non_daemon) += 1;
    }

    pub(crate) fn thread_finished(&self) {
        let mut count = lock(&self.non_daemon);
        match count.checked_sub(1) {
            Some(n) => *count = n,
            None => tracing::warn!("non-daemon count released more often than acquired"),
        }
        if *count == 0 {
            self.all_done.notify_all();
        }
    }

    pub(crate) fn root_values(&self) -> InheritedValues {
        lock(&self.root_values).clone()
    }

    pub(crate) fn root_values_mut(&self) -> std::sync::MutexGuard<'_, InheritedValues> {
        lock(&self.root_values)
    }

    /// Block until every non-daemon thread has finished.
    ///
    /// The calling thread's own slot is released first so it does not wait
    /// on itself.
    pub fn wait_until_last_thread(&self) {
        self.release_caller();
        let mut count = lock(&self.non_daemon);
        while *count > 0 {
            count = self
                .all_done
                .wait(count)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        tracing::debug!("last non-daemon thread finished");
    }

    /// Like [`Registry::wait_until_last_thread`], giving up after `timeout`.
    ///
    /// Returns whether the count reached zero.
    pub fn wait_until_last_thread_timeout(&self, timeout: Duration) -> bool {
        self.release_caller();
        let deadline = Instant::now() + timeout;
        let mut count = lock(&self.non_daemon);
        while *count > 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            count = self
                .all_done
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        true
    }

    fn release_caller(&self) {
        let current = current_thread();
        if std::ptr::eq(Arc::as_ptr(current.registry()), self) {
            current.release_non_daemon_slot();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_starts_empty_and_balances() {
        let registry = Registry::new(RuntimeConfig::default());
        assert_eq!(registry.non_daemon_count(), 0);
        registry.thread_started();
        registry.thread_started();
        registry.thread_finished();
        assert_eq!(registry.non_daemon_count(), 1);
        registry.thread_finished();
        assert_eq!(registry.non_daemon_count(), 0);
    }

    #[test]
    fn over_release_does_not_underflow() {
        let registry = Registry::new(RuntimeConfig::default());
        registry.thread_finished();
        assert_eq!(registry.non_daemon_count(), 0);
    }

    #[test]
    fn shutdown_wait_returns_when_empty() {
        let registry = Registry::new(RuntimeConfig::default());
        assert!(registry.wait_until_last_thread_timeout(Duration::from_millis(10)));
        registry.thread_started();
        assert!(!registry.wait_until_last_thread_timeout(Duration::from_millis(10)));
    }
}
