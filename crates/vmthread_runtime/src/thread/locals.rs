//! Inheritable per-thread values.

use std::{
    any::Any,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use super::adopt::current_thread;
use crate::registry::Registry;

/// Values a thread hands down to the threads it creates, keyed by local.
pub(crate) type InheritedValues = HashMap<u64, Arc<dyn Any + Send + Sync>>;

static NEXT_LOCAL_KEY: AtomicU64 = AtomicU64::new(1);

/// A per-thread value copied from creator to child at thread construction.
///
/// Later writes in either thread are not seen by the other.
pub struct InheritableLocal<T> {
    key: u64,
    initial: T,
}

impl<T> InheritableLocal<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            key: NEXT_LOCAL_KEY.fetch_add(1, Ordering::Relaxed),
            initial,
        }
    }

    /// The current thread's value, or the initial value if never set.
    pub fn get(&self) -> T {
        let thread = current_thread();
        let fields = thread.fields();
        fields
            .inherited
            .get(&self.key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| self.initial.clone())
    }

    pub fn set(&self, value: T) {
        current_thread()
            .fields()
            .inherited
            .insert(self.key, Arc::new(value));
    }

    /// Set the value threads adopted into `registry` start with.
    pub fn set_root(&self, registry: &Registry, value: T) {
        registry.root_values_mut().insert(self.key, Arc::new(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::thread::ThreadBuilder;
    use std::sync::mpsc;

    #[test]
    fn unset_local_reads_initial() {
        let local = InheritableLocal::new(7u32);
        assert_eq!(local.get(), 7);
        local.set(9);
        assert_eq!(local.get(), 9);
    }

    #[test]
    fn child_copies_creator_value() {
        let local = Arc::new(InheritableLocal::new(String::from("none")));
        local.set("parent".to_string());

        let registry = Registry::new(RuntimeConfig::default());
        let (tx, rx) = mpsc::channel();
        let child_local = local.clone();
        let child = ThreadBuilder::new()
            .registry(registry)
            .spawn(move || {
                let seen = child_local.get();
                child_local.set("child".to_string());
                tx.send(seen).ok();
                Ok(())
            })
            .unwrap();
        child.join(0, 0).unwrap();

        assert_eq!(rx.recv().unwrap(), "parent");
        assert_eq!(local.get(), "parent");
    }

    #[test]
    fn root_values_are_kept_per_registry() {
        let local = InheritableLocal::new(0i64);
        let registry = Registry::new(RuntimeConfig::default());
        local.set_root(&registry, 42);
        let values = registry.root_values();
        let stored = values.get(&local.key).and_then(|v| v.downcast_ref::<i64>());
        assert_eq!(stored, Some(&42));
    }
}
