//! The managed thread identity, its builder, and priority mapping.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, OnceLock,
    },
};

use super::adopt::current_thread;
use super::group::{ThreadGroup, UncaughtExceptionHandler};
use super::lifecycle::Lifecycle;
use super::locals::InheritedValues;
use crate::error::{ThreadError, ThreadResult, Throwable};
use crate::lock;
use crate::native::NativePriority;
use crate::registry::Registry;

pub const MIN_PRIORITY: i32 = 1;
pub const NORM_PRIORITY: i32 = 5;
pub const MAX_PRIORITY: i32 = 10;

/// Global managed thread ID counter.
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_thread_id() -> u64 {
    NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed)
}

/// Map a managed priority onto the host's five levels.
pub fn priority_to_native(priority: i32) -> NativePriority {
    if priority <= MIN_PRIORITY {
        NativePriority::Lowest
    } else if priority < NORM_PRIORITY {
        NativePriority::BelowNormal
    } else if priority == NORM_PRIORITY {
        NativePriority::Normal
    } else if priority < MAX_PRIORITY {
        NativePriority::AboveNormal
    } else {
        NativePriority::Highest
    }
}

/// Map a host priority level onto the managed scale (used for adoption).
pub fn priority_from_native(priority: NativePriority) -> i32 {
    match priority {
        NativePriority::Lowest => MIN_PRIORITY,
        NativePriority::BelowNormal => 3,
        NativePriority::Normal => NORM_PRIORITY,
        NativePriority::AboveNormal => 7,
        NativePriority::Highest => MAX_PRIORITY,
    }
}

fn check_priority(priority: i32) -> ThreadResult<()> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(ThreadError::IllegalArgument(format!(
            "priority {} outside {}..={}",
            priority, MIN_PRIORITY, MAX_PRIORITY
        )))
    }
}

/// The body a managed thread runs.
pub(crate) type ThreadBody = Box<dyn FnOnce() -> Result<(), Throwable> + Send + 'static>;

/// Fields guarded by the thread lock.
pub(crate) struct ThreadFields {
    pub(crate) name: String,
    pub(crate) priority: i32,
    pub(crate) group: Arc<ThreadGroup>,
    pub(crate) handler: Option<Arc<dyn UncaughtExceptionHandler>>,
    /// Raised by `run` instead of the body when set before the body starts.
    pub(crate) stillborn: Option<Throwable>,
    pub(crate) body: Option<ThreadBody>,
    pub(crate) inherited: InheritedValues,
}

/// A language-level thread.
///
/// Lifecycle operations (`start`, `join`, `interrupt`, `stop`, ...) live in
/// [`super::lifecycle`]; adoption of foreign threads in [`super::adopt`].
pub struct ManagedThread {
    id: u64,
    daemon: bool,
    stack_size: Option<usize>,
    registry: Arc<Registry>,
    fields: Mutex<ThreadFields>,
    pub(crate) lifecycle: OnceLock<Lifecycle>,
}

impl fmt::Debug for ManagedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedThread")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("daemon", &self.daemon)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl ManagedThread {
    pub(crate) fn new(
        id: u64,
        registry: Arc<Registry>,
        daemon: bool,
        stack_size: Option<usize>,
        fields: ThreadFields,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            daemon,
            stack_size,
            registry,
            fields: Mutex::new(fields),
            lifecycle: OnceLock::new(),
        })
    }

    /// Start building a new thread.
    pub fn builder() -> ThreadBuilder {
        ThreadBuilder::new()
    }

    /// The thread lock.
    pub(crate) fn fields(&self) -> MutexGuard<'_, ThreadFields> {
        lock(&self.fields)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        self.fields().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let name = name.into();
        let mut fields = self.fields();
        if let Some(native) = self.native_thread() {
            native.set_name(Some(name.clone()));
        }
        fields.name = name;
    }

    pub fn priority(&self) -> i32 {
        self.fields().priority
    }

    /// Change the priority; values outside `MIN_PRIORITY..=MAX_PRIORITY`
    /// are rejected.
    pub fn set_priority(&self, priority: i32) -> ThreadResult<()> {
        check_priority(priority)?;
        let mut fields = self.fields();
        fields.priority = priority;
        if let Some(native) = self.native_thread() {
            native.set_priority(priority_to_native(priority));
        }
        Ok(())
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub(crate) fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn group(&self) -> Arc<ThreadGroup> {
        self.fields().group.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn uncaught_exception_handler(&self) -> Option<Arc<dyn UncaughtExceptionHandler>> {
        self.fields().handler.clone()
    }

    pub fn set_uncaught_exception_handler(&self, handler: Option<Arc<dyn UncaughtExceptionHandler>>) {
        self.fields().handler = handler;
    }

    /// Whether the thread has been started (or adopted).
    pub fn is_started(&self) -> bool {
        self.lifecycle.get().is_some()
    }

    /// Whether the thread is started and not yet cleaned up.
    pub fn is_alive(&self) -> bool {
        self.lifecycle.get().is_some_and(Lifecycle::is_attached)
    }

    pub(crate) fn inherited_values(&self) -> InheritedValues {
        self.fields().inherited.clone()
    }
}

/// Builder for [`ManagedThread`].
///
/// Unset attributes are inherited from the creating thread: priority,
/// daemon status, group (when in the same registry), registry, and
/// inheritable values.
#[derive(Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    priority: Option<i32>,
    daemon: Option<bool>,
    group: Option<Arc<ThreadGroup>>,
    handler: Option<Arc<dyn UncaughtExceptionHandler>>,
    stack_size: Option<usize>,
    registry: Option<Arc<Registry>>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = Some(daemon);
        self
    }

    pub fn group(mut self, group: Arc<ThreadGroup>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn uncaught_exception_handler(mut self, handler: Arc<dyn UncaughtExceptionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Account the thread in `registry` instead of the creator's.
    pub fn registry(mut self, registry: Arc<Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Build an unstarted thread.
    pub fn build<F>(self, body: F) -> ThreadResult<Arc<ManagedThread>>
    where
        F: FnOnce() -> Result<(), Throwable> + Send + 'static,
    {
        let creator = current_thread();
        let registry = self
            .registry
            .unwrap_or_else(|| creator.registry().clone());

        let priority = self.priority.unwrap_or_else(|| creator.priority());
        check_priority(priority)?;

        let daemon = self.daemon.unwrap_or_else(|| creator.is_daemon());
        let group = self.group.unwrap_or_else(|| {
            if Arc::ptr_eq(creator.registry(), &registry) {
                creator.group()
            } else {
                registry.root_group().clone()
            }
        });

        let id = next_thread_id();
        let fields = ThreadFields {
            name: self.name.unwrap_or_else(|| format!("Thread-{}", id)),
            priority,
            group,
            handler: self.handler,
            stillborn: None,
            body: Some(Box::new(body)),
            inherited: creator.inherited_values(),
        };

        Ok(ManagedThread::new(id, registry, daemon, self.stack_size, fields))
    }

    /// Build and start the thread.
    pub fn spawn<F>(self, body: F) -> ThreadResult<Arc<ManagedThread>>
    where
        F: FnOnce() -> Result<(), Throwable> + Send + 'static,
    {
        let thread = self.build(body)?;
        thread.start()?;
        Ok(thread)
    }
}
