//! Error types for the thread runtime.

use std::fmt;
use std::io;

use thiserror::Error;

/// Category of a [`Throwable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ThrowableKind {
    /// The terminal category: the only kind that may be delivered to another
    /// thread asynchronously via `stop`.
    ThreadDeath,
    /// An interrupted blocking call that the body did not handle.
    Interrupted,
    /// A Rust panic caught at the thread boundary.
    Panic,
    /// Any other user-defined failure, identified by name.
    Exception(String),
}

/// A failure raised inside a managed thread's body.
///
/// Bodies return `Result<(), Throwable>`; whatever escapes is routed to the
/// thread's uncaught-exception handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Throwable {
    kind: ThrowableKind,
    message: Option<String>,
}

impl Throwable {
    pub fn new(kind: ThrowableKind, message: Option<String>) -> Self {
        Self { kind, message }
    }

    /// The terminal throwable used to stop another thread.
    pub fn thread_death() -> Self {
        Self::new(ThrowableKind::ThreadDeath, None)
    }

    /// A named exception with a message.
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ThrowableKind::Exception(name.into()), Some(message.into()))
    }

    pub(crate) fn panic(message: String) -> Self {
        Self::new(ThrowableKind::Panic, Some(message))
    }

    pub fn kind(&self) -> &ThrowableKind {
        &self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Whether this throwable belongs to the terminal category.
    pub fn is_terminal(&self) -> bool {
        self.kind == ThrowableKind::ThreadDeath
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.kind {
            ThrowableKind::ThreadDeath => "ThreadDeath",
            ThrowableKind::Interrupted => "Interrupted",
            ThrowableKind::Panic => "Panic",
            ThrowableKind::Exception(name) => name,
        };
        match &self.message {
            Some(msg) => write!(f, "{}: {}", name, msg),
            None => f.write_str(name),
        }
    }
}

impl std::error::Error for Throwable {}

impl From<ThreadError> for Throwable {
    fn from(err: ThreadError) -> Self {
        match err {
            ThreadError::Stopped(t) => t,
            ThreadError::Interrupted => Throwable::new(ThrowableKind::Interrupted, None),
            ThreadError::IllegalArgument(msg) => {
                Throwable::exception("IllegalArgument", msg)
            }
            ThreadError::IllegalThreadState(msg) => {
                Throwable::exception("IllegalThreadState", msg)
            }
            other => Throwable::exception("ThreadError", other.to_string()),
        }
    }
}

/// Failures reported by the host threading layer.
#[derive(Debug, Error)]
pub enum NativeError {
    #[error("native wait interrupted")]
    Interrupted,

    #[error("native thread aborted: {0}")]
    Aborted(Throwable),

    #[error("native thread is suspended")]
    Suspended,

    #[error("native thread is not suspended")]
    NotSuspended,

    #[error("native thread is not alive")]
    NotAlive,

    #[error("native thread already started")]
    AlreadyStarted,

    #[error("calling thread does not own the monitor")]
    NotOwner,

    #[error("timeout exceeds the native maximum")]
    TimeoutOutOfRange,

    #[error("failed to spawn native thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Errors surfaced by lifecycle operations.
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("thread interrupted")]
    Interrupted,

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal thread state: {0}")]
    IllegalThreadState(String),

    #[error("current thread does not own the monitor")]
    InvalidMonitorState,

    #[error("native state conflict: {0}")]
    NativeStateConflict(NativeError),

    #[error("thread stopped: {0}")]
    Stopped(Throwable),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

impl From<NativeError> for ThreadError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::Interrupted => ThreadError::Interrupted,
            NativeError::Aborted(t) => ThreadError::Stopped(t),
            NativeError::NotOwner => ThreadError::InvalidMonitorState,
            NativeError::Spawn(io) => ThreadError::Spawn(io),
            other => ThreadError::NativeStateConflict(other),
        }
    }
}

/// Result type for lifecycle operations.
pub type ThreadResult<T> = Result<T, ThreadError>;

/// Result type for host-layer operations.
pub type NativeResult<T> = Result<T, NativeError>;
