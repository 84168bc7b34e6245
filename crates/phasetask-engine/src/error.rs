//! Engine error types

use crate::phase::Phase;
use std::any::Any;
use std::error::Error;
use std::fmt;

/// Errors surfaced by tasks, completion sources and the loop pump
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task's frame returned an error or panicked
    #[error("Task faulted: {0}")]
    Faulted(Fault),

    /// The task observed cancellation at a suspension point
    #[error("Task canceled")]
    Canceled,

    /// Scheduling or ticking against a phase the pump does not drive
    #[error("Phase {0} is not wired to the loop pump")]
    InvalidPhase(Phase),

    /// The loop pump has been torn down
    #[error("Loop pump is shut down")]
    ShutDown,

    /// The token belongs to an earlier use of a recycled completion source
    #[error("Stale completion token: expected version {expected}, got {actual}")]
    StaleToken {
        /// Current version of the source
        expected: u32,
        /// Version carried by the caller
        actual: u32,
    },

    /// The result was requested before the source completed
    #[error("Result not completed yet")]
    NotCompleted,

    /// The result was already consumed
    #[error("Result already consumed")]
    AlreadyConsumed,
}

impl TaskError {
    /// Wrap an arbitrary error as a fault
    pub fn fault<E: Error + 'static>(error: E) -> Self {
        TaskError::Faulted(Fault::new(error))
    }

    /// Whether this error represents a cancellation (including pump shutdown)
    pub fn is_canceled(&self) -> bool {
        matches!(self, TaskError::Canceled | TaskError::ShutDown)
    }

    /// Convert into the fault stored by a completion source
    pub(crate) fn into_fault(self) -> Fault {
        match self {
            TaskError::Faulted(fault) => fault,
            other => Fault::new(other),
        }
    }
}

impl From<Fault> for TaskError {
    fn from(fault: Fault) -> Self {
        TaskError::Faulted(fault)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);

#[derive(Debug, thiserror::Error)]
#[error("panicked: {0}")]
struct Panicked(String);

/// An error that escaped a task's frame
///
/// Wraps any `std::error::Error`, or the payload of a panic caught while
/// stepping a frame or running a queued callback.
pub struct Fault {
    inner: Box<dyn Error + 'static>,
}

impl Fault {
    /// Wrap an error
    pub fn new<E: Error + 'static>(error: E) -> Self {
        Self {
            inner: Box::new(error),
        }
    }

    /// Create a fault from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Create a fault from a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::new(Panicked(message))
    }

    /// Whether this fault was produced by a panic
    pub fn is_panic(&self) -> bool {
        self.inner.is::<Panicked>()
    }

    /// Borrow the wrapped error as a concrete type
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.inner).finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct DiskError;

    #[test]
    fn test_fault_from_error() {
        let fault = Fault::new(DiskError);
        assert_eq!(fault.to_string(), "disk on fire");
        assert!(fault.downcast_ref::<DiskError>().is_some());
        assert!(!fault.is_panic());
    }

    #[test]
    fn test_fault_from_panic_payload() {
        let payload = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        let fault = Fault::from_panic(payload);
        assert!(fault.is_panic());
        assert_eq!(fault.to_string(), "panicked: boom");

        let payload = std::panic::catch_unwind(|| panic!("code {}", 7)).unwrap_err();
        assert_eq!(Fault::from_panic(payload).to_string(), "panicked: code 7");
    }

    #[test]
    fn test_into_fault_keeps_faulted_inner() {
        let err = TaskError::fault(DiskError);
        let fault = err.into_fault();
        assert!(fault.downcast_ref::<DiskError>().is_some());

        let fault = TaskError::NotCompleted.into_fault();
        assert!(fault.downcast_ref::<TaskError>().is_some());
    }

    #[test]
    fn test_cancel_classification() {
        assert!(TaskError::Canceled.is_canceled());
        assert!(TaskError::ShutDown.is_canceled());
        assert!(!TaskError::InvalidPhase(Phase::Primary).is_canceled());
        assert!(!TaskError::from(Fault::msg("x")).is_canceled());
    }
}
