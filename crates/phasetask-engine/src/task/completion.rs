//! Versioned completion source
//!
//! A `CompletionSource` holds the eventual outcome of one operation and the
//! continuations waiting on it. It is reused across operations: `reset()`
//! bumps the version, and every accessor takes the version token the caller
//! captured when it subscribed. A token from before the reset no longer
//! matches, so a late caller can never read or be woken by the next
//! operation's outcome.

use crate::error::{Fault, TaskError};
use crate::task::continuation::Continuation;
use crate::task::handle::{Source, TaskHandle};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Observable state of a completion source
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Status {
    /// Not completed yet
    Pending,
    /// Completed with a value
    Succeeded,
    /// Completed with a fault
    Faulted,
    /// Completed by cancellation
    Canceled,
}

impl Status {
    /// Whether the source has left `Pending`
    pub fn is_completed(self) -> bool {
        self != Status::Pending
    }
}

enum Outcome<T> {
    Pending,
    Succeeded(T),
    Faulted(Fault),
    Canceled,
    /// Result handed out by `get_result`; remembers what it was
    Consumed(Status),
}

impl<T> Outcome<T> {
    fn status(&self) -> Status {
        match self {
            Outcome::Pending => Status::Pending,
            Outcome::Succeeded(_) => Status::Succeeded,
            Outcome::Faulted(_) => Status::Faulted,
            Outcome::Canceled => Status::Canceled,
            Outcome::Consumed(status) => *status,
        }
    }
}

/// Reusable, versioned holder of a result, fault or cancellation
pub struct CompletionSource<T> {
    version: Cell<u32>,
    outcome: RefCell<Outcome<T>>,
    continuations: RefCell<Vec<(u32, Continuation)>>,
}

impl<T> CompletionSource<T> {
    /// Create a pending source at version 0
    pub fn new() -> Self {
        Self {
            version: Cell::new(0),
            outcome: RefCell::new(Outcome::Pending),
            continuations: RefCell::new(Vec::new()),
        }
    }

    /// Current version; the token callers must present
    pub fn version(&self) -> u32 {
        self.version.get()
    }

    /// Status regardless of version
    pub fn current_status(&self) -> Status {
        self.outcome.borrow().status()
    }

    fn check(&self, token: u32) -> Result<(), TaskError> {
        let expected = self.version.get();
        if token == expected {
            Ok(())
        } else {
            Err(TaskError::StaleToken {
                expected,
                actual: token,
            })
        }
    }

    /// Status for the operation identified by `token`
    pub fn status(&self, token: u32) -> Result<Status, TaskError> {
        self.check(token)?;
        Ok(self.current_status())
    }

    /// Take the result for the operation identified by `token`
    ///
    /// Returns the value, or the stored fault/cancellation as an error. The
    /// result can be taken once; later calls return `AlreadyConsumed`.
    pub fn get_result(&self, token: u32) -> Result<T, TaskError> {
        self.check(token)?;
        let mut slot = self.outcome.borrow_mut();
        let status = slot.status();
        match std::mem::replace(&mut *slot, Outcome::Consumed(status)) {
            Outcome::Pending => {
                *slot = Outcome::Pending;
                Err(TaskError::NotCompleted)
            }
            Outcome::Succeeded(value) => Ok(value),
            Outcome::Faulted(fault) => Err(TaskError::Faulted(fault)),
            Outcome::Canceled => Err(TaskError::Canceled),
            Outcome::Consumed(_) => Err(TaskError::AlreadyConsumed),
        }
    }

    /// Complete with a value; false if already completed
    pub fn try_set_result(&self, value: T) -> bool {
        self.complete(Outcome::Succeeded(value))
    }

    /// Complete with a fault; false if already completed
    pub fn try_set_exception(&self, fault: Fault) -> bool {
        self.complete(Outcome::Faulted(fault))
    }

    /// Complete by cancellation; false if already completed
    pub fn try_set_canceled(&self) -> bool {
        self.complete(Outcome::Canceled)
    }

    fn complete(&self, outcome: Outcome<T>) -> bool {
        {
            let mut slot = self.outcome.borrow_mut();
            if !matches!(*slot, Outcome::Pending) {
                return false;
            }
            *slot = outcome;
        }

        let version = self.version.get();
        let mut waiting = std::mem::take(&mut *self.continuations.borrow_mut());
        for (registered, continuation) in waiting.drain(..) {
            if registered == version {
                continuation.invoke();
            } else {
                tracing::trace!(registered, version, "dropping stale continuation");
            }
        }

        // Keep the buffer's capacity for the next operation on this source.
        let mut slot = self.continuations.borrow_mut();
        if slot.is_empty() {
            *slot = waiting;
        }
        true
    }

    /// Run `continuation` when the operation identified by `token` completes
    ///
    /// Runs inline if it already has. Silently dropped if `token` is stale.
    pub fn on_completed(&self, token: u32, continuation: Continuation) {
        if token != self.version.get() {
            tracing::trace!(
                token,
                version = self.version.get(),
                "dropping continuation with stale token"
            );
            return;
        }
        if self.current_status().is_completed() {
            continuation.invoke();
            return;
        }
        self.continuations.borrow_mut().push((token, continuation));
    }

    /// Start a new operation: bump the version and discard state and continuations
    pub fn reset(&self) {
        self.version.set(self.version.get().wrapping_add(1));
        let previous = std::mem::replace(&mut *self.outcome.borrow_mut(), Outcome::Pending);
        let mut stale = std::mem::take(&mut *self.continuations.borrow_mut());
        stale.clear();
        drop(previous);

        let mut slot = self.continuations.borrow_mut();
        if slot.is_empty() {
            *slot = stale;
        }
    }

    /// Number of continuations waiting on the current operation
    pub fn waiting_count(&self) -> usize {
        self.continuations.borrow().len()
    }
}

impl<T: 'static> CompletionSource<T> {
    /// Handle for the current operation of a shared source
    pub fn handle(self: &Rc<Self>) -> TaskHandle<T> {
        let token = self.version();
        TaskHandle::new(Rc::clone(self) as Rc<dyn Source<T>>, token)
    }
}

impl<T> Default for CompletionSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Source<T> for CompletionSource<T> {
    fn status(&self, token: u32) -> Result<Status, TaskError> {
        CompletionSource::status(self, token)
    }

    fn result(&self, token: u32) -> Result<T, TaskError> {
        self.get_result(token)
    }

    fn on_completed(&self, token: u32, continuation: Continuation) {
        CompletionSource::on_completed(self, token, continuation)
    }

    fn detach(&self, _token: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() -> Continuation) {
        let hits = Rc::new(Cell::new(0));
        let h = hits.clone();
        let make = move || {
            let h = h.clone();
            Continuation::callback(move || h.set(h.get() + 1))
        };
        (hits, make)
    }

    #[test]
    fn test_set_result_once() {
        let source = CompletionSource::new();
        assert!(source.try_set_result(1));
        assert!(!source.try_set_result(2));
        assert!(!source.try_set_exception(Fault::msg("late")));
        assert!(!source.try_set_canceled());

        assert_eq!(source.status(0).unwrap(), Status::Succeeded);
        assert_eq!(source.get_result(0).unwrap(), 1);
    }

    #[test]
    fn test_result_consumed_once() {
        let source = CompletionSource::new();
        assert!(matches!(source.get_result(0), Err(TaskError::NotCompleted)));

        source.try_set_result("done");
        assert_eq!(source.get_result(0).unwrap(), "done");
        assert!(matches!(
            source.get_result(0),
            Err(TaskError::AlreadyConsumed)
        ));
        // Status still reports how it completed
        assert_eq!(source.status(0).unwrap(), Status::Succeeded);
    }

    #[test]
    fn test_fault_and_cancel_are_raised() {
        let source: CompletionSource<u8> = CompletionSource::new();
        source.try_set_exception(Fault::msg("bad input"));
        assert_eq!(source.current_status(), Status::Faulted);
        match source.get_result(0) {
            Err(TaskError::Faulted(fault)) => assert_eq!(fault.to_string(), "bad input"),
            other => panic!("Expected fault, got {:?}", other),
        }

        source.reset();
        source.try_set_canceled();
        assert!(matches!(source.get_result(1), Err(TaskError::Canceled)));
    }

    #[test]
    fn test_continuations_fire_on_completion() {
        let (hits, make) = counter();
        let source = CompletionSource::new();
        source.on_completed(0, make());
        source.on_completed(0, make());
        assert_eq!(source.waiting_count(), 2);
        assert_eq!(hits.get(), 0);

        source.try_set_result(());
        assert_eq!(hits.get(), 2);
        assert_eq!(source.waiting_count(), 0);
    }

    #[test]
    fn test_continuation_runs_inline_when_completed() {
        let (hits, make) = counter();
        let source = CompletionSource::new();
        source.try_set_result(5);

        source.on_completed(0, make());
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_reset_invalidates_registered_continuation() {
        let (hits, make) = counter();
        let source = CompletionSource::new();
        let token = source.version();
        source.on_completed(token, make());

        source.reset();
        source.try_set_result(1);
        assert_eq!(hits.get(), 0);

        // Registering with the old token after the reset is dropped too
        source.on_completed(token, make());
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn test_stale_token_rejected() {
        let source = CompletionSource::new();
        source.reset();
        source.try_set_result(3);

        match source.status(0) {
            Err(TaskError::StaleToken { expected, actual }) => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 0);
            }
            other => panic!("Expected stale token, got {:?}", other),
        }
        assert!(matches!(
            source.get_result(0),
            Err(TaskError::StaleToken { .. })
        ));
        assert_eq!(source.get_result(1).unwrap(), 3);
    }

    #[test]
    fn test_version_wraps() {
        let source: CompletionSource<()> = CompletionSource::new();
        source.version.set(u32::MAX);
        source.reset();
        assert_eq!(source.version(), 0);
    }

    #[test]
    fn test_continuation_may_consume_result() {
        let source = Rc::new(CompletionSource::new());
        let seen = Rc::new(Cell::new(0));
        let (s, v) = (source.clone(), seen.clone());
        source.on_completed(
            0,
            Continuation::callback(move || v.set(s.get_result(0).unwrap())),
        );
        source.try_set_result(42);
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn test_handle_reads_result() {
        let source = Rc::new(CompletionSource::new());
        let handle = source.handle();
        assert!(!handle.is_completed());
        source.try_set_result(8u64);
        assert_eq!(handle.result().unwrap(), 8);
    }
}
