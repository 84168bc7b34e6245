//! Consumer side of a task

use crate::error::TaskError;
use crate::task::completion::Status;
use crate::task::continuation::Continuation;
use crate::task::frame::StepContext;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;

/// Something a `TaskHandle` can observe
///
/// Every call carries the version token captured when the handle was made.
pub trait Source<T> {
    /// Status of the operation identified by `token`
    fn status(&self, token: u32) -> Result<Status, TaskError>;

    /// Take the result of the operation identified by `token`
    fn result(&self, token: u32) -> Result<T, TaskError>;

    /// Run `continuation` when the operation completes (inline if it has)
    fn on_completed(&self, token: u32, continuation: Continuation);

    /// The handle is gone; nobody will take the result
    fn detach(&self, token: u32);
}

/// Handle to the eventual result of a task
///
/// Dropping a handle without taking the result detaches the task: its
/// outcome is consumed by the driver when it completes, and a fault is
/// published to the pump's unhandled-fault sink.
pub struct TaskHandle<T> {
    source: Option<Rc<dyn Source<T>>>,
    token: u32,
}

impl<T> TaskHandle<T> {
    /// Create a handle observing `source` at `token`
    pub fn new(source: Rc<dyn Source<T>>, token: u32) -> Self {
        Self {
            source: Some(source),
            token,
        }
    }

    /// Version token of the observed operation
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Current status
    pub fn status(&self) -> Result<Status, TaskError> {
        match &self.source {
            Some(source) => source.status(self.token),
            None => Err(TaskError::AlreadyConsumed),
        }
    }

    /// Whether the task has completed (or the result was already taken)
    pub fn is_completed(&self) -> bool {
        match self.status() {
            Ok(status) => status.is_completed(),
            Err(_) => true,
        }
    }

    /// Run `continuation` once the task completes
    pub fn on_completed(&self, continuation: impl Into<Continuation>) {
        if let Some(source) = &self.source {
            source.on_completed(self.token, continuation.into());
        }
    }

    /// Take the result if the task has completed; `None` while pending
    pub fn take_result(&mut self) -> Option<Result<T, TaskError>> {
        let source = match &self.source {
            Some(source) => source,
            None => return Some(Err(TaskError::AlreadyConsumed)),
        };
        match source.status(self.token) {
            Ok(Status::Pending) => None,
            Ok(_) | Err(_) => {
                let source = self.source.take()?;
                Some(source.result(self.token))
            }
        }
    }

    /// Take the result, or `NotCompleted` (detaching the task) if still pending
    pub fn result(mut self) -> Result<T, TaskError> {
        self.take_result().unwrap_or(Err(TaskError::NotCompleted))
    }

    /// Take the result from inside a frame step
    ///
    /// While pending, registers the stepping frame's resumer so the frame is
    /// resumed as soon as the task completes.
    pub fn poll_result(&mut self, cx: &mut StepContext<'_>) -> Poll<Result<T, TaskError>> {
        if let Some(result) = self.take_result() {
            return Poll::Ready(result);
        }
        if let Some(source) = &self.source {
            source.on_completed(self.token, cx.resumer().into());
        }
        Poll::Pending
    }

    /// Stop observing the task
    pub fn detach(self) {}
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            source.detach(self.token);
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("token", &self.token)
            .field("status", &self.status().ok())
            .finish()
    }
}
