//! Suspendable frames and the context they are stepped with

use crate::cancel::CancelToken;
use crate::error::TaskError;
use crate::phase::Phase;
use crate::scheduler::LoopPump;
use crate::task::continuation::{Resume, Resumer};
use std::cell::Cell;
use std::rc::Rc;

/// Result of stepping a frame once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T> {
    /// The frame registered a resumption and is waiting
    Suspended,
    /// The frame finished with a value
    Completed(T),
}

/// The materialized state of one suspendable function
///
/// A frame is a plain value: its fields are the function's locals plus
/// whatever it needs to remember where to continue. `step` runs the
/// function from its current resume point until it either completes or
/// suspends. Before returning `Step::Suspended`, a frame must hand a
/// resumer to something that will fire it (a phase queue via
/// `StepContext::yield_to`, a task via `TaskHandle::poll_result`, ...).
///
/// `Default` is the idle state a pooled driver resets the frame to.
pub trait Frame: Default + 'static {
    /// Value produced on completion
    type Output: 'static;

    /// Run until the next suspension point or completion
    fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<Self::Output>, TaskError>;
}

/// Per-step access to the pump and to the driver's resumption entry point
pub struct StepContext<'a> {
    pump: &'a LoopPump,
    target: &'a Rc<dyn Resume>,
    version: u32,
    armed: &'a Cell<bool>,
    cancel: &'a CancelToken,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        pump: &'a LoopPump,
        target: &'a Rc<dyn Resume>,
        version: u32,
        armed: &'a Cell<bool>,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            pump,
            target,
            version,
            armed,
            cancel,
        }
    }

    /// The pump driving this task
    pub fn pump(&self) -> &LoopPump {
        self.pump
    }

    /// The task's cancel token
    pub fn cancel_token(&self) -> &CancelToken {
        self.cancel
    }

    /// `Err(TaskError::Canceled)` if the task's token is canceled
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        self.cancel.error_if_canceled()
    }

    /// Resumer for the current suspension
    ///
    /// Every resumer made during one step carries the same version; the
    /// first one to fire resumes the frame and the rest become stale.
    pub fn resumer(&mut self) -> Resumer {
        self.armed.set(true);
        Resumer::new(Rc::clone(self.target), self.version)
    }

    /// Resume this frame at the next drain of `phase`
    pub fn yield_to(&mut self, phase: Phase) -> Result<(), TaskError> {
        let resumer = self.resumer();
        self.pump.add_continuation(phase, resumer)
    }

    /// Resume this frame in the deferred lane, after the host flushes structural changes
    pub fn yield_deferred(&mut self) -> Result<(), TaskError> {
        let resumer = self.resumer();
        self.pump.add_deferred_continuation(resumer)
    }
}
