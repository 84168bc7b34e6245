//! Frame driver: binds one frame to the pool, the pump and a completion source

use crate::cancel::CancelToken;
use crate::error::{Fault, TaskError};
use crate::scheduler::pump::PumpCore;
use crate::scheduler::LoopPump;
use crate::sink;
use crate::task::completion::{CompletionSource, Status};
use crate::task::continuation::{Continuation, Resume};
use crate::task::frame::{Frame, Step, StepContext};
use crate::task::handle::Source;
use crate::task::pool::FramePool;
use std::any::type_name;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// Lifecycle state of a driver
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DriverState {
    /// In the pool, frame at its default
    Idle,
    /// Bound to a running or suspended task
    Active,
}

/// Reusable executor for frames of type `F`
///
/// The driver is the stable identity resumers point at. Each suspension is
/// identified by a resume version; only the first resumption carrying the
/// current version steps the frame, later or duplicate ones are dropped.
/// The completion source it owns is what `TaskHandle`s observe.
pub struct FrameDriver<F: Frame> {
    this: Weak<FrameDriver<F>>,
    pool: Weak<FramePool<F>>,
    pump: Weak<PumpCore>,

    /// Locals of the current invocation
    frame: RefCell<F>,

    /// Outcome of the current invocation
    completion: CompletionSource<F::Output>,

    state: Cell<DriverState>,

    /// Version the next resumption must carry
    resume_version: Cell<u32>,

    /// A resumer for the current suspension has been handed out
    armed: Cell<bool>,

    /// `frame.step` is on the stack
    stepping: Cell<bool>,

    /// A resumption arrived while stepping; step again once the current step returns
    rerun: Cell<bool>,

    /// Nobody will take the result
    detached: Cell<bool>,

    cancel: RefCell<CancelToken>,
}

impl<F: Frame> FrameDriver<F> {
    pub(crate) fn new(pool: Weak<FramePool<F>>, pump: Weak<PumpCore>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            this: this.clone(),
            pool,
            pump,
            frame: RefCell::new(F::default()),
            completion: CompletionSource::new(),
            state: Cell::new(DriverState::Idle),
            resume_version: Cell::new(0),
            armed: Cell::new(false),
            stepping: Cell::new(false),
            rerun: Cell::new(false),
            detached: Cell::new(false),
            cancel: RefCell::new(CancelToken::none()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        self.state.get()
    }

    /// The completion source of the current invocation
    pub fn completion(&self) -> &CompletionSource<F::Output> {
        &self.completion
    }

    /// Version the next resumption must carry
    pub fn resume_version(&self) -> u32 {
        self.resume_version.get()
    }

    /// Bind `frame` and run it to its first suspension point.
    ///
    /// Returns the completion token for the caller's handle.
    pub(crate) fn start(&self, frame: F, cancel: CancelToken, detached: bool) -> u32 {
        debug_assert_eq!(self.state.get(), DriverState::Idle);
        self.state.set(DriverState::Active);
        *self.frame.borrow_mut() = frame;
        *self.cancel.borrow_mut() = cancel;
        self.detached.set(detached);

        let token = self.completion.version();
        self.armed.set(true);
        self.resume(self.resume_version.get());
        token
    }

    /// Step the frame until it suspends without a pending rerun, or finishes.
    fn run(&self) {
        let target: Rc<dyn Resume> = match self.this.upgrade() {
            Some(this) => this as Rc<dyn Resume>,
            None => return,
        };
        let pump = match self.pump.upgrade() {
            Some(core) => LoopPump::from_core(core),
            None => return self.finish(Err(TaskError::ShutDown)),
        };
        let cancel = self.cancel.borrow().clone();

        loop {
            // Suspension point: cooperative cancellation is only observed here
            if pump.is_shut_down() {
                return self.finish(Err(TaskError::ShutDown));
            }
            if cancel.is_canceled() {
                return self.finish(Err(TaskError::Canceled));
            }

            let version = self.resume_version.get();
            self.stepping.set(true);
            let stepped = {
                let mut frame = self.frame.borrow_mut();
                let mut cx = StepContext::new(&pump, &target, version, &self.armed, &cancel);
                panic::catch_unwind(AssertUnwindSafe(|| frame.step(&mut cx)))
            };
            self.stepping.set(false);

            match stepped {
                Ok(Ok(Step::Suspended)) => {
                    if self.rerun.replace(false) {
                        continue;
                    }
                    if !self.armed.get() {
                        tracing::warn!(
                            shape = type_name::<F>(),
                            "frame suspended without registering a resumption"
                        );
                    }
                    return;
                }
                Ok(Ok(Step::Completed(value))) => return self.finish(Ok(value)),
                Ok(Err(error)) => return self.finish(Err(error)),
                Err(payload) => {
                    return self.finish(Err(TaskError::Faulted(Fault::from_panic(payload))))
                }
            }
        }
    }

    /// Reset the frame and publish the outcome.
    fn finish(&self, outcome: Result<F::Output, TaskError>) {
        drop(self.frame.replace(F::default()));
        self.armed.set(false);
        self.rerun.set(false);

        let detached = self.detached.get();
        let token = self.completion.version();
        match outcome {
            Ok(value) => {
                self.completion.try_set_result(value);
            }
            Err(error) if error.is_canceled() => {
                self.completion.try_set_canceled();
            }
            Err(error) => {
                self.completion.try_set_exception(error.into_fault());
            }
        }
        tracing::trace!(
            shape = type_name::<F>(),
            status = ?self.completion.current_status(),
            detached,
            "task finished"
        );

        if detached {
            self.consume_detached(token);
        }
    }

    /// Consume an unobserved outcome and go back to the pool.
    fn consume_detached(&self, token: u32) {
        match self.completion.get_result(token) {
            Ok(_) | Err(TaskError::Canceled) => {}
            Err(TaskError::Faulted(fault)) => self.publish_unhandled(fault),
            // Stale or already consumed: someone else owns the outcome
            Err(_) => return,
        }
        self.return_to_pool();
    }

    fn publish_unhandled(&self, fault: Fault) {
        match self.pump.upgrade() {
            Some(core) => LoopPump::from_core(core).publish_unhandled(fault),
            None => sink::log_unhandled(fault),
        }
    }

    fn return_to_pool(&self) {
        match (self.pool.upgrade(), self.this.upgrade()) {
            (Some(pool), Some(this)) => pool.release(this),
            _ => self.reset(),
        }
    }

    /// Invalidate every outstanding token and resumer and go idle.
    pub(crate) fn reset(&self) {
        self.state.set(DriverState::Idle);
        self.completion.reset();
        self.resume_version
            .set(self.resume_version.get().wrapping_add(1));
        self.armed.set(false);
        self.rerun.set(false);
        self.detached.set(false);
        *self.cancel.borrow_mut() = CancelToken::none();
    }

    /// Borrow the bound frame
    pub fn with_frame<R>(&self, f: impl FnOnce(&F) -> R) -> R {
        f(&self.frame.borrow())
    }
}

impl<F: Frame> Resume for FrameDriver<F> {
    fn resume(&self, version: u32) {
        if self.state.get() != DriverState::Active
            || !self.armed.get()
            || version != self.resume_version.get()
        {
            tracing::trace!(
                shape = type_name::<F>(),
                version,
                current = self.resume_version.get(),
                "dropping stale resumption"
            );
            return;
        }
        self.armed.set(false);
        self.resume_version.set(version.wrapping_add(1));

        if self.stepping.get() {
            self.rerun.set(true);
            return;
        }
        self.run();
    }
}

/// Type-erased handle the pump keeps on every driver it created
pub(crate) trait Abort {
    /// Complete a still-pending task as shut down; false if nothing was pending
    fn abort(&self) -> bool;
}

impl<F: Frame> Abort for FrameDriver<F> {
    fn abort(&self) -> bool {
        if self.state.get() != DriverState::Active
            || self.completion.current_status() != Status::Pending
        {
            return false;
        }
        if self.stepping.get() {
            // The run loop sees the shutdown once the current step returns
            self.rerun.set(true);
            return true;
        }
        self.finish(Err(TaskError::ShutDown));
        true
    }
}

impl<F: Frame> Source<F::Output> for FrameDriver<F> {
    fn status(&self, token: u32) -> Result<Status, TaskError> {
        self.completion.status(token)
    }

    fn result(&self, token: u32) -> Result<F::Output, TaskError> {
        let result = self.completion.get_result(token);
        match &result {
            Err(TaskError::StaleToken { .. })
            | Err(TaskError::NotCompleted)
            | Err(TaskError::AlreadyConsumed) => {}
            // The consumer has observed the outcome; recycle
            _ => self.return_to_pool(),
        }
        result
    }

    fn on_completed(&self, token: u32, continuation: Continuation) {
        self.completion.on_completed(token, continuation);
    }

    fn detach(&self, token: u32) {
        match self.completion.status(token) {
            Ok(Status::Pending) => self.detached.set(true),
            Ok(_) => self.consume_detached(token),
            Err(_) => {}
        }
    }
}
