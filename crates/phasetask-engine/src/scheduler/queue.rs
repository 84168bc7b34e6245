//! One-shot continuation queue
//!
//! Each phase owns one queue. A drain swaps the active buffer out before
//! running it, so continuations enqueued while the batch runs land in the
//! fresh buffer and run on the next drain, never the current one.

use crate::error::Fault;
use crate::task::Continuation;
use std::cell::RefCell;
use std::mem;
use std::panic::{self, AssertUnwindSafe};

struct QueueBuffers {
    /// Receives new continuations
    active: Vec<Continuation>,
    /// Emptied batch kept for its capacity
    spare: Vec<Continuation>,
}

/// FIFO of continuations run once on the next drain
pub struct ContinuationQueue {
    buffers: RefCell<QueueBuffers>,
}

impl ContinuationQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty queue whose buffers start with `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: RefCell::new(QueueBuffers {
                active: Vec::with_capacity(capacity),
                spare: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Enqueue for the next drain
    pub fn push(&self, continuation: Continuation) {
        self.buffers.borrow_mut().active.push(continuation);
    }

    /// Continuations waiting for the next drain
    pub fn len(&self) -> usize {
        self.buffers.borrow().active.len()
    }

    /// Whether nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove everything waiting without running it
    pub fn take_all(&self) -> Vec<Continuation> {
        mem::take(&mut self.buffers.borrow_mut().active)
    }

    /// Drop everything waiting
    pub fn clear(&self) {
        // Drop outside the borrow: a continuation's captures may touch this queue
        drop(self.take_all());
    }

    /// Run the current batch in FIFO order and return how many ran
    ///
    /// A panicking continuation is reported to `on_panic` and the batch
    /// continues with the next one.
    pub fn run(&self, on_panic: &dyn Fn(Fault)) -> usize {
        self.run_until(on_panic, &|| false)
    }

    /// `run`, but once `halted` reports true the rest of the batch only
    /// resumes drivers; callbacks are dropped without running
    ///
    /// Returns how many continuations ran.
    pub fn run_until(&self, on_panic: &dyn Fn(Fault), halted: &dyn Fn() -> bool) -> usize {
        let mut batch = {
            let mut buffers = self.buffers.borrow_mut();
            let spare = mem::take(&mut buffers.spare);
            mem::replace(&mut buffers.active, spare)
        };
        let mut count = 0;

        for continuation in batch.drain(..) {
            if !continuation.is_resume() && halted() {
                drop(continuation);
                continue;
            }
            count += 1;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation.invoke())) {
                on_panic(Fault::from_panic(payload));
            }
        }

        let mut buffers = self.buffers.borrow_mut();
        if batch.capacity() > buffers.spare.capacity() {
            buffers.spare = batch;
        }
        count
    }
}

impl Default for ContinuationQueue {
    fn default() -> Self {
        Self::new()
    }
}
