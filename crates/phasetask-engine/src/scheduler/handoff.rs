//! Main-thread hand-off
//!
//! The pump and everything it owns is `!Send`. Other threads reach it through
//! a `MainThreadSender`: posted closures travel over a crossbeam channel and
//! are moved into their phase's continuation queue at the start of that
//! phase's next drain.

use crate::error::TaskError;
use crate::phase::{Phase, PhaseSet};
use crossbeam::channel::{self, Receiver, Sender};
use std::fmt;
use std::thread::{self, ThreadId};

/// Work posted from another thread
pub(crate) struct Posted {
    pub(crate) phase: Phase,
    pub(crate) work: Box<dyn FnOnce() + Send>,
}

/// Cloneable, `Send` handle for scheduling work onto the frame-loop thread
#[derive(Clone)]
pub struct MainThreadSender {
    tx: Sender<Posted>,
    main: ThreadId,
    phases: PhaseSet,
}

impl MainThreadSender {
    /// Run `work` on the frame-loop thread at the next drain of `phase`
    ///
    /// Fails with `InvalidPhase` if the pump does not drive `phase`, and with
    /// `ShutDown` once the pump has been torn down.
    pub fn post(&self, phase: Phase, work: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        if !self.phases.contains(phase) {
            return Err(TaskError::InvalidPhase(phase));
        }
        self.tx
            .send(Posted {
                phase,
                work: Box::new(work),
            })
            .map_err(|_| {
                tracing::warn!(%phase, "work posted to a pump that has shut down");
                TaskError::ShutDown
            })
    }

    /// Id of the frame-loop thread
    pub fn main_thread_id(&self) -> ThreadId {
        self.main
    }

    /// Whether the caller is on the frame-loop thread
    pub fn is_on_main_thread(&self) -> bool {
        thread::current().id() == self.main
    }
}

impl fmt::Debug for MainThreadSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainThreadSender")
            .field("main", &self.main)
            .field("phases", &self.phases)
            .finish_non_exhaustive()
    }
}

/// Receiving end owned by the pump
pub(crate) struct Inbox {
    rx: Receiver<Posted>,
    tx: Sender<Posted>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { rx, tx }
    }

    pub(crate) fn sender(&self, main: ThreadId, phases: PhaseSet) -> MainThreadSender {
        MainThreadSender {
            tx: self.tx.clone(),
            main,
            phases,
        }
    }

    /// Everything posted so far
    pub(crate) fn drain(&self) -> Vec<Posted> {
        self.rx.try_iter().collect()
    }
}
