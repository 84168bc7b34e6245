//! One-shot continuations and driver resumers

use std::fmt;
use std::rc::Rc;

/// A target that can be resumed at a given version
///
/// Implemented by frame drivers. The version is the one captured when the
/// resumer was created; a target must ignore versions that are no longer
/// current, which is what makes recycled drivers safe to resume late.
pub trait Resume {
    /// Resume if `version` is still current
    fn resume(&self, version: u32);
}

/// Handle that resumes one suspension of a driver
///
/// Cloning is a reference-count bump, so registering a resumer in a phase
/// queue or on a completion source does not allocate.
#[derive(Clone)]
pub struct Resumer {
    target: Rc<dyn Resume>,
    version: u32,
}

impl Resumer {
    /// Create a resumer for `target` at `version`
    pub fn new(target: Rc<dyn Resume>, version: u32) -> Self {
        Self { target, version }
    }

    /// Version captured at creation
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Resume the target
    pub fn fire(self) {
        self.target.resume(self.version);
    }
}

impl fmt::Debug for Resumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resumer")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Work queued to run once: a driver resumption or an arbitrary callback
pub enum Continuation {
    /// Resume a suspended frame driver
    Resume(Resumer),
    /// Run a callback
    Callback(Box<dyn FnOnce()>),
}

impl Continuation {
    /// Wrap a closure
    pub fn callback(f: impl FnOnce() + 'static) -> Self {
        Continuation::Callback(Box::new(f))
    }

    /// Whether this continuation resumes a driver
    pub fn is_resume(&self) -> bool {
        matches!(self, Continuation::Resume(_))
    }

    /// Run the continuation
    pub fn invoke(self) {
        match self {
            Continuation::Resume(resumer) => resumer.fire(),
            Continuation::Callback(callback) => callback(),
        }
    }
}

impl From<Resumer> for Continuation {
    fn from(resumer: Resumer) -> Self {
        Continuation::Resume(resumer)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Continuation::Resume(resumer) => f.debug_tuple("Resume").field(resumer).finish(),
            Continuation::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}
