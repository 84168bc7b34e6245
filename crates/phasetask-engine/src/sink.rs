//! Sink for faults nobody is waiting on
//!
//! Fire-and-forget tasks have no caller to propagate a fault to, and panics
//! inside queued callbacks have no task at all. Both are published here.
//! Cancellations are never published.

use crate::error::Fault;
use std::rc::Rc;

/// Receiver of unobserved faults
pub type UnhandledSink = Rc<dyn Fn(Fault)>;

/// Default sink: log and continue
pub fn log_unhandled(fault: Fault) {
    tracing::error!(error = %fault, panic = fault.is_panic(), "unhandled task fault");
}

/// The default sink as an `UnhandledSink`
pub fn default_sink() -> UnhandledSink {
    Rc::new(log_unhandled)
}
