//! Phasetask Engine
//!
//! Frame-synchronous task runtime for hosts that run a per-frame loop:
//! - **Tasks**: pooled frame drivers, versioned completion sources and the
//!   handles callers await (`task` module)
//! - **Scheduler**: per-phase continuation queues, repeating-item runners and
//!   the loop pump that drains them once per host tick (`scheduler` module)
//! - **Cancellation**: cooperative cancel tokens and the global cancel epoch
//!
//! # Example
//!
//! ```rust,ignore
//! use phasetask_engine::{Frame, LoopPump, Phase, Step, StepContext, TaskError};
//!
//! #[derive(Default)]
//! struct WaitTwoFrames {
//!     waited: u32,
//! }
//!
//! impl Frame for WaitTwoFrames {
//!     type Output = u32;
//!
//!     fn step(&mut self, cx: &mut StepContext<'_>) -> Result<Step<u32>, TaskError> {
//!         if self.waited == 2 {
//!             return Ok(Step::Completed(self.waited));
//!         }
//!         self.waited += 1;
//!         cx.yield_to(Phase::Primary)?;
//!         Ok(Step::Suspended)
//!     }
//! }
//!
//! let pump = LoopPump::new();
//! let handle = pump.spawn(WaitTwoFrames::default());
//! pump.tick(Phase::Primary)?;
//! pump.tick(Phase::Primary)?;
//! assert_eq!(handle.result()?, 2);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

// ============================================================================
// Core Modules
// ============================================================================

/// Cooperative cancellation tokens and the cancel epoch
pub mod cancel;

/// Default configuration constants
pub mod defaults;

/// Engine error types
pub mod error;

/// Host frame-loop phases
pub mod phase;

/// Scheduler module: phase queues, repeating runners and the loop pump
pub mod scheduler;

/// Unhandled-fault sink for fire-and-forget tasks
pub mod sink;

/// Task module: frames, drivers, pools and completion sources
pub mod task;

// ============================================================================
// Re-exports
// ============================================================================

pub use cancel::{CancelEpoch, CancelSource, CancelToken};
pub use error::{Fault, TaskError};
pub use phase::{Phase, PhaseSet};
pub use scheduler::{
    global, ContinuationQueue, ItemPoll, LoopPump, MainThreadSender, PumpConfig, PumpStats,
    RepeatingItem, RepeatingRunner, TickReport,
};
pub use sink::UnhandledSink;
pub use task::{
    CompletionSource, Continuation, Frame, FrameDriver, FramePool, PoolSize, Resume, Resumer,
    ShapeKey, Source, Status, Step, StepContext, TaskHandle,
};
