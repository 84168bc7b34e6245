//! Tasks: frames, their pooled drivers and versioned completion sources
//!
//! A task is one invocation of a `Frame`. Spawning acquires a `FrameDriver`
//! from the pool for the frame's shape, steps the frame until it suspends,
//! and hands the caller a `TaskHandle` observing the driver's
//! `CompletionSource`. Once the result is taken the driver returns to the
//! pool.

mod completion;
mod continuation;
pub(crate) mod driver;
mod frame;
mod handle;
mod pool;

pub use completion::{CompletionSource, Status};
pub use continuation::{Continuation, Resume, Resumer};
pub use driver::{DriverState, FrameDriver};
pub use frame::{Frame, Step, StepContext};
pub use handle::{Source, TaskHandle};
pub use pool::{FramePool, PoolSize, ShapeKey};
