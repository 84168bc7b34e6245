//! Phase scheduling
//!
//! This module contains:
//! - `ContinuationQueue`: per-phase FIFO of one-shot continuations
//! - `RepeatingRunner`: per-phase set of items polled every drain
//! - `LoopPump`: owner of the lanes, frame pools and task entry points
//! - `MainThreadSender`: hand-off from other threads into a phase
//! - `global`: the lazily created pump of the frame-loop thread

pub mod global;
mod handoff;
pub(crate) mod pump;
mod queue;
mod repeating;

pub use handoff::MainThreadSender;
pub use pump::{LoopPump, PumpConfig, PumpStats, TickReport};
pub use queue::ContinuationQueue;
pub use repeating::{ItemPoll, RepeatingItem, RepeatingRunner};
