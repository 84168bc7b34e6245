//! Default constants for pump configuration.
//!
//! Centralizes the numbers shared by `PumpConfig`, the frame pools and the
//! phase queues.

/// Default maximum number of idle drivers kept per frame shape.
pub const DEFAULT_MAX_POOLED_PER_SHAPE: usize = 256;

/// Default initial capacity of each phase's continuation buffers.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Default initial capacity of each phase's repeating-item runner.
pub const DEFAULT_RUNNER_CAPACITY: usize = 16;
