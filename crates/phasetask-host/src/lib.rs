//! Phasetask Host
//!
//! A headless frame loop for driving a `LoopPump` outside a game engine:
//! - **HeadlessHost**: pause state, fixed-step and per-frame ticks, the
//!   structural flush and the deferred lane, in the engine's order
//! - **SceneTree**: named nodes whose additions and removals are queued and
//!   applied at the structural flush
//! - **HostConfig**: physics steps per frame and the wired phases

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Host configuration
pub mod config;

/// Host error types
pub mod error;

/// The headless frame loop
pub mod host;

/// Scene tree with deferred structural mutations
pub mod scene;

pub use config::HostConfig;
pub use error::HostError;
pub use host::{FrameReport, HeadlessHost, HostEvent};
pub use scene::{SceneMutation, SceneTree};
