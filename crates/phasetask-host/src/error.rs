//! Host error types

use phasetask_engine::TaskError;

/// Errors surfaced by the headless host
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The loop pump rejected a tick or registration
    #[error("Loop pump error: {0}")]
    Pump(#[from] TaskError),

    /// The host received its predelete notification
    #[error("Host has shut down")]
    ShutDown,
}
