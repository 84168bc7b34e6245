//! Cooperative cancellation
//!
//! Cancellation is only observed at suspension points: a driver checks its
//! task's token every time it is resumed, never in the middle of a step.
//! Tokens are backed by an atomic flag so work handed to another thread can
//! poll the same signal.

use crate::error::TaskError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Owner side of a cancellation signal
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    flag: Arc<AtomicBool>,
}

impl CancelSource {
    /// Create a new, uncanceled source
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            flag: Some(Arc::clone(&self.flag)),
        }
    }

    /// Signal cancellation to every token of this source
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether `cancel` has been called
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Observer side of a cancellation signal
///
/// `CancelToken::none()` (the default) can never be canceled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// A token that is never canceled
    pub fn none() -> Self {
        Self { flag: None }
    }

    /// Whether the owning source has been canceled
    pub fn is_canceled(&self) -> bool {
        self.flag
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Acquire))
    }

    /// Whether this token can ever become canceled
    pub fn can_be_canceled(&self) -> bool {
        self.flag.is_some()
    }

    /// `Err(TaskError::Canceled)` if canceled
    pub fn error_if_canceled(&self) -> Result<(), TaskError> {
        if self.is_canceled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// Generation counter for "cancel everything outstanding"
///
/// Tasks started with `token()` share the current generation's source.
/// `cancel_all()` swaps in a fresh source and cancels the previous one, so
/// it never has to enumerate live tasks.
#[derive(Debug, Default)]
pub struct CancelEpoch {
    state: Mutex<EpochState>,
}

#[derive(Debug, Default)]
struct EpochState {
    source: CancelSource,
    generation: u64,
}

impl CancelEpoch {
    /// Create an epoch at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Token of the current generation
    pub fn token(&self) -> CancelToken {
        self.state.lock().source.token()
    }

    /// Cancel the current generation and start a new one; returns the new generation
    pub fn cancel_all(&self) -> u64 {
        let (previous, generation) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (std::mem::take(&mut state.source), state.generation)
        };
        previous.cancel();
        generation
    }

    /// Number of times `cancel_all` has been called
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_cancels_tokens() {
        let source = CancelSource::new();
        let a = source.token();
        let b = a.clone();
        assert!(!a.is_canceled());

        source.cancel();
        assert!(a.is_canceled());
        assert!(b.is_canceled());
        assert!(matches!(a.error_if_canceled(), Err(TaskError::Canceled)));
    }

    #[test]
    fn test_none_token_never_cancels() {
        let token = CancelToken::none();
        assert!(!token.can_be_canceled());
        assert!(!token.is_canceled());
        assert!(token.error_if_canceled().is_ok());
    }

    #[test]
    fn test_epoch_swaps_source() {
        let epoch = CancelEpoch::new();
        let before = epoch.token();

        assert_eq!(epoch.cancel_all(), 1);
        let after = epoch.token();

        assert!(before.is_canceled());
        assert!(!after.is_canceled());
        assert_eq!(epoch.generation(), 1);
    }

    #[test]
    fn test_token_crosses_threads() {
        let source = CancelSource::new();
        let token = source.token();
        let handle = std::thread::spawn(move || {
            while !token.is_canceled() {
                std::thread::yield_now();
            }
            true
        });
        source.cancel();
        assert!(handle.join().unwrap());
    }
}
