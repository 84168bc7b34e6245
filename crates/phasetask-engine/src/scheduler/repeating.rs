//! Repeating-item runner
//!
//! Items are polled once per drain of their phase until they report
//! `ItemPoll::Done`. Unlike continuations, an item added while the runner is
//! draining is polled in that same drain.

use crate::error::Fault;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};

/// What a repeating item wants after being polled
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ItemPoll {
    /// Poll again on the next drain
    Continue,
    /// Remove the item
    Done,
}

/// Work polled once per tick of a phase
pub trait RepeatingItem {
    /// Poll once
    fn poll(&mut self) -> ItemPoll;
}

impl<F> RepeatingItem for F
where
    F: FnMut() -> ItemPoll,
{
    fn poll(&mut self) -> ItemPoll {
        self()
    }
}

/// Resets the running flag even if a panic escapes `on_panic`
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Collection of repeating items for one phase
pub struct RepeatingRunner {
    /// Slots are taken while their item is polled
    items: RefCell<Vec<Option<Box<dyn RepeatingItem>>>>,
    /// Bumped by `clear`; a pass stops when it changes under it
    generation: Cell<u64>,
    running: Cell<bool>,
}

impl RepeatingRunner {
    /// Create an empty runner
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an empty runner with room for `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: RefCell::new(Vec::with_capacity(capacity)),
            generation: Cell::new(0),
            running: Cell::new(false),
        }
    }

    /// Register an item; polled in the current pass if one is running
    pub fn add(&self, item: impl RepeatingItem + 'static) {
        self.items.borrow_mut().push(Some(Box::new(item)));
    }

    /// Registered items (including one being polled right now)
    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    /// Whether no items are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every item
    pub fn clear(&self) {
        self.generation.set(self.generation.get().wrapping_add(1));
        let items = std::mem::take(&mut *self.items.borrow_mut());
        drop(items);
    }

    /// Poll every item once
    ///
    /// Returns `(polled, remaining)`. A panicking item is reported to
    /// `on_panic` and removed. A nested call while a pass is running does
    /// nothing.
    pub fn run(&self, on_panic: &dyn Fn(Fault)) -> (usize, usize) {
        if self.running.replace(true) {
            tracing::warn!("repeating runner drained re-entrantly; skipping nested pass");
            return (0, self.len());
        }
        let _guard = RunningGuard(&self.running);
        let generation = self.generation.get();
        let mut polled = 0;
        let mut index = 0;

        loop {
            // Length is re-read every iteration so items added mid-pass are included
            let taken = {
                let mut items = self.items.borrow_mut();
                match items.get_mut(index) {
                    Some(slot) => slot.take(),
                    None => break,
                }
            };
            let slot = index;
            index += 1;
            let Some(mut item) = taken else { continue };

            polled += 1;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| item.poll()));
            if self.generation.get() != generation {
                // Cleared by the item itself; the slot no longer exists
                drop(item);
                break;
            }
            match outcome {
                Ok(ItemPoll::Continue) => {
                    self.items.borrow_mut()[slot] = Some(item);
                }
                Ok(ItemPoll::Done) => drop(item),
                Err(payload) => {
                    drop(item);
                    on_panic(Fault::from_panic(payload));
                }
            }
        }

        let remaining = {
            let mut items = self.items.borrow_mut();
            items.retain(Option::is_some);
            items.len()
        };
        (polled, remaining)
    }
}

impl Default for RepeatingRunner {
    fn default() -> Self {
        Self::new()
    }
}
