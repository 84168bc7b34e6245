//! Scene tree with queued structural mutations
//!
//! Adding or removing a node never takes effect immediately. Mutations are
//! queued and applied in order when the host flushes the tree, once per
//! frame, after the per-frame tick and before the deferred lane.

use rustc_hash::FxHashSet;
use std::cell::RefCell;

/// A queued structural change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneMutation {
    /// Add a node with this name
    Add(String),
    /// Remove the node with this name
    Remove(String),
}

/// Named nodes plus the mutations waiting for the next flush
#[derive(Debug, Default)]
pub struct SceneTree {
    nodes: RefCell<FxHashSet<String>>,
    pending: RefCell<Vec<SceneMutation>>,
}

impl SceneTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue adding `name` at the next flush
    pub fn queue_add_node(&self, name: impl Into<String>) {
        self.pending
            .borrow_mut()
            .push(SceneMutation::Add(name.into()));
    }

    /// Queue removing `name` at the next flush
    pub fn queue_remove_node(&self, name: impl Into<String>) {
        self.pending
            .borrow_mut()
            .push(SceneMutation::Remove(name.into()));
    }

    /// Whether `name` is in the tree (queued additions do not count)
    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.borrow().contains(name)
    }

    /// Nodes in the tree
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }

    /// Mutations waiting for the next flush
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Apply every queued mutation in order; returns how many changed the tree
    ///
    /// Adding an existing node or removing a missing one is skipped with a
    /// warning.
    pub fn flush(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let mut nodes = self.nodes.borrow_mut();
        let mut applied = 0;

        for mutation in pending {
            let changed = match &mutation {
                SceneMutation::Add(name) => nodes.insert(name.clone()),
                SceneMutation::Remove(name) => nodes.remove(name),
            };
            if changed {
                applied += 1;
            } else {
                tracing::warn!(?mutation, "skipping scene mutation with no effect");
            }
        }
        applied
    }
}
