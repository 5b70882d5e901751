//! Action Rewinding
//!
//! An action may discover while executing that some of its inputs, built in
//! an earlier step, no longer exist (evicted from a remote cache, deleted
//! from disk). Rather than failing the build, the evaluator "rewinds": it
//! resets the nodes that produced the lost inputs to `Changed`, so they run
//! again, and restarts the failed node.
//!
//! # Planning
//!
//! For a node F that lost inputs `{I...}`:
//!
//! 1. Every lost input must be a non-source artifact that F actually
//!    requested. Losing a source file cannot be repaired.
//! 2. For each lost input I, the plan restarts I's node and the node of the
//!    action that generates I, and resets that action in the executor.
//! 3. If the generating action propagates its inputs insensitively (its
//!    output is a bundle of its inputs), its non-source inputs and their
//!    generating actions are rewound too, transitively.
//! 4. No action is visited twice.
//!
//! F itself is always restarted.
//!
//! Actions already being rewound by another in-flight plan are skipped, as
//! are actions whose generating node has no value yet; the plan is then
//! *partial* and lists them as deferred.

mod strategy;

pub use strategy::RewindStrategy;

use indexmap::IndexSet;

use crate::action::ActionId;
use crate::key::Key;

/// The outcome of planning a rewind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindPlan {
    failed: Key,
    nodes_to_restart: IndexSet<Key>,
    actions_to_reset: IndexSet<ActionId>,
    deferred: Vec<ActionId>,
}

impl RewindPlan {
    pub(crate) fn new(failed: Key) -> Self {
        let mut nodes_to_restart = IndexSet::new();
        nodes_to_restart.insert(failed.clone());
        Self {
            failed,
            nodes_to_restart,
            actions_to_reset: IndexSet::new(),
            deferred: Vec::new(),
        }
    }

    /// The node that reported lost inputs.
    pub fn failed(&self) -> &Key {
        &self.failed
    }

    /// Nodes to reset to `Changed`, the failed node first.
    pub fn nodes_to_restart(&self) -> &IndexSet<Key> {
        &self.nodes_to_restart
    }

    /// Actions whose executor state must be dropped.
    pub fn actions_to_reset(&self) -> &IndexSet<ActionId> {
        &self.actions_to_reset
    }

    /// Producers the plan did not rewind because they are already being
    /// rewound or are not known yet.
    pub fn deferred(&self) -> &[ActionId] {
        &self.deferred
    }

    /// Whether some producer was deferred.
    pub fn is_partial(&self) -> bool {
        !self.deferred.is_empty()
    }
}
