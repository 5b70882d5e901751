//! In-memory graph.
//!
//! Nodes are kept for the life of the graph. Edges are maintained on both
//! ends: completing a node diffs its old and new dependency sets and updates
//! the reverse edges of the dependencies that were added or dropped.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;

use super::node::{Completion, DepGroup, DoneSnapshot, EvaluationId, NodeEntry, NodeOutput, NodeState};
use crate::action::{Action, Artifact};
use crate::evaluator::ErrorInfo;
use crate::key::{Key, Value, Version};

/// Result of a batch lookup.
#[derive(Debug, Default)]
pub struct BatchValues {
    /// Keys whose node holds a value.
    pub values: IndexMap<Key, Value>,
    /// Keys whose node holds an error.
    pub errors: IndexMap<Key, ErrorInfo>,
    /// Whether some key had no up-to-date result.
    pub missing: bool,
}

/// Node counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphStats {
    pub not_started: usize,
    pub in_flight: usize,
    pub done: usize,
    pub dirty: usize,
    pub changed: usize,
}

impl GraphStats {
    /// Total number of nodes.
    pub fn total(&self) -> usize {
        self.not_started + self.in_flight + self.done + self.dirty + self.changed
    }
}

/// The memoizing graph, shared by every evaluation of an evaluator.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: DashMap<Key, Arc<NodeEntry>>,
    version: AtomicU64,
    active_evaluations: AtomicUsize,
}

impl Graph {
    /// Create an empty graph at the minimal version.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current graph version.
    pub fn version(&self) -> Version {
        Version::from(self.version.load(Ordering::SeqCst))
    }

    /// Move to the next version, returning it. Called once per batch of
    /// invalidations or injections.
    pub(crate) fn advance_version(&self) -> Version {
        Version::from(self.version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Get a node.
    pub fn get_node(&self, key: &Key) -> Option<Arc<NodeEntry>> {
        self.nodes.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the node for `key`, creating it in the `NotStarted` state.
    pub fn create_if_absent(&self, key: &Key) -> Arc<NodeEntry> {
        if let Some(node) = self.get_node(key) {
            return node;
        }
        Arc::clone(
            self.nodes
                .entry(key.clone())
                .or_insert_with(|| Arc::new(NodeEntry::new(key.clone())))
                .value(),
        )
    }

    /// Look up many keys at once. Nodes that are absent, not done, or whose
    /// result only held for the evaluation that produced it count as missing.
    pub fn get_values(&self, keys: &[Key]) -> BatchValues {
        let mut batch = BatchValues::default();
        for key in keys {
            match self.get_node(key).and_then(|node| node.done_output()) {
                Some(NodeOutput::Value(value)) => {
                    batch.values.insert(key.clone(), value);
                }
                Some(NodeOutput::Error(error)) => {
                    batch.errors.insert(key.clone(), error);
                }
                None => batch.missing = true,
            }
        }
        batch
    }

    /// The output of `key` if it is up to date for `evaluation`.
    pub(crate) fn lookup_done(&self, key: &Key, evaluation: EvaluationId) -> Option<DoneSnapshot> {
        self.get_node(key)?.lookup(evaluation)
    }

    /// Record the result of an evaluation. Returns whether the output changed.
    pub fn set_done(
        &self,
        key: &Key,
        evaluation: EvaluationId,
        output: NodeOutput,
        deps: Vec<DepGroup>,
    ) -> bool {
        self.complete(key, evaluation, output, deps, false)
    }

    /// Like [`set_done`](Self::set_done); `transient_deps` records that the
    /// node read a transient failure, so it is recomputed by the next
    /// evaluation.
    pub(crate) fn complete(
        &self,
        key: &Key,
        evaluation: EvaluationId,
        output: NodeOutput,
        deps: Vec<DepGroup>,
        transient_deps: bool,
    ) -> bool {
        let node = self.create_if_absent(key);
        let Completion {
            changed,
            removed_deps,
            added_deps,
        } = node.complete(evaluation, self.version(), output, deps, transient_deps);

        for dep in removed_deps {
            self.remove_reverse_dep(&dep, key);
        }
        for dep in added_deps {
            self.add_reverse_dep(&dep, key);
        }
        changed
    }

    /// Record that a dirty node was verified unchanged.
    pub(crate) fn mark_clean(&self, key: &Key, evaluation: EvaluationId) {
        if let Some(node) = self.get_node(key) {
            node.mark_clean(evaluation, self.version());
        }
    }

    /// Invalidate `keys` and everything that transitively depends on them.
    ///
    /// The keys themselves become `Changed` if `changed` is set and `Dirty`
    /// otherwise; their dependents always become `Dirty`. Returns every node
    /// whose state was changed.
    pub fn mark_dirty(&self, keys: &[Key], changed: bool) -> Vec<Key> {
        let mut dirtied = Vec::new();
        let mut visited = HashSet::new();
        let mut queue: VecDeque<(Key, bool)> = keys.iter().map(|key| (key.clone(), changed)).collect();

        while let Some((key, changed)) = queue.pop_front() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(node) = self.get_node(&key) else {
                continue;
            };
            if let Some(rdeps) = node.mark_dirty(changed) {
                dirtied.push(key);
                queue.extend(rdeps.into_iter().map(|rdep| (rdep, false)));
            }
        }

        tracing::debug!(roots = keys.len(), dirtied = dirtied.len(), "invalidated nodes");
        dirtied
    }

    /// Store an injected value. Returns the dependents that must be
    /// invalidated because the value changed.
    pub(crate) fn inject(&self, key: &Key, value: Value, version: Version) -> Vec<Key> {
        self.create_if_absent(key)
            .inject(value, version)
            .unwrap_or_default()
    }

    /// Force a done node to recompute on its next request. Returns its
    /// dependents if it was reset, `None` otherwise.
    pub(crate) fn reset_for_rewind(&self, key: &Key) -> Option<Vec<Key>> {
        self.get_node(key)?.reset_for_rewind()
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    pub fn add_reverse_dep(&self, dependency: &Key, dependent: &Key) {
        self.create_if_absent(dependency)
            .add_reverse_dep(dependent.clone());
    }

    /// Remove a dependency edge.
    pub fn remove_reverse_dep(&self, dependency: &Key, dependent: &Key) {
        if let Some(node) = self.get_node(dependency) {
            node.remove_reverse_dep(dependent);
        }
    }

    /// Nodes that depend on `key`.
    pub fn get_reverse_deps(&self, key: &Key) -> Vec<Key> {
        self.get_node(key)
            .map(|node| node.reverse_deps())
            .unwrap_or_default()
    }

    /// The action that generates a derived artifact, read from the value of
    /// its owning node.
    pub fn generating_action(&self, artifact: &Artifact) -> Option<Action> {
        let id = artifact.generating_action()?;
        match self.get_node(id.owner())?.done_output()? {
            NodeOutput::Value(value) => value.actions().get(id.index()).cloned(),
            NodeOutput::Error(_) => None,
        }
    }

    /// Count nodes by state.
    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats::default();
        for entry in self.nodes.iter() {
            match entry.value().state() {
                NodeState::NotStarted => stats.not_started += 1,
                NodeState::InFlight => stats.in_flight += 1,
                NodeState::Done => stats.done += 1,
                NodeState::Dirty => stats.dirty += 1,
                NodeState::Changed => stats.changed += 1,
            }
        }
        stats
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every key in the graph, in no particular order.
    pub fn keys(&self) -> Vec<Key> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of evaluations currently running against this graph.
    pub fn active_evaluations(&self) -> usize {
        self.active_evaluations.load(Ordering::SeqCst)
    }

    /// Track a running evaluation until the guard drops.
    pub(crate) fn begin_evaluation(self: &Arc<Self>) -> EvaluationGuard {
        self.active_evaluations.fetch_add(1, Ordering::SeqCst);
        EvaluationGuard {
            graph: Arc::clone(self),
        }
    }

    /// Drop every node. Only valid while no evaluation is running.
    pub(crate) fn clear(&self) {
        self.nodes.clear();
    }
}

/// Marks an evaluation as running for as long as it lives.
pub(crate) struct EvaluationGuard {
    graph: Arc<Graph>,
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        self.graph.active_evaluations.fetch_sub(1, Ordering::SeqCst);
    }
}
