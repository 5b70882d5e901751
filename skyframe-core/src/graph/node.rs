//! Graph Nodes
//!
//! This module defines the per-key record stored in the graph and the state
//! machine that governs it.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::mpsc::UnboundedSender;

use crate::evaluator::ErrorInfo;
use crate::key::{Key, Value, Version};

/// Unique identifier for one `evaluate` call.
///
/// In-flight nodes remember which evaluation owns them so that concurrent
/// evaluations coalesce instead of computing the same key twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvaluationId(u64);

impl EvaluationId {
    /// Generate a new unique evaluation ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for EvaluationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys requested together in one environment call.
pub type DepGroup = SmallVec<[Key; 2]>;

/// Lifecycle state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeState {
    /// Created by a request, never evaluated.
    NotStarted,

    /// Claimed by an evaluation; its function is running or waiting for
    /// dependencies.
    InFlight,

    /// Holds a value or an error that is valid at the current version.
    Done,

    /// A dependency may have changed. Re-verify the dependencies before
    /// deciding whether to recompute.
    Dirty,

    /// Known to be different. Recompute unconditionally.
    Changed,
}

/// The result a node holds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeOutput {
    /// Successful evaluation.
    Value(Value),
    /// Failed evaluation.
    Error(ErrorInfo),
}

impl NodeOutput {
    /// The value, if the evaluation succeeded.
    pub fn value(&self) -> Option<&Value> {
        match self {
            NodeOutput::Value(value) => Some(value),
            NodeOutput::Error(_) => None,
        }
    }

    /// The error, if the evaluation failed.
    pub fn error(&self) -> Option<&ErrorInfo> {
        match self {
            NodeOutput::Value(_) => None,
            NodeOutput::Error(error) => Some(error),
        }
    }

    fn is_transient_error(&self) -> bool {
        self.error().map_or(false, ErrorInfo::is_transient)
    }
}

/// A done node's output as seen by one evaluation.
#[derive(Debug, Clone)]
pub(crate) struct DoneSnapshot {
    pub(crate) output: NodeOutput,
    pub(crate) last_changed: Version,
    /// Only valid for the evaluation that produced it.
    pub(crate) transient: bool,
}

/// How a freshly claimed node must be brought up to date.
#[derive(Debug)]
pub(crate) enum StartKind {
    /// Never evaluated.
    Fresh,
    /// Has a prior result that must be recomputed.
    Rebuild,
    /// Has a prior result that is still valid if none of these dependency
    /// groups changed after `last_evaluated`.
    Reverify {
        groups: Vec<DepGroup>,
        last_evaluated: Version,
    },
}

/// Result of trying to claim a node for an evaluation.
#[derive(Debug)]
pub(crate) enum Claim {
    /// Already up to date.
    Done(DoneSnapshot),
    /// The caller now owns the node and must bring it up to date.
    Started(StartKind),
    /// The caller already owns the node.
    Owned,
    /// Another evaluation owns the node; the caller's waiter will be sent the
    /// key when it finishes.
    Waiting,
}

/// What changed when a node completed.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    pub(crate) changed: bool,
    pub(crate) removed_deps: Vec<Key>,
    pub(crate) added_deps: Vec<Key>,
}

#[derive(Debug)]
struct NodeData {
    state: NodeState,
    output: Option<NodeOutput>,

    /// Dependency groups used by the last completed evaluation.
    direct_deps: Vec<DepGroup>,

    /// Dependencies requested so far by the evaluation in flight.
    temporary_deps: IndexSet<Key>,

    reverse_deps: HashSet<Key>,

    /// Version at which the output last changed.
    last_changed: Version,

    /// Version at which the output was last computed or verified.
    last_evaluated: Version,

    evaluated_by: Option<EvaluationId>,
    owner: Option<EvaluationId>,

    /// The last completion read a transient failure, directly or through a
    /// dependency that did.
    transient_deps: bool,

    /// State to return to if the owning evaluation gives up.
    resume_state: NodeState,

    waiters: SmallVec<[UnboundedSender<Key>; 2]>,
    injected: bool,
}

impl NodeData {
    fn new() -> Self {
        Self {
            state: NodeState::NotStarted,
            output: None,
            direct_deps: Vec::new(),
            temporary_deps: IndexSet::new(),
            reverse_deps: HashSet::new(),
            last_changed: Version::MINIMAL,
            last_evaluated: Version::MINIMAL,
            evaluated_by: None,
            owner: None,
            transient_deps: false,
            resume_state: NodeState::NotStarted,
            waiters: SmallVec::new(),
            injected: false,
        }
    }

    fn start(&mut self, evaluation: EvaluationId, resume_state: NodeState) {
        self.state = NodeState::InFlight;
        self.owner = Some(evaluation);
        self.resume_state = resume_state;
        self.temporary_deps.clear();
    }

    fn valid_output(&self, evaluation: EvaluationId) -> Option<DoneSnapshot> {
        if self.state != NodeState::Done {
            return None;
        }
        let output = self.output.as_ref()?;
        let transient = self.transient_deps || output.is_transient_error();
        // Transient failures only count for the evaluation that saw them.
        if transient && self.evaluated_by != Some(evaluation) {
            return None;
        }
        Some(DoneSnapshot {
            output: output.clone(),
            last_changed: self.last_changed,
            transient,
        })
    }

    fn wake_waiters(&mut self, key: &Key) {
        for waiter in self.waiters.drain(..) {
            // A dropped receiver means that evaluation already returned.
            let _ = waiter.send(key.clone());
        }
    }

    fn flat_deps(&self) -> HashSet<Key> {
        self.direct_deps.iter().flatten().cloned().collect()
    }
}

/// A node in the memoizing graph.
#[derive(Debug)]
pub struct NodeEntry {
    key: Key,
    data: Mutex<NodeData>,
}

impl NodeEntry {
    /// Create a node in the `NotStarted` state.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            data: Mutex::new(NodeData::new()),
        }
    }

    /// Get the node's key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Get the current state.
    pub fn state(&self) -> NodeState {
        self.data.lock().state
    }

    /// Whether the node holds an up-to-date result.
    pub fn is_done(&self) -> bool {
        self.state() == NodeState::Done
    }

    /// The last result, whether or not it is up to date.
    pub fn output(&self) -> Option<NodeOutput> {
        self.data.lock().output.clone()
    }

    /// The last value, whether or not it is up to date.
    pub fn value(&self) -> Option<Value> {
        self.data.lock().output.as_ref().and_then(NodeOutput::value).cloned()
    }

    /// The last error, whether or not it is up to date.
    pub fn error(&self) -> Option<ErrorInfo> {
        self.data.lock().output.as_ref().and_then(NodeOutput::error).cloned()
    }

    /// Direct dependencies from the last completed evaluation, in request order.
    pub fn direct_deps(&self) -> Vec<Key> {
        self.data.lock().direct_deps.iter().flatten().cloned().collect()
    }

    /// Direct dependencies grouped the way they were requested.
    pub fn dep_groups(&self) -> Vec<DepGroup> {
        self.data.lock().direct_deps.clone()
    }

    /// Nodes that depend on this one.
    pub fn reverse_deps(&self) -> Vec<Key> {
        self.data.lock().reverse_deps.iter().cloned().collect()
    }

    /// Version at which the result last changed.
    pub fn last_changed(&self) -> Version {
        self.data.lock().last_changed
    }

    /// Version at which the result was last computed or verified.
    pub fn last_evaluated(&self) -> Version {
        self.data.lock().last_evaluated
    }

    /// Whether the value was injected rather than computed.
    pub fn is_injected(&self) -> bool {
        self.data.lock().injected
    }

    /// Dependencies requested so far by the evaluation in flight. Empty unless
    /// the node is `InFlight`.
    pub fn temporary_deps(&self) -> Vec<Key> {
        let data = self.data.lock();
        if data.state == NodeState::InFlight {
            data.temporary_deps.iter().cloned().collect()
        } else {
            Vec::new()
        }
    }

    /// The output if the node is done and not tied to the evaluation that
    /// produced it. State and output are read under one lock.
    pub fn done_output(&self) -> Option<NodeOutput> {
        let data = self.data.lock();
        if data.state != NodeState::Done || data.transient_deps {
            return None;
        }
        data.output
            .as_ref()
            .filter(|output| !output.is_transient_error())
            .cloned()
    }

    pub(crate) fn lookup(&self, evaluation: EvaluationId) -> Option<DoneSnapshot> {
        self.data.lock().valid_output(evaluation)
    }

    /// Claim the node for `evaluation`. Atomic with respect to the in-flight
    /// check, so at most one evaluation computes a node at a time.
    pub(crate) fn claim(&self, evaluation: EvaluationId, waiter: &UnboundedSender<Key>) -> Claim {
        let mut data = self.data.lock();
        match data.state {
            NodeState::Done => {
                if let Some(snapshot) = data.valid_output(evaluation) {
                    return Claim::Done(snapshot);
                }
                data.start(evaluation, NodeState::Changed);
                Claim::Started(StartKind::Rebuild)
            }
            NodeState::NotStarted => {
                data.start(evaluation, NodeState::NotStarted);
                Claim::Started(StartKind::Fresh)
            }
            NodeState::Changed => {
                data.start(evaluation, NodeState::Changed);
                Claim::Started(StartKind::Rebuild)
            }
            NodeState::Dirty => {
                data.start(evaluation, NodeState::Dirty);
                if data.direct_deps.is_empty() || data.output.is_none() {
                    Claim::Started(StartKind::Rebuild)
                } else {
                    Claim::Started(StartKind::Reverify {
                        groups: data.direct_deps.clone(),
                        last_evaluated: data.last_evaluated,
                    })
                }
            }
            NodeState::InFlight if data.owner == Some(evaluation) => Claim::Owned,
            NodeState::InFlight => {
                data.waiters.push(waiter.clone());
                Claim::Waiting
            }
        }
    }

    pub(crate) fn record_temporary_deps<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) {
        let mut data = self.data.lock();
        if data.state == NodeState::InFlight {
            data.temporary_deps.extend(keys.into_iter().cloned());
        }
    }

    /// Store the result of an evaluation and release the node.
    ///
    /// `transient_deps` ties the result to `evaluation` the same way a
    /// transient error is.
    pub(crate) fn complete(
        &self,
        evaluation: EvaluationId,
        version: Version,
        output: NodeOutput,
        deps: Vec<DepGroup>,
        transient_deps: bool,
    ) -> Completion {
        let mut data = self.data.lock();
        debug_assert_eq!(data.owner, Some(evaluation), "completing a node owned elsewhere");

        let changed = data.output.as_ref() != Some(&output);
        if changed {
            data.last_changed = version;
        }
        data.last_evaluated = version;

        let old_deps = data.flat_deps();
        data.direct_deps = deps;
        let new_deps = data.flat_deps();

        data.output = Some(output);
        data.state = NodeState::Done;
        data.owner = None;
        data.evaluated_by = Some(evaluation);
        data.transient_deps = transient_deps;
        data.temporary_deps.clear();
        data.wake_waiters(&self.key);

        Completion {
            changed,
            removed_deps: old_deps.difference(&new_deps).cloned().collect(),
            added_deps: new_deps.difference(&old_deps).cloned().collect(),
        }
    }

    /// Mark a dirty node as verified unchanged at `version`.
    pub(crate) fn mark_clean(&self, evaluation: EvaluationId, version: Version) {
        let mut data = self.data.lock();
        debug_assert_eq!(data.owner, Some(evaluation), "verifying a node owned elsewhere");
        data.state = NodeState::Done;
        data.last_evaluated = version;
        data.owner = None;
        data.evaluated_by = Some(evaluation);
        data.temporary_deps.clear();
        data.wake_waiters(&self.key);
    }

    /// Release a node the evaluation could not finish, restoring the state it
    /// was claimed from. Returns false if `evaluation` did not own it.
    pub(crate) fn abandon(&self, evaluation: EvaluationId) -> bool {
        let mut data = self.data.lock();
        if data.owner != Some(evaluation) {
            return false;
        }
        data.state = data.resume_state;
        data.owner = None;
        data.temporary_deps.clear();
        data.wake_waiters(&self.key);
        true
    }

    /// Invalidate the node. Returns its reverse dependencies if the node was
    /// up to date before, i.e. if invalidation must keep propagating.
    pub(crate) fn mark_dirty(&self, changed: bool) -> Option<Vec<Key>> {
        let mut data = self.data.lock();
        match data.state {
            NodeState::Done if data.injected => None,
            NodeState::Done => {
                data.state = if changed {
                    NodeState::Changed
                } else {
                    NodeState::Dirty
                };
                Some(data.reverse_deps.iter().cloned().collect())
            }
            NodeState::Dirty if changed => {
                data.state = NodeState::Changed;
                None
            }
            NodeState::InFlight => {
                tracing::warn!(key = %self.key, "not invalidating a node that is in flight");
                None
            }
            _ => None,
        }
    }

    /// Force a done node to recompute. Returns its reverse dependencies,
    /// which the caller must dirty: the node may stay `Changed` if the
    /// evaluation stops before rebuilding it, and invalidation does not
    /// propagate through `Changed` nodes.
    pub(crate) fn reset_for_rewind(&self) -> Option<Vec<Key>> {
        let mut data = self.data.lock();
        if data.state == NodeState::Done && !data.injected {
            data.state = NodeState::Changed;
            Some(data.reverse_deps.iter().cloned().collect())
        } else {
            None
        }
    }

    /// Overwrite the node with an externally supplied value. Returns the
    /// reverse dependencies if the value differs from the previous one.
    ///
    /// Must not run while an evaluation owns the node.
    pub(crate) fn inject(&self, value: Value, version: Version) -> Option<Vec<Key>> {
        let mut data = self.data.lock();
        debug_assert_ne!(data.state, NodeState::InFlight, "injecting into a node in flight");
        let output = NodeOutput::Value(value);
        let changed = data.output.as_ref() != Some(&output);

        data.injected = true;
        data.state = NodeState::Done;
        data.owner = None;
        data.transient_deps = false;
        data.last_evaluated = version;
        data.wake_waiters(&self.key);

        if changed {
            data.output = Some(output);
            data.last_changed = version;
            Some(data.reverse_deps.iter().cloned().collect())
        } else {
            None
        }
    }

    pub(crate) fn add_reverse_dep(&self, key: Key) {
        self.data.lock().reverse_deps.insert(key);
    }

    pub(crate) fn remove_reverse_dep(&self, key: &Key) {
        self.data.lock().reverse_deps.remove(key);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionError;
    use crate::key::FunctionName;
    use tokio::sync::mpsc::unbounded_channel;

    const NODE: FunctionName = FunctionName::new("NODE");

    fn key(name: &str) -> Key {
        Key::new(NODE, name.to_string())
    }

    fn group(keys: &[&str]) -> DepGroup {
        keys.iter().map(|k| key(k)).collect()
    }

    #[test]
    fn evaluation_ids_are_unique() {
        assert_ne!(EvaluationId::new(), EvaluationId::new());
    }

    #[test]
    fn new_node_is_not_started() {
        let node = NodeEntry::new(key("a"));
        assert_eq!(node.state(), NodeState::NotStarted);
        assert!(node.output().is_none());
    }

    #[test]
    fn claim_then_complete() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("a"));

        assert!(matches!(node.claim(eval, &tx), Claim::Started(StartKind::Fresh)));
        assert_eq!(node.state(), NodeState::InFlight);
        assert!(matches!(node.claim(eval, &tx), Claim::Owned));

        let completion = node.complete(
            eval,
            Version::MINIMAL,
            NodeOutput::Value(Value::new(1u32)),
            vec![group(&["b", "c"])],
            false,
        );
        assert!(completion.changed);
        assert_eq!(completion.added_deps.len(), 2);
        assert_eq!(node.state(), NodeState::Done);
        assert_eq!(node.direct_deps(), vec![key("b"), key("c")]);
        assert!(matches!(node.claim(eval, &tx), Claim::Done(_)));
    }

    #[test]
    fn second_evaluation_waits_and_is_woken() {
        let (tx1, _rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        let first = EvaluationId::new();
        let second = EvaluationId::new();
        let node = NodeEntry::new(key("shared"));

        assert!(matches!(node.claim(first, &tx1), Claim::Started(_)));
        assert!(matches!(node.claim(second, &tx2), Claim::Waiting));

        node.complete(first, Version::MINIMAL, NodeOutput::Value(Value::new(())), vec![], false);
        assert_eq!(rx2.try_recv().ok(), Some(key("shared")));
        assert!(matches!(node.claim(second, &tx2), Claim::Done(_)));
    }

    #[test]
    fn dirty_node_reverifies_previous_groups() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("a"));
        node.claim(eval, &tx);
        node.complete(
            eval,
            Version::MINIMAL,
            NodeOutput::Value(Value::new(1u32)),
            vec![group(&["b"]), group(&["c", "d"])],
            false,
        );

        assert!(node.mark_dirty(false).is_some());
        assert_eq!(node.state(), NodeState::Dirty);
        // Already dirty: nothing more to propagate.
        assert!(node.mark_dirty(false).is_none());

        match node.claim(EvaluationId::new(), &tx) {
            Claim::Started(StartKind::Reverify { groups, .. }) => assert_eq!(groups.len(), 2),
            other => panic!("unexpected claim: {other:?}"),
        }
    }

    #[test]
    fn changed_leaf_always_rebuilds() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("leaf"));
        node.claim(eval, &tx);
        node.complete(eval, Version::MINIMAL, NodeOutput::Value(Value::new(1u32)), vec![], false);

        node.mark_dirty(true);
        assert_eq!(node.state(), NodeState::Changed);
        assert!(matches!(
            node.claim(EvaluationId::new(), &tx),
            Claim::Started(StartKind::Rebuild)
        ));
    }

    #[test]
    fn equal_recomputation_keeps_change_version() {
        let (tx, _rx) = unbounded_channel();
        let node = NodeEntry::new(key("a"));
        let first = EvaluationId::new();
        node.claim(first, &tx);
        node.complete(first, Version::MINIMAL, NodeOutput::Value(Value::new(7u32)), vec![], false);

        node.mark_dirty(true);
        let second = EvaluationId::new();
        node.claim(second, &tx);
        let completion = node.complete(
            second,
            Version::MINIMAL.next(),
            NodeOutput::Value(Value::new(7u32)),
            vec![],
            false,
        );

        assert!(!completion.changed);
        assert_eq!(node.last_changed(), Version::MINIMAL);
        assert_eq!(node.last_evaluated(), Version::MINIMAL.next());
    }

    #[test]
    fn transient_errors_are_only_valid_for_their_evaluation() {
        let (tx, _rx) = unbounded_channel();
        let node = NodeEntry::new(key("flaky"));
        let first = EvaluationId::new();
        node.claim(first, &tx);
        node.complete(
            first,
            Version::MINIMAL,
            NodeOutput::Error(ErrorInfo::from_failure(
                &key("flaky"),
                FunctionError::transient("timeout"),
            )),
            vec![],
            false,
        );

        assert!(node.lookup(first).is_some());
        assert!(node.lookup(EvaluationId::new()).is_none());
        assert!(matches!(
            node.claim(EvaluationId::new(), &tx),
            Claim::Started(StartKind::Rebuild)
        ));
    }

    #[test]
    fn abandon_restores_claimed_state() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("a"));
        node.claim(eval, &tx);

        assert!(!node.abandon(EvaluationId::new()));
        assert!(node.abandon(eval));
        assert_eq!(node.state(), NodeState::NotStarted);
    }

    #[test]
    fn rewind_reset_only_applies_to_done_nodes() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("out"));
        assert!(node.reset_for_rewind().is_none());

        node.claim(eval, &tx);
        node.complete(eval, Version::MINIMAL, NodeOutput::Value(Value::new(())), vec![], false);
        node.add_reverse_dep(key("consumer"));
        assert_eq!(node.reset_for_rewind(), Some(vec![key("consumer")]));
        assert_eq!(node.state(), NodeState::Changed);
        assert!(node.reset_for_rewind().is_none());
    }

    #[test]
    fn value_built_on_a_transient_failure_is_only_valid_for_its_evaluation() {
        let (tx, _rx) = unbounded_channel();
        let node = NodeEntry::new(key("recovered"));
        let first = EvaluationId::new();
        node.claim(first, &tx);
        node.complete(first, Version::MINIMAL, NodeOutput::Value(Value::new(-1i64)), vec![], true);

        let snapshot = node.lookup(first).unwrap();
        assert!(snapshot.transient);
        assert!(node.lookup(EvaluationId::new()).is_none());
        assert!(node.done_output().is_none());

        let second = EvaluationId::new();
        assert!(matches!(node.claim(second, &tx), Claim::Started(StartKind::Rebuild)));
        node.complete(second, Version::MINIMAL.next(), NodeOutput::Value(Value::new(4i64)), vec![], false);
        assert!(!node.lookup(EvaluationId::new()).unwrap().transient);
    }

    #[test]
    fn done_output_requires_a_done_node() {
        let (tx, _rx) = unbounded_channel();
        let eval = EvaluationId::new();
        let node = NodeEntry::new(key("a"));
        assert!(node.done_output().is_none());

        node.claim(eval, &tx);
        node.complete(eval, Version::MINIMAL, NodeOutput::Value(Value::new(3u8)), vec![], false);
        assert_eq!(node.done_output(), Some(NodeOutput::Value(Value::new(3u8))));

        node.mark_dirty(false);
        assert!(node.output().is_some());
        assert!(node.done_output().is_none());
    }

    #[test]
    fn injected_nodes_ignore_invalidation() {
        let node = NodeEntry::new(key("build_id"));
        assert!(node.inject(Value::new("abc".to_string()), Version::MINIMAL).is_some());
        assert!(node.inject(Value::new("abc".to_string()), Version::MINIMAL).is_none());
        assert!(node.mark_dirty(true).is_none());
        assert_eq!(node.state(), NodeState::Done);
        assert!(node.is_injected());
    }
}
