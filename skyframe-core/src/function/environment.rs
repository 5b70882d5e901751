//! The view of the graph a function gets while it runs.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;

use super::{FunctionError, Outcome};
use crate::evaluator::{ErrorInfo, InterruptHandle};
use crate::graph::{DepGroup, DoneSnapshot, EvaluationId, Graph, NodeOutput};
use crate::key::{Key, Value};

/// Dependency access for one function invocation.
///
/// Every key requested through the environment becomes a dependency of the
/// node being computed, whether or not its value was available. Keys
/// requested together in one call form a *group*; when the node is later
/// re-verified after an invalidation, groups are checked in request order.
pub struct Environment {
    key: Key,
    graph: Arc<Graph>,
    evaluation: EvaluationId,
    interrupt: InterruptHandle,
    keep_going: bool,
    groups: Vec<DepGroup>,
    requested: HashSet<Key>,
    missing: IndexSet<Key>,
    dep_errors: IndexMap<Key, ErrorInfo>,
    transient_deps: bool,
}

/// What the evaluator needs from an environment once the function returns.
#[derive(Debug, Default)]
pub(crate) struct EnvReport {
    pub(crate) groups: Vec<DepGroup>,
    pub(crate) missing: IndexSet<Key>,
    pub(crate) dep_errors: IndexMap<Key, ErrorInfo>,
    /// A dependency read by the function is only valid for this evaluation.
    pub(crate) transient_deps: bool,
}

impl EnvReport {
    pub(crate) fn values_missing(&self) -> bool {
        !self.missing.is_empty() || !self.dep_errors.is_empty()
    }
}

impl Environment {
    pub(crate) fn new(
        key: Key,
        graph: Arc<Graph>,
        evaluation: EvaluationId,
        interrupt: InterruptHandle,
        keep_going: bool,
    ) -> Self {
        Self {
            key,
            graph,
            evaluation,
            interrupt,
            keep_going,
            groups: Vec::new(),
            requested: HashSet::new(),
            missing: IndexSet::new(),
            dep_errors: IndexMap::new(),
            transient_deps: false,
        }
    }

    /// The key being computed.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Request one dependency.
    ///
    /// Returns `None` if the dependency is not computed yet or failed; in
    /// either case [`values_missing`](Self::values_missing) becomes true.
    pub fn get_value(&mut self, key: &Key) -> Option<Value> {
        self.record_group(std::slice::from_ref(key));
        self.resolve(key)
    }

    /// Request a batch of dependencies as one group.
    ///
    /// The result lines up with `keys`. Batching lets the evaluator compute
    /// all missing keys in parallel before the next restart.
    pub fn get_values(&mut self, keys: &[Key]) -> Vec<Option<Value>> {
        self.record_group(keys);
        keys.iter().map(|key| self.resolve(key)).collect()
    }

    /// Request one dependency, handling its failure.
    ///
    /// Returns `None` only while the dependency is still being computed. A
    /// failed dependency comes back as `Some(Err(..))` and does not count as
    /// missing, so the function may recover from it and produce a value.
    pub fn get_value_or_error(&mut self, key: &Key) -> Option<Result<Value, ErrorInfo>> {
        self.record_group(std::slice::from_ref(key));
        match self.graph.lookup_done(key, self.evaluation) {
            Some(snapshot) => match self.observe(snapshot) {
                NodeOutput::Value(value) => Some(Ok(value)),
                NodeOutput::Error(error) => Some(Err(error)),
            },
            None => {
                self.missing.insert(key.clone());
                None
            }
        }
    }

    /// Request one dependency and clone its payload as `T`.
    ///
    /// A present value of a different type is reported as missing too, since
    /// the function cannot make progress with it either.
    pub fn get_as<T: Any + Clone>(&mut self, key: &Key) -> Option<T> {
        let value = self.get_value(key)?;
        let typed = value.downcast_ref::<T>().cloned();
        if typed.is_none() {
            tracing::warn!(
                node = %self.key,
                dep = %key,
                "dependency value has an unexpected type"
            );
            self.dep_errors.insert(
                key.clone(),
                ErrorInfo::from_failure(
                    key,
                    FunctionError::persistent(format!("{key} has an unexpected value type")),
                ),
            );
        }
        typed
    }

    /// Whether any dependency requested so far was unavailable.
    pub fn values_missing(&self) -> bool {
        !self.missing.is_empty() || !self.dep_errors.is_empty()
    }

    /// The outcome to return when [`values_missing`](Self::values_missing).
    pub fn restart(&self) -> Outcome {
        Outcome::NeedsDeps(
            self.missing
                .iter()
                .chain(self.dep_errors.keys())
                .cloned()
                .collect(),
        )
    }

    /// Whether the evaluation has been interrupted.
    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Fail with a transient error if the evaluation has been interrupted.
    ///
    /// Long-running functions should call this between steps.
    pub fn check_interrupted(&self) -> Result<(), FunctionError> {
        if self.is_interrupted() {
            Err(FunctionError::interrupted())
        } else {
            Ok(())
        }
    }

    /// Whether the evaluation continues past errors.
    pub fn keep_going(&self) -> bool {
        self.keep_going
    }

    pub(crate) fn into_report(self) -> EnvReport {
        EnvReport {
            groups: self.groups,
            missing: self.missing,
            dep_errors: self.dep_errors,
            transient_deps: self.transient_deps,
        }
    }

    /// A result computed from a transient dependency is itself transient.
    fn observe(&mut self, snapshot: DoneSnapshot) -> NodeOutput {
        self.transient_deps |= snapshot.transient;
        snapshot.output
    }

    fn record_group(&mut self, keys: &[Key]) {
        let group: DepGroup = keys
            .iter()
            .filter(|key| self.requested.insert((*key).clone()))
            .cloned()
            .collect::<SmallVec<_>>();
        if !group.is_empty() {
            self.groups.push(group);
        }
    }

    fn resolve(&mut self, key: &Key) -> Option<Value> {
        match self.graph.lookup_done(key, self.evaluation) {
            Some(snapshot) => match self.observe(snapshot) {
                NodeOutput::Value(value) => Some(value),
                NodeOutput::Error(error) => {
                    self.dep_errors.insert(key.clone(), error);
                    None
                }
            },
            None => {
                self.missing.insert(key.clone());
                None
            }
        }
    }
}
