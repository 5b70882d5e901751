//! Evaluation results.

use std::any::Any;

use indexmap::IndexMap;

use super::{ErrorInfo, EvaluationStats};
use crate::cycle::CycleInfo;
use crate::key::{Key, Value};
use crate::rewind::RewindPlan;

/// The outcome of one `evaluate` call.
///
/// With `keep_going`, every root has either a value or an error. In
/// fail-fast mode evaluation stops at the first failure; roots that were not
/// finished by then are absent, and the failure is reported under the root
/// it was on the way to (or under the failing key if no root was found).
#[derive(Debug, Clone, Default)]
pub struct EvaluationResult {
    pub(crate) values: IndexMap<Key, Value>,
    pub(crate) errors: IndexMap<Key, ErrorInfo>,
    pub(crate) stats: EvaluationStats,
    pub(crate) rewinds: Vec<RewindPlan>,
}

impl EvaluationResult {
    /// The value of a root, if it succeeded.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        self.values.get(key)
    }

    /// The value of a root as `T`.
    pub fn get_as<T: Any>(&self, key: &Key) -> Option<&T> {
        self.get(key)?.downcast_ref::<T>()
    }

    /// The error of a root, if it failed.
    pub fn error(&self, key: &Key) -> Option<&ErrorInfo> {
        self.errors.get(key)
    }

    /// Whether any root failed.
    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Successful roots, in request order.
    pub fn values(&self) -> &IndexMap<Key, Value> {
        &self.values
    }

    /// Failed roots.
    pub fn errors(&self) -> &IndexMap<Key, ErrorInfo> {
        &self.errors
    }

    /// Every cycle reported by any failed root.
    pub fn cycles(&self) -> Vec<&CycleInfo> {
        self.errors.values().flat_map(|error| error.cycles()).collect()
    }

    /// Counters for this evaluation.
    pub fn stats(&self) -> &EvaluationStats {
        &self.stats
    }

    /// Rewinds applied during this evaluation.
    pub fn rewinds(&self) -> &[RewindPlan] {
        &self.rewinds
    }
}
