//! Invalidation and Differencing
//!
//! Between evaluations the outside world changes: files are edited, flags
//! flip. The client describes what changed as a [`Diff`] (usually produced by
//! a [`Differencer`] that compares file stats) and the evaluator invalidates
//! the affected part of the graph.
//!
//! # Overview
//!
//! - Keys known to hold a different value become `Changed`; keys that may
//!   have changed become `Dirty`.
//! - Everything that transitively depends on them becomes `Dirty`.
//! - The graph version advances once per pass, so a node can later compare
//!   the change version of its dependencies against its own verification
//!   version and skip recomputation when nothing it read has changed.
//!
//! Injected values ([`Injector`], [`Precomputed`]) are queued and applied at
//! the start of the next evaluation, with the same effect on their
//! dependents.

mod injector;

pub use injector::{Injector, Precomputed, PRECOMPUTED};

use tracing::debug;

use crate::function::FunctionRegistry;
use crate::graph::Graph;
use crate::key::Key;

/// What changed since the last evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Keys whose value is known to be different. Always recomputed.
    pub changed: Vec<Key>,

    /// Keys that may be different. Re-verified against their dependencies.
    pub possibly_changed: Vec<Key>,
}

impl Diff {
    /// A diff marking `keys` as changed.
    pub fn changed(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            changed: keys.into_iter().collect(),
            possibly_changed: Vec::new(),
        }
    }

    /// A diff marking `keys` as possibly changed.
    pub fn possibly_changed(keys: impl IntoIterator<Item = Key>) -> Self {
        Self {
            changed: Vec::new(),
            possibly_changed: keys.into_iter().collect(),
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.possibly_changed.is_empty()
    }
}

/// Computes the [`Diff`] for the current state of the world.
pub trait Differencer: Send + Sync {
    /// Inspect the leaves recorded in `graph` and report which ones changed.
    fn diff(&self, graph: &Graph) -> Diff;
}

/// Apply `diff` to `graph`, returning every node that was dirtied.
///
/// Registered functions are told about each dirtied node they compute
/// through [`Function::on_node_dirtied`](crate::function::Function::on_node_dirtied).
pub fn invalidate(graph: &Graph, registry: &FunctionRegistry, diff: &Diff) -> Vec<Key> {
    if diff.is_empty() {
        return Vec::new();
    }
    let version = graph.advance_version();

    let mut dirtied = graph.mark_dirty(&diff.changed, true);
    dirtied.extend(graph.mark_dirty(&diff.possibly_changed, false));

    debug!(
        version = version.raw(),
        changed = diff.changed.len(),
        possibly_changed = diff.possibly_changed.len(),
        dirtied = dirtied.len(),
        "invalidation pass"
    );
    notify_dirtied(registry, &dirtied);
    dirtied
}

/// Tell the owning functions that `keys` were dirtied.
pub(crate) fn notify_dirtied(registry: &FunctionRegistry, keys: &[Key]) {
    for key in keys {
        if let Some(function) = registry.function_for(key) {
            function.on_node_dirtied(key);
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
