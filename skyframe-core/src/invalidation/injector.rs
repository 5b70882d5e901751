//! Injected values.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::function::Environment;
use crate::graph::Graph;
use crate::key::{FunctionName, Key, Value};

/// Function name of every [`Precomputed`] key. No function is registered for
/// it; requesting a precomputed value that was never injected is an error.
pub const PRECOMPUTED: FunctionName = FunctionName::new("PRECOMPUTED");

/// Queue of values to write into the graph at the start of the next
/// evaluation.
#[derive(Debug, Default)]
pub struct Injector {
    pending: Mutex<IndexMap<Key, Value>>,
}

impl Injector {
    /// Create an empty injector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `value` for `key`. A later injection for the same key replaces
    /// an earlier one that was not applied yet.
    pub fn inject(&self, key: Key, value: Value) {
        self.pending.lock().insert(key, value);
    }

    /// Number of queued injections.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Write every queued value into `graph`, returning the dependents that
    /// were dirtied because a value changed.
    pub(crate) fn apply(&self, graph: &Graph) -> Vec<Key> {
        let pending = std::mem::take(&mut *self.pending.lock());
        if pending.is_empty() {
            return Vec::new();
        }

        let version = graph.advance_version();
        let mut affected = Vec::new();
        for (key, value) in pending {
            affected.extend(graph.inject(&key, value, version));
        }
        let dirtied = graph.mark_dirty(&affected, false);
        debug!(version = version.raw(), dirtied = dirtied.len(), "applied injected values");
        dirtied
    }
}

/// A named, typed value supplied from outside the graph, such as a build
/// id or a flag.
///
/// ```rust
/// use skyframe_core::invalidation::{Injector, Precomputed};
///
/// static BUILD_ID: Precomputed<String> = Precomputed::new("build_id");
///
/// let injector = Injector::new();
/// BUILD_ID.set(&injector, "1234".to_string());
/// assert_eq!(injector.pending_len(), 1);
/// ```
pub struct Precomputed<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Precomputed<T>
where
    T: Any + fmt::Debug + PartialEq + Clone + Send + Sync,
{
    /// Declare a precomputed value.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Get the name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The graph key holding the value.
    pub fn key(&self) -> Key {
        Key::new(PRECOMPUTED, self.name)
    }

    /// Read the value as a dependency of the node being computed.
    pub fn get(&self, env: &mut Environment) -> Option<T> {
        env.get_as::<T>(&self.key())
    }

    /// Queue a new value.
    pub fn set(&self, injector: &Injector, value: T) {
        injector.inject(self.key(), Value::new(value));
    }
}

impl<T> fmt::Debug for Precomputed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Precomputed").field(&self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeState;

    static FLAG: Precomputed<bool> = Precomputed::new("injector-test-flag");

    #[test]
    fn later_injection_wins() {
        let injector = Injector::new();
        FLAG.set(&injector, false);
        FLAG.set(&injector, true);
        assert_eq!(injector.pending_len(), 1);

        let graph = Graph::new();
        injector.apply(&graph);
        assert_eq!(injector.pending_len(), 0);

        let node = graph.get_node(&FLAG.key()).unwrap();
        assert_eq!(node.state(), NodeState::Done);
        assert_eq!(node.value(), Some(Value::new(true)));
        assert!(node.is_injected());
    }

    #[test]
    fn applying_nothing_keeps_the_version() {
        let graph = Graph::new();
        let before = graph.version();
        assert!(Injector::new().apply(&graph).is_empty());
        assert_eq!(graph.version(), before);
    }
}
