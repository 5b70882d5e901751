//! Computation Functions
//!
//! A [`Function`] computes the value of every key that carries its
//! [`FunctionName`](crate::key::FunctionName).
//!
//! # The Restart Protocol
//!
//! Functions cannot block waiting for a dependency. Instead:
//!
//! 1. The function asks the [`Environment`] for the values it needs.
//! 2. Dependencies that are not computed yet come back as `None`, and
//!    [`Environment::values_missing`] turns true.
//! 3. The function returns [`Environment::restart`], which lists the missing
//!    keys as [`Outcome::NeedsDeps`].
//! 4. The evaluator computes those keys and then calls the function again
//!    from the top.
//!
//! Nothing survives between invocations except what the function stores
//! itself, typically in a [`SideCache`] keyed by the node's key. Functions must
//! therefore be idempotent, and should request dependencies in batches
//! ([`Environment::get_values`]) where they can, to keep restarts rare.

mod environment;
mod error;
mod registry;
mod side_cache;

pub use environment::Environment;
pub(crate) use environment::EnvReport;
pub use error::{FunctionError, Transience};
pub use registry::{FunctionRegistry, FunctionRegistryBuilder};
pub use side_cache::SideCache;

use crate::action::Artifact;
use crate::key::{Key, Value};

/// What a single function invocation produced.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The node's value. Only valid when no dependency was missing.
    Done(Value),

    /// Some requested dependencies are not available yet. Call again once
    /// they are.
    NeedsDeps(Vec<Key>),

    /// Executing the node's action found some of its (previously built)
    /// inputs missing. The evaluator rewinds their producers and restarts the
    /// node.
    LostInputs(Vec<Artifact>),
}

impl Outcome {
    /// Shorthand for `Outcome::Done(Value::new(data))`.
    pub fn done<T>(data: T) -> Self
    where
        T: std::any::Any + std::fmt::Debug + PartialEq + Send + Sync,
    {
        Outcome::Done(Value::new(data))
    }
}

/// A named computation.
pub trait Function: Send + Sync {
    /// Compute the value of `key`, requesting dependencies from `env`.
    fn compute(&self, key: &Key, env: &mut Environment) -> Result<Outcome, FunctionError>;

    /// Called when the engine dirties or rewinds a node this function
    /// computes. Drop any side-cached state for `key` here.
    fn on_node_dirtied(&self, _key: &Key) {}
}

/// Adapter that lets a closure act as a [`Function`].
pub(crate) struct FnFunction<F>(pub(crate) F);

impl<F> Function for FnFunction<F>
where
    F: Fn(&Key, &mut Environment) -> Result<Outcome, FunctionError> + Send + Sync,
{
    fn compute(&self, key: &Key, env: &mut Environment) -> Result<Outcome, FunctionError> {
        (self.0)(key, env)
    }
}
