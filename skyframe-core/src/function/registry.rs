//! Function registry.
//!
//! The set of functions is fixed when the evaluator is built. Adding a new
//! function name means building a new evaluator.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Environment, FnFunction, Function, FunctionError, Outcome};
use crate::key::{FunctionName, Key};

/// Immutable mapping from function name to implementation.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<FunctionName, Arc<dyn Function>>,
}

impl FunctionRegistry {
    /// Start building a registry.
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder::default()
    }

    /// Look up the function for a name.
    pub fn get(&self, name: FunctionName) -> Option<&Arc<dyn Function>> {
        self.functions.get(&name)
    }

    /// Look up the function that computes `key`.
    pub fn function_for(&self, key: &Key) -> Option<&Arc<dyn Function>> {
        self.get(key.function_name())
    }

    /// Whether a function is registered under `name`.
    pub fn contains(&self, name: FunctionName) -> bool {
        self.functions.contains_key(&name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<FunctionName> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort();
        names
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether no function is registered.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.names())
            .finish()
    }
}

/// Builder for [`FunctionRegistry`].
#[derive(Default)]
pub struct FunctionRegistryBuilder {
    functions: HashMap<FunctionName, Arc<dyn Function>>,
}

impl FunctionRegistryBuilder {
    /// Register `function` under `name`. A later registration for the same
    /// name replaces the earlier one.
    pub fn register(mut self, name: FunctionName, function: Arc<dyn Function>) -> Self {
        if self.functions.insert(name, function).is_some() {
            tracing::warn!(function = %name, "function registered twice; keeping the last one");
        }
        self
    }

    /// Register a closure under `name`.
    pub fn register_fn<F>(self, name: FunctionName, function: F) -> Self
    where
        F: Fn(&Key, &mut Environment) -> Result<Outcome, FunctionError> + Send + Sync + 'static,
    {
        self.register(name, Arc::new(FnFunction(function)))
    }

    /// Freeze the registry.
    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: self.functions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARSE: FunctionName = FunctionName::new("PARSE");
    const LOAD: FunctionName = FunctionName::new("LOAD");

    #[test]
    fn lookup_by_key_function_name() {
        let registry = FunctionRegistry::builder()
            .register_fn(PARSE, |_, _| Ok(Outcome::done(1u8)))
            .build();

        let key = Key::new(PARSE, "BUILD".to_string());
        assert!(registry.function_for(&key).is_some());
        assert!(registry.contains(PARSE));
        assert!(!registry.contains(LOAD));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let registry = FunctionRegistry::builder()
            .register_fn(PARSE, |_, _| Ok(Outcome::done(())))
            .register_fn(LOAD, |_, _| Ok(Outcome::done(())))
            .build();
        assert_eq!(registry.names(), vec![LOAD, PARSE]);
    }
}
