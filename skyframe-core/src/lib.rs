//! Skyframe Core
//!
//! This crate provides an incremental, parallel, memoizing evaluation engine
//! for build tools. It implements:
//!
//! - A key/value node model with interned keys and structurally compared values
//! - A memoizing dependency graph with per-node locking
//! - A concurrent evaluator with restartable functions, fail-fast and
//!   keep-going modes
//! - Invalidation with change pruning
//! - Cycle detection and reporting
//! - Rewinding of lost action inputs
//!
//! The engine knows nothing about packages, targets or files. Everything a
//! build tool computes is expressed as a [`Function`](function::Function)
//! keyed by a [`Key`](key::Key).
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `key`: Keys, values and graph versions
//! - `function`: The function contract, its environment and the registry
//! - `graph`: The memoizing graph and its node state machine
//! - `evaluator`: The build driver and evaluation results
//! - `invalidation`: Dirtying changed leaves and injecting values
//! - `cycle`: Cycle detection and reporting
//! - `action` / `rewind`: The action boundary and lost-input recovery
//! - `config` / `error`: Configuration and error types
//!
//! # Example
//!
//! ```rust
//! use skyframe_core::evaluator::Evaluator;
//! use skyframe_core::function::{FunctionRegistry, Outcome};
//! use skyframe_core::key::{FunctionName, Key};
//!
//! const FILE: FunctionName = FunctionName::new("FILE");
//! const LINES: FunctionName = FunctionName::new("LINES");
//!
//! let registry = FunctionRegistry::builder()
//!     .register_fn(FILE, |key, _env| {
//!         let path = key.argument::<String>().cloned().unwrap_or_default();
//!         Ok(Outcome::done(format!("contents of {path}\nsecond line")))
//!     })
//!     .register_fn(LINES, |key, env| {
//!         let file = Key::new(FILE, key.argument::<String>().cloned().unwrap_or_default());
//!         let Some(text) = env.get_as::<String>(&file) else {
//!             // Not computed yet: ask for a restart once it is.
//!             return Ok(env.restart());
//!         };
//!         Ok(Outcome::done(text.lines().count()))
//!     })
//!     .build();
//!
//! let evaluator = Evaluator::new(registry).unwrap();
//! let lines = Key::new(LINES, "README.md".to_string());
//! let result = evaluator.evaluate(&[lines.clone()], evaluator.default_options()).unwrap();
//! assert_eq!(result.get_as::<usize>(&lines), Some(&2));
//! ```

pub mod action;
pub mod config;
pub mod cycle;
pub mod error;
pub mod evaluator;
pub mod function;
pub mod graph;
pub mod invalidation;
pub mod key;
pub mod rewind;

pub use error::{ConfigError, EvaluationError, RewindError};
pub use evaluator::{EvaluationOptions, EvaluationResult, Evaluator};
pub use key::{FunctionName, Key, Value};
