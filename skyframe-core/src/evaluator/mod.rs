//! Evaluator
//!
//! The evaluator owns the graph and the function registry and answers
//! `evaluate(roots)` requests against them.
//!
//! # Overview
//!
//! Each evaluation runs a single scheduler loop (the driver) that:
//!
//! 1. Claims every requested node that is not up to date.
//! 2. Re-verifies dirty nodes by walking their previous dependency groups.
//! 3. Runs functions of nodes that must be recomputed on a bounded pool of
//!    blocking worker threads.
//! 4. Feeds requested dependencies back into step 1 and re-runs a function
//!    once everything it asked for is done.
//!
//! The loop ends when every root is done, on the first failure (fail-fast),
//! or on interruption.
//!
//! # Concurrency
//!
//! Several threads may call [`Evaluator::evaluate`] at once. They share the
//! graph: a node is computed by whichever evaluation claims it first, and the
//! others wait for that result instead of computing it again.
//!
//! Injections and invalidations never touch nodes an evaluation is working
//! on: they wait until every running evaluation has returned.
//!
//! `evaluate` blocks the calling thread. Do not call it from inside an async
//! runtime.

mod driver;
mod error_info;
mod interrupt;
mod options;
mod result;
mod stats;

pub use error_info::ErrorInfo;
pub use interrupt::InterruptHandle;
pub use options::EvaluationOptions;
pub use result::EvaluationResult;
pub use stats::EvaluationStats;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

use crate::action::{Action, ActionGraph, Artifact};
use crate::config::EvaluatorConfig;
use crate::error::{EvalResult, EvaluationError};
use crate::function::FunctionRegistry;
use crate::graph::Graph;
use crate::invalidation::{self, Diff, Differencer, Injector};
use crate::key::{Key, Value};
use crate::rewind::RewindStrategy;
use driver::Driver;

/// Lost-input recovery wiring.
pub(crate) struct RewindContext {
    pub(crate) strategy: RewindStrategy,
    pub(crate) actions: Arc<dyn ActionGraph>,
}

/// The incremental evaluation engine.
///
/// # Example
///
/// ```rust
/// use skyframe_core::evaluator::Evaluator;
/// use skyframe_core::function::{FunctionRegistry, Outcome};
/// use skyframe_core::key::{FunctionName, Key};
///
/// const DOUBLE: FunctionName = FunctionName::new("DOUBLE");
///
/// let registry = FunctionRegistry::builder()
///     .register_fn(DOUBLE, |key, _env| {
///         let n = key.argument::<u64>().copied().unwrap_or_default();
///         Ok(Outcome::done(n * 2))
///     })
///     .build();
/// let evaluator = Evaluator::new(registry).unwrap();
///
/// let key = Key::new(DOUBLE, 21u64);
/// let result = evaluator.evaluate(&[key.clone()], evaluator.default_options()).unwrap();
/// assert_eq!(result.get_as::<u64>(&key), Some(&42));
/// ```
pub struct Evaluator {
    graph: Arc<Graph>,
    registry: Arc<FunctionRegistry>,
    config: EvaluatorConfig,
    injector: Injector,
    rewinding: Option<RewindContext>,
    runtime: Runtime,
    /// Held shared by every running evaluation and exclusively while
    /// injections or invalidations change the graph between them.
    evaluations: RwLock<()>,
}

/// Builder for [`Evaluator`].
pub struct EvaluatorBuilder {
    registry: FunctionRegistry,
    config: EvaluatorConfig,
    action_graph: Option<Arc<dyn ActionGraph>>,
}

impl EvaluatorBuilder {
    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable lost-input rewinding through `action_graph`.
    pub fn action_graph(mut self, action_graph: Arc<dyn ActionGraph>) -> Self {
        self.action_graph = Some(action_graph);
        self
    }

    /// Build the evaluator and its worker runtime.
    pub fn build(self) -> EvalResult<Evaluator> {
        self.config
            .validate()
            .map_err(|err| EvaluationError::InvalidOptions {
                message: err.to_string(),
            })?;

        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(self.config.parallelism)
            .thread_name("skyframe-worker")
            .enable_all()
            .build()?;

        let rewinding = match (self.config.rewinding.enabled, self.action_graph) {
            (true, Some(actions)) => Some(RewindContext {
                strategy: RewindStrategy::from_config(&self.config.rewinding),
                actions,
            }),
            _ => None,
        };

        info!(
            functions = self.registry.len(),
            parallelism = self.config.parallelism,
            rewinding = rewinding.is_some(),
            "evaluator ready"
        );

        Ok(Evaluator {
            graph: Arc::new(Graph::new()),
            registry: Arc::new(self.registry),
            config: self.config,
            injector: Injector::new(),
            rewinding,
            runtime,
            evaluations: RwLock::new(()),
        })
    }
}

impl Evaluator {
    /// Start building an evaluator for `registry`.
    pub fn builder(registry: FunctionRegistry) -> EvaluatorBuilder {
        EvaluatorBuilder {
            registry,
            config: EvaluatorConfig::default(),
            action_graph: None,
        }
    }

    /// An evaluator with the default configuration and no rewinding.
    pub fn new(registry: FunctionRegistry) -> EvalResult<Self> {
        Self::builder(registry).build()
    }

    /// Evaluate `roots`.
    ///
    /// Pending injections are applied first, once no other evaluation is
    /// running. Node failures do not make this return `Err`; they are
    /// reported per root in the result.
    pub fn evaluate(
        &self,
        roots: &[Key],
        options: EvaluationOptions,
    ) -> EvalResult<EvaluationResult> {
        if options.parallelism == 0 {
            return Err(EvaluationError::InvalidOptions {
                message: "parallelism must be at least 1".to_string(),
            });
        }
        if self.injector.pending_len() > 0 {
            let _exclusive = self.evaluations.write();
            let dirtied = self.injector.apply(&self.graph);
            invalidation::notify_dirtied(&self.registry, &dirtied);
        }
        let _shared = self.evaluations.read();
        let _active = self.graph.begin_evaluation();

        for root in roots {
            let function = root.function_name();
            if !self.registry.contains(function) && !self.graph.get_node(root).map_or(false, |node| node.is_done()) {
                return Err(EvaluationError::UnknownFunction {
                    function,
                    key: root.clone(),
                });
            }
        }

        info!(
            roots = roots.len(),
            keep_going = options.keep_going,
            parallelism = options.parallelism,
            version = self.graph.version().raw(),
            "starting evaluation"
        );
        self.runtime.block_on(Driver::new(self, roots, options).run())
    }

    /// Options built from this evaluator's configuration.
    pub fn default_options(&self) -> EvaluationOptions {
        EvaluationOptions::from_config(&self.config)
    }

    /// Mark `keys` as possibly changed. Returns every node dirtied.
    pub fn invalidate(&self, keys: &[Key]) -> Vec<Key> {
        self.apply_diff(&Diff::possibly_changed(keys.iter().cloned()))
    }

    /// Mark `keys` as changed. Returns every node dirtied.
    pub fn invalidate_changed(&self, keys: &[Key]) -> Vec<Key> {
        self.apply_diff(&Diff::changed(keys.iter().cloned()))
    }

    /// Apply a diff computed by the client. Waits for running evaluations
    /// to finish, so it must not be called from a function.
    pub fn apply_diff(&self, diff: &Diff) -> Vec<Key> {
        let _exclusive = self.evaluations.write();
        invalidation::invalidate(&self.graph, &self.registry, diff)
    }

    /// Ask `differencer` what changed and invalidate it.
    pub fn sync(&self, differencer: &dyn Differencer) -> Vec<Key> {
        let diff = differencer.diff(&self.graph);
        self.apply_diff(&diff)
    }

    /// The queue of values to inject before the next evaluation.
    pub fn injector(&self) -> &Injector {
        &self.injector
    }

    /// Queue `value` for `key`; it takes effect at the next evaluation.
    pub fn inject(&self, key: Key, value: Value) {
        self.injector.inject(key, value);
    }

    /// The shared graph.
    pub fn graph(&self) -> &Arc<Graph> {
        &self.graph
    }

    /// The function registry.
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// The configuration.
    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// The action that generates `artifact`, if its generating node is done.
    pub fn generating_action(&self, artifact: &Artifact) -> Option<Action> {
        self.graph.generating_action(artifact)
    }

    /// Nodes that depend on `key`.
    pub fn reverse_deps(&self, key: &Key) -> Vec<Key> {
        self.graph.get_reverse_deps(key)
    }

    /// Drop every node. Fails while an evaluation is running.
    pub fn reset_graph(&self) -> EvalResult<()> {
        let Some(_exclusive) = self.evaluations.try_write() else {
            return Err(EvaluationError::GraphBusy {
                active: self.graph.active_evaluations(),
            });
        };
        let nodes = self.graph.len();
        self.graph.clear();
        info!(nodes, "graph reset");
        Ok(())
    }

    pub(crate) fn rewinding(&self) -> Option<&RewindContext> {
        self.rewinding.as_ref()
    }
}
