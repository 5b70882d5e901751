//! Per-evaluation options.

use super::InterruptHandle;
use crate::config::EvaluatorConfig;

/// Options for one [`Evaluator::evaluate`](super::Evaluator::evaluate) call.
#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    /// Continue past failures and report an outcome for every root.
    pub keep_going: bool,

    /// Maximum number of functions running at once for this evaluation.
    pub parallelism: usize,

    /// Handle to interrupt the evaluation from another thread.
    pub interrupt: InterruptHandle,
}

impl EvaluationOptions {
    /// Options taken from an evaluator configuration.
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self {
            keep_going: config.keep_going,
            parallelism: config.parallelism,
            interrupt: InterruptHandle::new(),
        }
    }

    /// Set `keep_going`.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Set `parallelism`.
    pub fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Attach an interrupt handle.
    pub fn interrupt(mut self, interrupt: InterruptHandle) -> Self {
        self.interrupt = interrupt;
        self
    }
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self::from_config(&EvaluatorConfig::default())
    }
}
