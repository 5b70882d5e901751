//! Error types for the evaluation engine.
//!
//! Failures of individual nodes are not errors of `evaluate`: they are
//! recorded as [`ErrorInfo`](crate::evaluator::ErrorInfo) in the
//! [`EvaluationResult`](crate::evaluator::EvaluationResult). The types here
//! cover everything that stops an evaluation, a rewind, or a configuration
//! load as a whole.

use thiserror::Error;

use crate::action::Artifact;
use crate::key::{FunctionName, Key};

/// Result type alias for evaluator operations.
pub type EvalResult<T> = Result<T, EvaluationError>;

/// Errors that abort a whole evaluation.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The evaluation was interrupted before every root finished.
    #[error("evaluation interrupted")]
    Interrupted,

    /// A root key has no registered function.
    #[error("no function registered for {function} (requested by root {key})")]
    UnknownFunction { function: FunctionName, key: Key },

    /// Work remained but nothing could make progress and no cycle explained it.
    #[error("evaluation stalled with {pending} unfinished nodes")]
    Stalled { pending: usize },

    /// The evaluation options are unusable.
    #[error("invalid evaluation options: {message}")]
    InvalidOptions { message: String },

    /// The graph cannot be reset while evaluations are running.
    #[error("graph is in use by {active} running evaluation(s)")]
    GraphBusy { active: usize },

    /// The worker runtime could not be started.
    #[error("failed to start worker runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Result type alias for rewind planning.
pub type RewindResult<T> = Result<T, RewindError>;

/// Reasons a lost-input failure cannot be recovered by rewinding.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RewindError {
    /// Source files cannot be regenerated.
    #[error("{failed} lost source input {artifact}, which cannot be regenerated")]
    LostSourceInput { failed: Key, artifact: Artifact },

    /// The lost input was never a dependency of the failed node.
    #[error("{failed} reported lost input {artifact}, which is not one of its dependencies")]
    UndeclaredInput { failed: Key, artifact: Artifact },

    /// The same input kept getting lost.
    #[error("{failed} lost {artifact} {count} times; giving up")]
    RepeatedLostInput {
        failed: Key,
        artifact: Artifact,
        count: usize,
    },

    /// No action graph was configured, or rewinding is switched off.
    #[error("rewinding is disabled; cannot recover lost inputs of {failed}")]
    Disabled { failed: Key },
}

/// Result type alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors loading or validating [`EvaluatorConfig`](crate::config::EvaluatorConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The JSON document could not be parsed.
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// An environment override held an unusable value.
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    /// A field failed validation.
    #[error("invalid config: {message}")]
    Invalid { message: String },
}
