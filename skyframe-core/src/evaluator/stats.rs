//! Evaluation counters.

use serde::Serialize;

/// What one evaluation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationStats {
    /// Function invocations, restarts included.
    pub functions_invoked: usize,

    /// Invocations that ended with missing dependencies.
    pub restarts: usize,

    /// Dirty nodes whose dependencies were unchanged, so their function did
    /// not run.
    pub verified_clean: usize,

    /// Requests answered from a node that was already done.
    pub cache_hits: usize,

    /// Nodes computed from scratch or recomputed.
    pub nodes_computed: usize,

    /// Lost-input rewinds applied.
    pub rewinds: usize,
}
