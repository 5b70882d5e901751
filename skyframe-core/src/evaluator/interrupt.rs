//! Evaluation interruption.

use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable handle that interrupts the evaluation it was passed to.
///
/// After [`interrupt`](Self::interrupt) the evaluator stops scheduling,
/// waits for running functions to return, restores every node it had claimed
/// and fails with [`EvaluationError::Interrupted`](crate::error::EvaluationError::Interrupted).
/// Functions can poll [`Environment::check_interrupted`](crate::function::Environment::check_interrupted)
/// to return early.
///
/// A handle stays interrupted; use a fresh one for the next evaluation.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    /// Create a handle that is not interrupted.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Request interruption.
    pub fn interrupt(&self) {
        self.sender.send_replace(true);
    }

    /// Whether interruption was requested.
    pub fn is_interrupted(&self) -> bool {
        *self.sender.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}
