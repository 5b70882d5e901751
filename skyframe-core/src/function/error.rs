//! Function failures.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Whether a failure can go away without its inputs changing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transience {
    /// Might succeed if retried (I/O hiccup, interruption). Never cached.
    Transient,
    /// Stable until the node's inputs change. Cached like a value.
    Persistent,
}

impl fmt::Display for Transience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transience::Transient => f.write_str("transient"),
            Transience::Persistent => f.write_str("persistent"),
        }
    }
}

/// The error a [`Function`](super::Function) returns when it fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FunctionError {
    message: String,
    transience: Transience,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl FunctionError {
    /// A failure that is stable until inputs change.
    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transience: Transience::Persistent,
            source: None,
        }
    }

    /// A failure worth retrying on the next evaluation.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transience: Transience::Transient,
            source: None,
        }
    }

    /// The failure a function reports when it noticed an interrupt.
    pub fn interrupted() -> Self {
        Self::transient("evaluation interrupted")
    }

    /// Attach an underlying cause.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// The top-level message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the transience.
    pub fn transience(&self) -> Transience {
        self.transience
    }

    /// Whether the failure is transient.
    pub fn is_transient(&self) -> bool {
        self.transience == Transience::Transient
    }

    /// Messages of this error and every cause, outermost first.
    pub fn chain(&self) -> Vec<String> {
        let mut messages = vec![self.message.clone()];
        let mut next = self.source();
        while let Some(cause) = next {
            messages.push(cause.to_string());
            next = cause.source();
        }
        messages
    }
}

// Compared when deciding whether an error result "changed".
impl PartialEq for FunctionError {
    fn eq(&self, other: &Self) -> bool {
        self.transience == other.transience && self.chain() == other.chain()
    }
}
