//! Action Boundary
//!
//! The engine does not execute actions. It only needs to know enough about
//! them to answer "what produced this file" when an executor reports that a
//! previously built input has gone missing.
//!
//! # Model
//!
//! - An [`Artifact`] is a file path that is either a source file or the output
//!   of an action.
//! - An [`Action`] is an opaque work item with declared inputs and outputs.
//!   Actions are attached, in order, to the [`Value`](crate::key::Value) of
//!   the node that generated them.
//! - An [`ActionId`] names an action by its generating node and its index in
//!   that node's action list.
//! - [`ActionGraph`] is implemented by the action-execution client to map
//!   artifacts and actions onto graph keys.

use std::fmt;
use std::sync::Arc;

use crate::key::Key;

/// Identifies an action by the node that generated it and its position in
/// that node's value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId {
    owner: Key,
    index: usize,
}

impl ActionId {
    /// Create an id for the `index`-th action generated by `owner`.
    pub fn new(owner: Key, index: usize) -> Self {
        Self { owner, index }
    }

    /// The node whose value lists this action.
    pub fn owner(&self) -> &Key {
        &self.owner
    }

    /// Position in the owner's action list.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner, self.index)
    }
}

/// Where an artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactOrigin {
    /// Checked-in source. Cannot be regenerated.
    Source,
    /// Output of the identified action.
    Derived(ActionId),
}

/// A file consumed or produced by actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Artifact {
    exec_path: Arc<str>,
    origin: ArtifactOrigin,
}

impl Artifact {
    /// A source artifact.
    pub fn source(exec_path: impl Into<Arc<str>>) -> Self {
        Self {
            exec_path: exec_path.into(),
            origin: ArtifactOrigin::Source,
        }
    }

    /// An artifact produced by `generating_action`.
    pub fn derived(exec_path: impl Into<Arc<str>>, generating_action: ActionId) -> Self {
        Self {
            exec_path: exec_path.into(),
            origin: ArtifactOrigin::Derived(generating_action),
        }
    }

    /// Path relative to the execution root.
    pub fn exec_path(&self) -> &str {
        &self.exec_path
    }

    /// Whether this is a source artifact.
    pub fn is_source(&self) -> bool {
        matches!(self.origin, ArtifactOrigin::Source)
    }

    /// The action that produces this artifact, if it is derived.
    pub fn generating_action(&self) -> Option<&ActionId> {
        match &self.origin {
            ArtifactOrigin::Source => None,
            ArtifactOrigin::Derived(id) => Some(id),
        }
    }

    /// Get the origin.
    pub fn origin(&self) -> &ArtifactOrigin {
        &self.origin
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.exec_path)
    }
}

/// An opaque side-effecting work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    mnemonic: Arc<str>,
    inputs: Vec<Artifact>,
    outputs: Vec<Artifact>,
    propagates_inputs_insensitively: bool,
}

impl Action {
    /// Create an action with no inputs or outputs.
    pub fn new(mnemonic: impl Into<Arc<str>>) -> Self {
        Self {
            mnemonic: mnemonic.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            propagates_inputs_insensitively: false,
        }
    }

    /// Set the declared inputs.
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    /// Set the declared outputs.
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = Artifact>) -> Self {
        self.outputs = outputs.into_iter().collect();
        self
    }

    /// Mark the action as one whose outputs cannot be attributed to specific
    /// inputs (e.g. it unpacks or deploys a whole archive). Rewinding such an
    /// action also rewinds the producers of its inputs.
    pub fn propagating_inputs_insensitively(mut self) -> Self {
        self.propagates_inputs_insensitively = true;
        self
    }

    /// Short name of the action kind.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    /// Declared inputs.
    pub fn inputs(&self) -> &[Artifact] {
        &self.inputs
    }

    /// Declared outputs.
    pub fn outputs(&self) -> &[Artifact] {
        &self.outputs
    }

    /// See [`Action::propagating_inputs_insensitively`].
    pub fn propagates_inputs_insensitively(&self) -> bool {
        self.propagates_inputs_insensitively
    }
}

/// Mapping between the action world and graph keys, provided by the
/// action-execution client.
pub trait ActionGraph: Send + Sync {
    /// The node that represents `artifact` as a dependency.
    fn artifact_key(&self, artifact: &Artifact) -> Key;

    /// The node that executes `action`.
    fn action_key(&self, action: &ActionId) -> Key;

    /// Drop any executor-side state for `action` so it runs again.
    fn reset_action(&self, _action: &ActionId) {}
}
