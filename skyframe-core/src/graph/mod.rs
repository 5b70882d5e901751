//! Memoizing Graph
//!
//! This module implements the graph that remembers, for every key ever
//! requested, its value, its state and its edges.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are keys together with their last result
//! - Edges are dependencies: if A requested B while computing, A has a direct
//!   dependency on B and B has a reverse dependency on A
//!
//! When a leaf changes, invalidation walks reverse dependencies and marks
//! every node above it dirty. The evaluator then decides, node by node,
//! whether a dirty node really needs to recompute.
//!
//! # Node States
//!
//! ```text
//!  NotStarted --claim--> InFlight --complete--> Done
//!                           ^                    |
//!                           |               invalidate / rewind
//!                         claim                  v
//!                           +------------- Dirty | Changed
//! ```
//!
//! # Design Decisions
//!
//! 1. Nodes live in a sharded concurrent map (`DashMap`) and each node has its
//!    own lock. Writes to different keys never contend on a global lock.
//!
//! 2. Claiming a node for evaluation happens under its lock, so two
//!    evaluations asking for the same key at the same time cannot both run its
//!    function. The loser registers a waiter and is woken when the winner
//!    finishes.
//!
//! 3. Edges are stored as key sets on both ends. Reverse edges are updated
//!    when a node records a new dependency set, which prunes edges to
//!    dependencies it no longer uses.

mod in_memory;
mod node;

pub use in_memory::{BatchValues, Graph, GraphStats};
pub use node::{DepGroup, EvaluationId, NodeEntry, NodeOutput, NodeState};
pub(crate) use node::{Claim, DoneSnapshot, StartKind};
