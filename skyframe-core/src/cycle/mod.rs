//! Cycle Detection and Reporting
//!
//! A cycle in the dependency graph cannot be evaluated: every member waits
//! for another member to finish. The evaluator notices this when it has
//! unfinished nodes but nothing running and nothing runnable, and asks the
//! detector for the cycles among the pending dependency edges.
//!
//! # Overview
//!
//! - [`find_cycles`] walks the pending edges of a [`PendingGraph`] and returns
//!   each distinct cycle once.
//! - [`CycleInfo`] is the record attached to failed nodes: the cycle itself
//!   plus the path from the reporting node to the cycle.
//! - [`CycleReporter`] renders cycle records for humans, using a
//!   [`KeyDescriber`] per function name where one is registered.

mod detector;
mod info;
mod reporter;

pub use detector::{find_cycles, PendingGraph};
pub use info::CycleInfo;
pub use reporter::{CycleReporter, KeyDescriber};
