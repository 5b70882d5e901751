//! Node Identity
//!
//! This module defines what a unit of computation is called ([`Key`]) and
//! what it produces ([`Value`]).
//!
//! # Overview
//!
//! - A [`Key`] is a `(function name, argument)` pair. The function name picks
//!   the [`Function`](crate::function::Function) that computes the key; the
//!   argument is any immutable, hashable domain value.
//! - A [`Value`] is the immutable result of evaluating a key. Values compare
//!   structurally so that a recomputation producing an equal value does not
//!   invalidate anything above it.
//! - A [`Version`] is the graph-wide counter advanced once per invalidation
//!   pass.
//!
//! # Design Decisions
//!
//! 1. Keys are interned. Two keys built from equal tuples share one
//!    allocation, so equality is usually a pointer comparison and the graph
//!    can use keys directly as map indices.
//!
//! 2. Arguments and values are type-erased behind `Any` so that one graph can
//!    hold every node type of a build tool. Typed access goes through
//!    downcasting at the edges (`Key::argument`, `Value::downcast_ref`).

mod interned;
mod value;
mod version;

pub use interned::{FunctionName, Key, KeyArgument};
pub use value::Value;
pub use version::Version;
