//! Values
//!
//! A [`Value`] wraps the immutable result of evaluating a key. The payload is
//! type-erased and shared behind an `Arc`; functions read values from the
//! environment and never mutate them.
//!
//! Values produced by analysis-like functions may also carry the actions they
//! generated. Those are secondary outputs: two values with equal payloads are
//! equal even if their action lists differ.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::action::Action;

trait ValueData: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn ValueData) -> bool;
}

impl<T> ValueData for T
where
    T: Any + fmt::Debug + PartialEq + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn ValueData) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .map_or(false, |other| other == self)
    }
}

/// The immutable result of a successful evaluation.
#[derive(Clone)]
pub struct Value {
    data: Arc<dyn ValueData>,
    actions: Arc<[Action]>,
}

impl Value {
    /// Wrap a payload.
    pub fn new<T>(data: T) -> Self
    where
        T: Any + fmt::Debug + PartialEq + Send + Sync,
    {
        Self {
            data: Arc::new(data),
            actions: Arc::from(Vec::new()),
        }
    }

    /// Wrap a payload together with the actions it generated.
    ///
    /// The index of an action in `actions` is its
    /// [`ActionId`](crate::action::ActionId) index.
    pub fn with_actions<T>(data: T, actions: Vec<Action>) -> Self
    where
        T: Any + fmt::Debug + PartialEq + Send + Sync,
    {
        Self {
            data: Arc::new(data),
            actions: Arc::from(actions),
        }
    }

    /// Borrow the payload as `T`, if that is its type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.as_ref().as_any().downcast_ref::<T>()
    }

    /// Whether the payload is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Actions generated alongside this value, in generation order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Whether both handles share one payload allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.data.dyn_eq(other.data.as_ref())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            fmt::Debug::fmt(&self.data, f)
        } else {
            f.debug_struct("Value")
                .field("data", &self.data)
                .field("actions", &self.actions.len())
                .finish()
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
