//! Cycle records.

use std::fmt;

use crate::key::Key;

/// A dependency cycle as seen from one node.
///
/// `cycle` lists the members in dependency order; the last member depends on
/// the first. `path_to_cycle` lists the nodes from the reporting node down to
/// (but excluding) the first cycle member. Both are empty-path for members of
/// the cycle itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CycleInfo {
    path_to_cycle: Vec<Key>,
    cycle: Vec<Key>,
}

impl CycleInfo {
    /// A cycle reported by one of its own members.
    pub fn new(cycle: Vec<Key>) -> Self {
        Self {
            path_to_cycle: Vec::new(),
            cycle,
        }
    }

    /// A cycle reached from outside through `path_to_cycle`.
    pub fn with_path(path_to_cycle: Vec<Key>, cycle: Vec<Key>) -> Self {
        Self {
            path_to_cycle,
            cycle,
        }
    }

    /// The cycle members in dependency order.
    pub fn cycle(&self) -> &[Key] {
        &self.cycle
    }

    /// Nodes leading from the reporting node to the cycle.
    pub fn path_to_cycle(&self) -> &[Key] {
        &self.path_to_cycle
    }

    /// Whether `key` is a member of the cycle.
    pub fn contains(&self, key: &Key) -> bool {
        self.cycle.contains(key)
    }

    /// The record as seen from `parent`, a node that depends on the reporting
    /// node. If `parent` is itself a cycle member reached from inside, the
    /// cycle is rotated to start at it instead of growing the path.
    pub fn prepend(&self, parent: &Key) -> Self {
        if self.path_to_cycle.is_empty() {
            if let Some(pos) = self.cycle.iter().position(|key| key == parent) {
                let mut cycle = self.cycle.clone();
                cycle.rotate_left(pos);
                return Self::new(cycle);
            }
        }
        let mut path_to_cycle = Vec::with_capacity(self.path_to_cycle.len() + 1);
        path_to_cycle.push(parent.clone());
        path_to_cycle.extend(self.path_to_cycle.iter().cloned());
        Self {
            path_to_cycle,
            cycle: self.cycle.clone(),
        }
    }

    /// Whether both records describe the same cycle, regardless of the
    /// member it starts at or the path it was reached by.
    pub fn same_cycle(&self, other: &CycleInfo) -> bool {
        same_rotation(&self.cycle, &other.cycle)
    }
}

impl fmt::Display for CycleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in &self.path_to_cycle {
            write!(f, "{key} -> ")?;
        }
        f.write_str("[")?;
        for key in &self.cycle {
            write!(f, "{key} -> ")?;
        }
        match self.cycle.first() {
            Some(first) => write!(f, "{first}]"),
            None => f.write_str("]"),
        }
    }
}

/// Whether `b` is a rotation of `a`.
pub(crate) fn same_rotation(a: &[Key], b: &[Key]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    if a.is_empty() {
        return true;
    }
    match b.iter().position(|key| key == &a[0]) {
        Some(offset) => a
            .iter()
            .enumerate()
            .all(|(i, key)| key == &b[(i + offset) % b.len()]),
        None => false,
    }
}
