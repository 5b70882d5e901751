//! Error records stored on failed nodes.

use std::fmt;

use crate::cycle::CycleInfo;
use crate::function::{FunctionError, Transience};
use crate::key::Key;

/// Why a node failed.
///
/// A node fails either because its own function failed (`root_causes` is the
/// node itself), because it is part of or depends on a cycle (`cycles`), or
/// because a dependency failed and it did not recover (everything is
/// inherited from the failed dependencies).
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorInfo {
    root_causes: Vec<Key>,
    exception: Option<FunctionError>,
    cycles: Vec<CycleInfo>,
    transience: Transience,
}

impl ErrorInfo {
    /// The function computing `key` failed.
    pub fn from_failure(key: &Key, error: FunctionError) -> Self {
        Self {
            root_causes: vec![key.clone()],
            transience: error.transience(),
            exception: Some(error),
            cycles: Vec::new(),
        }
    }

    /// The node is a member of `cycle`.
    pub fn from_cycle(cycle: CycleInfo) -> Self {
        Self {
            root_causes: Vec::new(),
            exception: None,
            cycles: vec![cycle],
            transience: Transience::Persistent,
        }
    }

    /// `parent` failed because the given dependencies failed.
    ///
    /// Root causes are unioned, cycles are seen through `parent` and each
    /// distinct cycle kept once, and the first exception is kept. The result
    /// is transient if any child is.
    pub fn from_children<'a>(parent: &Key, children: impl IntoIterator<Item = &'a ErrorInfo>) -> Self {
        let mut info = Self {
            root_causes: Vec::new(),
            exception: None,
            cycles: Vec::new(),
            transience: Transience::Persistent,
        };

        for child in children {
            for cause in &child.root_causes {
                if !info.root_causes.contains(cause) {
                    info.root_causes.push(cause.clone());
                }
            }
            if info.exception.is_none() {
                info.exception = child.exception.clone();
            }
            for cycle in &child.cycles {
                let seen = cycle.prepend(parent);
                if !info.cycles.iter().any(|known| known.same_cycle(&seen)) {
                    info.cycles.push(seen);
                }
            }
            if child.is_transient() {
                info.transience = Transience::Transient;
            }
        }

        info
    }

    /// Nodes whose own function failed.
    pub fn root_causes(&self) -> &[Key] {
        &self.root_causes
    }

    /// The first function failure behind this error, if any.
    pub fn exception(&self) -> Option<&FunctionError> {
        self.exception.as_ref()
    }

    /// Cycles behind this error.
    pub fn cycles(&self) -> &[CycleInfo] {
        &self.cycles
    }

    /// Get the transience.
    pub fn transience(&self) -> Transience {
        self.transience
    }

    /// Whether retrying might succeed without input changes.
    pub fn is_transient(&self) -> bool {
        self.transience == Transience::Transient
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(exception) = &self.exception {
            write!(f, "{exception}")?;
            if let Some(cause) = self.root_causes.first() {
                write!(f, " (in {cause})")?;
            }
        }
        for (i, cycle) in self.cycles.iter().enumerate() {
            if i > 0 || self.exception.is_some() {
                f.write_str("; ")?;
            }
            write!(f, "cycle: {cycle}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::FunctionName;

    const PKG: FunctionName = FunctionName::new("PACKAGE");

    fn key(name: &str) -> Key {
        Key::new(PKG, name.to_string())
    }

    #[test]
    fn failure_is_its_own_root_cause() {
        let info = ErrorInfo::from_failure(&key("a"), FunctionError::persistent("bad BUILD file"));
        assert_eq!(info.root_causes(), &[key("a")]);
        assert!(!info.is_transient());
        assert_eq!(info.to_string(), "bad BUILD file (in PACKAGE:\"a\")");
    }

    #[test]
    fn children_are_merged() {
        let a = ErrorInfo::from_failure(&key("a"), FunctionError::persistent("a failed"));
        let b = ErrorInfo::from_failure(&key("b"), FunctionError::transient("b timed out"));
        let merged = ErrorInfo::from_children(&key("top"), [&a, &b, &a]);

        assert_eq!(merged.root_causes(), &[key("a"), key("b")]);
        assert_eq!(merged.exception().map(FunctionError::message), Some("a failed"));
        assert!(merged.is_transient());
    }

    #[test]
    fn cycles_are_seen_through_the_parent_once() {
        let via_a = ErrorInfo::from_cycle(CycleInfo::new(vec![key("a"), key("b")]));
        let via_b = ErrorInfo::from_cycle(CycleInfo::new(vec![key("b"), key("a")]));
        let merged = ErrorInfo::from_children(&key("root"), [&via_a, &via_b]);

        assert_eq!(merged.cycles().len(), 1);
        assert_eq!(merged.cycles()[0].path_to_cycle(), &[key("root")]);
        assert!(merged.root_causes().is_empty());
        assert!(!merged.is_transient());
    }
}
