//! Graph versions.

/// Graph-wide version counter.
///
/// Advanced once per invalidation pass. Nodes remember the version at which
/// they were last verified and the version at which their value last changed;
/// comparing the two across an edge is how a dirty node decides whether it
/// must recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Version(u64);

impl Version {
    /// The version of a fresh graph.
    pub const MINIMAL: Version = Version(0);

    /// The version after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw counter value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_ordered() {
        let v0 = Version::MINIMAL;
        let v1 = v0.next();
        assert!(v1 > v0);
        assert_eq!(v1.raw(), 1);
        assert_eq!(Version::from(1), v1);
    }
}
