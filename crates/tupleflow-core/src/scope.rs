//! Resolved fields for one edge of an assembly.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fields::Fields;
use crate::hash::{hash_serde, Hash256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpliceKind {
    /// Group one or more branches with identical fields.
    GroupBy,
    /// Group several branches on a common key and join their values.
    CoGroup,
    /// Join without grouping; downstream sees plain tuples.
    HashJoin,
    /// Union of branches with identical fields.
    Merge,
}

impl SpliceKind {
    pub fn groups(self) -> bool {
        matches!(self, SpliceKind::GroupBy | SpliceKind::CoGroup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeKind {
    Source,
    Each,
    Every,
    Splice(SpliceKind),
}

/// The fields resolved once per edge at construction time. Read-only after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub name: String,
    pub kind: ScopeKind,
    /// Fields handed to the operation.
    pub arguments: Fields,
    /// Fields the operation claims to produce.
    pub declared: Fields,
    /// Fields of every tuple leaving the node.
    pub outgoing: Fields,
    /// Grouping key while a grouping is active, `none()` otherwise.
    pub grouping: Fields,
    /// Value fields of the active grouping, `none()` otherwise.
    pub values: Fields,
    /// Incoming fields the output selector may reach.
    pub pass_through: Fields,
    /// Pass-through fields not consumed as arguments.
    pub remainder: Fields,
    /// Per-branch key selectors (splices only), in branch order.
    pub key_selectors: Vec<(String, Fields)>,
    /// Per-branch secondary sort selectors (splices only).
    pub sorting_selectors: Vec<(String, Fields)>,
}

impl Scope {
    /// Scope of a node that only emits `fields`.
    pub fn source(name: impl Into<String>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            kind: ScopeKind::Source,
            arguments: Fields::none(),
            declared: fields.clone(),
            outgoing: fields.clone(),
            grouping: Fields::none(),
            values: Fields::none(),
            pass_through: Fields::none(),
            remainder: fields,
            key_selectors: Vec::new(),
            sorting_selectors: Vec::new(),
        }
    }

    pub fn is_grouping(&self) -> bool {
        !self.grouping.is_none()
    }

    pub fn is_splice(&self) -> bool {
        matches!(self.kind, ScopeKind::Splice(_))
    }

    /// Stable identity of this scope.
    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = Scope::source("in", Fields::new(["a", "b"]).unwrap());
        let b = Scope::source("in", Fields::new(["a", "b"]).unwrap());
        let c = Scope::source("in", Fields::new(["a", "c"]).unwrap());
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }
}
