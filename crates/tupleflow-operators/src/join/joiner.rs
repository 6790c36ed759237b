//! Join semantics over the per-branch value sets of one key.

use std::fmt;

/// How a branch takes part in the cross product for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchMode {
    /// Iterate the branch's values.
    Values,
    /// The branch is empty; contribute a single all-null tuple.
    NullPadded,
}

/// Decides, per key, which branches are iterated and which are padded.
///
/// `empty[i]` is true when branch `i` holds no values for the key. Returning
/// `None` skips the key.
pub trait Joiner: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;
    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>>;
}

/// Emit only keys present in every branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct InnerJoin;

impl Joiner for InnerJoin {
    fn name(&self) -> &str {
        "inner"
    }

    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>> {
        if empty.iter().any(|e| *e) {
            return None;
        }
        Some(vec![BranchMode::Values; empty.len()])
    }
}

/// Emit every key; empty branches are padded with nulls.
#[derive(Debug, Clone, Copy, Default)]
pub struct OuterJoin;

impl Joiner for OuterJoin {
    fn name(&self) -> &str {
        "outer"
    }

    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>> {
        Some(empty.iter().map(|e| mode(*e)).collect())
    }
}

/// Keep every key of the first branch; pad the others.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeftJoin;

impl Joiner for LeftJoin {
    fn name(&self) -> &str {
        "left"
    }

    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>> {
        if empty.first().copied().unwrap_or(true) {
            return None;
        }
        Some(empty.iter().map(|e| mode(*e)).collect())
    }
}

/// Keep keys present in every branch after the first; pad the first.
#[derive(Debug, Clone, Copy, Default)]
pub struct RightJoin;

impl Joiner for RightJoin {
    fn name(&self) -> &str {
        "right"
    }

    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>> {
        if empty.iter().skip(1).any(|e| *e) {
            return None;
        }
        Some(empty.iter().map(|e| mode(*e)).collect())
    }
}

/// Per-branch choice: `true` makes the branch inner (required), `false`
/// makes it outer (padded when empty).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedJoin {
    inner: Vec<bool>,
}

impl MixedJoin {
    pub fn new(inner: Vec<bool>) -> Self {
        Self { inner }
    }
}

impl Joiner for MixedJoin {
    fn name(&self) -> &str {
        "mixed"
    }

    fn plan(&self, empty: &[bool]) -> Option<Vec<BranchMode>> {
        let mut modes = Vec::with_capacity(empty.len());
        for (i, e) in empty.iter().enumerate() {
            let required = self.inner.get(i).copied().unwrap_or(true);
            if *e && required {
                return None;
            }
            modes.push(mode(*e));
        }
        Some(modes)
    }
}

fn mode(empty: bool) -> BranchMode {
    if empty {
        BranchMode::NullPadded
    } else {
        BranchMode::Values
    }
}
