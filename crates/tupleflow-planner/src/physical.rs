//! Splice plans: what the runtime needs to drive one splice.
//!
//! Built once from a resolved assembly. The joiner itself is not serialized;
//! `joiner_name` identifies it in manifests and fingerprints.

use std::sync::Arc;

use serde::Serialize;
use tupleflow_core::fields::Fields;
use tupleflow_core::hash::{hash_serde, Hash256};
use tupleflow_core::id::NodeId;
use tupleflow_core::scope::{Scope, SpliceKind};
use tupleflow_core::Result;
use tupleflow_operators::{Joiner, Splice};

#[derive(Debug, Clone, Serialize)]
pub struct SplicePlan {
    pub node: NodeId,
    pub name: String,
    pub kind: SpliceKind,
    /// Parent nodes in branch order; branch 0 is the lead.
    pub branches: Vec<NodeId>,
    /// Resolved key fields per branch.
    pub key_fields: Vec<Fields>,
    /// Resolved secondary sort fields per branch, empty when unsorted.
    pub sort_fields: Vec<Fields>,
    pub reverse: bool,
    pub grouping: Fields,
    pub outgoing: Fields,
    pub num_self_joins: usize,
    /// Width of each physical branch, `None` when its fields are unknown.
    pub branch_widths: Vec<Option<usize>>,
    #[serde(skip_serializing)]
    pub joiner: Arc<dyn Joiner>,
    pub joiner_name: String,
}

impl SplicePlan {
    pub(crate) fn new(
        node: NodeId,
        branches: Vec<NodeId>,
        splice: &Splice,
        scope: &Scope,
        incoming: &[&Scope],
    ) -> Self {
        Self {
            node,
            name: splice.name.clone(),
            kind: splice.kind,
            branches,
            key_fields: scope.key_selectors.iter().map(|(_, k)| k.clone()).collect(),
            sort_fields: scope
                .sorting_selectors
                .iter()
                .map(|(_, s)| s.clone())
                .collect(),
            reverse: splice.reverse,
            grouping: scope.grouping.clone(),
            outgoing: scope.outgoing.clone(),
            num_self_joins: splice.num_self_joins,
            branch_widths: Splice::branch_widths(incoming),
            joiner: splice.joiner.clone(),
            joiner_name: splice.joiner.name().to_string(),
        }
    }

    pub fn is_self_join(&self) -> bool {
        self.num_self_joins > 0
    }

    /// Branches the joiner sees: physical branches, or `num_self_joins + 1`
    /// aliases of the single branch of a self-join.
    pub fn logical_branches(&self) -> usize {
        if self.is_self_join() {
            self.num_self_joins + 1
        } else {
            self.branches.len()
        }
    }

    pub fn fingerprint(&self) -> Result<Hash256> {
        hash_serde(self)
    }
}
