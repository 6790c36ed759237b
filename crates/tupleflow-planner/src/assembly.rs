//! Assembly: an arena of operator nodes, each resolved as it is added.

use std::collections::HashMap;
use std::sync::Arc;

use tupleflow_core::error::{Error, Result};
use tupleflow_core::fields::Fields;
use tupleflow_core::id::NodeId;
use tupleflow_core::scope::{Scope, ScopeKind};
use tupleflow_operators::{Each, Every, Joiner, Splice};

use crate::physical::SplicePlan;

/// One node of the graph. Parents are ids of earlier nodes.
#[derive(Debug, Clone)]
pub enum Node {
    Source { name: String, fields: Fields },
    Each { parent: NodeId, each: Each },
    Every { parent: NodeId, every: Every },
    Splice { parents: Vec<NodeId>, splice: Splice },
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Source { name, .. } => name,
            Node::Each { each, .. } => &each.name,
            Node::Every { every, .. } => &every.name,
            Node::Splice { splice, .. } => &splice.name,
        }
    }

    pub fn parents(&self) -> Vec<NodeId> {
        match self {
            Node::Source { .. } => Vec::new(),
            Node::Each { parent, .. } | Node::Every { parent, .. } => vec![*parent],
            Node::Splice { parents, .. } => parents.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Assembly {
    nodes: Vec<Node>,
    scopes: Vec<Scope>,
    names: HashMap<String, NodeId>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn scope(&self, id: NodeId) -> Option<&Scope> {
        self.scopes.get(id.index())
    }

    /// Every resolved edge, indexed by node id.
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied()
    }

    /// Resolved scopes as JSON, in arena order.
    pub fn scopes_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.scopes)?)
    }

    pub fn source(&mut self, name: impl Into<String>, fields: Fields) -> Result<NodeId> {
        let name = name.into();
        self.check_name(&name)?;
        if !fields.is_defined() && !fields.is_unknown() {
            return Err(Error::InvalidAssembly(format!(
                "source '{name}' must declare fields or UNKNOWN, got {fields}"
            )));
        }
        let scope = Scope::source(name.clone(), fields.clone());
        Ok(self.push(Node::Source { name, fields }, scope))
    }

    pub fn each(&mut self, parent: NodeId, each: Each) -> Result<NodeId> {
        self.check_name(&each.name)?;
        let scope = each.resolve(self.parent_scope(parent)?)?;
        Ok(self.push(Node::Each { parent, each }, scope))
    }

    pub fn every(&mut self, parent: NodeId, every: Every) -> Result<NodeId> {
        self.check_name(&every.name)?;
        let scope = every.resolve(self.parent_scope(parent)?)?;
        Ok(self.push(Node::Every { parent, every }, scope))
    }

    pub fn splice(&mut self, parents: &[NodeId], splice: Splice) -> Result<NodeId> {
        self.check_name(&splice.name)?;
        let incoming = parents
            .iter()
            .map(|p| self.parent_scope(*p))
            .collect::<Result<Vec<_>>>()?;
        let scope = splice.resolve(&incoming)?;
        Ok(self.push(
            Node::Splice {
                parents: parents.to_vec(),
                splice,
            },
            scope,
        ))
    }

    pub fn group_by(&mut self, name: &str, parent: NodeId, key: Fields) -> Result<NodeId> {
        self.splice(&[parent], Splice::group_by(name, key))
    }

    pub fn group_by_sorted(
        &mut self,
        name: &str,
        parent: NodeId,
        key: Fields,
        sort: Fields,
        reverse: bool,
    ) -> Result<NodeId> {
        self.splice(&[parent], Splice::group_by(name, key).with_sort(sort, reverse))
    }

    pub fn co_group(
        &mut self,
        name: &str,
        parents: &[NodeId],
        keys: Vec<Fields>,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Result<NodeId> {
        self.splice(parents, Splice::co_group(name, keys, declared, joiner))
    }

    pub fn self_join(
        &mut self,
        name: &str,
        parent: NodeId,
        key: Fields,
        num_self_joins: usize,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Result<NodeId> {
        self.splice(
            &[parent],
            Splice::self_join(name, key, num_self_joins, declared, joiner),
        )
    }

    pub fn hash_join(
        &mut self,
        name: &str,
        parents: &[NodeId],
        keys: Vec<Fields>,
        declared: Option<Fields>,
        joiner: Arc<dyn Joiner>,
    ) -> Result<NodeId> {
        self.splice(parents, Splice::hash_join(name, keys, declared, joiner))
    }

    pub fn merge(&mut self, name: &str, parents: &[NodeId]) -> Result<NodeId> {
        self.splice(parents, Splice::merge(name))
    }

    /// Plans of every splice, in arena order.
    pub fn splice_plans(&self) -> Vec<SplicePlan> {
        (0..self.nodes.len())
            .filter_map(|i| self.splice_plan(NodeId::new(i as u64)))
            .collect()
    }

    pub fn splice_plan(&self, id: NodeId) -> Option<SplicePlan> {
        let Node::Splice { parents, splice } = self.node(id)? else {
            return None;
        };
        let scope = self.scope(id)?;
        let incoming: Vec<&Scope> = parents.iter().filter_map(|p| self.scope(*p)).collect();
        Some(SplicePlan::new(id, parents.clone(), splice, scope, &incoming))
    }

    /// `target` and every node it depends on, in arena order.
    pub fn ancestors(&self, target: NodeId) -> Result<Vec<NodeId>> {
        let len = self.nodes.len();
        if target.index() >= len {
            return Err(self.unknown_node(target));
        }
        let mut needed = vec![false; len];
        let mut stack = vec![target];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut needed[id.index()], true) {
                continue;
            }
            if let Some(node) = self.node(id) {
                stack.extend(node.parents());
            }
        }
        Ok(needed
            .iter()
            .enumerate()
            .filter(|(_, n)| **n)
            .map(|(i, _)| NodeId::new(i as u64))
            .collect())
    }

    /// The grouping splice an Every belongs to, and the Every nodes of its
    /// pass up to and including `every`, in order.
    pub fn grouping_pass(&self, every: NodeId) -> Result<(NodeId, Vec<NodeId>)> {
        let mut chain = Vec::new();
        let mut current = every;
        loop {
            match self.node(current) {
                Some(Node::Every { parent, .. }) => {
                    chain.push(current);
                    current = *parent;
                }
                Some(Node::Splice { .. })
                    if matches!(
                        self.scope(current).map(|s| s.kind),
                        Some(ScopeKind::Splice(k)) if k.groups()
                    ) =>
                {
                    chain.reverse();
                    return Ok((current, chain));
                }
                Some(other) => {
                    return Err(Error::InvalidAssembly(format!(
                        "'{}' does not belong to a grouping",
                        other.name()
                    )))
                }
                None => return Err(self.unknown_node(current)),
            }
        }
    }

    fn check_name(&self, name: &str) -> Result<()> {
        if self.names.contains_key(name) {
            return Err(Error::InvalidAssembly(format!(
                "node name '{name}' is already in use"
            )));
        }
        Ok(())
    }

    fn parent_scope(&self, id: NodeId) -> Result<&Scope> {
        self.scope(id).ok_or_else(|| self.unknown_node(id))
    }

    fn unknown_node(&self, id: NodeId) -> Error {
        Error::InvalidAssembly(format!(
            "{id} is not a node of this assembly ({} nodes)",
            self.nodes.len()
        ))
    }

    fn push(&mut self, node: Node, scope: Scope) -> NodeId {
        let id = NodeId::new(self.nodes.len() as u64);
        #[cfg(feature = "tracing")]
        tracing::debug!(%id, node = node.name(), outgoing = %scope.outgoing, "added node");
        self.names.insert(node.name().to_string(), id);
        self.nodes.push(node);
        self.scopes.push(scope);
        id
    }
}
