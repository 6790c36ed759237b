//! A single-partition runtime over in-memory sources.
//!
//! Nodes are evaluated in arena order. Splices sort their inputs by key
//! (branches descending inside a key, so the lead arrives last), then hand
//! one key at a time to the engine. Every nodes run as one `AggregateChain`
//! per grouping pass.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tupleflow_core::compare::TupleComparator;
use tupleflow_core::config::EngineConfig;
use tupleflow_core::fields::Fields;
use tupleflow_core::id::NodeId;
use tupleflow_core::scope::{Scope, SpliceKind};
use tupleflow_core::tuple::Tuple;
use tupleflow_operators::{AggregateChain, EachStage, Every};
use tupleflow_planner::{Assembly, Node, SplicePlan};

use crate::metrics::{emit_counters, SpliceCounters};
use crate::runtime::{Engine, ExecError, Result};

/// Output of an evaluated node.
#[derive(Debug, Clone)]
enum Output {
    Flat(Vec<Tuple>),
    /// Grouping splices keep their groups for the Every nodes after them.
    Grouped(Vec<(Tuple, Vec<Tuple>)>),
}

impl Output {
    fn tuples(&self) -> Vec<Tuple> {
        match self {
            Output::Flat(t) => t.clone(),
            Output::Grouped(groups) => groups.iter().flat_map(|(_, v)| v.iter().cloned()).collect(),
        }
    }
}

/// One value on its way into a splice.
struct Keyed {
    key: Tuple,
    sort: Tuple,
    branch: usize,
    tuple: Tuple,
}

pub struct LocalRunner<'a> {
    assembly: &'a Assembly,
    engine: Engine,
}

impl<'a> LocalRunner<'a> {
    pub fn new(assembly: &'a Assembly, cfg: EngineConfig) -> Result<Self> {
        Ok(Self {
            assembly,
            engine: Engine::new(cfg)?,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn counters(&self) -> Result<SpliceCounters> {
        self.engine.counters()
    }

    /// Evaluate `target` from source tuples keyed by source name.
    pub fn run(&mut self, sources: &HashMap<String, Vec<Tuple>>, target: NodeId) -> Result<Vec<Tuple>> {
        let order = self.assembly.ancestors(target)?;
        let wanted = self.materialized_everies(&order, target);

        let mut outputs: HashMap<NodeId, Output> = HashMap::with_capacity(order.len());
        for id in order {
            let node = self.node(id)?;
            if matches!(node, Node::Every { .. }) && !wanted.contains(&id) {
                continue;
            }
            let output = match node {
                Node::Source { name, fields } => Output::Flat(source_tuples(name, fields, sources)?),
                Node::Each { parent, each } => {
                    let stage = EachStage::new(each, self.scope(id)?)?;
                    let mut out = Vec::new();
                    for tuple in input(&outputs, *parent)?.tuples() {
                        stage.process(&tuple, &mut out)?;
                    }
                    Output::Flat(out)
                }
                Node::Every { .. } => Output::Flat(self.aggregate(id, &outputs)?),
                Node::Splice { parents, .. } => {
                    let plan = self
                        .assembly
                        .splice_plan(id)
                        .ok_or_else(|| ExecError::Invalid(format!("{id} has no splice plan")))?;
                    let inputs = parents
                        .iter()
                        .map(|p| input(&outputs, *p).map(Output::tuples))
                        .collect::<Result<Vec<_>>>()?;
                    self.splice(&plan, inputs)?
                }
            };
            outputs.insert(id, output);
        }

        self.engine.finish_all()?;
        emit_counters(&self.engine.counters()?);

        outputs
            .remove(&target)
            .map(|o| o.tuples())
            .ok_or_else(|| ExecError::Invalid(format!("{target} was not evaluated")))
    }

    /// Every nodes whose output is observed: the target, or the parent of a
    /// node that is not itself an Every.
    fn materialized_everies(&self, order: &[NodeId], target: NodeId) -> HashSet<NodeId> {
        let mut wanted = HashSet::new();
        wanted.insert(target);
        for id in order {
            match self.assembly.node(*id) {
                Some(Node::Every { .. }) | None => {}
                Some(node) => wanted.extend(node.parents()),
            }
        }
        wanted
    }

    fn aggregate(&self, every: NodeId, outputs: &HashMap<NodeId, Output>) -> Result<Vec<Tuple>> {
        let (splice, chain) = self.assembly.grouping_pass(every)?;
        let links = chain
            .iter()
            .map(|id| match self.node(*id)? {
                Node::Every { every, .. } => Ok((every, self.scope(*id)?)),
                other => Err(ExecError::Invalid(format!("'{}' is not an Every", other.name()))),
            })
            .collect::<Result<Vec<(&Every, &Scope)>>>()?;
        let chain = AggregateChain::new(self.scope(splice)?, &links)?;

        let Output::Grouped(groups) = input(outputs, splice)? else {
            return Err(ExecError::Invalid(format!("{splice} did not produce groups")));
        };
        let mut out = Vec::new();
        for (key, values) in groups {
            out.extend(chain.run(key, values.iter().cloned().map(Ok))?);
        }
        Ok(out)
    }

    fn splice(&mut self, plan: &SplicePlan, inputs: Vec<Vec<Tuple>>) -> Result<Output> {
        if plan.kind == SpliceKind::Merge {
            return Ok(Output::Flat(inputs.into_iter().flatten().collect()));
        }

        let mut keyed = Vec::new();
        for (branch, tuples) in inputs.into_iter().enumerate() {
            let fields = &self.scope(plan.branches[branch])?.outgoing;
            let key_pos = positions(fields, plan.key_fields.get(branch))?;
            let sort_pos = positions(fields, plan.sort_fields.get(branch))?;
            for tuple in tuples {
                keyed.push(Keyed {
                    key: tuple.select(&key_pos)?,
                    sort: tuple.select(&sort_pos)?,
                    branch,
                    tuple,
                });
            }
        }

        let key_order = plan
            .key_fields
            .first()
            .map(TupleComparator::from_fields)
            .unwrap_or_default()
            .reversed(self.engine.config().reverse_sort);
        let sort_order = plan
            .sort_fields
            .first()
            .map(TupleComparator::from_fields)
            .unwrap_or_default()
            .reversed(plan.reverse);
        keyed.sort_by(|a, b| {
            key_order
                .compare(&a.key, &b.key)
                .then_with(|| b.branch.cmp(&a.branch))
                .then_with(|| sort_order.compare(&a.sort, &b.sort))
        });

        let mut groups: Vec<(Tuple, Vec<Tuple>)> = Vec::new();
        let mut values = keyed.into_iter().peekable();
        while let Some(first) = values.next() {
            let key = first.key.clone();
            let mut group = vec![(first.branch, first.tuple)];
            while let Some(next) = values.next_if(|v| key_order.compare(&v.key, &key) == Ordering::Equal) {
                group.push((next.branch, next.tuple));
            }

            let joined: Vec<Tuple> = match plan.kind {
                SpliceKind::GroupBy => self
                    .engine
                    .group(plan, &key, group.into_iter().map(|(_, t)| t))?
                    .collect(),
                _ => self
                    .engine
                    .co_group(plan, &key, group.into_iter())?
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            };
            groups.push((key, joined));
        }

        Ok(match plan.kind {
            SpliceKind::HashJoin => Output::Flat(groups.into_iter().flat_map(|(_, v)| v).collect()),
            _ => Output::Grouped(groups),
        })
    }

    fn node(&self, id: NodeId) -> Result<&'a Node> {
        self.assembly
            .node(id)
            .ok_or_else(|| ExecError::Invalid(format!("{id} is not in the assembly")))
    }

    fn scope(&self, id: NodeId) -> Result<&'a Scope> {
        self.assembly
            .scope(id)
            .ok_or_else(|| ExecError::Invalid(format!("{id} has no scope")))
    }
}

fn input(outputs: &HashMap<NodeId, Output>, id: NodeId) -> Result<&Output> {
    outputs
        .get(&id)
        .ok_or_else(|| ExecError::Invalid(format!("{id} was not evaluated before its children")))
}

fn positions(fields: &Fields, selector: Option<&Fields>) -> Result<Vec<usize>> {
    match selector {
        Some(s) if !s.is_none() => Ok(fields.pos(s)?),
        _ => Ok(Vec::new()),
    }
}

fn source_tuples(name: &str, fields: &Fields, sources: &HashMap<String, Vec<Tuple>>) -> Result<Vec<Tuple>> {
    let tuples = sources
        .get(name)
        .ok_or_else(|| ExecError::Invalid(format!("no tuples supplied for source '{name}'")))?;
    if fields.is_defined() {
        if let Some(bad) = tuples.iter().find(|t| t.len() != fields.len()) {
            return Err(ExecError::Invalid(format!(
                "source '{name}' declares {fields} but supplied {bad}"
            )));
        }
    }
    Ok(tuples.iter().cloned().map(Tuple::frozen).collect())
}
