//! Engine: spill resources plus the per-key splice entry points.
//!
//! - Storage and codec come from `EngineConfig`; every buffer of every splice
//!   spills through one session-scoped `SpillManager`.
//! - One `JoinClosure` is kept per splice node and reused across keys, so a
//!   key's buffers are cleared (and their segments deleted) when the next key
//!   of the same splice starts.
//! - `finish_all` releases whatever the last keys left behind.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use tupleflow_core::config::EngineConfig;
use tupleflow_core::id::NodeId;
use tupleflow_core::scope::SpliceKind;
use tupleflow_core::tuple::Tuple;

use tupleflow_io::build_storage_from_config;
use tupleflow_mem::{Codec, MemoryBudgetImpl, SpillManager};

use tupleflow_operators::join::{GroupIter, JoinIter};
use tupleflow_operators::{GroupClosure, JoinClosure, OpError, SpillContext};

use tupleflow_planner::SplicePlan;

use crate::metrics::SpliceCounters;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Core(#[from] tupleflow_core::Error),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Io(#[from] tupleflow_io::Error),
    #[error("invalid plan: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug)]
pub struct Engine {
    cfg: EngineConfig,
    codec: Codec,
    spill: SpillContext,
    joins: HashMap<NodeId, JoinClosure>,
    groups: HashMap<NodeId, GroupClosure>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Result<Self> {
        cfg.validate()?;
        let (storage, base_dir) = build_storage_from_config(&cfg)?;
        let codec = Codec::first_available(&cfg.spill_compression_codecs);
        let manager = SpillManager::with_session(storage, codec, &base_dir);
        let budget = MemoryBudgetImpl::new(cfg.mem_cap_bytes);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            threshold = cfg.spill_threshold,
            codec = codec.name(),
            root = manager.root_dir(),
            "engine ready"
        );

        Ok(Self {
            cfg,
            codec,
            spill: SpillContext::new(Arc::new(Mutex::new(manager)), budget),
            joins: HashMap::new(),
            groups: HashMap::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn spill_context(&self) -> &SpillContext {
        &self.spill
    }

    /// Join the values of one key of a CoGroup or HashJoin.
    ///
    /// `values` are tagged with their physical branch and must arrive in
    /// descending branch order, the lead branch last.
    pub fn co_group<I>(&mut self, plan: &SplicePlan, key: &Tuple, values: I) -> Result<JoinIter<'_, I>>
    where
        I: Iterator<Item = (usize, Tuple)>,
    {
        if !matches!(plan.kind, SpliceKind::CoGroup | SpliceKind::HashJoin) {
            return Err(ExecError::Invalid(format!(
                "'{}' is a {:?}, not a join",
                plan.name, plan.kind
            )));
        }
        let closure = match self.joins.entry(plan.node) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let closure = JoinClosure::new(
                    plan.joiner.clone(),
                    plan.branch_widths.clone(),
                    plan.num_self_joins,
                    self.cfg.spill_threshold,
                    Some(self.spill.clone()),
                )?;
                e.insert(closure)
            }
        };
        Ok(closure.join(key, values)?)
    }

    /// Stream the values of one key of a GroupBy.
    pub fn group<I>(&mut self, plan: &SplicePlan, key: &Tuple, values: I) -> Result<GroupIter<'_, I>>
    where
        I: Iterator<Item = Tuple>,
    {
        if plan.kind != SpliceKind::GroupBy {
            return Err(ExecError::Invalid(format!(
                "'{}' is a {:?}, not a GroupBy",
                plan.name, plan.kind
            )));
        }
        let closure = self.groups.entry(plan.node).or_default();
        Ok(closure.group(key, values))
    }

    /// Release the buffers of one splice after its last key.
    pub fn finish(&mut self, node: NodeId) -> Result<()> {
        if let Some(closure) = self.joins.get_mut(&node) {
            closure.finish()?;
        }
        Ok(())
    }

    pub fn finish_all(&mut self) -> Result<()> {
        for closure in self.joins.values_mut() {
            closure.finish()?;
        }
        Ok(())
    }

    pub fn live_segments(&self) -> Result<usize> {
        let manager = self
            .spill
            .manager()
            .lock()
            .map_err(|_| ExecError::Invalid("spill manager lock poisoned".into()))?;
        Ok(manager.live_segments())
    }

    pub fn counters(&self) -> Result<SpliceCounters> {
        let mut per_splice: std::collections::BTreeMap<_, _> = self
            .joins
            .iter()
            .map(|(id, c)| (*id, c.stats()))
            .collect();
        per_splice.extend(self.groups.iter().map(|(id, c)| (*id, c.stats().clone())));
        Ok(SpliceCounters {
            per_splice,
            live_segments: self.live_segments()?,
        })
    }
}
