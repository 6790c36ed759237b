//! Splice counters. Informational only; nothing reads them to decide anything.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tupleflow_core::id::NodeId;
use tupleflow_operators::JoinStats;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceCounters {
    pub per_splice: BTreeMap<NodeId, JoinStats>,
    /// Spill segments written and not yet deleted.
    pub live_segments: usize,
}

impl SpliceCounters {
    pub fn keys(&self) -> u64 {
        self.per_splice.values().map(|s| s.keys).sum()
    }

    pub fn emitted(&self) -> u64 {
        self.per_splice.values().map(|s| s.emitted).sum()
    }

    pub fn spill_events(&self) -> u64 {
        self.per_splice.values().map(|s| s.spill_events).sum()
    }

    pub fn spilled_tuples(&self) -> u64 {
        self.per_splice.values().map(|s| s.spilled_tuples).sum()
    }
}

#[cfg(feature = "tracing")]
pub fn emit_counters(counters: &SpliceCounters) {
    for (node, stats) in &counters.per_splice {
        tracing::debug!(
            %node,
            keys = stats.keys,
            emitted = stats.emitted,
            spill_events = stats.spill_events,
            spilled_tuples = stats.spilled_tuples,
            per_branch = ?stats.tuples_per_branch,
            "splice counters"
        );
    }
    tracing::debug!(live_segments = counters.live_segments, "spill segments");
}

#[cfg(not(feature = "tracing"))]
pub fn emit_counters(_counters: &SpliceCounters) {}
