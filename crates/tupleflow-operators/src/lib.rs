#![forbid(unsafe_code)]
//! tupleflow-operators: operations, node policies and per-key execution.
//!
//! Design intent:
//! - Every node resolves its `Scope` once, at construction; nothing here
//!   re-resolves fields while tuples flow.
//! - Stages precompute positions from the resolved scope so per-tuple work is
//!   plain indexing.
//! - Only non-lead splice branches are buffered, and those buffers spill
//!   through `tupleflow-mem` past a fixed threshold.

pub mod each;
pub mod every;
pub mod join;
pub mod ops;
pub mod resolver;
pub mod splice;
pub mod stage;
pub mod traits;

pub use each::{Each, EachOperation};
pub use every::{Every, EveryOperation};
pub use join::{GroupClosure, JoinClosure, JoinStats, Joiner, SpillContext, ValueBuffer};
pub use splice::Splice;
pub use stage::{AggregateChain, EachStage, Projection};
pub use traits::{
    Accumulator, Aggregator, Arity, Buffer, Collector, Filter, Function, GroupArguments, OpError,
    Operation, Result,
};
