#![forbid(unsafe_code)]
//! tupleflow-exec: the engine a runtime drives one key at a time.
//!
//! - `Engine` owns the config, memory budget and spill manager, and keeps one
//!   join closure per splice node so buffers are reused across keys.
//! - `LocalRunner` is a single-partition runtime over in-memory sources. It
//!   sorts, groups and feeds splices exactly as a distributed runtime would
//!   for one partition.

pub mod local;
pub mod metrics;
pub mod runtime;

pub use local::LocalRunner;
pub use metrics::SpliceCounters;
pub use runtime::{Engine, ExecError, Result};
