#![forbid(unsafe_code)]
//! tupleflow-mem: hard memory budgeting and the tuple spill manager.
//!
//! Concrete implementations of the interfaces in `tupleflow_core::budget`
//! live here. Reading a spilled segment back always acquires a guard first,
//! so the configured cap is never exceeded silently.
//!
//! No filesystem code lives here. A generic `Storage` trait is exposed (in
//! `spill::`) and implemented by `tupleflow-io`.

pub mod error;
pub mod guard;
pub mod spill;

pub use error::{Error, Result};
pub use guard::{BudgetGuardImpl, MemoryBudgetImpl};
pub use spill::{Codec, SegmentBatch, SegmentMeta, SpillManager, Storage};
