#![forbid(unsafe_code)]
//! tupleflow-io: storage backends for spill segments.
//!
//! Both backends implement `tupleflow_mem::Storage`. Which one an engine uses
//! is decided by the spill URI of its config (`file://` or `memory://`).

pub mod error;
pub mod memory_storage;
pub mod storage;

pub use error::{Error, Result};
pub use memory_storage::MemoryStorage;
pub use storage::{build_storage_from_config, FsStorage};
