//! Storage adapters implementing `tupleflow_mem::spill::Storage`.
//!
//! - `fs`: local filesystem (default).
//! - `MemoryStorage` (crate root): a map in memory, for `memory://`.

mod fs;
pub use fs::FsStorage;

use tupleflow_core::config::{EngineConfig, StorageTarget};
use tupleflow_mem::Storage;

use crate::error::Result;
use crate::memory_storage::MemoryStorage;

/// Build the storage backend named by the config, together with the base
/// directory segments should be written under.
pub fn build_storage_from_config(cfg: &EngineConfig) -> Result<(Box<dyn Storage>, String)> {
    match cfg.storage_target()? {
        StorageTarget::Local(dir) => Ok((Box::new(FsStorage::new()), dir)),
        StorageTarget::Memory => Ok((Box::new(MemoryStorage::new()), "mem".to_string())),
    }
}
