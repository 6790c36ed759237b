//! In-memory storage backend, selected by the `memory://` spill URI.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tupleflow_mem::error::{Error as MemError, Result as MemResult};
use tupleflow_mem::Storage;

/// Thread-safe in-memory storage. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MemResult<MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.data
            .lock()
            .map_err(|_| MemError::Storage("memory storage lock poisoned".into()))
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Storage for MemoryStorage {
    fn write(&self, path: &str, bytes: &[u8]) -> MemResult<()> {
        self.lock()?.insert(path.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> MemResult<Vec<u8>> {
        let data = self.lock()?;
        let bytes = data
            .get(path)
            .ok_or_else(|| MemError::Storage(format!("path not found: {path}")))?;
        let start = offset as usize;
        bytes
            .get(start..start + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                MemError::Storage(format!(
                    "range {start}..{} exceeds size {}",
                    start + len,
                    bytes.len()
                ))
            })
    }

    fn delete(&self, path: &str) -> MemResult<()> {
        self.lock()?.remove(path);
        Ok(())
    }

    fn list(&self, prefix: &str) -> MemResult<Vec<String>> {
        Ok(self
            .lock()?
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn size(&self, path: &str) -> MemResult<u64> {
        self.lock()?
            .get(path)
            .map(|b| b.len() as u64)
            .ok_or_else(|| MemError::Storage(format!("path not found: {path}")))
    }
}
