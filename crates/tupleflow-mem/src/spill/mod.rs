//! Spill manager for join buffers.
//!
//! Writes runs of tuples to storage as checksummed segments and reads them
//! back in write order.

pub mod codec;
pub mod segment;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tupleflow_core::budget::{BudgetGuard, MemoryBudget};
use tupleflow_core::id::SpillId;
use tupleflow_core::tuple::Tuple;

use crate::error::{Error, Result};
use crate::guard::BudgetGuardImpl;

pub use codec::Codec;
pub use segment::{SegmentHeader, SegmentMeta, SegmentName, HEADER_LEN, MAX_SEGMENT_BYTES};

/// A segment read back into memory. Its decoded size stays charged to the
/// budget until the batch is dropped.
pub struct SegmentBatch {
    tuples: Vec<Tuple>,
    guard: BudgetGuardImpl,
}

impl SegmentBatch {
    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Bytes held against the budget.
    pub fn charged_bytes(&self) -> usize {
        self.guard.bytes()
    }

    /// The tuples plus the guard that must outlive them.
    pub fn into_parts(self) -> (Vec<Tuple>, BudgetGuardImpl) {
        (self.tuples, self.guard)
    }
}

/// Abstract storage interface for spill segments.
///
/// Implemented by `tupleflow-io` for the local filesystem and for memory.
pub trait Storage: Send + Sync {
    /// Write bytes to a path. Creates parent directories if needed.
    fn write(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read a byte range from a path. Returns exactly `len` bytes or error.
    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Delete a path. Idempotent (no error if path doesn't exist).
    fn delete(&self, path: &str) -> Result<()>;

    /// List all paths under a prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Size of a path in bytes.
    fn size(&self, path: &str) -> Result<u64>;
}

/// Central manager for spilling tuples to storage.
pub struct SpillManager {
    storage: Box<dyn Storage>,
    codec: Codec,
    root_dir: String,
    next_spill: AtomicU64,
    segments: HashMap<SegmentName, SegmentMeta>,
}

impl SpillManager {
    pub fn new(storage: Box<dyn Storage>, codec: Codec, root_dir: String) -> Self {
        Self {
            storage,
            codec,
            root_dir,
            next_spill: AtomicU64::new(0),
            segments: HashMap::new(),
        }
    }

    /// Manager writing below a fresh, uniquely named directory of `base_dir`,
    /// so engines sharing a spill directory never collide.
    pub fn with_session(storage: Box<dyn Storage>, codec: Codec, base_dir: &str) -> Self {
        let root = format!(
            "{}/session-{}",
            base_dir.trim_end_matches('/'),
            uuid::Uuid::new_v4()
        );
        Self::new(storage, codec, root)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    /// A spill id unique within this manager.
    pub fn next_spill_id(&self) -> SpillId {
        SpillId::new(self.next_spill.fetch_add(1, Ordering::Relaxed))
    }

    /// Write `tuples` as one segment and return its metadata.
    ///
    /// Steps:
    /// 1. Serialize tuples with serde_json
    /// 2. Compress payload with configured codec
    /// 3. Checksum header + compressed payload with blake3
    /// 4. Write to storage
    pub fn write_tuples(
        &mut self,
        tuples: &[Tuple],
        spill_id: SpillId,
        seq: u32,
    ) -> Result<SegmentMeta> {
        let uncompressed =
            serde_json::to_vec(tuples).map_err(|e| Error::Codec(format!("json serialize: {e}")))?;
        let uncompressed_len = uncompressed.len() as u64;
        let compressed = codec::compress(self.codec, &uncompressed)?;
        let compressed_len = compressed.len() as u64;

        let header = SegmentHeader::new(
            self.codec,
            tuples.len() as u64,
            uncompressed_len,
            compressed_len,
        );
        let header_bytes = header.to_bytes();

        let mut hasher = blake3::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&compressed);
        let checksum: [u8; 32] = hasher.finalize().into();

        let name = SegmentName::new(spill_id, seq);
        let path = format!("{}/{}.seg", self.root_dir, name.0);

        let mut full_segment = Vec::with_capacity(header_bytes.len() + compressed.len());
        full_segment.extend_from_slice(&header_bytes);
        full_segment.extend_from_slice(&compressed);
        self.storage.write(&path, &full_segment)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            segment = %name.0,
            tuples = tuples.len(),
            bytes = full_segment.len(),
            codec = self.codec.name(),
            "spilled segment"
        );

        let meta = SegmentMeta {
            name: name.clone(),
            path,
            codec: self.codec,
            tuple_count: tuples.len() as u64,
            uncompressed_len,
            compressed_len,
            checksum,
        };
        self.segments.insert(name, meta.clone());
        Ok(meta)
    }

    /// Read a segment back, verifying its checksum. The decoded size is
    /// charged to `budget` for as long as the returned batch lives.
    pub fn read_tuples(
        &self,
        meta: &SegmentMeta,
        budget: &dyn MemoryBudget<Guard = BudgetGuardImpl>,
    ) -> Result<SegmentBatch> {
        if !self.segments.contains_key(&meta.name) {
            return Err(Error::UnknownSegment(meta.name.0.clone()));
        }

        let total_len = HEADER_LEN + meta.compressed_len as usize;
        let full_segment = self.storage.read_range(&meta.path, 0, total_len)?;
        if full_segment.len() < HEADER_LEN {
            return Err(Error::Storage("segment too short".into()));
        }

        let computed: [u8; 32] = blake3::hash(&full_segment).into();
        if computed != meta.checksum {
            return Err(Error::ChecksumMismatch(meta.name.0.clone()));
        }

        let header = SegmentHeader::from_bytes(&full_segment[..HEADER_LEN])?;
        header.validate_sizes(MAX_SEGMENT_BYTES)?;

        let guard = budget
            .try_acquire(header.uncompressed_len as usize, "spill_decode")
            .ok_or_else(|| Error::BudgetExceeded {
                tag: "spill_decode",
                requested: header.uncompressed_len as usize,
                capacity: budget.capacity_bytes(),
                used: budget.used_bytes(),
            })?;

        let uncompressed = codec::decompress(header.codec, &full_segment[HEADER_LEN..])?;
        let tuples: Vec<Tuple> = serde_json::from_slice(&uncompressed)
            .map_err(|e| Error::Codec(format!("json deserialize: {e}")))?;

        if tuples.len() as u64 != header.tuple_count {
            return Err(Error::Storage(format!(
                "segment {} holds {} tuples, header says {}",
                meta.name.0,
                tuples.len(),
                header.tuple_count
            )));
        }
        Ok(SegmentBatch { tuples, guard })
    }

    /// Delete a segment from storage and forget it.
    pub fn delete_segment(&mut self, name: &SegmentName) -> Result<()> {
        if let Some(meta) = self.segments.remove(name) {
            self.storage.delete(&meta.path)?;
            #[cfg(feature = "tracing")]
            tracing::trace!(segment = %name.0, "deleted segment");
        }
        Ok(())
    }

    /// Number of segments written and not yet deleted.
    pub fn live_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn list_segments(&self) -> Vec<SegmentName> {
        let mut names: Vec<_> = self.segments.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for SpillManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpillManager")
            .field("codec", &self.codec)
            .field("root_dir", &self.root_dir)
            .field("live_segments", &self.segments.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::MemoryBudgetImpl;
    use std::sync::Mutex;

    /// Minimal in-crate storage; the real backends live in tupleflow-io.
    #[derive(Default)]
    struct MapStorage(Mutex<HashMap<String, Vec<u8>>>);

    impl Storage for MapStorage {
        fn write(&self, path: &str, bytes: &[u8]) -> Result<()> {
            self.0.lock().unwrap().insert(path.to_string(), bytes.to_vec());
            Ok(())
        }
        fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
            let map = self.0.lock().unwrap();
            let data = map
                .get(path)
                .ok_or_else(|| Error::Storage(format!("missing {path}")))?;
            let start = offset as usize;
            Ok(data[start..start + len].to_vec())
        }
        fn delete(&self, path: &str) -> Result<()> {
            self.0.lock().unwrap().remove(path);
            Ok(())
        }
        fn list(&self, prefix: &str) -> Result<Vec<String>> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }
        fn size(&self, path: &str) -> Result<u64> {
            Ok(self.0.lock().unwrap().get(path).map_or(0, |d| d.len() as u64))
        }
    }

    fn tuples(n: i64) -> Vec<Tuple> {
        (0..n).map(|i| Tuple::of([i, i * 10])).collect()
    }

    #[test]
    fn segments_round_trip_in_order() {
        let mut mgr = SpillManager::new(Box::new(MapStorage::default()), Codec::None, "/spill".into());
        let budget = MemoryBudgetImpl::new(1 << 20);
        let id = mgr.next_spill_id();
        let meta = mgr.write_tuples(&tuples(5), id, 0).unwrap();
        assert_eq!(meta.tuple_count, 5);
        let batch = mgr.read_tuples(&meta, &budget).unwrap();
        assert_eq!(batch.tuples(), tuples(5).as_slice());
        assert_eq!(budget.used_bytes(), meta.uncompressed_len as usize);
        drop(batch);
        assert_eq!(budget.used_bytes(), 0);

        mgr.delete_segment(&meta.name).unwrap();
        assert_eq!(mgr.live_segments(), 0);
        assert!(mgr.storage().list("/spill").unwrap().is_empty());
    }

    #[test]
    fn corrupted_segments_are_detected() {
        let mut mgr = SpillManager::new(Box::new(MapStorage::default()), Codec::None, "/spill".into());
        let budget = MemoryBudgetImpl::new(1 << 20);
        let mut meta = mgr.write_tuples(&tuples(2), SpillId::new(7), 0).unwrap();
        meta.checksum[0] ^= 1;
        assert!(matches!(
            mgr.read_tuples(&meta, &budget),
            Err(Error::ChecksumMismatch(_))
        ));
    }

    #[test]
    fn reads_respect_the_budget() {
        let mut mgr = SpillManager::new(Box::new(MapStorage::default()), Codec::None, "/spill".into());
        let budget = MemoryBudgetImpl::new(8);
        let meta = mgr.write_tuples(&tuples(50), SpillId::new(1), 0).unwrap();
        assert!(matches!(
            mgr.read_tuples(&meta, &budget),
            Err(Error::BudgetExceeded { .. })
        ));
    }

    #[test]
    fn batches_hold_their_charge_until_dropped() {
        let mut mgr = SpillManager::new(Box::new(MapStorage::default()), Codec::None, "/spill".into());
        let a = mgr.write_tuples(&tuples(20), SpillId::new(1), 0).unwrap();
        let b = mgr.write_tuples(&tuples(20), SpillId::new(2), 0).unwrap();
        let budget = MemoryBudgetImpl::new(a.uncompressed_len as usize);

        let first = mgr.read_tuples(&a, &budget).unwrap();
        assert_eq!(first.charged_bytes(), a.uncompressed_len as usize);
        assert!(matches!(
            mgr.read_tuples(&b, &budget),
            Err(Error::BudgetExceeded { .. })
        ));

        drop(first);
        let second = mgr.read_tuples(&b, &budget).unwrap();
        assert_eq!(second.len(), 20);
    }

    #[test]
    fn sessions_get_distinct_roots() {
        let a = SpillManager::with_session(Box::new(MapStorage::default()), Codec::None, "/tmp/x/");
        let b = SpillManager::with_session(Box::new(MapStorage::default()), Codec::None, "/tmp/x");
        assert!(a.root_dir().starts_with("/tmp/x/session-"));
        assert_ne!(a.root_dir(), b.root_dir());
    }
}
