//! Segment file header and metadata.
//!
//! Layout on disk:
//! [ magic: u32 ][ version: u16 ][ codec: u8 ][ reserved: u8 ]
//! [ tuple_count: u64 ][ uncompressed_len: u64 ][ compressed_len: u64 ]
//! [ payload bytes … ]
//!
//! End-to-end checksum is computed over (header || payload) using blake3.

use serde::{Deserialize, Serialize};

use tupleflow_core::id::SpillId;

use super::Codec;
use crate::error::{Error, Result};

pub const MAGIC: u32 = 0x5446_5347; // "TFSG"
pub const VERSION: u16 = 1;
pub const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 8 + 8;

/// Sanity limit on a single segment, guards against corrupted headers.
pub const MAX_SEGMENT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub magic: u32,
    pub version: u16,
    pub codec: Codec,
    pub tuple_count: u64,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
}

fn le_array<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N]> {
    bytes
        .get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| Error::Storage("short header".into()))
}

impl SegmentHeader {
    pub fn new(codec: Codec, tuple_count: u64, uncompressed_len: u64, compressed_len: u64) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            codec,
            tuple_count,
            uncompressed_len,
            compressed_len,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.push(self.codec as u8);
        out.push(0u8); // reserved
        out.extend_from_slice(&self.tuple_count.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_len.to_le_bytes());
        out.extend_from_slice(&self.compressed_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Storage("short header".into()));
        }
        let magic = u32::from_le_bytes(le_array(bytes, 0)?);
        let version = u16::from_le_bytes(le_array(bytes, 4)?);
        if magic != MAGIC || version != VERSION {
            return Err(Error::Storage("bad magic/version".into()));
        }
        let codec = Codec::from_u8(bytes[6])?;
        // bytes[7] reserved
        Ok(Self {
            magic,
            version,
            codec,
            tuple_count: u64::from_le_bytes(le_array(bytes, 8)?),
            uncompressed_len: u64::from_le_bytes(le_array(bytes, 16)?),
            compressed_len: u64::from_le_bytes(le_array(bytes, 24)?),
        })
    }

    /// Reject sizes no segment written by this engine can have.
    pub fn validate_sizes(&self, max_bytes: u64) -> Result<()> {
        if self.uncompressed_len > max_bytes || self.compressed_len > max_bytes {
            return Err(Error::Storage(format!(
                "segment sizes {}/{} exceed max {}",
                self.compressed_len, self.uncompressed_len, max_bytes
            )));
        }
        if self.codec == Codec::None && self.compressed_len != self.uncompressed_len {
            return Err(Error::Storage(
                "uncompressed segment with mismatched lengths".into(),
            ));
        }
        Ok(())
    }
}

/// Name of a segment, derived from a spill id and a sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentName(pub String);

impl SegmentName {
    pub fn new(id: SpillId, seq: u32) -> Self {
        SegmentName(format!("spill{}_seg{:05}", id.get(), seq))
    }
}

/// Metadata the spill manager keeps for a written segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentMeta {
    pub name: SegmentName,
    pub path: String,
    pub codec: Codec,
    pub tuple_count: u64,
    pub uncompressed_len: u64,
    pub compressed_len: u64,
    pub checksum: [u8; 32],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_and_rejects_garbage() {
        let h = SegmentHeader::new(Codec::None, 3, 120, 120);
        let bytes = h.to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(SegmentHeader::from_bytes(&bytes).unwrap(), h);

        let mut bad = bytes.clone();
        bad[0] ^= 0xff;
        assert!(SegmentHeader::from_bytes(&bad).is_err());
        assert!(SegmentHeader::from_bytes(&bytes[..10]).is_err());
    }

    #[test]
    fn oversized_headers_fail_validation() {
        let h = SegmentHeader::new(Codec::Zstd, 1, MAX_SEGMENT_BYTES + 1, 10);
        assert!(h.validate_sizes(MAX_SEGMENT_BYTES).is_err());
    }
}
