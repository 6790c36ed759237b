//! Engine configuration that downstream crates can serialize/deserialize.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Codec identifiers accepted in `spill_compression_codecs`.
pub const KNOWN_CODECS: &[&str] = &["zstd", "lz4", "none"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Values a non-lead join branch keeps in memory before it spills.
    pub spill_threshold: usize,

    /// Candidate codecs for spill segments, in preference order. The first
    /// one compiled into this build is used.
    pub spill_compression_codecs: Vec<String>,

    /// Sort grouping keys in descending order.
    pub reverse_sort: bool,

    /// Hard memory cap (in bytes) enforced when spilled segments are read back.
    pub mem_cap_bytes: usize,

    /// Directory for spill files.
    pub spill_dir: String,

    /// Optional spill URI (`file:///path` or `memory://`). Overrides `spill_dir`.
    pub spill_uri: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            spill_threshold: 10_000,
            spill_compression_codecs: vec!["zstd".to_string(), "lz4".to_string()],
            reverse_sort: false,
            mem_cap_bytes: 512 * 1024 * 1024, // 512 MiB default
            spill_dir: "/tmp/tupleflow-spill".to_string(),
            spill_uri: None,
        }
    }
}

/// Where spill segments live, derived from the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageTarget {
    Local(String),
    Memory,
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `TUPLEFLOW_SPILL_THRESHOLD`: values buffered per branch before spilling
    /// - `TUPLEFLOW_SPILL_CODECS`: comma separated codec list (e.g. `zstd,lz4`)
    /// - `TUPLEFLOW_REVERSE_SORT`: `true`/`false`
    /// - `TUPLEFLOW_MEM_CAP_BYTES`: memory cap in bytes
    /// - `TUPLEFLOW_SPILL_DIR`: spill directory
    /// - `TUPLEFLOW_SPILL_URI`: spill URI
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("TUPLEFLOW_SPILL_THRESHOLD") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.spill_threshold = v;
            }
        }

        if let Ok(s) = std::env::var("TUPLEFLOW_SPILL_CODECS") {
            cfg.spill_compression_codecs = split_list(&s);
        }

        if let Ok(s) = std::env::var("TUPLEFLOW_REVERSE_SORT") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.reverse_sort = v;
            }
        }

        if let Ok(s) = std::env::var("TUPLEFLOW_MEM_CAP_BYTES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.mem_cap_bytes = v;
            }
        }

        if let Ok(s) = std::env::var("TUPLEFLOW_SPILL_DIR") {
            cfg.spill_dir = s;
        }

        if let Ok(s) = std::env::var("TUPLEFLOW_SPILL_URI") {
            cfg.spill_uri = Some(s);
        }

        cfg
    }

    /// Build a config from abstract key/value properties. Unknown keys are
    /// ignored; malformed values are an error.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(s) = props.get("spill.threshold") {
            cfg.spill_threshold = parse_prop("spill.threshold", s)?;
        }
        if let Some(s) = props.get("spill.compression.codecs") {
            cfg.spill_compression_codecs = split_list(s);
        }
        if let Some(s) = props.get("sort.reverse") {
            cfg.reverse_sort = parse_prop("sort.reverse", s)?;
        }
        if let Some(s) = props.get("mem.cap.bytes") {
            cfg.mem_cap_bytes = parse_prop("mem.cap.bytes", s)?;
        }
        if let Some(s) = props.get("spill.dir") {
            cfg.spill_dir = s.clone();
        }
        if let Some(s) = props.get("spill.uri") {
            cfg.spill_uri = Some(s.clone());
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spill_threshold == 0 {
            return Err(Error::Config("spill threshold must be positive".into()));
        }
        if self.mem_cap_bytes == 0 {
            return Err(Error::Config("memory cap must be positive".into()));
        }
        if let Some(unknown) = self
            .spill_compression_codecs
            .iter()
            .find(|c| !KNOWN_CODECS.contains(&c.as_str()))
        {
            return Err(Error::Config(format!("unknown compression codec '{unknown}'")));
        }
        self.storage_target().map(|_| ())
    }

    /// Resolve where spill segments should be written.
    pub fn storage_target(&self) -> Result<StorageTarget> {
        match self.spill_uri.as_deref() {
            None => Ok(StorageTarget::Local(self.spill_dir.clone())),
            Some(uri) => match uri.split_once("://") {
                Some(("file", _)) => Ok(StorageTarget::Local(
                    file_uri_to_path(uri).unwrap_or_else(|| self.spill_dir.clone()),
                )),
                Some(("memory", _)) => Ok(StorageTarget::Memory),
                _ => Err(Error::Config(format!("unsupported spill uri '{uri}'"))),
            },
        }
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|c| c.trim().to_ascii_lowercase())
        .filter(|c| !c.is_empty())
        .collect()
}

fn parse_prop<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("invalid value '{value}' for '{key}'")))
}

fn file_uri_to_path(uri: &str) -> Option<String> {
    let stripped = uri.strip_prefix("file://")?;
    if stripped.starts_with('/') {
        Some(stripped.to_string())
    } else {
        Some(format!("/{}", stripped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.spill_threshold, 10_000);
        assert_eq!(cfg.spill_compression_codecs, vec!["zstd", "lz4"]);
    }

    #[test]
    fn properties_override_defaults() {
        let cfg = EngineConfig::from_properties(&props(&[
            ("spill.threshold", "25"),
            ("spill.compression.codecs", "LZ4, none"),
            ("sort.reverse", "true"),
            ("spill.uri", "memory://"),
        ]))
        .unwrap();
        assert_eq!(cfg.spill_threshold, 25);
        assert_eq!(cfg.spill_compression_codecs, vec!["lz4", "none"]);
        assert!(cfg.reverse_sort);
        assert_eq!(cfg.storage_target().unwrap(), StorageTarget::Memory);
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let err = EngineConfig::from_properties(&props(&[("spill.threshold", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_and_unknown_values_are_rejected() {
        assert!(EngineConfig::from_properties(&props(&[("spill.threshold", "ten")])).is_err());
        assert!(
            EngineConfig::from_properties(&props(&[("spill.compression.codecs", "brotli")]))
                .is_err()
        );
        assert!(EngineConfig::from_properties(&props(&[("spill.uri", "s3://bucket")])).is_err());
    }

    #[test]
    fn file_uri_maps_to_local_path() {
        let cfg = EngineConfig {
            spill_uri: Some("file:///var/spill".into()),
            ..EngineConfig::default()
        };
        assert_eq!(
            cfg.storage_target().unwrap(),
            StorageTarget::Local("/var/spill".into())
        );
    }
}
