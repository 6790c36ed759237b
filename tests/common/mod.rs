//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::Path;

use tupleflow_core::prelude::{EngineConfig, Fields, Scalar, Tuple};

pub fn fields(names: &[&str]) -> Fields {
    Fields::new(names.iter().copied()).expect("valid field names")
}

/// Config spilling to memory with an uncompressed codec.
pub fn memory_config(threshold: usize) -> EngineConfig {
    EngineConfig {
        spill_threshold: threshold,
        spill_compression_codecs: vec!["none".into()],
        spill_uri: Some("memory://".into()),
        ..EngineConfig::default()
    }
}

/// Config spilling below `dir` on the local filesystem.
pub fn fs_config(dir: &Path, threshold: usize) -> EngineConfig {
    EngineConfig {
        spill_threshold: threshold,
        spill_dir: dir.to_string_lossy().into_owned(),
        ..EngineConfig::default()
    }
}

/// `n` rows `(key, 0..n)` with a string key.
pub fn keyed_rows(key: &str, n: usize) -> Vec<Tuple> {
    (0..n)
        .map(|i| Tuple::new(vec![Scalar::from(key), Scalar::from(i as i64)]))
        .collect()
}

pub fn row(values: Vec<Scalar>) -> Tuple {
    Tuple::new(values)
}

/// Regular files anywhere below `dir`.
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|e| {
            let path = e.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}
