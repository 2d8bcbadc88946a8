use crate::compaction::CompactionStrategyType;
use crate::engine::{Engine, EngineConfig};
use crate::hotspot::KeySchema;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber controlled by `RUST_LOG` env var.
/// Safe to call multiple times — only the first call takes effect.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Standard config for tests that should NOT trigger implicit freezes.
pub fn memtable_only_config() -> EngineConfig {
    init_tracing();
    EngineConfig {
        write_buffer_size: 1024 * 1024,
        compaction_strategy: CompactionStrategyType::Stcs,
        bucket_low: 0.5,
        bucket_high: 1.5,
        min_sstable_size: 1024,
        min_threshold: 4,
        max_threshold: 32,
        target_sst_size: 64 * 1024 * 1024,
        key_schema: KeySchema::default(),
    }
}

/// Standard 64 KB config; freezes only via explicit `flush()`.
pub fn default_config() -> EngineConfig {
    EngineConfig {
        write_buffer_size: 64 * 1024,
        ..memtable_only_config()
    }
}

/// Small write buffer that triggers memtable freezing quickly.
pub fn small_buffer_config() -> EngineConfig {
    EngineConfig {
        write_buffer_size: 512,
        ..memtable_only_config()
    }
}

/// Config with a small compaction output target, forcing output splits.
pub fn split_config(target_sst_size: usize) -> EngineConfig {
    EngineConfig {
        target_sst_size,
        ..memtable_only_config()
    }
}

/// Builds a key in the default schema layout: 16-byte prefix, 8-byte
/// big-endian collection id, 4-byte big-endian suffix.
pub fn collection_key(collection: u64, suffix: u32) -> Vec<u8> {
    let mut key = b"pad_000000000000".to_vec();
    key.extend_from_slice(&collection.to_be_bytes());
    key.extend_from_slice(&suffix.to_be_bytes());
    key
}

/// Lower/upper scan bounds covering every key of one collection.
pub fn collection_bounds(collection: u64) -> (Vec<u8>, Vec<u8>) {
    (collection_key(collection, 0), collection_key(collection, u32::MAX))
}

/// Helper: open engine, put `num_keys` plain keys, flush them to SSTables.
pub fn engine_with_sstables(path: &Path, num_keys: usize, prefix: &str) -> Engine {
    let engine = Engine::open(path, default_config()).expect("open");
    for i in 0..num_keys {
        let key = format!("{prefix}_{i:04}").into_bytes();
        let value = format!("value_with_some_padding_{i:04}").into_bytes();
        engine.put(key, value).expect("put");
    }
    engine.flush().expect("flush");
    let stats = engine.stats().expect("stats");
    assert!(stats.sstables_count > 0, "Expected SSTables to be created");
    engine
}

/// Collect scan results into a Vec.
pub fn collect_scan(engine: &Engine, start: &[u8], end: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    engine.scan(start, end).expect("scan").collect()
}
