//! Engine configuration, defaulted the way `database::connection_pool` and
//! `database::cache` default theirs, with `FIBERDB_*` environment overrides
//! (spec §6) applied on top.

use std::path::PathBuf;
use std::time::Duration;

/// Storage engine selector. `Custom` is reserved for embedders providing
/// their own WAL/store implementation; the file engine is the only one
/// implemented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Durable file-backed WAL + snapshot engine (default).
    File,
    /// Placeholder for an embedder-supplied backend.
    Custom,
}

/// Top-level configuration for an [`crate::engine::Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which storage engine to instantiate.
    pub engine: EngineKind,
    /// Directory holding `wal.log`, snapshots, and legacy `anchors/attached`
    /// trees.
    pub data_path: PathBuf,
    /// Whether WAL durability is enabled. Disabling it is useful for
    /// throwaway/test engines; writes then only affect the in-memory map.
    pub wal_enabled: bool,
    /// Max entries per cache (document cache and query-result cache each
    /// get this capacity).
    pub cache_size: usize,
    /// Number of in-memory WAL entries that triggers synchronous
    /// compaction.
    pub compaction_threshold: usize,
    /// Whether the index manager performs incremental maintenance on
    /// writes.
    pub indexing_enabled: bool,
    /// Reserved for embedders that run background compaction/index
    /// rebuilding off the write path; the reference engine always performs
    /// maintenance synchronously, so this only gates optional async
    /// helpers built on top of the engine.
    pub background_processing: bool,
    /// Whether `__secure` fields are passed through a decryptor.
    pub encryption_enabled: bool,
    /// Default key used when a query omits `decryptionKey` but
    /// `encryption_enabled` is set.
    pub default_encryption_key: Option<String>,
    /// Whether the performance monitor records samples.
    pub enable_metrics: bool,
    /// Default per-query deadline.
    pub query_timeout: Duration,
    /// Query admission semaphore size.
    pub max_concurrent_queries: usize,
    /// Default TTL applied by the file-existence cache.
    pub file_exists_cache_ttl: Duration,
    /// Default TTL-filter window used when a query omits an explicit
    /// `ttlDays` (the engine itself does not invent a default beyond what a
    /// caller requests; this is the fallback used by `EngineConfig::from_env`
    /// consumers that want one).
    pub default_ttl_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::File,
            data_path: default_data_path(),
            wal_enabled: true,
            cache_size: 10_000,
            compaction_threshold: 1_000,
            indexing_enabled: true,
            background_processing: false,
            encryption_enabled: false,
            default_encryption_key: None,
            enable_metrics: true,
            query_timeout: Duration::from_secs(30),
            max_concurrent_queries: 100,
            file_exists_cache_ttl: Duration::from_secs(5),
            default_ttl_days: 365,
        }
    }
}

fn default_data_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fiberdb")
}

impl EngineConfig {
    /// Populate configuration from the `FIBERDB_*` environment variables
    /// listed in spec §6, falling back to [`EngineConfig::default`] for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();

        if let Ok(engine) = std::env::var("FIBERDB_ENGINE") {
            config.engine = match engine.as_str() {
                "custom" => EngineKind::Custom,
                _ => EngineKind::File,
            };
        }
        if let Ok(path) = std::env::var("FIBERDB_DATA_PATH") {
            config.data_path = PathBuf::from(path);
        }
        if let Some(v) = env_bool("FIBERDB_WAL_ENABLED") {
            config.wal_enabled = v;
        }
        if let Some(v) = env_usize("FIBERDB_CACHE_SIZE") {
            config.cache_size = v;
        }
        if let Some(v) = env_usize("FIBERDB_COMPACTION_THRESHOLD") {
            config.compaction_threshold = v;
        }
        if let Some(v) = env_bool("FIBERDB_INDEXING_ENABLED") {
            config.indexing_enabled = v;
        }
        if let Some(v) = env_bool("FIBERDB_BACKGROUND_PROCESSING") {
            config.background_processing = v;
        }
        if let Some(v) = env_bool("FIBERDB_ENCRYPTION_ENABLED") {
            config.encryption_enabled = v;
        }
        if let Ok(key) = std::env::var("FIBERDB_DEFAULT_ENCRYPTION_KEY") {
            config.default_encryption_key = Some(key);
        }
        if let Some(v) = env_bool("FIBERDB_ENABLE_METRICS") {
            config.enable_metrics = v;
        }
        if let Some(v) = env_usize("FIBERDB_QUERY_TIMEOUT") {
            config.query_timeout = Duration::from_secs(v as u64);
        }
        if let Some(v) = env_usize("FIBERDB_MAX_CONCURRENT_QUERIES") {
            config.max_concurrent_queries = v;
        }

        config
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|v| {
        matches!(
            v.to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.wal_enabled);
        assert_eq!(config.max_concurrent_queries, 100);
        assert_eq!(config.query_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_bool_accepts_common_truthy_strings() {
        std::env::set_var("FIBERDB_TEST_FLAG", "yes");
        assert_eq!(env_bool("FIBERDB_TEST_FLAG"), Some(true));
        std::env::remove_var("FIBERDB_TEST_FLAG");
    }
}
