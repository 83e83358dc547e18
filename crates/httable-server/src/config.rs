//! Per-server tunables: queue sizes and timing. Plain `Copy` + `Default`,
//! `serde::Deserialize` so an embedder can load them from whatever format
//! it likes; this crate does not parse a config file itself.

use serde::Deserialize;

/// Worker-pool sizes, timer intervals, and per-request limits for one
/// range server.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads executing request handlers (updates, scans).
    pub application_worker_count: usize,
    /// Background workers running compactions and splits.
    pub maintenance_worker_count: usize,
    /// How often the maintenance scheduler sweeps loaded ranges for
    /// compaction/split pressure.
    pub maintenance_interval_ms: u64,
    /// Commit log rotation threshold, shared by every range's log.
    pub commit_log_file_size_threshold: u64,
    /// Block cache memory budget shared across every access group this
    /// server hosts.
    pub block_cache_bytes: usize,
    /// Default timeout applied to a request that does not specify one.
    pub default_request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_worker_count: 20,
            maintenance_worker_count: 4,
            maintenance_interval_ms: 30_000,
            commit_log_file_size_threshold: 64 * 1024 * 1024,
            block_cache_bytes: 256 * 1024 * 1024,
            default_request_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_application_worker_count_is_twenty() {
        let config = ServerConfig::default();
        assert_eq!(config.application_worker_count, 20);
        assert_eq!(config.maintenance_worker_count, 4);
    }

    #[test]
    fn deserializes_with_partial_overrides() {
        let config: ServerConfig = serde_json::from_str(r#"{"application_worker_count": 8}"#).unwrap();
        assert_eq!(config.application_worker_count, 8);
        assert_eq!(config.maintenance_worker_count, 4, "fields not present in the input keep their default");
    }
}
