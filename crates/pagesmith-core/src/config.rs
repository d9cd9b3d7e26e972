//! Engine configuration.
//!
//! Built once at process startup from `PAGESMITH_*` environment variables
//! and threaded through constructors; nothing reads the environment after
//! startup. Temp directory roots are a function of the main job id.

use std::path::PathBuf;
use std::time::Duration;

use crate::job::JobId;
use crate::queue::RetryPolicy;

/// Tunables recognized by the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Reject larger uploads (HTTP 413).
    pub max_file_size_mb: u64,
    /// Per-handler timeout enforced by the worker pool.
    pub conversion_timeout_seconds: u64,
    /// Result retention.
    pub result_ttl_seconds: u64,
    /// Job record retention.
    pub status_ttl_seconds: u64,
    /// PDF page threshold for taking the split path.
    pub min_split_pages: u32,
    /// Per-item retry attempts before dead-lettering.
    pub queue_retry_max: u32,
    /// Exponential backoff base.
    pub queue_retry_base_seconds: u64,
    /// Workers per process.
    pub worker_concurrency: usize,
    /// Root for per-job temp directories.
    pub spool_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 50,
            conversion_timeout_seconds: 300,
            result_ttl_seconds: 3600,
            status_ttl_seconds: 86_400,
            min_split_pages: 2,
            queue_retry_max: 3,
            queue_retry_base_seconds: 60,
            worker_concurrency: 2,
            spool_dir: std::env::temp_dir().join("pagesmith"),
        }
    }
}

impl EngineConfig {
    /// Build a configuration from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_file_size_mb: parse_var(&lookup, "PAGESMITH_MAX_FILE_SIZE_MB")
                .unwrap_or(defaults.max_file_size_mb),
            conversion_timeout_seconds: parse_var(&lookup, "PAGESMITH_CONVERSION_TIMEOUT_SECONDS")
                .unwrap_or(defaults.conversion_timeout_seconds),
            result_ttl_seconds: parse_var(&lookup, "PAGESMITH_RESULT_TTL_SECONDS")
                .unwrap_or(defaults.result_ttl_seconds),
            status_ttl_seconds: parse_var(&lookup, "PAGESMITH_STATUS_TTL_SECONDS")
                .unwrap_or(defaults.status_ttl_seconds),
            min_split_pages: parse_var(&lookup, "PAGESMITH_MIN_SPLIT_PAGES")
                .unwrap_or(defaults.min_split_pages),
            queue_retry_max: parse_var(&lookup, "PAGESMITH_QUEUE_RETRY_MAX")
                .unwrap_or(defaults.queue_retry_max),
            queue_retry_base_seconds: parse_var(&lookup, "PAGESMITH_QUEUE_RETRY_BASE_SECONDS")
                .unwrap_or(defaults.queue_retry_base_seconds),
            worker_concurrency: parse_var(&lookup, "PAGESMITH_WORKER_CONCURRENCY")
                .map(|n: usize| n.max(1))
                .unwrap_or(defaults.worker_concurrency),
            spool_dir: lookup("PAGESMITH_SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.spool_dir),
        }
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_seconds)
    }

    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_seconds)
    }

    /// The retry policy the work queue should apply.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_secs(self.queue_retry_base_seconds),
            multiplier: 2,
            max_attempts: self.queue_retry_max,
        }
    }

    /// Every job owns a spool directory keyed by its main id.
    pub fn job_spool(&self, main_id: JobId) -> PathBuf {
        self.spool_dir.join(main_id.to_string())
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_file_size_mb, 50);
        assert_eq!(config.conversion_timeout_seconds, 300);
        assert_eq!(config.result_ttl_seconds, 3600);
        assert_eq!(config.status_ttl_seconds, 86_400);
        assert_eq!(config.min_split_pages, 2);
        assert_eq!(config.queue_retry_max, 3);
        assert_eq!(config.queue_retry_base_seconds, 60);
        assert_eq!(config.worker_concurrency, 2);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EngineConfig::from_lookup(|key| match key {
            "PAGESMITH_MAX_FILE_SIZE_MB" => Some("10".into()),
            "PAGESMITH_MIN_SPLIT_PAGES" => Some("5".into()),
            "PAGESMITH_SPOOL_DIR" => Some("/var/spool/pagesmith".into()),
            _ => None,
        });
        assert_eq!(config.max_file_size_mb, 10);
        assert_eq!(config.min_split_pages, 5);
        assert_eq!(config.spool_dir, PathBuf::from("/var/spool/pagesmith"));
        // untouched keys keep their defaults
        assert_eq!(config.queue_retry_max, 3);
    }

    #[test]
    fn test_unparsable_value_falls_back() {
        let config = EngineConfig::from_lookup(|key| {
            (key == "PAGESMITH_WORKER_CONCURRENCY").then(|| "lots".into())
        });
        assert_eq!(config.worker_concurrency, 2);
    }

    #[test]
    fn test_worker_concurrency_minimum() {
        let config = EngineConfig::from_lookup(|key| {
            (key == "PAGESMITH_WORKER_CONCURRENCY").then(|| "0".into())
        });
        assert_eq!(config.worker_concurrency, 1);
    }

    #[test]
    fn test_job_spool_is_keyed_by_main_id() {
        let config = EngineConfig::default();
        let id = uuid::Uuid::new_v4();
        assert!(config.job_spool(id).ends_with(id.to_string()));
    }
}
