//! Configuration types for offthread

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Worker pool configuration
///
/// Groups settings related to task execution and retained-task lifetime.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers (default: 4)
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// How long an idle worker waits before re-checking the queue (default: 100ms)
    ///
    /// Workers are also woken immediately on submit; this is the fallback
    /// interval that bounds shutdown latency.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long terminal task records are retained before sweeping (default: 300 seconds)
    #[serde(default = "default_completed_grace", with = "duration_serde")]
    pub completed_grace: Duration,

    /// Interval between sweep passes over terminal records (default: 60 seconds)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub sweep_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            completed_grace: default_completed_grace(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl WorkerConfig {
    /// Idle poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay before the first retry (default: 1 second)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Exponent base for backoff growth (default: 2.0)
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,

    /// Jitter fraction applied symmetrically to each delay (default: 0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// HTTP status codes that trigger a retry (default: 429, 500, 502, 503, 504)
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            backoff_base: default_backoff_base(),
            jitter: default_jitter(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

/// Network and connectivity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Minimum interval between connectivity probes (default: 30 seconds)
    ///
    /// Within this window the last probe result is reused.
    #[serde(default = "default_connectivity_interval", with = "duration_serde")]
    pub connectivity_check_interval: Duration,

    /// Timeout for a single connectivity probe attempt (default: 5 seconds)
    #[serde(default = "default_connectivity_timeout", with = "duration_serde")]
    pub connectivity_check_timeout: Duration,

    /// `host:port` endpoints probed to determine connectivity
    #[serde(default = "default_probe_hosts")]
    pub probe_hosts: Vec<String>,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connectivity_check_interval: default_connectivity_interval(),
            connectivity_check_timeout: default_connectivity_timeout(),
            probe_hosts: default_probe_hosts(),
            user_agent: default_user_agent(),
        }
    }
}

/// Cache storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for the disk tier (None = no cache directory configured)
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Retention and eviction policy
    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Retention and eviction policy for the two-tier cache
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum total size of the disk tier in bytes (default: 500 MB)
    #[serde(default = "default_max_disk_size")]
    pub max_disk_size_bytes: u64,

    /// Maximum number of entries in the memory tier (default: 100)
    #[serde(default = "default_max_memory_items")]
    pub max_memory_items: usize,

    /// Default time-to-live for cached entries (None = never expires; default: 7 days)
    #[serde(default = "default_ttl", with = "optional_duration_serde")]
    pub default_ttl: Option<Duration>,

    /// Time-to-live for query result entries (default: 1 hour)
    #[serde(default = "default_query_ttl", with = "duration_serde")]
    pub query_ttl: Duration,

    /// Disk usage percentage that triggers eviction (default: 80.0)
    #[serde(default = "default_cleanup_threshold")]
    pub cleanup_threshold_percent: f64,

    /// Disk usage percentage eviction reduces to (default: 60.0)
    #[serde(default = "default_cleanup_target")]
    pub cleanup_target_percent: f64,

    /// Skip entries marked as favorites during eviction (default: true)
    #[serde(default = "default_true")]
    pub preserve_favorites: bool,

    /// Run expiry and size enforcement automatically after writes (default: true)
    #[serde(default = "default_true")]
    pub auto_cleanup_enabled: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_disk_size_bytes: default_max_disk_size(),
            max_memory_items: default_max_memory_items(),
            default_ttl: default_ttl(),
            query_ttl: default_query_ttl(),
            cleanup_threshold_percent: default_cleanup_threshold(),
            cleanup_target_percent: default_cleanup_target(),
            preserve_favorites: true,
            auto_cleanup_enabled: true,
        }
    }
}

impl RetentionPolicy {
    /// Validate internal consistency of the policy
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_items == 0 {
            return Err(Error::Config {
                message: "max_memory_items must be at least 1".into(),
                key: Some("max_memory_items".into()),
            });
        }
        if !(0.0..=100.0).contains(&self.cleanup_threshold_percent) {
            return Err(Error::Config {
                message: "cleanup_threshold_percent must be between 0 and 100".into(),
                key: Some("cleanup_threshold_percent".into()),
            });
        }
        if !(0.0..=100.0).contains(&self.cleanup_target_percent) {
            return Err(Error::Config {
                message: "cleanup_target_percent must be between 0 and 100".into(),
                key: Some("cleanup_target_percent".into()),
            });
        }
        if self.cleanup_target_percent >= self.cleanup_threshold_percent {
            return Err(Error::Config {
                message: "cleanup_target_percent must be below cleanup_threshold_percent".into(),
                key: Some("cleanup_target_percent".into()),
            });
        }
        Ok(())
    }
}

/// Main configuration for offthread
///
/// Fields are organized into logical sub-configs:
/// - [`workers`](WorkerConfig): pool size, poll interval, record retention
/// - [`retry`](RetryConfig): backoff, jitter, retryable statuses
/// - [`network`](NetworkConfig): timeouts, connectivity probing
/// - [`cache`](CacheConfig): disk location and retention policy
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Retry behavior for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Network and connectivity settings
    #[serde(default)]
    pub network: NetworkConfig,

    /// Cache storage settings
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// Validate the configuration, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.workers.worker_count == 0 {
            return Err(Error::Config {
                message: "worker_count must be at least 1".into(),
                key: Some("worker_count".into()),
            });
        }
        if self.retry.backoff_base < 1.0 {
            return Err(Error::Config {
                message: "backoff_base must be at least 1.0".into(),
                key: Some("backoff_base".into()),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(Error::Config {
                message: "jitter must be between 0.0 and 1.0".into(),
                key: Some("jitter".into()),
            });
        }
        self.cache.retention.validate()
    }
}

fn default_worker_count() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_completed_grace() -> Duration {
    Duration::from_secs(300)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connectivity_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_connectivity_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_probe_hosts() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}

fn default_user_agent() -> String {
    format!("offthread/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_disk_size() -> u64 {
    500 * 1024 * 1024
}

fn default_max_memory_items() -> usize {
    100
}

fn default_ttl() -> Option<Duration> {
    Some(Duration::from_secs(7 * 24 * 60 * 60))
}

fn default_query_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_cleanup_threshold() -> f64 {
    80.0
}

fn default_cleanup_target() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (seconds as u64)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().expect("defaults must validate");
        assert_eq!(config.workers.worker_count, 4);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(
            config.retry.retryable_status_codes,
            vec![429, 500, 502, 503, 504]
        );
        assert_eq!(config.cache.retention.max_memory_items, 100);
    }

    #[test]
    fn empty_json_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.workers.worker_count, 4);
        assert_eq!(config.network.connectivity_check_interval.as_secs(), 30);
        assert_eq!(
            config.cache.retention.default_ttl,
            Some(Duration::from_secs(7 * 24 * 60 * 60))
        );
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = Config::default();
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["retry"]["base_delay"], 1);
        assert_eq!(value["retry"]["max_delay"], 30);
        assert_eq!(value["workers"]["completed_grace"], 300);
    }

    #[test]
    fn partial_retry_config_fills_remaining_defaults() {
        let config: Config = serde_json::from_str(r#"{"retry": {"max_retries": 7}}"#).unwrap();
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.backoff_base, 2.0);
    }

    #[test]
    fn zero_workers_fails_validation() {
        let config = Config {
            workers: WorkerConfig {
                worker_count: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "worker_count"
        ));
    }

    #[test]
    fn target_percent_must_be_below_threshold() {
        let policy = RetentionPolicy {
            cleanup_threshold_percent: 60.0,
            cleanup_target_percent: 80.0,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(matches!(
            err,
            Error::Config { key: Some(ref k), .. } if k == "cleanup_target_percent"
        ));

        let equal = RetentionPolicy {
            cleanup_threshold_percent: 70.0,
            cleanup_target_percent: 70.0,
            ..Default::default()
        };
        assert!(equal.validate().is_err(), "equal percents are invalid too");
    }

    #[test]
    fn zero_memory_items_fails_validation() {
        let policy = RetentionPolicy {
            max_memory_items: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn jitter_out_of_range_fails_validation() {
        let config = Config {
            retry: RetryConfig {
                jitter: 1.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn optional_ttl_round_trips_through_json() {
        let mut policy = RetentionPolicy::default();
        policy.default_ttl = None;
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetentionPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_ttl, None);

        policy.default_ttl = Some(Duration::from_secs(3600));
        let json = serde_json::to_string(&policy).unwrap();
        let back: RetentionPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_ttl, Some(Duration::from_secs(3600)));
    }
}
