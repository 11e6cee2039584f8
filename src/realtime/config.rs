// ABOUTME: Configuration for the realtime subscription manager
//
// Defines ManagerConfig with all tunable parameters:
// - Pool cap and connection timeouts
// - Per-subscription retry budget and backoff
// - Admission debounce and batching
// - Circuit breaker threshold and cooldown
// - Invalidation delays per priority
// - Health sweep, stale threshold and latency warning
// - Reconnect backoff and notification cooldown

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::invalidation::PriorityDelays;

/// Upper bound for every configured duration; deadlines are `now + delay`
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the realtime manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    // === Connection Pool ===
    /// Maximum simultaneously open or connecting channels
    pub max_connections: usize,

    /// Channel creation deadline
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Delay before retrying a request that hit the cap
    #[serde(with = "duration_ms")]
    pub requeue_delay: Duration,

    /// Idle time before a connection without subscribers is torn down
    #[serde(with = "duration_ms")]
    pub idle_grace: Duration,

    // === Per-subscription Retry ===
    /// Attempts before a subscription is abandoned
    pub max_retries: u32,

    #[serde(with = "duration_ms")]
    pub retry_backoff_base: Duration,

    #[serde(with = "duration_ms")]
    pub retry_backoff_max: Duration,

    // === Admission ===
    #[serde(with = "duration_ms")]
    pub admission_debounce: Duration,

    /// Requests admitted per tick
    pub admission_batch_size: usize,

    #[serde(with = "duration_ms")]
    pub admission_batch_delay: Duration,

    // === Circuit Breaker ===
    /// Consecutive failures before the breaker opens
    pub circuit_breaker_threshold: u32,

    /// Cooldown before the breaker probes again
    #[serde(with = "duration_ms")]
    pub circuit_breaker_reset: Duration,

    /// Probe attempts allowed while half-open
    pub half_open_max_requests: u32,

    // === Invalidation ===
    #[serde(with = "duration_ms")]
    pub high_priority_delay: Duration,

    #[serde(with = "duration_ms")]
    pub medium_priority_delay: Duration,

    #[serde(with = "duration_ms")]
    pub low_priority_delay: Duration,

    // === Health ===
    #[serde(with = "duration_ms")]
    pub health_check_interval: Duration,

    /// Inactivity after which a subscription is evicted
    #[serde(with = "duration_ms")]
    pub stale_threshold: Duration,

    /// Connection-creation samples kept for the rolling average
    pub latency_window: usize,

    /// Average latency above this is reported as degraded
    #[serde(with = "duration_ms")]
    pub slow_latency_warning: Duration,

    // === Recovery ===
    #[serde(with = "duration_ms")]
    pub reconnect_backoff_base: Duration,

    #[serde(with = "duration_ms")]
    pub reconnect_backoff_max: Duration,

    pub reconnect_backoff_factor: f64,

    /// Reconnect passes before recovery gives up
    pub max_reconnect_attempts: u32,

    /// Minimum spacing between user-facing notifications
    #[serde(with = "duration_ms")]
    pub notification_cooldown: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout: Duration::from_secs(10),
            requeue_delay: Duration::from_secs(1),
            idle_grace: Duration::from_secs(30),

            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),

            admission_debounce: Duration::from_millis(100),
            admission_batch_size: 3,
            admission_batch_delay: Duration::from_millis(500),

            circuit_breaker_threshold: 5,
            circuit_breaker_reset: Duration::from_secs(30),
            half_open_max_requests: 1,

            high_priority_delay: Duration::ZERO,
            medium_priority_delay: Duration::from_millis(100),
            low_priority_delay: Duration::from_millis(300),

            health_check_interval: Duration::from_secs(60),
            stale_threshold: Duration::from_secs(600), // 10 minutes
            latency_window: 100,
            slow_latency_warning: Duration::from_millis(2000),

            reconnect_backoff_base: Duration::from_secs(1),
            reconnect_backoff_max: Duration::from_secs(60),
            reconnect_backoff_factor: 1.5,
            max_reconnect_attempts: 10,
            notification_cooldown: Duration::from_secs(15),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from the first file found, falling back to defaults
    ///
    /// Looks in `./.realtime-pool/config.toml`, then `~/.realtime-pool/config.toml`.
    pub fn load() -> Result<Self> {
        for path in Self::config_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load and validate a single TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Configuration file paths in order of precedence
    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".realtime-pool").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".realtime-pool").join("config.toml"));
        }

        paths
    }

    /// Check invariants the manager relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max_connections"));
        }
        if self.admission_batch_size == 0 {
            return Err(ConfigError::Zero("admission_batch_size"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Zero("max_retries"));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::Zero("circuit_breaker_threshold"));
        }
        if self.latency_window == 0 {
            return Err(ConfigError::Zero("latency_window"));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::Zero("health_check_interval"));
        }
        if !(self.high_priority_delay < self.medium_priority_delay
            && self.medium_priority_delay < self.low_priority_delay)
        {
            return Err(ConfigError::PriorityDelaysOutOfOrder);
        }
        for (field, duration) in self.durations() {
            if duration > MAX_DURATION {
                return Err(ConfigError::TooLong {
                    field,
                    max_ms: u64::try_from(MAX_DURATION.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
        Ok(())
    }

    fn durations(&self) -> [(&'static str, Duration); 15] {
        [
            ("connect_timeout", self.connect_timeout),
            ("requeue_delay", self.requeue_delay),
            ("idle_grace", self.idle_grace),
            ("retry_backoff_base", self.retry_backoff_base),
            ("retry_backoff_max", self.retry_backoff_max),
            ("admission_debounce", self.admission_debounce),
            ("admission_batch_delay", self.admission_batch_delay),
            ("circuit_breaker_reset", self.circuit_breaker_reset),
            ("low_priority_delay", self.low_priority_delay),
            ("health_check_interval", self.health_check_interval),
            ("stale_threshold", self.stale_threshold),
            ("slow_latency_warning", self.slow_latency_warning),
            ("reconnect_backoff_base", self.reconnect_backoff_base),
            ("reconnect_backoff_max", self.reconnect_backoff_max),
            ("notification_cooldown", self.notification_cooldown),
        ]
    }

    pub const fn priority_delays(&self) -> PriorityDelays {
        PriorityDelays {
            high: self.high_priority_delay,
            medium: self.medium_priority_delay,
            low: self.low_priority_delay,
        }
    }
}

/// Serde helper for Duration as milliseconds (u64)
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
