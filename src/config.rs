//! Runtime configuration.
//!
//! Both background loops are disabled unless switched on here. Durations are expressed in
//! milliseconds in serialized form (`interval_ms`, `stale_after_ms`, ...).
//!
//! ```rust
//! use afterlife::RecoveryConfig;
//!
//! let cfg = RecoveryConfig::from_json(r#"{ "retry_scheduler": { "enabled": true } }"#).unwrap();
//! assert!(cfg.retry_scheduler.enabled);
//! assert!(!cfg.health_monitor.enabled);
//! assert_eq!(cfg.retry_scheduler.interval.as_secs(), 5);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::history::{DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_TRACKED_ITEMS};
use crate::timeout::DEFAULT_STORE_TIMEOUT;

pub const ENV_RETRY_SCHEDULER_ENABLED: &str = "AFTERLIFE_RETRY_SCHEDULER_ENABLED";
pub const ENV_RETRY_SCHEDULER_INTERVAL_MS: &str = "AFTERLIFE_RETRY_SCHEDULER_INTERVAL_MS";
pub const ENV_DLQ_MONITOR_ENABLED: &str = "AFTERLIFE_DLQ_MONITOR_ENABLED";
pub const ENV_DLQ_MONITOR_INTERVAL_MS: &str = "AFTERLIFE_DLQ_MONITOR_INTERVAL_MS";
pub const ENV_DLQ_STALE_AFTER_MS: &str = "AFTERLIFE_DLQ_STALE_AFTER_MS";

/// Failure reasons that escalate a fresh DLQ entry immediately.
pub const DEFAULT_HIGH_PRIORITY_MARKERS: [&str; 5] = [
    "SECURITY_VIOLATION",
    "DATA_CORRUPTION",
    "SYSTEM_CRITICAL",
    "DEADLINE_MISSED",
    "COMPLIANCE_VIOLATION",
];

/// Errors produced while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(String),
    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Retry requeue loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySchedulerConfig {
    pub enabled: bool,
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Max concurrent requeue updates within one tick.
    pub requeue_concurrency: usize,
}

impl Default for RetrySchedulerConfig {
    fn default() -> Self {
        Self { enabled: false, interval: Duration::from_secs(5), requeue_concurrency: 8 }
    }
}

/// DLQ health monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthMonitorConfig {
    pub enabled: bool,
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
    /// Unescalated entries older than this are auto-escalated.
    #[serde(rename = "stale_after_ms", with = "duration_ms")]
    pub stale_after: Duration,
    /// Log a volume alert when the DLQ holds more entries than this.
    pub volume_alert_threshold: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(30),
            stale_after: Duration::from_secs(48 * 60 * 60),
            volume_alert_threshold: 100,
        }
    }
}

/// Dead letter lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Entries created with at least this many failures escalate immediately.
    pub escalation_failure_count: u32,
    /// Entries kept in the per-process mirror.
    pub mirror_capacity: usize,
    pub high_priority_markers: Vec<String>,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            escalation_failure_count: 10,
            mirror_capacity: 1_000,
            high_priority_markers: DEFAULT_HIGH_PRIORITY_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub retry_scheduler: RetrySchedulerConfig,
    pub health_monitor: HealthMonitorConfig,
    pub dead_letter: DeadLetterConfig,
    /// Attempts kept per work item in the retry history.
    pub history_limit: usize,
    /// Work items tracked by the retry history.
    pub history_max_items: usize,
    #[serde(rename = "store_timeout_ms", with = "duration_ms")]
    pub store_timeout: Duration,
    #[serde(rename = "notify_timeout_ms", with = "duration_ms")]
    pub notify_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry_scheduler: RetrySchedulerConfig::default(),
            health_monitor: HealthMonitorConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            history_max_items: DEFAULT_MAX_TRACKED_ITEMS,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            notify_timeout: Duration::from_secs(5),
        }
    }
}

impl RecoveryConfig {
    /// Parse a JSON document; missing keys take their defaults.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `AFTERLIFE_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_RETRY_SCHEDULER_ENABLED) {
            self.retry_scheduler.enabled = parse_flag(ENV_RETRY_SCHEDULER_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_RETRY_SCHEDULER_INTERVAL_MS) {
            self.retry_scheduler.interval = parse_millis(ENV_RETRY_SCHEDULER_INTERVAL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_DLQ_MONITOR_ENABLED) {
            self.health_monitor.enabled = parse_flag(ENV_DLQ_MONITOR_ENABLED, &v)?;
        }
        if let Some(v) = lookup(ENV_DLQ_MONITOR_INTERVAL_MS) {
            self.health_monitor.interval = parse_millis(ENV_DLQ_MONITOR_INTERVAL_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_DLQ_STALE_AFTER_MS) {
            self.health_monitor.stale_after = parse_millis(ENV_DLQ_STALE_AFTER_MS, &v)?;
        }
        Ok(self)
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_disable_both_loops() {
        let cfg = RecoveryConfig::default();
        assert!(!cfg.retry_scheduler.enabled);
        assert!(!cfg.health_monitor.enabled);
        assert_eq!(cfg.retry_scheduler.interval, Duration::from_secs(5));
        assert_eq!(cfg.health_monitor.interval, Duration::from_secs(30));
        assert_eq!(cfg.health_monitor.stale_after, Duration::from_secs(48 * 3600));
        assert_eq!(cfg.health_monitor.volume_alert_threshold, 100);
        assert_eq!(cfg.dead_letter.escalation_failure_count, 10);
    }

    #[test]
    fn json_uses_millisecond_keys() {
        let cfg = RecoveryConfig::from_json(
            r#"{
                "health_monitor": { "enabled": true, "interval_ms": 1000, "stale_after_ms": 60000 },
                "store_timeout_ms": 250
            }"#,
        )
        .unwrap();
        assert!(cfg.health_monitor.enabled);
        assert_eq!(cfg.health_monitor.interval, Duration::from_secs(1));
        assert_eq!(cfg.health_monitor.stale_after, Duration::from_secs(60));
        assert_eq!(cfg.health_monitor.volume_alert_threshold, 100);
        assert_eq!(cfg.store_timeout, Duration::from_millis(250));
    }

    #[test]
    fn serialization_round_trips_durations() {
        let cfg = RecoveryConfig::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["retry_scheduler"]["interval_ms"], 5_000);
        let back: RecoveryConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, cfg);
    }

    #[test]
    fn overrides_toggle_loops() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_RETRY_SCHEDULER_ENABLED, "true"),
            (ENV_DLQ_MONITOR_ENABLED, "0"),
            (ENV_DLQ_MONITOR_INTERVAL_MS, "2500"),
        ]);
        let cfg = RecoveryConfig::default()
            .with_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert!(cfg.retry_scheduler.enabled);
        assert!(!cfg.health_monitor.enabled);
        assert_eq!(cfg.health_monitor.interval, Duration::from_millis(2_500));
    }

    #[test]
    fn bad_override_is_rejected() {
        let err = RecoveryConfig::default()
            .with_overrides(|k| (k == ENV_RETRY_SCHEDULER_ENABLED).then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = RecoveryConfig::default()
            .with_overrides(|k| (k == ENV_DLQ_MONITOR_INTERVAL_MS).then(|| "0".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(RecoveryConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
