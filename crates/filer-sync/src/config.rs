//! Configuration for the aggregator, its checkpoints and its buffer.
//!
//! Defaults carry the replication protocol constants. All durations are
//! read as milliseconds when a config is deserialized.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use filer_sync_core::FullPath;

use crate::error::{Result, SyncError};

/// Configuration for peer replication.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Pause between a failed subscription and the next attempt.
    #[serde(rename = "retry_delay_ms", deserialize_with = "millis")]
    pub retry_delay: Duration,

    /// How far back a peer with no stored offset is followed.
    #[serde(rename = "replication_window_ms", deserialize_with = "millis")]
    pub replication_window: Duration,

    /// Only changes under this directory are requested from peers.
    pub path_prefix: FullPath,

    /// When applied progress is made durable.
    pub checkpoint: CheckpointPolicy,

    /// Aggregation buffer limits.
    pub buffer: BufferConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(1733),
            replication_window: Duration::from_secs(60),
            path_prefix: FullPath::root(),
            checkpoint: CheckpointPolicy::default(),
            buffer: BufferConfig::default(),
        }
    }
}

impl AggregatorConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry_delay.is_zero() {
            return Err(SyncError::Config("retry_delay must be positive".into()));
        }
        FullPath::parse(self.path_prefix.as_str())
            .map_err(|e| SyncError::Config(format!("path_prefix: {}", e)))?;
        self.checkpoint.validate()?;
        self.buffer.validate()
    }
}

/// Offset checkpoint policy.
///
/// A durable write happens once `max_pending` events were applied since the
/// last one, or once `max_interval` has passed, whichever comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CheckpointPolicy {
    pub max_pending: usize,

    #[serde(rename = "max_interval_ms", deserialize_with = "millis")]
    pub max_interval: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            max_pending: 100,
            max_interval: Duration::from_secs(60),
        }
    }
}

impl CheckpointPolicy {
    fn validate(&self) -> Result<()> {
        if self.max_pending == 0 {
            return Err(SyncError::Config("checkpoint.max_pending must be positive".into()));
        }
        if self.max_interval.is_zero() {
            return Err(SyncError::Config("checkpoint.max_interval must be positive".into()));
        }
        Ok(())
    }
}

/// Aggregation buffer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Entries retained before the oldest are evicted.
    pub max_entries: usize,

    /// Payload bytes retained before the oldest entries are evicted.
    pub max_bytes: usize,

    /// How often the background flusher hands new entries to the sink.
    #[serde(rename = "flush_interval_ms", deserialize_with = "millis")]
    pub flush_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_entries: 65_536,
            max_bytes: 64 * 1024 * 1024,
            flush_interval: Duration::from_secs(2),
        }
    }
}

impl BufferConfig {
    fn validate(&self) -> Result<()> {
        if self.max_entries == 0 || self.max_bytes == 0 {
            return Err(SyncError::Config("buffer limits must be positive".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(SyncError::Config("buffer.flush_interval must be positive".into()));
        }
        Ok(())
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::default();
        assert_eq!(config.retry_delay, Duration::from_millis(1733));
        assert_eq!(config.replication_window, Duration::from_secs(60));
        assert_eq!(config.checkpoint.max_pending, 100);
        assert_eq!(config.checkpoint.max_interval, Duration::from_secs(60));
        assert!(config.path_prefix.is_root());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_json() {
        let config: AggregatorConfig = serde_json::from_str(
            r#"{
                "retry_delay_ms": 500,
                "path_prefix": "/buckets",
                "checkpoint": { "max_pending": 10 },
                "buffer": { "max_entries": 1024, "flush_interval_ms": 250 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry_delay, Duration::from_millis(500));
        assert_eq!(config.path_prefix.as_str(), "/buckets");
        assert_eq!(config.checkpoint.max_pending, 10);
        assert_eq!(config.checkpoint.max_interval, Duration::from_secs(60));
        assert_eq!(config.buffer.max_entries, 1024);
        assert_eq!(config.buffer.flush_interval, Duration::from_millis(250));
        assert_eq!(config.replication_window, Duration::from_secs(60));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = AggregatorConfig::default();
        config.checkpoint.max_pending = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = AggregatorConfig::default();
        config.buffer.max_bytes = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));

        let mut config = AggregatorConfig::default();
        config.retry_delay = Duration::ZERO;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_relative_prefix() {
        let config: AggregatorConfig =
            serde_json::from_str(r#"{ "path_prefix": "buckets" }"#).unwrap();
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }
}
