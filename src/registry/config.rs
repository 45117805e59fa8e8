//! Registry configuration

use std::time::Duration;

use serde::Deserialize;

use crate::config::{duration_secs, MIN_INTERVAL};

/// Configuration for the stream registry and its per-stream supervisors
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Name this node reports in stream metadata
    pub hostname: String,

    /// Interval between heartbeat ticks
    #[serde(with = "duration_secs")]
    pub heartbeat_interval: Duration,

    /// Failure count at which the heartbeat stops the stream
    pub heartbeat_failure_threshold: u32,

    /// Interval between keyframe samples for preview images
    #[serde(with = "duration_secs")]
    pub preview_interval: Duration,

    /// Maximum number of sampled keyframes awaiting delivery
    pub preview_queue_capacity: usize,

    /// Capacity of each track's packet broadcast channel
    pub track_broadcast_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_failure_threshold: 5,
            preview_interval: Duration::from_secs(5),
            preview_queue_capacity: 10,
            track_broadcast_capacity: 1024,
        }
    }
}

impl RegistryConfig {
    /// Set the reported hostname
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the heartbeat failure threshold
    pub fn heartbeat_failure_threshold(mut self, threshold: u32) -> Self {
        self.heartbeat_failure_threshold = threshold;
        self
    }

    /// Set the preview sampling interval
    pub fn preview_interval(mut self, interval: Duration) -> Self {
        self.preview_interval = interval.max(MIN_INTERVAL);
        self
    }
}

fn default_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
