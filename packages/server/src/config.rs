//! Hub configuration.
//!
//! Built once at startup (see `src/bin/server.rs`) and handed to every component constructor.

use std::{num::NonZeroU32, time::Duration};

use governor::Quota;
use thiserror::Error;

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("messages_per_second must be a positive finite number (got {0})")]
    InvalidRate(f64),
    #[error("keepalive_interval ({keepalive:?}) must be shorter than read_deadline ({read:?})")]
    KeepaliveTooLong { keepalive: Duration, read: Duration },
}

/// Tunables of the connection hub.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Admission cap on concurrent connections.
    pub max_connections: usize,
    /// Per-connection inbound rate.
    pub messages_per_second: f64,
    pub burst: u32,
    /// Sliding liveness deadline, refreshed by any inbound frame.
    pub read_deadline: Duration,
    /// Bound on a single frame write.
    pub write_deadline: Duration,
    /// Keepalive probe period on idle writers.
    pub keepalive_interval: Duration,
    /// TTL of presence records.
    pub presence_ttl: Duration,
    /// Period of the roster broadcast.
    pub roster_interval: Duration,
    /// Bound on a single presence store call.
    pub store_timeout: Duration,
    pub outbound_queue_capacity: usize,
    pub engine_queue_capacity: usize,
    /// Largest accepted inbound frame.
    pub max_frame_bytes: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        let read_deadline = Duration::from_secs(60);
        Self {
            max_connections: 10_000,
            messages_per_second: 5.0,
            burst: 1,
            read_deadline,
            write_deadline: Duration::from_secs(10),
            keepalive_interval: read_deadline * 9 / 10,
            presence_ttl: Duration::from_secs(300),
            roster_interval: Duration::from_secs(5),
            store_timeout: Duration::from_secs(2),
            outbound_queue_capacity: 256,
            engine_queue_capacity: 1024,
            max_frame_bytes: 4096,
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let counts = [
            ("max_connections", self.max_connections),
            ("burst", self.burst as usize),
            ("outbound_queue_capacity", self.outbound_queue_capacity),
            ("engine_queue_capacity", self.engine_queue_capacity),
            ("max_frame_bytes", self.max_frame_bytes),
        ];
        let durations = [
            ("read_deadline", self.read_deadline),
            ("write_deadline", self.write_deadline),
            ("keepalive_interval", self.keepalive_interval),
            ("presence_ttl", self.presence_ttl),
            ("roster_interval", self.roster_interval),
            ("store_timeout", self.store_timeout),
        ];
        if let Some((name, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero(*name));
        }
        if let Some((name, _)) = durations.iter().find(|(_, value)| value.is_zero()) {
            return Err(ConfigError::Zero(*name));
        }
        if !(self.messages_per_second.is_finite() && self.messages_per_second > 0.0) {
            return Err(ConfigError::InvalidRate(self.messages_per_second));
        }
        if self.keepalive_interval >= self.read_deadline {
            return Err(ConfigError::KeepaliveTooLong {
                keepalive: self.keepalive_interval,
                read: self.read_deadline,
            });
        }
        Ok(())
    }

    /// Token-bucket quota for the per-connection inbound limiter.
    pub fn rate_quota(&self) -> Result<Quota, ConfigError> {
        if !(self.messages_per_second.is_finite() && self.messages_per_second > 0.0) {
            return Err(ConfigError::InvalidRate(self.messages_per_second));
        }
        let burst = NonZeroU32::new(self.burst).ok_or(ConfigError::Zero("burst"))?;
        let period = Duration::from_secs_f64(1.0 / self.messages_per_second);
        let quota =
            Quota::with_period(period).ok_or(ConfigError::InvalidRate(self.messages_per_second))?;
        Ok(quota.allow_burst(burst))
    }
}
