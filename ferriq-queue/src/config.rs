//! Per-queue runtime config and queue-type tuning.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Runtime configuration of one queue; persisted as a versioned record
/// under the queue's `cfg` key.
///
/// A zero `max_size` or `pop_count_limit` disables the respective limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_size: i64,
    pub msg_ttl: i64,
    pub delivery_delay: i64,
    pub pop_lock_timeout: i64,
    pub pop_count_limit: i64,
    pub create_ts: i64,
    pub last_push_ts: i64,
    pub last_pop_ts: i64,
}

impl QueueConfig {
    /// Config of a freshly created queue, seeded from the type defaults.
    pub const fn new(tuning: &QueueTuning, now: i64) -> Self {
        Self {
            max_size: 0,
            msg_ttl: tuning.default_msg_ttl,
            delivery_delay: tuning.default_delivery_delay,
            pop_lock_timeout: tuning.default_lock_timeout,
            pop_count_limit: tuning.default_pop_count_limit,
            create_ts: now,
            last_push_ts: now,
            last_pop_ts: now,
        }
    }
}

/// A partial update of a [`QueueConfig`], as carried by queue creation
/// parameters and the set-config operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigPatch {
    pub msg_ttl: Option<i64>,
    pub max_size: Option<i64>,
    pub delivery_delay: Option<i64>,
    pub pop_count_limit: Option<i64>,
    pub pop_lock_timeout: Option<i64>,
}

impl ConfigPatch {
    pub fn apply(&self, config: &mut QueueConfig) {
        if let Some(v) = self.msg_ttl {
            config.msg_ttl = v;
        }
        if let Some(v) = self.max_size {
            config.max_size = v;
        }
        if let Some(v) = self.delivery_delay {
            config.delivery_delay = v;
        }
        if let Some(v) = self.pop_count_limit {
            config.pop_count_limit = v;
        }
        if let Some(v) = self.pop_lock_timeout {
            config.pop_lock_timeout = v;
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.msg_ttl.is_none()
            && self.max_size.is_none()
            && self.delivery_delay.is_none()
            && self.pop_count_limit.is_none()
            && self.pop_lock_timeout.is_none()
    }
}

/// Defaults and caps applied to every priority queue; part of the
/// service configuration document. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueTuning {
    pub default_msg_ttl: i64,
    pub default_delivery_delay: i64,
    pub default_lock_timeout: i64,
    pub default_pop_count_limit: i64,
    /// Cap on expiries removed per timeout sweep.
    pub expiration_batch_size: i64,
    /// Cap on lock releases per timeout sweep.
    pub unlock_batch_size: i64,
    pub max_pop_wait_timeout: i64,
    pub max_pop_batch_size: i64,
    pub max_lock_timeout: i64,
    pub max_delivery_timeout: i64,
}

impl Default for QueueTuning {
    fn default() -> Self {
        Self {
            default_msg_ttl: 10 * 60 * 1000,
            default_delivery_delay: 0,
            default_lock_timeout: 60 * 1000,
            default_pop_count_limit: 0,
            expiration_batch_size: 1000,
            unlock_batch_size: 1000,
            max_pop_wait_timeout: 30_000,
            max_pop_batch_size: 10,
            max_lock_timeout: 3600 * 1000,
            max_delivery_timeout: 3600 * 1000 * 12,
        }
    }
}

/// Engine-facing slice of the service configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub tuning: QueueTuning,
    /// How often each queue's update task sweeps timeouts.
    pub update_interval: Duration,
    /// Entries consumed per `check_timeouts` call.
    pub timeout_check_batch_size: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tuning: QueueTuning::default(),
            update_interval: Duration::from_millis(100),
            timeout_check_batch_size: 1000,
        }
    }
}
