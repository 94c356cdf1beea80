//! Per-message metadata.

use serde::{Deserialize, Serialize};

/// Heap priority assigned to messages that return to the front of the
/// queue. Client-supplied priorities are non-negative, so this orders a
/// returned message ahead of every bucket.
pub const RETURN_TO_FRONT_PRIORITY: i64 = -1;

/// The persisted state of one message; the payload lives under its own
/// key. The serial is encoded in the database key, not the record body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMeta {
    /// Monotonic counter assigned at push time; the stable in-memory key.
    #[serde(skip)]
    pub serial: u64,
    /// Client-visible id, unique within the queue.
    pub str_id: String,
    /// Client-supplied priority; lower value pops first.
    pub priority: i64,
    /// Push timestamp, absolute milliseconds.
    pub created_ts: i64,
    /// `created_ts + ttl + delivery_delay`.
    pub expire_ts: i64,
    /// 0 while the message is available; otherwise the absolute deadline
    /// of its lock or delayed delivery.
    pub unlock_ts: i64,
    /// Number of successful locked pops.
    pub pop_count: i64,
}

impl MessageMeta {
    /// Metadata for a freshly pushed message.
    pub fn new(serial: u64, str_id: String, priority: i64, now: i64, ttl: i64, delay: i64) -> Self {
        Self {
            serial,
            str_id,
            priority,
            created_ts: now,
            expire_ts: now.saturating_add(ttl).saturating_add(delay),
            unlock_ts: if delay > 0 { now + delay } else { 0 },
            pop_count: 0,
        }
    }

    pub const fn is_locked(&self) -> bool {
        self.unlock_ts > 0
    }

    /// The next deadline the tracking heap orders by: lock expiry while
    /// locked, message expiry otherwise.
    pub const fn deadline(&self) -> i64 {
        if self.unlock_ts > 0 {
            self.unlock_ts
        } else {
            self.expire_ts
        }
    }

    /// Priority used in the available heap. A message that has been
    /// popped before re-enters at the front of the queue; its persisted
    /// priority is left untouched.
    pub const fn effective_priority(&self) -> i64 {
        if self.pop_count > 0 {
            RETURN_TO_FRONT_PRIORITY
        } else {
            self.priority
        }
    }
}
