//! Service descriptors.
//!
//! A descriptor is the durable identity of one queue: its name, type,
//! and the stable `service_id` every one of its database keys is
//! prefixed with. Descriptors live under a reserved global prefix so
//! the manager can enumerate them at startup.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ferriq_common::{QueueError, ident};

/// The kind of service a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceType {
    PriorityQueue,
}

impl ServiceType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriorityQueue => "pqueue",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pqueue" => Ok(Self::PriorityQueue),
            other => Err(QueueError::invalid(format!(
                "unknown service type: {other}"
            ))),
        }
    }
}

/// Durable identity record of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Monotonic creation counter, unique across the database lifetime.
    pub export_id: u64,
    pub service_type: ServiceType,
    pub name: String,
    pub create_ts: i64,
    /// A disabled service is kept on disk but not loaded or reachable
    /// until it is enabled again.
    pub disabled: bool,
    /// Set while a drop is purging rows; a descriptor still carrying
    /// this mark on load belongs to a drop that did not finish, and
    /// the load completes it.
    pub to_delete: bool,
    /// Stable key prefix component, derived from the export id. Never
    /// reused, so dropped queues cannot leak rows into new ones.
    pub service_id: String,
}

impl ServiceDescriptor {
    pub fn new(export_id: u64, service_type: ServiceType, name: &str, now: i64) -> Self {
        Self {
            export_id,
            service_type,
            name: name.to_string(),
            create_ts: now,
            disabled: false,
            to_delete: false,
            service_id: ident::encode_base36(export_id),
        }
    }
}
