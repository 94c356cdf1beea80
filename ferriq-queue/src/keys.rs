//! Database key layout.
//!
//! Under a queue's stable `service_id`:
//!
//! - `q:<service_id>:cfg` (queue config record)
//! - `q:<service_id>:m:<serial>` (message metadata record)
//! - `q:<service_id>:p:<serial>` (payload bytes)
//!
//! plus the global prefixes `!desc:<name>` for service descriptors and
//! `!seq:export` for the export-id counter. Serials are 8-byte
//! big-endian so prefix iteration yields messages in serial order, which
//! the recovery loader relies on.

/// Prefix holding one descriptor record per service.
pub const DESC_PREFIX: &[u8] = b"!desc:";

/// Key of the persisted export-id counter.
pub const EXPORT_SEQ_KEY: &[u8] = b"!seq:export";

pub fn descriptor_key(name: &str) -> Vec<u8> {
    let mut key = DESC_PREFIX.to_vec();
    key.extend_from_slice(name.as_bytes());
    key
}

/// Prefix covering every row of one queue.
pub fn queue_prefix(service_id: &str) -> Vec<u8> {
    format!("q:{service_id}:").into_bytes()
}

pub fn config_key(service_id: &str) -> Vec<u8> {
    format!("q:{service_id}:cfg").into_bytes()
}

/// Prefix covering the metadata rows of one queue.
pub fn meta_prefix(service_id: &str) -> Vec<u8> {
    format!("q:{service_id}:m:").into_bytes()
}

pub fn meta_key(service_id: &str, serial: u64) -> Vec<u8> {
    let mut key = meta_prefix(service_id);
    key.extend_from_slice(&serial.to_be_bytes());
    key
}

pub fn payload_key(service_id: &str, serial: u64) -> Vec<u8> {
    let mut key = format!("q:{service_id}:p:").into_bytes();
    key.extend_from_slice(&serial.to_be_bytes());
    key
}

/// Recover the serial from a metadata key produced by [`meta_key`].
pub fn serial_from_meta_key(key: &[u8], prefix_len: usize) -> Option<u64> {
    let suffix: [u8; 8] = key.get(prefix_len..)?.try_into().ok()?;
    Some(u64::from_be_bytes(suffix))
}
