//! Versioned persisted records.
//!
//! Every structured value stored in the database (message metadata,
//! queue configs, service descriptors) is written as one version byte
//! followed by a bincode body. Decoders reject foreign versions; schema
//! changes bump the version and keep a decoder for the old one.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use ferriq_common::QueueError;

const RECORD_VERSION: u8 = 1;

/// Failure to encode or decode a persisted record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("record decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("unsupported record version: {0}")]
    Version(u8),

    #[error("record is empty")]
    Empty,
}

impl From<RecordError> for QueueError {
    fn from(e: RecordError) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Serialize a record with its version prefix.
///
/// # Errors
/// If the value cannot be encoded.
pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>, RecordError> {
    let body = bincode::serde::encode_to_vec(value, bincode::config::standard())?;
    let mut record = Vec::with_capacity(body.len() + 1);
    record.push(RECORD_VERSION);
    record.extend_from_slice(&body);
    Ok(record)
}

/// Deserialize a record, checking its version prefix.
///
/// # Errors
/// If the record is empty, carries an unknown version, or its body does
/// not decode.
pub fn decode_record<T: DeserializeOwned>(record: &[u8]) -> Result<T, RecordError> {
    let (&version, body) = record.split_first().ok_or(RecordError::Empty)?;
    if version != RECORD_VERSION {
        return Err(RecordError::Version(version));
    }
    let (value, _) = bincode::serde::decode_from_slice(body, bincode::config::standard())?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        name: String,
        count: i64,
    }

    #[test]
    fn test_record_round_trip() {
        let probe = Probe {
            name: "q".into(),
            count: -7,
        };
        let bytes = encode_record(&probe).expect("encode");
        assert_eq!(bytes[0], RECORD_VERSION);
        let back: Probe = decode_record(&bytes).expect("decode");
        assert_eq!(back, probe);
    }

    #[test]
    fn test_record_rejects_unknown_version() {
        let probe = Probe {
            name: "q".into(),
            count: 1,
        };
        let mut bytes = encode_record(&probe).expect("encode");
        bytes[0] = 9;
        assert!(matches!(
            decode_record::<Probe>(&bytes),
            Err(RecordError::Version(9))
        ));
    }

    #[test]
    fn test_record_rejects_empty_input() {
        assert!(matches!(
            decode_record::<Probe>(&[]),
            Err(RecordError::Empty)
        ));
    }
}
