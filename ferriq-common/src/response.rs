//! Tagged operation responses.
//!
//! Engine operations return one of a closed set of response shapes; the
//! wire layer owns their serialization.

use std::collections::BTreeMap;

/// A single popped or peeked message as returned to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageItem {
    /// Client-visible message id.
    pub id: String,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Receipt for the lock instance; present only for locked pops.
    pub receipt: Option<String>,
}

/// Value of one field in a dictionary response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DictValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl From<i64> for DictValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for DictValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for DictValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Successful result of a broker operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Operation completed; nothing to report.
    Ok,
    /// Liveness reply.
    Pong,
    /// A single integer, e.g. a sweep count or a timestamp.
    Int(i64),
    /// A single string, e.g. a freshly assigned message id.
    Str(String),
    /// A list of names, e.g. from a queue listing.
    Names(Vec<String>),
    /// Popped messages, head of the queue first.
    Items(Vec<MessageItem>),
    /// Keyed status or info data. `BTreeMap` keeps field order stable
    /// for the wire layer and for tests.
    Dict(BTreeMap<String, DictValue>),
}

impl Response {
    /// Consume an `Items` response, panicking on any other shape.
    ///
    /// # Panics
    /// If the response is not `Items`. Intended for tests.
    pub fn expect_items(self) -> Vec<MessageItem> {
        match self {
            Self::Items(items) => items,
            other => panic!("expected an items response, got {other:?}"),
        }
    }
}
