//! Error taxonomy surfaced to broker clients.
//!
//! Every operation failure maps onto one of these variants; the numeric
//! code follows HTTP conventions (400 invalid request, 404 not found,
//! 409 conflict, 410 gone, 500 internal) and is what the wire layer
//! writes in `-ERR <code> <text>` responses.

use thiserror::Error;

/// Failure of a queue or manager operation.
///
/// Invalid-input errors abort the operation with no side effects. A
/// `Storage` error leaves the in-memory state consistent: pending writes
/// sit in the write-behind cache and the flusher retries them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Parameter missing, out of range, or of the wrong type.
    #[error("{0}")]
    InvalidRequest(String),

    /// Message id unknown to the queue.
    #[error("message not found")]
    MessageNotFound,

    /// No queue is registered under the given name.
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    /// Duplicate message id on push.
    #[error("message already exists")]
    AlreadyExists,

    /// A queue with this name is already registered.
    #[error("queue already exists: {0}")]
    QueueAlreadyExists(String),

    /// Plain delete of a message that is currently locked.
    #[error("message is locked")]
    Locked,

    /// Lock-only operation attempted on an unlocked message.
    #[error("message is not locked")]
    NotLocked,

    /// The message was removed because its pop budget ran out.
    #[error("message exceeded the number of pop attempts")]
    Gone,

    /// Receipt failed to parse.
    #[error("invalid receipt")]
    InvalidReceipt,

    /// Receipt no longer matches the message's current lock.
    #[error("receipt has expired")]
    ReceiptExpired,

    /// Push would exceed the queue's configured maximum size.
    #[error("queue size limit reached")]
    SizeExceeded,

    /// Storage layer failure or data-integrity failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl QueueError {
    /// HTTP-style status code for this error.
    pub const fn code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::NotLocked | Self::InvalidReceipt => 400,
            Self::MessageNotFound | Self::QueueNotFound(_) => 404,
            Self::AlreadyExists | Self::QueueAlreadyExists(_) | Self::Locked | Self::SizeExceeded => 409,
            Self::Gone | Self::ReceiptExpired => 410,
            Self::Storage(_) => 500,
        }
    }

    /// Shorthand for an [`QueueError::InvalidRequest`] with a formatted text.
    pub fn invalid(text: impl Into<String>) -> Self {
        Self::InvalidRequest(text.into())
    }
}
