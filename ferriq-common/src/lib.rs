#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod clock;
pub mod error;
pub mod ident;
pub mod response;

pub use error::QueueError;
pub use response::{DictValue, MessageItem, Response};

/// Process-wide lifecycle signal, delivered over a broadcast channel to
/// every component with a blocking wait (sessions, blocking pops, the
/// flusher and the per-queue update tasks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}

/// Specialized `Result` for broker operations.
pub type Result<T> = std::result::Result<T, QueueError>;
