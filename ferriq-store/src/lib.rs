#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod cache;
pub mod db;
pub mod error;

pub use cache::WriteBehind;
pub use db::Database;
pub use error::StoreError;

/// Specialized `Result` type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;
