#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod listener;
pub mod proto;
pub mod session;

pub use listener::Server;
pub use session::Session;
