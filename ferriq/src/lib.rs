#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod controller;
pub mod logging;

pub use config::BrokerConfig;
pub use controller::Ferriq;
