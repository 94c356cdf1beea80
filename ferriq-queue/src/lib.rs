#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

pub mod command;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod heap;
pub mod keys;
pub mod manager;
pub mod message;
pub mod records;

pub use command::Command;
pub use config::{ConfigPatch, EngineSettings, QueueConfig, QueueTuning};
pub use descriptor::{ServiceDescriptor, ServiceType};
pub use engine::{PQueue, PopOptions};
pub use manager::QueueManager;
pub use message::MessageMeta;
