pub mod config;
pub mod core;
pub mod error;
pub mod gpu;
pub mod log;
pub mod orchestration;
pub mod storage;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{Engine, EngineHandle, EngineStatus, Event};
