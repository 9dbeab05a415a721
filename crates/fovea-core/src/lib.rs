#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod logging;
pub mod packet;
pub mod plan;
pub mod profile;
pub mod types;

pub use config::{DeviceMode, EngineConfig};
pub use error::{EngineError, Result};
