//! # imb-common
//!
//! Configuration and error types shared by the IM-bot gateway crates.

pub mod config;
pub mod error;

pub use self::config::{AppConfig, ServerConfig};
pub use error::{GatewayError, GatewayResult};
