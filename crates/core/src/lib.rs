//! Shared building blocks for redfishd: the core error type and the
//! service configuration model.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;

pub use config::{AccountConfig, CommandsConfig, Config, EventsConfig, LoggingConfig, ServerConfig};
pub use error::Error;
pub use result::Result;
