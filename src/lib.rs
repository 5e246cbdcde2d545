#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # redfishd
//!
//! Redfish management API server. This crate wires the workspace crates
//! into a runnable process: built-in plugins, the seeded resource tree and
//! service assembly.

use redfishd_core::Config;
use redfishd_domain::{RedfishService, Result, ServiceBuilder};

pub mod bootstrap;
pub mod plugins;

pub use redfishd_core;
pub use redfishd_domain;
pub use redfishd_events;
pub use redfishd_web;

/// Assemble the service with every built-in plugin registered.
///
/// # Errors
///
/// See [`ServiceBuilder::build`].
pub async fn build_service(config: Config) -> Result<RedfishService> {
    plugins::builtin()
        .into_iter()
        .fold(ServiceBuilder::new(config), ServiceBuilder::with_plugin)
        .build()
        .await
}
