//! CLI definitions using clap.

use std::path::PathBuf;

use clap::Parser;

/// redfishd - Redfish management API server
#[derive(Parser, Debug)]
#[command(name = "redfishd")]
#[command(version)]
#[command(about = "Redfish/OData management API server")]
#[command(
    long_about = "Serves a Redfish resource tree over HTTP. Resources are event-sourced aggregates; properties may be computed by plugins."
)]
pub struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Listen address, overriding `server.bind_address`.
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Log filter, overriding `logging.filter`. `RUST_LOG` wins over both.
    #[arg(long)]
    pub log_filter: Option<String>,
}
