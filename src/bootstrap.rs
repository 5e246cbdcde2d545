//! Initial resource tree.
//!
//! Seeds the service root, the `Systems` collection and one simulated
//! system whose power state and clock come from the built-in plugins.

use redfishd_domain::{CreateRedfishResource, RedfishService, Result};
use serde_json::json;
use tracing::info;

use crate::plugins::{CLOCK, SYSTEM_POWER};

/// Create the default resources under the configured API root.
///
/// # Errors
///
/// Fails if any of the resources already exists.
pub async fn seed(service: &RedfishService) -> Result<()> {
    let root = service.config().server.api_root.trim_end_matches('/').to_string();
    let systems = format!("{root}/Systems");
    let system = format!("{systems}/1");

    service
        .execute(
            &CreateRedfishResource::new(
                &root,
                "#ServiceRoot.v1_0_0.ServiceRoot",
                format!("{root}/$metadata#ServiceRoot.ServiceRoot"),
            )
            .with_properties(json!({
                "Id": "RootService",
                "Name": "Root Service",
                "RedfishVersion": "1.0.0",
                "Systems": {"@odata.id": systems},
            })),
        )
        .await?;

    service
        .execute(
            &CreateRedfishResource::new(
                &systems,
                "#ComputerSystemCollection.ComputerSystemCollection",
                format!("{root}/$metadata#ComputerSystemCollection.ComputerSystemCollection"),
            )
            .as_collection()
            .with_properties(json!({"Name": "Computer System Collection"})),
        )
        .await?;

    service
        .execute(
            &CreateRedfishResource::new(
                &system,
                "#ComputerSystem.v1_5_0.ComputerSystem",
                format!("{root}/$metadata#ComputerSystem.ComputerSystem"),
            )
            .with_plugin(SYSTEM_POWER)
            .with_properties(json!({
                "Id": "1",
                "Name": "Simulated System",
                "SystemType": "Physical",
                "PowerState": "Unknown",
                "PowerState@meta": {
                    "GET": {"plugin": SYSTEM_POWER},
                    "PATCH": {"controller": SYSTEM_POWER},
                },
                "Status": {"State": "Enabled", "Health": "OK"},
                "Oem": {
                    "Redfishd": {
                        "DateTime": null,
                        "DateTime@meta": {"GET": {"plugin": CLOCK, "field": "DateTime"}},
                        "UptimeSeconds": 0,
                        "UptimeSeconds@meta": {"GET": {"plugin": CLOCK, "field": "Uptime"}},
                    }
                },
            })),
        )
        .await?;

    info!(root = %root, "Seeded default resources");
    Ok(())
}
