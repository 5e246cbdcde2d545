//! Built-in property plugins.
//!
//! `SystemPower` serves and accepts a system's `PowerState`; `Clock`
//! serves time-derived properties. Both keep their state in memory, which
//! is enough for a simulated system.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use redfishd_domain::{
    HttpVerb, Plugin, PluginError, Principal, Property, PropertyController, PropertyValue,
    RedfishResourceAggregate,
};
use serde_json::{Map, Value, json};
use tracing::info;

pub const SYSTEM_POWER: &str = "SystemPower";
pub const CLOCK: &str = "Clock";

/// A simulated power switch.
#[derive(Debug)]
pub struct SystemPower {
    on: AtomicBool,
}

impl SystemPower {
    #[must_use]
    pub const fn new(on: bool) -> Self {
        Self {
            on: AtomicBool::new(on),
        }
    }

    #[must_use]
    pub fn power_state(&self) -> &'static str {
        if self.on.load(Ordering::Acquire) {
            "On"
        } else {
            "Off"
        }
    }
}

#[async_trait]
impl Plugin for SystemPower {
    fn plugin_type(&self) -> &str {
        SYSTEM_POWER
    }

    async fn refresh_property(
        &self,
        _aggregate: &RedfishResourceAggregate,
        slot: &mut Property,
        _verb: HttpVerb,
        _params: &Map<String, Value>,
        _body: Option<&Value>,
    ) -> Result<(), PluginError> {
        slot.value = PropertyValue::Scalar(json!(self.power_state()));
        Ok(())
    }

    fn controller(&self) -> Option<&dyn PropertyController> {
        Some(self)
    }
}

#[async_trait]
impl PropertyController for SystemPower {
    async fn update_request(
        &self,
        aggregate: &RedfishResourceAggregate,
        property: &str,
        value: &Value,
        _params: &Map<String, Value>,
        principal: &Principal,
    ) -> Result<Value, PluginError> {
        let on = match value.as_str() {
            Some("On") => true,
            Some("Off") => false,
            _ => {
                return Err(PluginError::bad_request(format!(
                    "{property} must be \"On\" or \"Off\""
                )));
            }
        };
        self.on.store(on, Ordering::Release);
        info!(
            uri = aggregate.resource_uri(),
            user = %principal.user_name,
            power_state = self.power_state(),
            "Power state changed"
        );
        Ok(json!(self.power_state()))
    }
}

/// Time-derived values. The binding's `field` parameter selects
/// `"DateTime"` (the current time) or `"Uptime"` (whole seconds since
/// the clock started).
#[derive(Debug)]
pub struct Clock {
    started: DateTime<Utc>,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Utc::now(),
        }
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started)
            .num_seconds()
            .max(0)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for Clock {
    fn plugin_type(&self) -> &str {
        CLOCK
    }

    async fn refresh_property(
        &self,
        _aggregate: &RedfishResourceAggregate,
        slot: &mut Property,
        _verb: HttpVerb,
        params: &Map<String, Value>,
        _body: Option<&Value>,
    ) -> Result<(), PluginError> {
        let value = match params.get("field").and_then(Value::as_str) {
            Some("Uptime") => json!(self.uptime_seconds()),
            Some("DateTime") | None => {
                json!(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Some(other) => {
                return Err(PluginError::bad_request(format!(
                    "unknown clock field '{other}'"
                )));
            }
        };
        slot.value = PropertyValue::Scalar(value);
        Ok(())
    }
}

/// Every built-in plugin, freshly constructed.
#[must_use]
pub fn builtin() -> Vec<Arc<dyn Plugin>> {
    vec![Arc::new(SystemPower::new(true)), Arc::new(Clock::new())]
}
