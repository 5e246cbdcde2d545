//! The resource property tree.
//!
//! Every property is a slot holding a literal value and, optionally, a
//! meta descriptor that redirects reads and writes to a plugin. On the
//! wire a descriptor travels next to its property under the
//! `"<Name>@meta"` key:
//!
//! ```json
//! {
//!   "PowerState": "On",
//!   "PowerState@meta": {"GET": {"plugin": "SystemPower"}, "PATCH": {"controller": "SystemPower"}}
//! }
//! ```
//!
//! Clients never see descriptors; [`flatten`] renders only values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, Result};

pub const ODATA_ID: &str = "@odata.id";
pub const ODATA_TYPE: &str = "@odata.type";
pub const ODATA_CONTEXT: &str = "@odata.context";
pub const ODATA_ETAG: &str = "@odata.etag";
pub const META_SUFFIX: &str = "@meta";
pub const MEMBERS: &str = "Members";
pub const MEMBERS_COUNT: &str = "Members@odata.count";

/// Identity keys that only a create may set.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    matches!(name, ODATA_ID | ODATA_TYPE | ODATA_CONTEXT)
}

pub type PropertyMap = BTreeMap<String, Property>;

/// A property slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub value: PropertyValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaDescriptor>,
}

/// Literal content of a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
    Scalar(Value),
    Object(PropertyMap),
    Array(Vec<Property>),
}

impl Default for PropertyValue {
    fn default() -> Self {
        Self::Scalar(Value::Null)
    }
}

/// Plugin bindings for a property, per verb.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaDescriptor {
    #[serde(rename = "GET", default, skip_serializing_if = "Option::is_none")]
    pub get: Option<MetaBinding>,
    #[serde(rename = "PATCH", default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<MetaBinding>,
}

/// One verb's binding: which plugin or controller, plus free-form
/// parameters handed to it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaBinding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl MetaBinding {
    /// Binding to a plugin for reads.
    pub fn plugin(name: impl Into<String>) -> Self {
        Self {
            plugin: Some(name.into()),
            ..Self::default()
        }
    }

    /// Binding to a controller for writes.
    pub fn controller(name: impl Into<String>) -> Self {
        Self {
            controller: Some(name.into()),
            ..Self::default()
        }
    }

    /// Builder-style: add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl Property {
    /// A literal scalar slot.
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self {
            value: PropertyValue::Scalar(value.into()),
            meta: None,
        }
    }

    /// A slot holding `value` verbatim; `@meta` keys get no special
    /// treatment.
    #[must_use]
    pub fn literal(value: Value) -> Self {
        let value = match value {
            Value::Object(map) => PropertyValue::Object(
                map.into_iter()
                    .map(|(name, child)| (name, Self::literal(child)))
                    .collect(),
            ),
            Value::Array(items) => PropertyValue::Array(items.into_iter().map(Self::literal).collect()),
            scalar => PropertyValue::Scalar(scalar),
        };
        Self { value, meta: None }
    }

    /// Builder-style: attach a meta descriptor.
    #[must_use]
    pub fn with_meta(mut self, meta: MetaDescriptor) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Parse a JSON value, honouring `@meta` keys inside objects.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if a meta descriptor is malformed.
    pub fn from_json(value: Value) -> Result<Self> {
        Ok(Self {
            value: PropertyValue::from_json(value)?,
            meta: None,
        })
    }

    /// Render the literal content as plain JSON.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match &self.value {
            PropertyValue::Scalar(value) => value.clone(),
            PropertyValue::Object(children) => Value::Object(flatten(children)),
            PropertyValue::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// The value as a string, if it is a string scalar.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            PropertyValue::Scalar(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Child slots, if the value is an object.
    #[must_use]
    pub const fn children(&self) -> Option<&PropertyMap> {
        match &self.value {
            PropertyValue::Object(children) => Some(children),
            _ => None,
        }
    }

    /// Whether reads or writes of this slot go through a plugin.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.meta.is_some()
    }
}

impl PropertyValue {
    /// Parse a JSON value into a slot value.
    ///
    /// # Errors
    ///
    /// Returns `Parse` if a nested meta descriptor is malformed.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => parse_object(map).map(Self::Object),
            Value::Array(items) => items
                .into_iter()
                .map(Property::from_json)
                .collect::<Result<Vec<_>>>()
                .map(Self::Array),
            scalar => Ok(Self::Scalar(scalar)),
        }
    }
}

/// A partial property as submitted by a caller: a new value, a new
/// descriptor, both, or (for descriptors) an explicit clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyInput {
    pub value: Option<PropertyValue>,
    pub meta: Option<Option<MetaDescriptor>>,
}

impl PropertyInput {
    /// Build a fresh slot; absent parts take their defaults.
    #[must_use]
    pub fn into_property(self) -> Property {
        Property {
            value: self.value.unwrap_or_default(),
            meta: self.meta.flatten(),
        }
    }

    /// Overlay this input on an existing slot.
    #[must_use]
    pub fn merged_with(self, existing: Option<&Property>) -> Property {
        let mut merged = existing.cloned().unwrap_or_default();
        if let Some(value) = self.value {
            merged.value = value;
        }
        if let Some(meta) = self.meta {
            merged.meta = meta;
        }
        merged
    }
}

/// Split a JSON object into per-property inputs, pairing every
/// `"<Name>@meta"` key with `<Name>`.
///
/// # Errors
///
/// Returns `Parse` if a meta descriptor is malformed.
pub fn parse_inputs(map: Map<String, Value>) -> Result<BTreeMap<String, PropertyInput>> {
    let mut inputs: BTreeMap<String, PropertyInput> = BTreeMap::new();

    for (key, value) in map {
        if let Some(name) = key.strip_suffix(META_SUFFIX) {
            let meta = if value.is_null() {
                None
            } else {
                Some(serde_json::from_value::<MetaDescriptor>(value).map_err(|e| {
                    DomainError::parse(format!("invalid meta descriptor for '{name}': {e}"))
                })?)
            };
            inputs.entry(name.to_string()).or_default().meta = Some(meta);
        } else {
            let parsed = PropertyValue::from_json(value)?;
            inputs.entry(key).or_default().value = Some(parsed);
        }
    }

    Ok(inputs)
}

/// Parse a JSON object into a property map.
///
/// # Errors
///
/// Returns `Parse` if a meta descriptor is malformed.
pub fn parse_object(map: Map<String, Value>) -> Result<PropertyMap> {
    Ok(parse_inputs(map)?
        .into_iter()
        .map(|(name, input)| (name, input.into_property()))
        .collect())
}

/// Render a property map as plain JSON, dropping descriptors.
#[must_use]
pub fn flatten(map: &PropertyMap) -> Map<String, Value> {
    map.iter()
        .map(|(name, property)| (name.clone(), property.to_json()))
        .collect()
}
