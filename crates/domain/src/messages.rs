//! Redfish message and error envelopes.

use serde_json::{Value, json};

use crate::meta::PropertyFailure;

/// Registry prefix of every message id produced here.
pub const BASE_REGISTRY: &str = "Base.1.0";

pub const EXTENDED_INFO: &str = "@Message.ExtendedInfo";

/// A single `#Message` entry.
#[must_use]
pub fn message(message_id: &str, text: &str, related_property: Option<&str>) -> Value {
    let mut entry = json!({
        "@odata.type": "#Message.v1_0_0.Message",
        "MessageId": format!("{BASE_REGISTRY}.{message_id}"),
        "Message": text,
        "Severity": "Warning",
    });
    if let (Some(property), Some(map)) = (related_property, entry.as_object_mut()) {
        map.insert("RelatedProperties".into(), json!([format!("#/{property}")]));
    }
    entry
}

/// The message describing one rejected property.
#[must_use]
pub fn property_failure(failure: &PropertyFailure) -> Value {
    message(failure.message_id, &failure.message, Some(&failure.property))
}

/// The standard error body.
#[must_use]
pub fn error_body(message_id: &str, text: &str, extended: Vec<Value>) -> Value {
    let extended = if extended.is_empty() {
        vec![message(message_id, text, None)]
    } else {
        extended
    };
    json!({
        "error": {
            "code": format!("{BASE_REGISTRY}.{message_id}"),
            "message": text,
            EXTENDED_INFO: extended,
        }
    })
}

#[cfg(test)]
#[allow(clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn should_wrap_message_in_error_envelope() {
        let body = error_body("ResourceMissingAtURI", "not here", Vec::new());

        assert_eq!(body["error"]["code"], "Base.1.0.ResourceMissingAtURI");
        assert_eq!(body["error"][EXTENDED_INFO][0]["Message"], "not here");
    }

    #[test]
    fn should_point_at_related_property() {
        let entry = message("PropertyUnknown", "no", Some("Status/Health"));

        assert_eq!(entry["RelatedProperties"][0], "#/Status/Health");
    }
}
