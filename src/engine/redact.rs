// PII scrubbing for logged/broadcast instance data (spec.md §7,
// "User-visible behavior: PII ... is scrubbed from log output").
//
// Attribute values declared `Email`, `Password`, or `Url` never leave
// the process as plain text once an instance crosses into a
// `TriggerEvent` or a log line; everything else in the instance passes
// through unchanged.

use crate::models::schema::{AttributeType, RecordSchema};
use crate::models::Instance;

const REDACTED: &str = "[REDACTED]";

fn is_sensitive(attr_type: &AttributeType) -> bool {
    matches!(attr_type, AttributeType::Email | AttributeType::Password | AttributeType::Url)
}

/// Projects `instance` to plain JSON as `Instance::to_plain_data` does,
/// masking every attribute `schema` declares as `Email`, `Password`, or
/// `Url`.
pub fn redact(schema: &RecordSchema, instance: &Instance) -> serde_json::Value {
    let mut data = instance.to_plain_data();
    if let serde_json::Value::Object(map) = &mut data {
        for attr in &schema.attributes {
            if is_sensitive(&attr.attr_type) && map.contains_key(attr.name.as_str()) {
                map.insert(attr.name.as_str().to_string(), serde_json::Value::String(REDACTED.to_string()));
            }
        }
    }
    data
}
