use apache_avro::Reader;
use apache_avro::types::Value;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use pubsub_api::{Attributes, OutgoingMessage};

use super::error::CliError;

/// Which record fields become message attributes.
#[derive(Debug, Clone)]
pub struct FieldMapping {
    pub id_field: Option<String>,
    pub timestamp_field: Option<String>,
    pub id_attr: String,
    pub timestamp_attr: String,
}

/// Decode an object container file into one message per record. Each
/// payload is the record as a binary datum in the file's writer schema.
pub fn read_messages(container: &[u8], fields: &FieldMapping) -> Result<Vec<OutgoingMessage>, CliError> {
    let reader = Reader::new(container)?;
    let schema = reader.writer_schema().clone();

    let mut messages = Vec::new();
    for value in reader {
        let value = value?;
        let attributes = extract_attributes(&value, fields);
        let data = apache_avro::to_avro_datum(&schema, value)?;
        messages.push(OutgoingMessage::new(data).with_attributes(attributes));
    }
    Ok(messages)
}

fn extract_attributes(record: &Value, fields: &FieldMapping) -> Attributes {
    let mut attrs = Attributes::new();
    let Value::Record(entries) = record else {
        return attrs;
    };
    let lookup = |name: &str| entries.iter().find(|(k, _)| k == name).and_then(|(_, v)| attribute_text(v));

    if let Some(text) = fields.id_field.as_deref().and_then(lookup) {
        attrs.insert(fields.id_attr.clone(), text);
    }
    if let Some(text) = fields.timestamp_field.as_deref().and_then(lookup) {
        attrs.insert(fields.timestamp_attr.clone(), text);
    }
    attrs
}

/// Attribute text for a field value. Null yields nothing; composites are
/// rendered as JSON.
fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) | Value::Enum(_, s) => Some(s.clone()),
        Value::Union(_, inner) => attribute_text(inner),
        other => match to_json(other) {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            json => Some(json.to_string()),
        },
    }
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::json!(i),
        Value::Long(l) => serde_json::json!(l),
        Value::Float(f) => serde_json::json!(f),
        Value::Double(d) => serde_json::json!(d),
        Value::Bytes(b) | Value::Fixed(_, b) => serde_json::Value::String(STANDARD.encode(b)),
        Value::String(s) | Value::Enum(_, s) => serde_json::Value::String(s.clone()),
        Value::Union(_, inner) => to_json(inner),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => {
            serde_json::Value::Object(entries.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
        Value::Record(fields) => {
            serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
        Value::Date(d) => serde_json::json!(d),
        Value::TimeMillis(t) => serde_json::json!(t),
        Value::TimeMicros(t) => serde_json::json!(t),
        Value::TimestampMillis(t) | Value::LocalTimestampMillis(t) => serde_json::json!(t),
        Value::TimestampMicros(t) | Value::LocalTimestampMicros(t) => serde_json::json!(t),
        Value::TimestampNanos(t) | Value::LocalTimestampNanos(t) => serde_json::json!(t),
        Value::Decimal(d) => {
            let bytes: Vec<u8> = d.try_into().unwrap_or_default();
            serde_json::Value::String(STANDARD.encode(bytes))
        }
        Value::BigDecimal(d) => serde_json::Value::String(d.to_string()),
        Value::Uuid(u) => serde_json::Value::String(u.to_string()),
        Value::Duration(_) => serde_json::Value::Null,
    }
}
