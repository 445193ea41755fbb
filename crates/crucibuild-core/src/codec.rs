//! Payload codec boundary.

use crate::error::CodecError;
use crate::message::{Field, FieldKind};
use crate::schema::SchemaDescriptor;
use serde_json::Value;

/// Encodes and decodes payloads according to a schema.
///
/// Values cross the boundary as `serde_json::Value`; the runtime converts
/// them to and from native message types with serde.
pub trait Codec: Send + Sync {
    fn encode(&self, schema: &SchemaDescriptor, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, schema: &SchemaDescriptor, payload: &[u8]) -> Result<Value, CodecError>;
}

/// JSON codec that validates payloads against the schema's fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, schema: &SchemaDescriptor, value: &Value) -> Result<Vec<u8>, CodecError> {
        validate_record("", schema.fields(), value)?;
        serde_json::to_vec(value).map_err(|e| CodecError::new(e.to_string()))
    }

    fn decode(&self, schema: &SchemaDescriptor, payload: &[u8]) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| CodecError::new(format!("malformed payload: {e}")))?;
        validate_record("", schema.fields(), &value)?;
        Ok(value)
    }
}

fn validate_record(path: &str, fields: &[Field], value: &Value) -> Result<(), CodecError> {
    let object = value
        .as_object()
        .ok_or_else(|| CodecError::new(format!("expected a record at '{}'", display(path))))?;

    for field in fields {
        let path = join(path, &field.name);
        match object.get(&field.name) {
            None | Some(Value::Null) if field.optional => {}
            None | Some(Value::Null) => {
                return Err(CodecError::new(format!("missing field '{path}'")));
            }
            Some(value) => validate_kind(&path, &field.kind, value)?,
        }
    }
    Ok(())
}

fn validate_kind(path: &str, kind: &FieldKind, value: &Value) -> Result<(), CodecError> {
    let ok = match kind {
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Integer => value.is_i64() || value.is_u64(),
        FieldKind::Float => value.is_number(),
        FieldKind::String => value.is_string(),
        FieldKind::Bytes => value
            .as_array()
            .is_some_and(|items| items.iter().all(|b| b.as_u64().is_some_and(|b| b <= 255))),
        FieldKind::Record(fields) => return validate_record(path, fields, value),
        FieldKind::Array(items) => match value.as_array() {
            Some(values) => {
                for (i, item) in values.iter().enumerate() {
                    validate_kind(&format!("{path}[{i}]"), items, item)?;
                }
                true
            }
            None => false,
        },
        FieldKind::Map(values) => match value.as_object() {
            Some(entries) => {
                for (key, item) in entries {
                    validate_kind(&join(path, key), values, item)?;
                }
                true
            }
            None => false,
        },
    };

    if ok {
        Ok(())
    } else {
        Err(CodecError::new(format!("field '{path}' is not a valid {kind}")))
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

fn display(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}
