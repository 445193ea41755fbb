//! Schema descriptors and the append-only schema registry.
//!
//! Schema definitions are Avro-style JSON records:
//!
//! ```json
//! {"type": "record", "namespace": "crucibuild/agent-git", "name": "git-clone-command",
//!  "fields": [{"name": "src", "type": "string"}, {"name": "dst", "type": "string"}]}
//! ```
//!
//! The registered name is `namespace#name` (or just `name` without a namespace).

use crate::error::{AgentError, Result};
use crate::message::{Field, FieldKind};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

/// Error parsing a schema definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaParseError {
    #[error("schema is not valid JSON: {0}")]
    Json(String),
    #[error("top-level schema must be a record")]
    NotARecord,
    #[error("schema is missing '{0}'")]
    MissingAttribute(&'static str),
    #[error("unsupported type '{ty}' for field '{field}'")]
    UnsupportedType { field: String, ty: String },
}

/// An immutable, named schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    name: String,
    definition: String,
    fields: Vec<Field>,
    fingerprint: String,
}

impl SchemaDescriptor {
    /// Build a descriptor from an already-derived field list.
    pub fn new(name: impl Into<String>, definition: impl Into<String>, fields: Vec<Field>) -> Self {
        let fingerprint = fingerprint(&fields);
        Self {
            name: name.into(),
            definition: definition.into(),
            fields,
            fingerprint,
        }
    }

    /// Parse an Avro-style record definition.
    pub fn parse(definition: &str) -> Result<Self, SchemaParseError> {
        let value: Value =
            serde_json::from_str(definition).map_err(|e| SchemaParseError::Json(e.to_string()))?;
        let record = value.as_object().ok_or(SchemaParseError::NotARecord)?;
        if record.get("type").and_then(Value::as_str) != Some("record") {
            return Err(SchemaParseError::NotARecord);
        }

        let name = record
            .get("name")
            .and_then(Value::as_str)
            .ok_or(SchemaParseError::MissingAttribute("name"))?;
        let name = match record.get("namespace").and_then(Value::as_str) {
            Some(ns) if !ns.is_empty() => format!("{ns}#{name}"),
            _ => name.to_string(),
        };

        Ok(Self::new(name, definition, parse_fields(record)?))
    }

    /// Namespaced schema name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The definition text as it was supplied.
    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Hex SHA-256 of the canonical structural form.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn fingerprint(fields: &[Field]) -> String {
    let mut canonical = String::new();
    FieldKind::Record(fields.to_vec()).write_canonical(&mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn parse_fields(record: &Map<String, Value>) -> Result<Vec<Field>, SchemaParseError> {
    let fields = record
        .get("fields")
        .and_then(Value::as_array)
        .ok_or(SchemaParseError::MissingAttribute("fields"))?;

    fields
        .iter()
        .map(|field| {
            let name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or(SchemaParseError::MissingAttribute("fields[].name"))?;
            let ty = field
                .get("type")
                .ok_or(SchemaParseError::MissingAttribute("fields[].type"))?;
            let (kind, nullable) = parse_type(name, ty)?;
            Ok(Field {
                name: name.to_string(),
                kind,
                optional: nullable || field.get("default").is_some(),
            })
        })
        .collect()
}

/// Returns the logical kind and whether the type admits `null`.
fn parse_type(field: &str, ty: &Value) -> Result<(FieldKind, bool), SchemaParseError> {
    let unsupported = |ty: &str| SchemaParseError::UnsupportedType {
        field: field.to_string(),
        ty: ty.to_string(),
    };

    match ty {
        Value::String(name) => primitive(name)
            .map(|kind| (kind, false))
            .ok_or_else(|| unsupported(name)),
        Value::Array(members) => {
            let nullable = members.iter().any(|m| m.as_str() == Some("null"));
            let mut rest = members.iter().filter(|m| m.as_str() != Some("null"));
            match (rest.next(), rest.next()) {
                (Some(member), None) => {
                    let (kind, _) = parse_type(field, member)?;
                    Ok((kind, nullable))
                }
                _ => Err(unsupported("union")),
            }
        }
        Value::Object(complex) => {
            let tag = complex
                .get("type")
                .ok_or(SchemaParseError::MissingAttribute("type"))?;
            match tag.as_str() {
                Some("record") => Ok((FieldKind::Record(parse_fields(complex)?), false)),
                Some("array") => {
                    let items = complex
                        .get("items")
                        .ok_or(SchemaParseError::MissingAttribute("items"))?;
                    let (kind, _) = parse_type(field, items)?;
                    Ok((FieldKind::Array(Box::new(kind)), false))
                }
                Some("map") => {
                    let values = complex
                        .get("values")
                        .ok_or(SchemaParseError::MissingAttribute("values"))?;
                    let (kind, _) = parse_type(field, values)?;
                    Ok((FieldKind::Map(Box::new(kind)), false))
                }
                Some("enum") => Ok((FieldKind::String, false)),
                Some("fixed") => Ok((FieldKind::Bytes, false)),
                // {"type": "string"} and friends, or a nested union
                _ => parse_type(field, tag),
            }
        }
        other => Err(unsupported(&other.to_string())),
    }
}

fn primitive(name: &str) -> Option<FieldKind> {
    match name {
        "boolean" => Some(FieldKind::Boolean),
        "int" | "long" => Some(FieldKind::Integer),
        "float" | "double" => Some(FieldKind::Float),
        "string" => Some(FieldKind::String),
        "bytes" => Some(FieldKind::Bytes),
        _ => None,
    }
}

/// Stable handle to a registered schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaHandle(Arc<SchemaDescriptor>);

impl Deref for SchemaHandle {
    type Target = SchemaDescriptor;

    fn deref(&self) -> &SchemaDescriptor {
        &self.0
    }
}

/// Named schemas, append-only for the lifetime of the agent.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaHandle>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: SchemaDescriptor) -> Result<SchemaHandle> {
        if self.schemas.contains_key(descriptor.name()) {
            return Err(AgentError::DuplicateSchema(descriptor.name().to_string()));
        }
        let handle = SchemaHandle(Arc::new(descriptor));
        self.schemas
            .insert(handle.name().to_string(), handle.clone());
        Ok(handle)
    }

    pub fn resolve(&self, name: &str) -> Result<SchemaHandle> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownSchema(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }
}
