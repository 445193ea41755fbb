//! Type registry: binds native message types to registered schemas.

use crate::error::{AgentError, FieldProblem, Result};
use crate::message::{Field, FieldKind, Message};
use crate::schema::SchemaRegistry;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Structural description of a registered native type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    name: String,
    fields: Vec<Field>,
    schema: String,
    native: TypeId,
}

impl TypeDescriptor {
    /// Describe the native type `T`, bound to `schema`.
    pub fn of<T: Message>(schema: impl Into<String>) -> Self {
        Self {
            name: T::TYPE_NAME.to_string(),
            fields: T::fields(),
            schema: schema.into(),
            native: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Name of the schema this type was validated against.
    pub fn schema(&self) -> &str {
        &self.schema
    }
}

/// Typed handle to a registered message type.
pub struct TypeHandle<T> {
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypeHandle<T> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for TypeHandle<T> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for TypeHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeHandle").field(&self.name).finish()
    }
}

/// Registered native types, keyed by type name.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<String, Arc<TypeDescriptor>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` against `schema_name`, checking that `T` carries every
    /// field the schema requires with a compatible kind.
    pub fn register<T: Message>(
        &mut self,
        schema_name: &str,
        schemas: &SchemaRegistry,
    ) -> Result<TypeHandle<T>> {
        let descriptor = self.register_descriptor(TypeDescriptor::of::<T>(schema_name), schemas)?;
        Ok(TypeHandle {
            name: Arc::from(descriptor.name()),
            _marker: PhantomData,
        })
    }

    fn register_descriptor(
        &mut self,
        descriptor: TypeDescriptor,
        schemas: &SchemaRegistry,
    ) -> Result<Arc<TypeDescriptor>> {
        let schema = schemas.resolve(descriptor.schema())?;

        let mut problems = Vec::new();
        check_fields("", schema.fields(), descriptor.fields(), &mut problems);
        if !problems.is_empty() {
            return Err(AgentError::SchemaTypeMismatch {
                type_name: descriptor.name().to_string(),
                schema: schema.name().to_string(),
                problems,
            });
        }

        if self.types.contains_key(descriptor.name()) {
            return Err(AgentError::DuplicateType(descriptor.name().to_string()));
        }

        let descriptor = Arc::new(descriptor);
        self.types
            .insert(descriptor.name().to_string(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<TypeDescriptor>> {
        self.types
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownType(name.to_string()))
    }

    /// Resolve a typed handle, checking it refers to the same native type.
    pub fn resolve_handle<T: Message>(&self, handle: &TypeHandle<T>) -> Result<Arc<TypeDescriptor>> {
        let descriptor = self.resolve(handle.name())?;
        if descriptor.native != TypeId::of::<T>() {
            return Err(AgentError::UnknownType(handle.name().to_string()));
        }
        Ok(descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn check_fields(path: &str, expected: &[Field], declared: &[Field], problems: &mut Vec<FieldProblem>) {
    for field in expected {
        let qualified = if path.is_empty() {
            field.name.clone()
        } else {
            format!("{path}.{}", field.name)
        };

        match declared.iter().find(|d| d.name == field.name) {
            Some(found) if found.optional && !field.optional => {
                problems.push(FieldProblem::Nullable {
                    field: qualified,
                    expected: field.kind.clone(),
                })
            }
            Some(found) => check_kind(&qualified, &field.kind, &found.kind, problems),
            None if field.optional => {}
            None => problems.push(FieldProblem::Missing {
                field: qualified,
                expected: field.kind.clone(),
            }),
        }
    }
}

fn check_kind(path: &str, expected: &FieldKind, found: &FieldKind, problems: &mut Vec<FieldProblem>) {
    match (expected, found) {
        (FieldKind::Record(expected), FieldKind::Record(found)) => {
            check_fields(path, expected, found, problems)
        }
        (FieldKind::Array(expected), FieldKind::Array(found))
        | (FieldKind::Map(expected), FieldKind::Map(found)) => {
            check_kind(path, expected, found, problems)
        }
        (expected, found) if expected == found => {}
        (expected, found) => problems.push(FieldProblem::Incompatible {
            field: path.to_string(),
            expected: expected.clone(),
            found: found.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;
    use serde::{Deserialize, Serialize};

    crate::message! {
        #[message(name = "pkg#cmd")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Cmd {
            a: String,
        }
    }

    crate::message! {
        #[message(name = "pkg#wide")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Wide {
            a: String,
            extra: u64,
        }
    }

    crate::message! {
        #[message(name = "pkg#wrong")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Wrong {
            a: i32,
        }
    }

    crate::message! {
        #[message(name = "pkg#cmd")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Impostor {
            a: String,
        }
    }

    crate::message! {
        #[message(name = "pkg#optcmd")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct OptCmd {
            a: Option<String>,
        }
    }

    crate::message! {
        #[record]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct LooseInner {
            id: Option<i64>,
        }
    }

    crate::message! {
        #[message(name = "pkg#looseouter")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct LooseOuter {
            inner: LooseInner,
        }
    }

    crate::message! {
        #[message(name = "pkg#empty")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Empty {}
    }

    crate::message! {
        #[record]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Inner {
            id: String,
        }
    }

    crate::message! {
        #[message(name = "pkg#outer")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Outer {
            inner: Inner,
        }
    }

    fn schemas() -> SchemaRegistry {
        let mut schemas = SchemaRegistry::new();
        for definition in [
            r#"{"type": "record", "namespace": "pkg", "name": "cmd",
                "fields": [{"name": "a", "type": "string"}]}"#,
            r#"{"type": "record", "namespace": "pkg", "name": "opt",
                "fields": [{"name": "a", "type": "string"},
                           {"name": "note", "type": ["null", "string"]}]}"#,
            r#"{"type": "record", "namespace": "pkg", "name": "outer",
                "fields": [{"name": "inner", "type": {"type": "record", "name": "inner",
                    "fields": [{"name": "id", "type": "long"}]}}]}"#,
        ] {
            schemas
                .register(SchemaDescriptor::parse(definition).unwrap())
                .unwrap();
        }
        schemas
    }

    #[test]
    fn compatible_types_register() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        let cmd = types.register::<Cmd>("pkg#cmd", &schemas).unwrap();
        assert_eq!(cmd.name(), "pkg#cmd");
        // fields beyond the schema are fine
        types.register::<Wide>("pkg#cmd", &schemas).unwrap();

        let descriptor = types.resolve("pkg#cmd").unwrap();
        assert_eq!(descriptor.schema(), "pkg#cmd");
        assert_eq!(descriptor.fields().len(), 1);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn optional_schema_fields_are_not_required() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();
        types.register::<Cmd>("pkg#opt", &schemas).unwrap();
    }

    #[test]
    fn optional_type_field_needs_an_optional_schema_field() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        let err = types.register::<OptCmd>("pkg#cmd", &schemas).unwrap_err();
        assert!(matches!(
            err,
            AgentError::SchemaTypeMismatch { ref problems, .. }
                if problems == &[FieldProblem::Nullable {
                    field: "a".into(),
                    expected: FieldKind::String,
                }]
        ));
        assert!(err.to_string().contains("field 'a' is optional"));
        assert!(!types.contains("pkg#optcmd"));

        let err = types
            .register::<LooseOuter>("pkg#outer", &schemas)
            .unwrap_err();
        assert!(matches!(
            err,
            AgentError::SchemaTypeMismatch { ref problems, .. }
                if problems.len() == 1 && problems[0].field() == "inner.id"
        ));

        // an optional schema field accepts either
        let opt = r#"{"type": "record", "namespace": "pkg", "name": "maybe",
            "fields": [{"name": "a", "type": ["null", "string"]}]}"#;
        let mut schemas = schemas;
        schemas
            .register(SchemaDescriptor::parse(opt).unwrap())
            .unwrap();
        types.register::<OptCmd>("pkg#maybe", &schemas).unwrap();
    }

    #[test]
    fn missing_field_is_named() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        let err = types.register::<Empty>("pkg#cmd", &schemas).unwrap_err();
        match err {
            AgentError::SchemaTypeMismatch {
                type_name,
                schema,
                problems,
            } => {
                assert_eq!(type_name, "pkg#empty");
                assert_eq!(schema, "pkg#cmd");
                assert_eq!(
                    problems,
                    [FieldProblem::Missing {
                        field: "a".into(),
                        expected: FieldKind::String
                    }]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!types.contains("pkg#empty"));
    }

    #[test]
    fn incompatible_kinds_are_rejected() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        let err = types.register::<Wrong>("pkg#cmd", &schemas).unwrap_err();
        assert!(matches!(
            err,
            AgentError::SchemaTypeMismatch { ref problems, .. }
                if problems == &[FieldProblem::Incompatible {
                    field: "a".into(),
                    expected: FieldKind::String,
                    found: FieldKind::Integer,
                }]
        ));
    }

    #[test]
    fn nested_records_are_checked_by_path() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        let err = types.register::<Outer>("pkg#outer", &schemas).unwrap_err();
        match err {
            AgentError::SchemaTypeMismatch { problems, .. } => {
                assert_eq!(problems.len(), 1);
                assert_eq!(problems[0].field(), "inner.id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_schema_and_duplicates() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();

        assert!(matches!(
            types.register::<Cmd>("pkg#missing", &schemas),
            Err(AgentError::UnknownSchema(name)) if name == "pkg#missing"
        ));

        types.register::<Cmd>("pkg#cmd", &schemas).unwrap();
        assert!(matches!(
            types.register::<Cmd>("pkg#opt", &schemas),
            Err(AgentError::DuplicateType(name)) if name == "pkg#cmd"
        ));
        // first registration untouched
        assert_eq!(types.resolve("pkg#cmd").unwrap().schema(), "pkg#cmd");
        assert!(matches!(
            types.resolve("pkg#other"),
            Err(AgentError::UnknownType(_))
        ));
    }

    #[test]
    fn handle_resolution_checks_native_type() {
        let schemas = schemas();
        let mut types = TypeRegistry::new();
        let handle = types.register::<Cmd>("pkg#cmd", &schemas).unwrap();

        assert_eq!(types.resolve_handle(&handle).unwrap().name(), "pkg#cmd");

        let mut other = TypeRegistry::new();
        assert!(matches!(
            other.resolve_handle(&handle),
            Err(AgentError::UnknownType(_))
        ));
        other.register::<Impostor>("pkg#cmd", &schemas).unwrap();
        assert!(other.contains("pkg#cmd"));
        assert!(matches!(
            other.resolve_handle(&handle),
            Err(AgentError::UnknownType(_))
        ));
    }
}
