//! Structural description of native message types.
//!
//! A [`Message`] is a Rust struct bound to a schema. Its shape is declared
//! once through the [`message!`](crate::message) macro, which emits the struct
//! and its field list side by side so the two cannot drift apart.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Logical kind of a field, as far as schema compatibility is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Boolean,
    Integer,
    Float,
    String,
    Bytes,
    Record(Vec<Field>),
    Array(Box<FieldKind>),
    Map(Box<FieldKind>),
}

impl FieldKind {
    /// Append the canonical structural form of this kind to `out`.
    pub(crate) fn write_canonical(&self, out: &mut String) {
        match self {
            FieldKind::Record(fields) => {
                out.push('{');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    field.write_canonical(out);
                }
                out.push('}');
            }
            FieldKind::Array(items) => {
                out.push('[');
                items.write_canonical(out);
                out.push(']');
            }
            FieldKind::Map(values) => {
                out.push_str("map<");
                values.write_canonical(out);
                out.push('>');
            }
            other => out.push_str(&other.to_string()),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Boolean => f.write_str("boolean"),
            FieldKind::Integer => f.write_str("integer"),
            FieldKind::Float => f.write_str("float"),
            FieldKind::String => f.write_str("string"),
            FieldKind::Bytes => f.write_str("bytes"),
            FieldKind::Record(_) => f.write_str("record"),
            FieldKind::Array(items) => write!(f, "array<{items}>"),
            FieldKind::Map(values) => write!(f, "map<{values}>"),
        }
    }
}

/// A named field of a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: String,
    pub kind: FieldKind,
    /// Optional fields may be absent (or null) on the wire.
    pub optional: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
        }
    }

    /// Describe a field whose Rust type is `T`.
    pub fn of<T: Kind>(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: T::kind(),
            optional: T::optional(),
        }
    }

    fn write_canonical(&self, out: &mut String) {
        out.push_str(&self.name);
        out.push(':');
        self.kind.write_canonical(out);
        if self.optional {
            out.push('?');
        }
    }
}

/// Static mapping from a Rust type to its logical [`FieldKind`].
pub trait Kind {
    fn kind() -> FieldKind;

    fn optional() -> bool {
        false
    }
}

macro_rules! impl_kind {
    ($kind:ident => $($ty:ty),+) => {
        $(impl Kind for $ty {
            fn kind() -> FieldKind {
                FieldKind::$kind
            }
        })+
    };
}

impl_kind!(Boolean => bool);
impl_kind!(Integer => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
impl_kind!(Float => f32, f64);
impl_kind!(String => String, char);

impl<T: Kind> Kind for Option<T> {
    fn kind() -> FieldKind {
        T::kind()
    }

    fn optional() -> bool {
        true
    }
}

impl<T: Kind> Kind for Vec<T> {
    fn kind() -> FieldKind {
        FieldKind::Array(Box::new(T::kind()))
    }
}

impl<T: Kind> Kind for HashMap<String, T> {
    fn kind() -> FieldKind {
        FieldKind::Map(Box::new(T::kind()))
    }
}

impl<T: Kind> Kind for BTreeMap<String, T> {
    fn kind() -> FieldKind {
        FieldKind::Map(Box::new(T::kind()))
    }
}

/// Raw bytes field. `Vec<u8>` maps to an array of integers; wrap it in
/// `Bytes` to bind against a `bytes` schema field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bytes(pub Vec<u8>);

impl Kind for Bytes {
    fn kind() -> FieldKind {
        FieldKind::Bytes
    }
}

/// A native structure bound to a named schema.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Namespaced type name, e.g. `crucibuild/agent-git#git-clone-command`.
    const TYPE_NAME: &'static str;

    /// Ordered field list, matching the serde field names.
    fn fields() -> Vec<Field>;
}

/// Declare a message (or nested record) struct together with its field list.
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// crucibuild_core::message! {
///     #[message(name = "pkg#cmd")]
///     #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
///     pub struct Cmd {
///         pub a: String,
///     }
/// }
///
/// use crucibuild_core::Message;
/// assert_eq!(Cmd::TYPE_NAME, "pkg#cmd");
/// assert_eq!(Cmd::fields().len(), 1);
/// ```
///
/// Records that are only ever nested inside other messages use
/// `#[record]` instead of `#[message(name = ..)]`. Field-level serde renames
/// are not reflected in the field list, so keep Rust and schema names equal.
#[macro_export]
macro_rules! message {
    (
        #[message(name = $name:literal)]
        $(#[$meta:meta])*
        $vis:vis struct $ty:ident {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $ty {
            $($(#[$fmeta])* $fvis $field: $fty),*
        }

        impl $crate::Message for $ty {
            const TYPE_NAME: &'static str = $name;

            fn fields() -> ::std::vec::Vec<$crate::Field> {
                ::std::vec![$($crate::Field::of::<$fty>(::std::stringify!($field))),*]
            }
        }

        impl $crate::Kind for $ty {
            fn kind() -> $crate::FieldKind {
                $crate::FieldKind::Record(<$ty as $crate::Message>::fields())
            }
        }
    };
    (
        #[record]
        $(#[$meta:meta])*
        $vis:vis struct $ty:ident {
            $($(#[$fmeta:meta])* $fvis:vis $field:ident : $fty:ty),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $ty {
            $($(#[$fmeta])* $fvis $field: $fty),*
        }

        impl $crate::Kind for $ty {
            fn kind() -> $crate::FieldKind {
                $crate::FieldKind::Record(::std::vec![
                    $($crate::Field::of::<$fty>(::std::stringify!($field))),*
                ])
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::message! {
        #[record]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Origin {
            host: String,
            port: u16,
        }
    }

    crate::message! {
        #[message(name = "test#fetch")]
        #[derive(Debug, Clone, Serialize, Deserialize)]
        struct Fetch {
            url: String,
            depth: Option<u32>,
            tags: Vec<String>,
            origin: Origin,
            blob: Bytes,
        }
    }

    #[test]
    fn macro_derives_ordered_fields() {
        let fields = Fetch::fields();
        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["url", "depth", "tags", "origin", "blob"]);

        assert_eq!(fields[0], Field::required("url", FieldKind::String));
        assert_eq!(fields[1], Field::optional("depth", FieldKind::Integer));
        assert_eq!(
            fields[2].kind,
            FieldKind::Array(Box::new(FieldKind::String))
        );
        assert_eq!(
            fields[3].kind,
            FieldKind::Record(vec![
                Field::required("host", FieldKind::String),
                Field::required("port", FieldKind::Integer),
            ])
        );
        assert_eq!(fields[4].kind, FieldKind::Bytes);
    }

    #[test]
    fn canonical_form_marks_optional_and_nesting() {
        let mut out = String::new();
        FieldKind::Record(Fetch::fields()).write_canonical(&mut out);
        assert_eq!(
            out,
            "{url:string,depth:integer?,tags:[string],origin:{host:string,port:integer},blob:bytes}"
        );
    }
}
