//! Error types shared across the runtime.

use crate::connection::{ConnectionEvent, ConnectionState};
use crate::message::FieldKind;
use crate::schema::SchemaParseError;
use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T, E = AgentError> = std::result::Result<T, E>;

/// Errors raised by the agent runtime.
///
/// Registration errors (`Duplicate*`, `Unknown*`, `SchemaTypeMismatch`) are
/// contract violations and should abort the plugin's initialization. Dispatch
/// errors are logged by [`AgentCore`](crate::AgentCore) and never stop it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("schema '{0}' is already registered")]
    DuplicateSchema(String),
    #[error("unknown schema '{0}'")]
    UnknownSchema(String),
    #[error("type '{type_name}' does not match schema '{schema}': {}", join(.problems))]
    SchemaTypeMismatch {
        type_name: String,
        schema: String,
        problems: Vec<FieldProblem>,
    },
    #[error("type '{0}' is already registered")]
    DuplicateType(String),
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("topic '{0}' is already bound to a handler")]
    DuplicateBinding(String),
    #[error("no handler bound to topic '{0}'")]
    UnboundTopic(String),
    #[error("failed to decode command on '{topic}': {reason}")]
    Decode { topic: String, reason: String },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    InvalidSchema(#[from] SchemaParseError),
    #[error("cannot apply '{event}' while {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: ConnectionEvent,
    },
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),
    #[error("inbound backlog is full ({0} frames pending)")]
    BacklogFull(usize),
    #[error("invalid manifest: {0}")]
    Manifest(String),
}

/// Failure reported by a [`Codec`](crate::Codec).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("codec error: {reason}")]
pub struct CodecError {
    pub reason: String,
}

impl CodecError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure reported by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// A single field that failed structural validation against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    /// The schema requires a field the type does not declare.
    Missing { field: String, expected: FieldKind },
    /// Both declare the field, with different logical kinds.
    Incompatible {
        field: String,
        expected: FieldKind,
        found: FieldKind,
    },
    /// The type may leave out a field the schema requires.
    Nullable { field: String, expected: FieldKind },
}

impl FieldProblem {
    /// Dotted path of the offending field.
    pub fn field(&self) -> &str {
        match self {
            FieldProblem::Missing { field, .. }
            | FieldProblem::Incompatible { field, .. }
            | FieldProblem::Nullable { field, .. } => field,
        }
    }
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing { field, expected } => {
                write!(f, "missing field '{field}' ({expected})")
            }
            FieldProblem::Incompatible {
                field,
                expected,
                found,
            } => write!(f, "field '{field}' is {found}, expected {expected}"),
            FieldProblem::Nullable { field, expected } => {
                write!(f, "field '{field}' is optional, expected a required {expected}")
            }
        }
    }
}

fn join(problems: &[FieldProblem]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
