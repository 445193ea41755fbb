//! Agent runtime core for the crucibuild message bus.
//!
//! This crate provides the plumbing every agent shares: schema and type
//! registries, command routing, and the connection lifecycle. Agents define
//! their own message types and handlers; this crate wires them to the bus.
//!
//! The broker transport and the payload codec are collaborators supplied by
//! the host through the [`Transport`] and [`Codec`] traits.

mod agent;
mod codec;
mod config;
mod connection;
mod context;
mod error;
mod manifest;
mod message;
mod router;
mod schema;
mod transport;
mod types;

pub use agent::{AgentCore, DispatchReport, FrameOutcome, HandlerOutcome};
pub use codec::{Codec, JsonCodec};
pub use config::RuntimeConfig;
pub use connection::{
    Admission, ConnectionEvent, ConnectionState, ConnectionStateMachine, StateObserver, Transition,
};
pub use context::CommandContext;
pub use error::{AgentError, CodecError, FieldProblem, Result, TransportError};
pub use manifest::Manifest;
pub use message::{Bytes, Field, FieldKind, Kind, Message};
pub use router::{BindingHandle, CommandRouter, Dispatch};
pub use schema::{SchemaDescriptor, SchemaHandle, SchemaParseError, SchemaRegistry};
pub use transport::{InboundFrame, Transport};
pub use types::{TypeDescriptor, TypeHandle, TypeRegistry};
