//! Command routing: one handler per topic.

use crate::codec::Codec;
use crate::context::CommandContext;
use crate::error::{AgentError, Result};
use crate::message::Message;
use crate::schema::SchemaRegistry;
use crate::types::{TypeHandle, TypeRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

type Invocation = Box<dyn FnOnce(&CommandContext) -> anyhow::Result<()> + Send>;

/// Type-erased handler: turns a decoded value into a ready-to-run call.
trait ErasedHandler: Send + Sync {
    fn prepare(&self, value: Value) -> serde_json::Result<Invocation>;
}

struct TypedHandler<C, F> {
    handler: Arc<F>,
    _marker: PhantomData<fn(C)>,
}

impl<C, F> ErasedHandler for TypedHandler<C, F>
where
    C: Message,
    F: Fn(C, &CommandContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn prepare(&self, value: Value) -> serde_json::Result<Invocation> {
        let command: C = serde_json::from_value(value)?;
        let handler = Arc::clone(&self.handler);
        Ok(Box::new(move |ctx: &CommandContext| handler(command, ctx)))
    }
}

struct CommandBinding {
    type_name: String,
    handler: Arc<dyn ErasedHandler>,
}

/// Handle returned when a topic is bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingHandle {
    topic: String,
}

impl BindingHandle {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// A decoded command, ready to be handed to its handler.
///
/// Produced while the registries are locked; invoking it needs no lock.
pub struct Dispatch {
    topic: String,
    type_name: String,
    invocation: Invocation,
}

impl Dispatch {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Type name of the decoded command.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn invoke(self, ctx: &CommandContext) -> anyhow::Result<()> {
        (self.invocation)(ctx)
    }
}

/// Maps command topics to handlers.
#[derive(Default)]
pub struct CommandRouter {
    bindings: HashMap<String, CommandBinding>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind<C, F>(
        &mut self,
        topic: impl Into<String>,
        ty: &TypeHandle<C>,
        handler: F,
        types: &TypeRegistry,
    ) -> Result<BindingHandle>
    where
        C: Message,
        F: Fn(C, &CommandContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let topic = topic.into();
        if self.bindings.contains_key(&topic) {
            return Err(AgentError::DuplicateBinding(topic));
        }
        let descriptor = types.resolve_handle(ty)?;

        self.bindings.insert(
            topic.clone(),
            CommandBinding {
                type_name: descriptor.name().to_string(),
                handler: Arc::new(TypedHandler {
                    handler: Arc::new(handler),
                    _marker: PhantomData,
                }),
            },
        );
        Ok(BindingHandle { topic })
    }

    /// Remove the binding for `topic`. Returns whether one existed.
    pub fn unbind(&mut self, topic: &str) -> bool {
        self.bindings.remove(topic).is_some()
    }

    /// Remove every binding, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.bindings.len();
        self.bindings.clear();
        count
    }

    pub fn is_bound(&self, topic: &str) -> bool {
        self.bindings.contains_key(topic)
    }

    /// Bound topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.bindings.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Look up the binding for `topic` and decode `payload` for it.
    pub fn dispatch(
        &self,
        topic: &str,
        payload: &[u8],
        types: &TypeRegistry,
        schemas: &SchemaRegistry,
        codec: &dyn Codec,
    ) -> Result<Dispatch> {
        let binding = self
            .bindings
            .get(topic)
            .ok_or_else(|| AgentError::UnboundTopic(topic.to_string()))?;
        let descriptor = types.resolve(&binding.type_name)?;
        let schema = schemas.resolve(descriptor.schema())?;

        let decode_error = |reason: String| AgentError::Decode {
            topic: topic.to_string(),
            reason,
        };
        let value = codec
            .decode(&schema, payload)
            .map_err(|e| decode_error(e.reason))?;
        let invocation = binding
            .handler
            .prepare(value)
            .map_err(|e| decode_error(e.to_string()))?;

        Ok(Dispatch {
            topic: topic.to_string(),
            type_name: binding.type_name.clone(),
            invocation,
        })
    }
}
