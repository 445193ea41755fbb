//! The agent core: composition root for registries, routing and lifecycle.

use crate::codec::Codec;
use crate::config::RuntimeConfig;
use crate::connection::{Admission, ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::context::CommandContext;
use crate::error::{AgentError, CodecError, Result};
use crate::manifest::Manifest;
use crate::message::Message;
use crate::router::{BindingHandle, CommandRouter};
use crate::schema::{SchemaDescriptor, SchemaHandle, SchemaRegistry};
use crate::transport::{InboundFrame, Transport};
use crate::types::{TypeHandle, TypeRegistry};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) schemas: SchemaRegistry,
    pub(crate) types: TypeRegistry,
    pub(crate) router: CommandRouter,
}

/// State reachable from both the core and the command contexts it hands out.
pub(crate) struct Shared {
    registries: RwLock<Registries>,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
}

impl Shared {
    pub(crate) fn new(codec: Arc<dyn Codec>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registries: RwLock::new(Registries::default()),
            codec,
            transport,
        }
    }

    /// Encode `value` as `E` and send it on the topic named after the type.
    pub(crate) fn send<E: Message>(&self, ty: &TypeHandle<E>, value: &E) -> Result<()> {
        let (topic, payload) = {
            let registries = self.registries.read();
            let descriptor = registries.types.resolve_handle(ty)?;
            let schema = registries.schemas.resolve(descriptor.schema())?;
            let value =
                serde_json::to_value(value).map_err(|e| CodecError::new(e.to_string()))?;
            let payload = self.codec.encode(&schema, &value)?;
            (descriptor.name().to_string(), payload)
        };
        self.transport.send(&topic, payload)?;
        Ok(())
    }
}

/// How the handler of a dispatched command finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Completed,
    /// The handler returned an error; it was logged and went no further.
    Failed(String),
}

/// Summary of one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub topic: String,
    pub correlation_id: u64,
    pub events_sent: usize,
    pub outcome: HandlerOutcome,
}

/// What became of an inbound frame.
#[derive(Debug)]
pub enum FrameOutcome {
    Handled(DispatchReport),
    /// Held until connection setup completes.
    Deferred,
    /// Dropped and logged.
    Dropped(AgentError),
}

/// The agent runtime.
///
/// Plugins register schemas, types, state observers and command handlers;
/// the transport feeds connection signals and inbound frames. All registry
/// mutations share one write lock, dispatch and encode take read locks, and
/// no lock is held while a handler runs.
pub struct AgentCore {
    manifest: Manifest,
    config: RuntimeConfig,
    shared: Arc<Shared>,
    machine: ConnectionStateMachine<AgentCore>,
    correlation: AtomicU64,
}

impl AgentCore {
    pub fn new(
        manifest: Manifest,
        config: RuntimeConfig,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let machine = ConnectionStateMachine::new(config.max_pending_frames);
        machine.register_observer(AgentCore::release_bindings);

        Self {
            manifest,
            config,
            shared: Arc::new(Shared::new(codec, transport)),
            machine,
            correlation: AtomicU64::new(0),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn register_schema(&self, descriptor: SchemaDescriptor) -> Result<SchemaHandle> {
        let handle = self.shared.registries.write().schemas.register(descriptor)?;
        info!(schema = handle.name(), fingerprint = handle.fingerprint(), "schema registered");
        Ok(handle)
    }

    /// Parse a schema definition and register it.
    pub fn register_schema_definition(&self, definition: &str) -> Result<SchemaHandle> {
        self.register_schema(SchemaDescriptor::parse(definition)?)
    }

    pub fn register_type<T: Message>(&self, schema_name: &str) -> Result<TypeHandle<T>> {
        let mut guard = self.shared.registries.write();
        let registries = &mut *guard;
        let handle = registries.types.register::<T>(schema_name, &registries.schemas)?;
        info!(type_name = handle.name(), schema = schema_name, "type registered");
        Ok(handle)
    }

    /// Observers are called with this core and the new state, in
    /// registration order, on every transition.
    pub fn register_state_observer<F>(&self, observer: F)
    where
        F: Fn(&AgentCore, ConnectionState) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.machine.register_observer(observer);
    }

    pub fn register_command_handler<C, F>(
        &self,
        topic: impl Into<String>,
        ty: &TypeHandle<C>,
        handler: F,
    ) -> Result<BindingHandle>
    where
        C: Message,
        F: Fn(C, &CommandContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut guard = self.shared.registries.write();
        let registries = &mut *guard;
        let binding = registries.router.bind(topic, ty, handler, &registries.types)?;
        info!(topic = binding.topic(), command = ty.name(), "command handler registered");
        Ok(binding)
    }

    /// Returns whether `topic` was bound.
    pub fn unregister_command_handler(&self, topic: &str) -> bool {
        let removed = self.shared.registries.write().router.unbind(topic);
        if removed {
            info!(topic, "command handler unregistered");
        }
        removed
    }

    pub fn bound_topics(&self) -> Vec<String> {
        self.shared.registries.read().router.topics()
    }

    /// Answer a command with `event`.
    pub fn send_event<E: Message>(
        &self,
        ctx: &CommandContext,
        ty: &TypeHandle<E>,
        event: &E,
    ) -> Result<()> {
        ctx.send_event(ty, event)
    }

    /// Send an event that does not answer any command.
    pub fn emit<E: Message>(&self, ty: &TypeHandle<E>, event: &E) -> Result<()> {
        self.shared.send(ty, event)
    }

    /// Start connecting. A transport failure drives the state to `Failed`.
    pub fn open(&self) -> Result<ConnectionState> {
        self.on_connection_event(ConnectionEvent::Open)?;
        if let Err(err) = self.shared.transport.open(&self.manifest) {
            error!(agent = %self.manifest.name, "failed to open transport: {err}");
            self.on_connection_event(ConnectionEvent::TransportError(err.to_string()))?;
            return Err(err.into());
        }
        Ok(self.state())
    }

    /// Start an orderly disconnect.
    pub fn close(&self) -> Result<ConnectionState> {
        self.on_connection_event(ConnectionEvent::Close)?;
        if let Err(err) = self.shared.transport.close() {
            error!(agent = %self.manifest.name, "failed to close transport: {err}");
            self.on_connection_event(ConnectionEvent::TransportError(err.to_string()))?;
            return Err(err.into());
        }
        Ok(self.state())
    }

    /// Feed a lifecycle signal from the transport.
    ///
    /// Frames held back while connecting are dispatched, in arrival order,
    /// once the `Connected` observers have all returned. Live delivery
    /// resumes after the last of them.
    pub fn on_connection_event(&self, event: ConnectionEvent) -> Result<ConnectionState> {
        let transition = self.machine.apply(self, event)?;
        let mut released = 0;
        while let Some(frame) = self.machine.release_next(&transition) {
            released += 1;
            // failures are already logged by dispatch
            let _ = self.deliver(frame);
        }
        if released > 0 {
            debug!(frames = released, "delivered frames held during connection setup");
        }
        Ok(transition.to)
    }

    /// Feed an inbound frame from the transport.
    ///
    /// Unbound topics and frames outside a live connection are dropped.
    /// Decode errors are returned; handler failures are part of the report.
    pub fn on_inbound_frame(&self, topic: &str, payload: Vec<u8>) -> Result<FrameOutcome> {
        match self.machine.admit(InboundFrame::new(topic, payload)) {
            Admission::Deliver(frame) => self.deliver(frame),
            Admission::Deferred => {
                debug!(topic, "frame held until connection setup completes");
                Ok(FrameOutcome::Deferred)
            }
            Admission::Rejected(err) => {
                warn!(topic, "dropping inbound frame: {err}");
                Ok(FrameOutcome::Dropped(err))
            }
        }
    }

    fn deliver(&self, frame: InboundFrame) -> Result<FrameOutcome> {
        match self.dispatch(&frame.topic, &frame.payload) {
            Ok(report) => Ok(FrameOutcome::Handled(report)),
            Err(err @ AgentError::UnboundTopic(_)) => Ok(FrameOutcome::Dropped(err)),
            Err(err) => Err(err),
        }
    }

    /// Decode `payload` for the handler bound to `topic` and run it.
    ///
    /// Does not consult the connection state. The registry read lock covers
    /// lookup and decode only.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Result<DispatchReport> {
        let correlation_id = self.correlation.fetch_add(1, Ordering::Relaxed) + 1;

        let routed = {
            let registries = self.shared.registries.read();
            registries.router.dispatch(
                topic,
                payload,
                &registries.types,
                &registries.schemas,
                self.shared.codec.as_ref(),
            )
        };
        let dispatch = match routed {
            Ok(dispatch) => dispatch,
            Err(err) => {
                match &err {
                    AgentError::UnboundTopic(_) => warn!(topic, "no handler bound, dropping command"),
                    _ => error!(topic, correlation_id, "failed to route command: {err}"),
                }
                return Err(err);
            }
        };

        debug!(topic, correlation_id, command = dispatch.type_name(), "dispatching command");
        let ctx = CommandContext::new(topic, correlation_id, Arc::clone(&self.shared));
        let outcome = match dispatch.invoke(&ctx) {
            Ok(()) => HandlerOutcome::Completed,
            Err(err) => {
                let reason = format!("{err:#}");
                error!(topic, correlation_id, "command handler failed: {reason}");
                HandlerOutcome::Failed(reason)
            }
        };

        Ok(DispatchReport {
            topic: topic.to_string(),
            correlation_id,
            events_sent: ctx.events_sent(),
            outcome,
        })
    }

    /// Frames held back while the connection is being set up.
    pub fn pending_frames(&self) -> usize {
        self.machine.pending()
    }

    fn release_bindings(&self, state: ConnectionState) -> anyhow::Result<()> {
        if self.config.unbind_on_disconnect
            && matches!(state, ConnectionState::Disconnected | ConnectionState::Failed)
        {
            let released = self.shared.registries.write().router.clear();
            if released > 0 {
                info!(released, %state, "command bindings released");
            }
        }
        Ok(())
    }
}
