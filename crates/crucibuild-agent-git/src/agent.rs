//! The git agent plugin.

use crate::resources::{self, SCHEMAS};
use crate::schema::{GitCloneCommand, GitClonedEvent};
use anyhow::Context;
use crucibuild_core::{
    AgentCore, AgentError, Codec, CommandContext, ConnectionState, JsonCodec, Manifest, Message,
    RuntimeConfig, Transport, TypeHandle,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Topic the clone handler is bound to while connected.
pub const CLONE_COMMAND_TOPIC: &str = "crucibuild/agent-git#clone-command";

/// Git actions over the bus.
pub struct AgentGit {
    core: Arc<AgentCore>,
    clone_command: TypeHandle<GitCloneCommand>,
    cloned_event: TypeHandle<GitClonedEvent>,
}

impl AgentGit {
    /// Build the agent around the bundled manifest, using the JSON codec.
    pub fn new(config: RuntimeConfig, transport: Arc<dyn Transport>) -> anyhow::Result<Self> {
        Self::with_codec(config, Arc::new(JsonCodec), transport)
    }

    pub fn with_codec(
        config: RuntimeConfig,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
    ) -> anyhow::Result<Self> {
        let manifest = Manifest::from_json(resources::open(resources::MANIFEST)?.as_bytes())
            .context("failed to parse bundled manifest")?;
        let core = Arc::new(AgentCore::new(manifest, config, codec, transport));

        register_schemas(&core)?;
        let clone_command = register_type::<GitCloneCommand>(&core)?;
        let cloned_event = register_type::<GitClonedEvent>(&core)?;

        let command = clone_command.clone();
        let reply = cloned_event.clone();
        core.register_state_observer(move |core, state| {
            if state != ConnectionState::Connected {
                return Ok(());
            }
            let reply = reply.clone();
            match core.register_command_handler(CLONE_COMMAND_TOPIC, &command, move |cmd, ctx| {
                on_git_clone_command(&reply, cmd, ctx)
            }) {
                Ok(_) => Ok(()),
                Err(AgentError::DuplicateBinding(topic)) => {
                    debug!(%topic, "clone handler still bound from a previous connection");
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        });

        Ok(Self {
            core,
            clone_command,
            cloned_event,
        })
    }

    pub fn core(&self) -> &Arc<AgentCore> {
        &self.core
    }

    pub fn clone_command_type(&self) -> &TypeHandle<GitCloneCommand> {
        &self.clone_command
    }

    pub fn cloned_event_type(&self) -> &TypeHandle<GitClonedEvent> {
        &self.cloned_event
    }
}

fn register_schemas(core: &AgentCore) -> anyhow::Result<()> {
    for path in SCHEMAS {
        let definition = resources::open(path)?;
        let descriptor = crucibuild_core::SchemaDescriptor::parse(definition)
            .with_context(|| format!("failed to load schema {path}"))?;
        core.register_schema(descriptor)
            .with_context(|| format!("failed to register schema {path}"))?;
    }
    Ok(())
}

/// Types share their name with the schema they are bound to.
fn register_type<T: Message>(core: &AgentCore) -> anyhow::Result<TypeHandle<T>> {
    core.register_type::<T>(T::TYPE_NAME)
        .with_context(|| format!("failed to register type {}", T::TYPE_NAME))
}

fn on_git_clone_command(
    reply: &TypeHandle<GitClonedEvent>,
    cmd: GitCloneCommand,
    ctx: &CommandContext,
) -> anyhow::Result<()> {
    info!(src = %cmd.src, dst = %cmd.dst, "received git-clone-command");

    let message = format!("Repository '{}' cloned into '{}'", cmd.src, cmd.dst);
    ctx.send_event(reply, &GitClonedEvent { rcode: 0, message })?;
    Ok(())
}
