//! Git agent for the crucibuild message bus.
//!
//! The agent answers `git-clone-command`s with a `git-cloned-event`. It is
//! a thin plugin over [`crucibuild_core::AgentCore`]: it registers its
//! bundled schemas and types, then binds its command handler every time the
//! bus connection comes up.

pub mod agent;
pub mod config;
pub mod resources;
pub mod schema;
pub mod stdio;

pub use agent::{AgentGit, CLONE_COMMAND_TOPIC};
pub use config::AgentConfig;
pub use resources::ResourceError;
pub use schema::{GitCloneCommand, GitClonedEvent};
pub use stdio::StdioTransport;
