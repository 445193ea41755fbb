//! Agent manifest.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};

/// Manifest describing an agent, supplied by the host at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Agent name, e.g. `agent-git`.
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Additional metadata (agent-defined).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Manifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Parse a JSON manifest.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest =
            serde_json::from_slice(bytes).map_err(|e| AgentError::Manifest(e.to_string()))?;
        if manifest.name.trim().is_empty() {
            return Err(AgentError::Manifest("name cannot be empty".into()));
        }
        Ok(manifest)
    }
}
