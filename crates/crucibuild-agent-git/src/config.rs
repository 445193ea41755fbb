//! Agent configuration file.

use anyhow::Context;
use crucibuild_core::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of the optional TOML configuration file.
///
/// ```toml
/// [runtime]
/// max_pending_frames = 256
/// unbind_on_disconnect = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub runtime: RuntimeConfig,
}

impl AgentConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        anyhow::ensure!(
            config.runtime.max_pending_frames > 0,
            "runtime.max_pending_frames must be at least 1"
        );
        Ok(config)
    }

    /// Load `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = AgentConfig::from_toml("[runtime]\nmax_pending_frames = 8\n").unwrap();
        assert_eq!(config.runtime.max_pending_frames, 8);
        assert!(config.runtime.unbind_on_disconnect);

        assert_eq!(AgentConfig::from_toml("").unwrap(), AgentConfig::default());
    }

    #[test]
    fn rejects_empty_backlog() {
        let err = AgentConfig::from_toml("[runtime]\nmax_pending_frames = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_pending_frames"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = AgentConfig::load(Some(Path::new("/nonexistent/agent-git.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/agent-git.toml"));
        assert_eq!(AgentConfig::load(None).unwrap(), AgentConfig::default());
    }
}
