//! Runtime tuning.

use serde::{Deserialize, Serialize};

/// Runtime settings for an [`AgentCore`](crate::AgentCore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Frames held back while the connection is still being established.
    pub max_pending_frames: usize,
    /// Drop command bindings when the connection settles in
    /// `Disconnected` or `Failed`.
    pub unbind_on_disconnect: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: 1024,
            unbind_on_disconnect: true,
        }
    }
}
