//! Message types bound to the bundled Avro schemas.

use serde::{Deserialize, Serialize};

crucibuild_core::message! {
    #[message(name = "crucibuild/agent-git#git-clone-command")]
    /// Clone `src` into `dst`.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GitCloneCommand {
        pub src: String,
        pub dst: String,
    }
}

crucibuild_core::message! {
    #[message(name = "crucibuild/agent-git#git-cloned-event")]
    /// Reply to a [`GitCloneCommand`]. `rcode` is zero on success.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GitClonedEvent {
        pub rcode: i32,
        pub message: String,
    }
}
