//! Files bundled into the agent at compile time.

use thiserror::Error;

pub const MANIFEST: &str = "/resources/manifest.json";
pub const CLONE_COMMAND_SCHEMA: &str = "/schema/git-clone-command.avro";
pub const CLONED_EVENT_SCHEMA: &str = "/schema/git-cloned-event.avro";

/// Schema files, in registration order.
pub const SCHEMAS: [&str; 2] = [CLONE_COMMAND_SCHEMA, CLONED_EVENT_SCHEMA];

const BUNDLE: &[(&str, &str)] = &[
    (MANIFEST, include_str!("../resources/manifest.json")),
    (
        CLONE_COMMAND_SCHEMA,
        include_str!("../schema/git-clone-command.avro"),
    ),
    (
        CLONED_EVENT_SCHEMA,
        include_str!("../schema/git-cloned-event.avro"),
    ),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("no bundled resource at {0}")]
    NotFound(String),
}

/// Contents of the bundled file at `path`.
pub fn open(path: &str) -> Result<&'static str, ResourceError> {
    BUNDLE
        .iter()
        .find(|(name, _)| *name == path)
        .map(|(_, content)| *content)
        .ok_or_else(|| ResourceError::NotFound(path.to_string()))
}

/// Paths of every bundled file.
pub fn paths() -> impl Iterator<Item = &'static str> {
    BUNDLE.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucibuild_core::{Manifest, SchemaDescriptor};

    #[test]
    fn bundled_files_parse() {
        let manifest = Manifest::from_json(open(MANIFEST).unwrap().as_bytes()).unwrap();
        assert_eq!(manifest.name, "agent-git");

        let names: Vec<_> = SCHEMAS
            .iter()
            .map(|path| {
                SchemaDescriptor::parse(open(path).unwrap())
                    .unwrap()
                    .name()
                    .to_string()
            })
            .collect();
        assert_eq!(
            names,
            [
                "crucibuild/agent-git#git-clone-command",
                "crucibuild/agent-git#git-cloned-event"
            ]
        );
    }

    #[test]
    fn unknown_path() {
        assert_eq!(
            open("/schema/nope.avro"),
            Err(ResourceError::NotFound("/schema/nope.avro".into()))
        );
        assert_eq!(paths().count(), 3);
    }
}
