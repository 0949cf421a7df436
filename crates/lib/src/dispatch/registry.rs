//! Command registry: the immutable ID -> command lookup table.

use std::collections::{BTreeSet, HashMap};

use crate::executor::{Command, CommandError};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("command with ID {0} not found")]
    NotFound(String),
    #[error("command id must not be empty")]
    EmptyId,
    #[error("command id must be a string, got {0}")]
    NonStringId(String),
    #[error("duplicate command id {0:?}")]
    DuplicateId(String),
    #[error("command {id}: {source}")]
    Command {
        id: String,
        #[source]
        source: CommandError,
    },
}

/// Registered commands, keyed by ID. Read-only after construction and safe to
/// share across tasks.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    cmds: HashMap<String, Command>,
}

impl CommandRegistry {
    /// Checked constructor. Each command's `id` is overwritten with its key.
    pub fn new<I, S>(entries: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = (S, Command)>,
        S: Into<String>,
    {
        let mut cmds = HashMap::new();
        for (id, mut cmd) in entries {
            let id = id.into();
            if id.is_empty() {
                return Err(RegistryError::EmptyId);
            }
            if cmds.contains_key(&id) {
                return Err(RegistryError::DuplicateId(id));
            }
            if let Err(source) = cmd.validate() {
                return Err(RegistryError::Command { id, source });
            }
            if cmd.timeout.is_zero() {
                log::warn!(
                    "command {} has no timeout; it may run indefinitely and block the dispatcher",
                    id
                );
            }
            cmd.id = id.clone();
            cmds.insert(id, cmd);
        }
        Ok(Self { cmds })
    }

    /// Build from the `commands` mapping of the config file.
    pub fn from_yaml(raw: serde_yaml::Mapping) -> Result<Self, RegistryError> {
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            let id = match key {
                serde_yaml::Value::String(s) => s,
                other => return Err(RegistryError::NonStringId(yaml_kind(&other).to_string())),
            };
            if id.is_empty() {
                return Err(RegistryError::EmptyId);
            }
            let cmd = Command::from_yaml(value).map_err(|source| RegistryError::Command {
                id: id.clone(),
                source,
            })?;
            entries.push((id, cmd));
        }
        Self::new(entries)
    }

    pub fn get(&self, id: &str) -> Result<&Command, RegistryError> {
        self.cmds
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Distinct executor names used by registered commands, sorted.
    pub fn executor_names(&self) -> BTreeSet<String> {
        self.cmds.values().map(|c| c.executor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    /// Registered IDs, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.cmds.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn yaml_kind(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "bool",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "sequence",
        serde_yaml::Value::Mapping(_) => "mapping",
        serde_yaml::Value::Tagged(_) => "tagged value",
    }
}
