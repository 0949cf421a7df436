//! Registered commands and their YAML forms.

use serde::Deserialize;
use std::time::Duration;

use super::env::EnvSpec;
use crate::config::deserialize_duration;

/// Executor used when a command does not name one.
pub const DEFAULT_EXECUTOR: &str = "bin";

/// An executable operation registered with the server.
///
/// `args[0]` is the program, the rest are its arguments. A command is built
/// once at configuration load and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Registry key. Assigned by the registry, never read from the command body.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Display description.
    pub description: String,
    pub args: Vec<String>,
    /// Name of the backend that runs this command.
    pub executor: String,
    pub env: EnvSpec,
    /// Zero means no timeout.
    pub timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("args must not be empty")]
    MissingArgs,
    #[error("program (args[0]) must not be empty")]
    EmptyProgram,
    #[error("command must be a program string, a list of arguments, or a mapping")]
    InvalidShape,
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

/// Full mapping form of a command entry.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandInput {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    executor: Option<String>,
    #[serde(default)]
    env: Option<EnvSpec>,
    #[serde(default, deserialize_with = "deserialize_duration")]
    timeout: Option<Duration>,
}

impl Command {
    /// Command with default executor, isolated empty environment and no timeout.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: String::new(),
            name: String::new(),
            description: String::new(),
            args: args.into_iter().map(Into::into).collect(),
            executor: DEFAULT_EXECUTOR.to_string(),
            env: EnvSpec::default(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executor = executor.into();
        self
    }

    pub fn with_env(mut self, env: EnvSpec) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The program to launch, if any.
    pub fn program(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// `id[name]`, used in logs and errors.
    pub fn label(&self) -> String {
        format!("{}[{}]", self.id, self.name)
    }

    /// Check the argument invariant: at least one argument and a non-empty program.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self.program() {
            None => Err(CommandError::MissingArgs),
            Some(p) if p.trim().is_empty() => Err(CommandError::EmptyProgram),
            Some(_) => Ok(()),
        }
    }

    /// Parse one `commands.<id>` entry. Accepted forms:
    ///
    /// - `uptime` (a single program)
    /// - `["df", "-h"]` (an argument list)
    /// - a mapping with `name`, `description`, `args`, `executor`, `env`, `timeout`
    pub fn from_yaml(value: serde_yaml::Value) -> Result<Self, CommandError> {
        let cmd = match value {
            serde_yaml::Value::String(program) => Command::new([program]),
            serde_yaml::Value::Sequence(_) => {
                let args: Vec<String> = serde_yaml::from_value(value)?;
                Command::new(args)
            }
            serde_yaml::Value::Mapping(_) => {
                let input: CommandInput = serde_yaml::from_value(value)?;
                let executor = input
                    .executor
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| DEFAULT_EXECUTOR.to_string());
                Command {
                    id: String::new(),
                    name: input.name.unwrap_or_default(),
                    description: input.description.unwrap_or_default(),
                    args: input.args,
                    executor,
                    env: input.env.unwrap_or_default(),
                    timeout: input.timeout.unwrap_or(Duration::ZERO),
                }
            }
            serde_yaml::Value::Null => return Err(CommandError::MissingArgs),
            _ => return Err(CommandError::InvalidShape),
        };
        cmd.validate()?;
        Ok(cmd)
    }
}
