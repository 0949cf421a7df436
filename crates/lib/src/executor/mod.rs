//! Command execution backends.
//!
//! An [`Executor`] runs one [`Command`] to completion under a cancellation
//! token and reports an [`ExecutionResult`]. Backends are selected per command
//! by name (`executor: bin`); see [`ExecutorKind`].

mod bin;
mod command;
mod env;
mod result;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use bin::BinaryExecutor;
pub use command::{Command, CommandError, DEFAULT_EXECUTOR};
pub use env::{EnvMap, EnvSpec, EnvStrategy};
pub use result::{ExecError, ExecutionResult, EXIT_CODE_UNSET};

/// Runs commands. Implementations must be safe to share across tasks; the
/// dispatcher holds them as `Arc<dyn Executor>`.
///
/// `execute` must not mutate the command and must stop (and clean up any
/// process it started) once `cancel` fires.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, cancel: &CancellationToken, command: &Command) -> ExecutionResult;
}

/// Known executor backends, keyed by the name used in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Binary,
}

impl ExecutorKind {
    pub const ALL: [ExecutorKind; 1] = [ExecutorKind::Binary];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bin" => Some(ExecutorKind::Binary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutorKind::Binary => "bin",
        }
    }

    pub fn build(&self) -> Arc<dyn Executor> {
        match self {
            ExecutorKind::Binary => Arc::new(BinaryExecutor),
        }
    }
}
