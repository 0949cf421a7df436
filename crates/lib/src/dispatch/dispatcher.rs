//! Single-consumer dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::CommandRegistry;
use crate::executor::{Executor, ExecutorKind};
use crate::request::CommandRequest;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid executor: {0}")]
    UnknownExecutor(String),
}

/// Takes requests off the shared channel and runs them one at a time.
///
/// The next request is received only after the previous command has
/// finished. The dispatcher does not own the senders; it stops when the root
/// token is canceled or every sender has been dropped.
pub struct Dispatcher {
    registry: Arc<CommandRegistry>,
    executors: HashMap<String, Arc<dyn Executor>>,
    rx: mpsc::Receiver<CommandRequest>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Instantiate one backend per executor name used by the registry.
    pub fn new(
        registry: Arc<CommandRegistry>,
        rx: mpsc::Receiver<CommandRequest>,
        cancel: CancellationToken,
    ) -> Result<Self, DispatchError> {
        let mut executors = HashMap::new();
        for name in registry.executor_names() {
            let kind = ExecutorKind::from_name(&name)
                .ok_or_else(|| DispatchError::UnknownExecutor(name.clone()))?;
            executors.insert(name, kind.build());
        }
        Ok(Self::with_executors(registry, executors, rx, cancel))
    }

    /// Use the given backends instead of the built-in ones.
    pub fn with_executors(
        registry: Arc<CommandRegistry>,
        executors: HashMap<String, Arc<dyn Executor>>,
        rx: mpsc::Receiver<CommandRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            executors,
            rx,
            cancel,
        }
    }

    /// Run until canceled or until the request channel is closed.
    pub async fn run(mut self) {
        log::info!("dispatcher started");
        loop {
            // Cancellation wins over queued requests.
            let req = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    log::info!("dispatcher canceled, stopping");
                    return;
                }
                req = self.rx.recv() => match req {
                    Some(req) => req,
                    None => {
                        log::info!("request channel closed, stopping dispatcher");
                        return;
                    }
                },
            };
            self.dispatch(req).await;
        }
    }

    async fn dispatch(&self, req: CommandRequest) {
        log::info!("request received for command {}", req.command_id);
        let cmd = match self.registry.get(&req.command_id) {
            Ok(cmd) => cmd,
            Err(e) => {
                log::warn!("command lookup failed: {}", e);
                return;
            }
        };
        let Some(executor) = self.executors.get(&cmd.executor) else {
            log::warn!(
                "unknown executor {} for command {}",
                cmd.executor,
                cmd.label()
            );
            return;
        };

        log::info!("executing {} with executor {}", cmd.label(), cmd.executor);
        let result = executor.execute(&self.cancel, cmd).await;
        if !result.output.is_empty() {
            log::debug!("output of {}: {}", cmd.label(), result.output_lossy());
        }
        match &result.error {
            Some(e) => log::error!(
                "command {} failed (exit code {}): {}",
                cmd.label(),
                result.exit_code,
                e
            ),
            None => log::info!(
                "command {} completed (exit code {})",
                cmd.label(),
                result.exit_code
            ),
        }
    }
}
