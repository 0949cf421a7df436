//! Server runtime: wires the registry, request channel, listeners and
//! dispatcher together.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::listener::RunningListener;

/// Capacity of the shared request channel. A full channel blocks listeners'
/// enqueue until the dispatcher catches up or shutdown starts.
pub const REQUEST_CHANNEL_CAPACITY: usize = 16;

/// Running server components.
pub struct Runtime {
    listeners: Vec<RunningListener>,
    dispatcher: JoinHandle<()>,
}

/// Start the server described by `config`.
///
/// The dispatcher is built first so an unknown executor fails before any port
/// is bound. Everything stops when `cancel` fires.
pub async fn start(config: Config, cancel: CancellationToken) -> Result<Runtime> {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
    let registry = Arc::new(config.commands);

    let dispatcher = Dispatcher::new(registry.clone(), rx, cancel.clone())
        .context("building dispatcher")?;
    let listeners = config
        .listeners
        .start_all(&cancel, &tx)
        .await
        .context("starting listeners")?;
    // Listeners hold the only senders from here on.
    drop(tx);

    let dispatcher = tokio::spawn(dispatcher.run());
    log::info!(
        "server started: {} command(s), {} listener(s)",
        registry.len(),
        listeners.len()
    );
    Ok(Runtime {
        listeners,
        dispatcher,
    })
}

impl Runtime {
    pub fn listeners(&self) -> &[RunningListener] {
        &self.listeners
    }

    /// Wait for every listener to stop and the dispatcher to return. Call
    /// after canceling the token passed to [`start`].
    pub async fn shutdown(self) {
        for listener in &self.listeners {
            listener.stopped().await;
        }
        if let Err(e) = self.dispatcher.await {
            log::error!("dispatcher task failed: {}", e);
        }
        log::info!("server stopped");
    }
}
