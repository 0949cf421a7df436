//! Listeners: transport-specific request sources.
//!
//! A listener binds an address, authenticates each request against its own
//! auth block and pushes admitted requests onto the shared channel. HTTP is
//! the only built-in transport.

mod config;
mod http;
pub mod protocol;

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use config::{HttpConfigError, HttpListenerConfig, TlsConfig, DEFAULT_HOST, DEFAULT_PORT};
pub use http::{HttpListener, LISTENER_TYPE as HTTP_LISTENER_TYPE, SHUTDOWN_GRACE};

use crate::request::CommandRequest;

/// Lifecycle of one listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ListenerState {
    Unstarted,
    Bound,
    Serving,
    ShuttingDown,
    Stopped,
}

/// Load-time listener configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ListenerConfigError {
    #[error("listener type must be a string")]
    NonStringType,
    #[error("unsupported listener type {0:?}")]
    UnsupportedType(String),
    #[error("listener http: {0}")]
    Http(#[from] HttpConfigError),
}

/// Failure to start a listener.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("invalid listener config: {0}")]
    Config(#[from] HttpConfigError),
    #[error("start listener on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("load tls key pair: {source}")]
    Tls {
        #[source]
        source: io::Error,
    },
}

/// Configuration for one listener, by transport.
#[derive(Debug, Clone)]
pub enum ListenerSpec {
    Http(HttpListenerConfig),
}

impl ListenerSpec {
    pub fn listener_type(&self) -> &'static str {
        match self {
            ListenerSpec::Http(_) => http::LISTENER_TYPE,
        }
    }
}

/// Listener-type name -> listener configuration.
#[derive(Debug, Clone, Default)]
pub struct ListenerConfig {
    listeners: BTreeMap<String, ListenerSpec>,
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http(mut self, config: HttpListenerConfig) -> Self {
        self.listeners
            .insert(http::LISTENER_TYPE.to_string(), ListenerSpec::Http(config));
        self
    }

    /// Parse the `listeners` mapping. Unknown listener types are rejected.
    pub fn from_yaml(raw: serde_yaml::Mapping) -> Result<Self, ListenerConfigError> {
        let mut config = Self::new();
        for (key, value) in raw {
            let serde_yaml::Value::String(listener_type) = key else {
                return Err(ListenerConfigError::NonStringType);
            };
            match listener_type.as_str() {
                http::LISTENER_TYPE => {
                    config = config.with_http(HttpListenerConfig::from_yaml(value)?);
                }
                _ => return Err(ListenerConfigError::UnsupportedType(listener_type)),
            }
        }
        Ok(config)
    }

    pub fn get(&self, listener_type: &str) -> Option<&ListenerSpec> {
        self.listeners.get(listener_type)
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Configured listener types, sorted.
    pub fn types(&self) -> Vec<&str> {
        self.listeners.keys().map(String::as_str).collect()
    }

    /// Start every configured listener in sorted type order.
    ///
    /// Each listener gets a child of `cancel`. If one fails to start, the
    /// ones already started are stopped before the error is returned.
    pub async fn start_all(
        &self,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<CommandRequest>,
    ) -> Result<Vec<RunningListener>, ListenerError> {
        let mut started = Vec::with_capacity(self.listeners.len());
        for spec in self.listeners.values() {
            let result = match spec {
                ListenerSpec::Http(cfg) => {
                    HttpListener::listen(cfg.clone(), cancel.child_token(), tx.clone())
                        .await
                        .map(RunningListener::Http)
                }
            };
            match result {
                Ok(listener) => started.push(listener),
                Err(e) => {
                    log::error!("listener {} failed to start: {}", spec.listener_type(), e);
                    for listener in &started {
                        listener.shutdown();
                    }
                    for listener in &started {
                        listener.stopped().await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(started)
    }
}

/// A started listener of any transport.
pub enum RunningListener {
    Http(HttpListener),
}

impl RunningListener {
    pub fn listener_type(&self) -> &'static str {
        match self {
            RunningListener::Http(_) => http::LISTENER_TYPE,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        match self {
            RunningListener::Http(l) => l.local_addr(),
        }
    }

    pub fn state(&self) -> ListenerState {
        match self {
            RunningListener::Http(l) => l.state(),
        }
    }

    pub fn shutdown(&self) {
        match self {
            RunningListener::Http(l) => l.shutdown(),
        }
    }

    pub async fn stopped(&self) {
        match self {
            RunningListener::Http(l) => l.stopped().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_yaml_parses_http() {
        let raw = serde_yaml::from_str(
            "http:\n  port: 9000\n  auth:\n    api_token:\n      token: secret\n",
        )
        .unwrap();
        let config = ListenerConfig::from_yaml(raw).unwrap();
        assert_eq!(config.types(), vec!["http"]);
        let Some(ListenerSpec::Http(http)) = config.get("http") else {
            panic!("http listener missing");
        };
        assert_eq!(http.port, 9000);
    }

    #[test]
    fn from_yaml_rejects_unknown_type() {
        let raw = serde_yaml::from_str("grpc: {}\n").unwrap();
        assert!(matches!(
            ListenerConfig::from_yaml(raw),
            Err(ListenerConfigError::UnsupportedType(t)) if t == "grpc"
        ));
    }

    #[test]
    fn from_yaml_wraps_http_errors() {
        let raw = serde_yaml::from_str("http: {}\n").unwrap();
        let err = ListenerConfig::from_yaml(raw).unwrap_err();
        assert_eq!(err.to_string(), "listener http: auth is required for listener http");
    }

    #[test]
    fn empty_config_has_no_listeners() {
        let config = ListenerConfig::from_yaml(serde_yaml::Mapping::new()).unwrap();
        assert!(config.is_empty());
        assert!(config.types().is_empty());
    }

    #[test]
    fn states_are_ordered() {
        assert!(ListenerState::Unstarted < ListenerState::Bound);
        assert!(ListenerState::Bound < ListenerState::Serving);
        assert!(ListenerState::Serving < ListenerState::ShuttingDown);
        assert!(ListenerState::ShuttingDown < ListenerState::Stopped);
    }

    #[tokio::test]
    async fn start_all_with_no_listeners_is_empty() {
        let (tx, _rx) = mpsc::channel(1);
        let started = ListenerConfig::new()
            .start_all(&CancellationToken::new(), &tx)
            .await
            .unwrap();
        assert!(started.is_empty());
    }
}
