//! HTTP listener: `PUT /` with `{"command_id": ...}`, authenticated by header.
//!
//! Plaintext is served with `axum::serve`; TLS with `axum-server` and rustls.
//! Both shut down gracefully when the listener's token is canceled, with a
//! bounded grace period.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Method, StatusCode},
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::protocol::{CommandPayload, API_TOKEN_HEADER, AUTH_METHOD_HEADER, COMMAND_PATH};
use super::{HttpListenerConfig, ListenerError, ListenerState};
use crate::auth::{Auth, AuthContext, AuthError, AuthMethod, Validator};
use crate::request::CommandRequest;

/// Listener type name, as used in config and auth allow-lists.
pub const LISTENER_TYPE: &str = "http";

/// Time allowed for in-flight requests after shutdown starts.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Request bodies larger than this are rejected as malformed.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// A bound, serving HTTP listener.
pub struct HttpListener {
    local_addr: SocketAddr,
    state: watch::Receiver<ListenerState>,
    cancel: CancellationToken,
}

#[derive(Clone)]
struct HandlerState {
    auth: Arc<Auth>,
    tx: mpsc::Sender<CommandRequest>,
    cancel: CancellationToken,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
}

impl HttpListener {
    /// Bind and start serving in the background.
    ///
    /// Returns once the socket is bound (and the TLS key pair loaded). Bind and
    /// TLS failures are returned here; later serve errors are only logged.
    /// Serving stops when `cancel` fires.
    pub async fn listen(
        config: HttpListenerConfig,
        cancel: CancellationToken,
        tx: mpsc::Sender<CommandRequest>,
    ) -> Result<Self, ListenerError> {
        config.validate()?;
        let address = config.address();
        let (state_tx, state_rx) = watch::channel(ListenerState::Unstarted);

        if config.tls.is_some() {
            log::info!("listener http starting with tls on {}", address);
        } else {
            log::info!("listener http starting without tls on {}", address);
        }

        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                address: address.clone(),
                source,
            })?;

        // Load the key pair after binding; the socket closes on drop if this fails.
        let tls = match &config.tls {
            Some(tls) => Some(
                RustlsConfig::from_pem_file(&tls.cert_file, &tls.key_file)
                    .await
                    .map_err(|source| ListenerError::Tls { source })?,
            ),
            None => None,
        };
        state_tx.send_replace(ListenerState::Bound);

        let app = router(HandlerState {
            auth: Arc::new(config.auth),
            tx,
            cancel: cancel.clone(),
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
        });
        let service = app.into_make_service_with_connect_info::<SocketAddr>();

        match tls {
            None => {
                let shutdown = cancel.clone().cancelled_owned();
                let serve = axum::serve(listener, service)
                    .with_graceful_shutdown(shutdown)
                    .into_future();
                tokio::spawn(supervise(serve, || {}, cancel.clone(), state_tx, local_addr));
            }
            Some(tls) => {
                let std_listener = listener.into_std().map_err(|source| ListenerError::Bind {
                    address: address.clone(),
                    source,
                })?;
                let handle = axum_server::Handle::new();
                let serve = axum_server::from_tcp_rustls(std_listener, tls)
                    .handle(handle.clone())
                    .serve(service);
                let on_cancel = move || handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
                tokio::spawn(supervise(serve, on_cancel, cancel.clone(), state_tx, local_addr));
            }
        }

        log::info!("listener http listening on {}", local_addr);
        Ok(Self {
            local_addr,
            state: state_rx,
            cancel,
        })
    }

    /// The bound address; useful when the configured port was 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Stop this listener without touching the rest of the server.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait until the listener has fully stopped.
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        // A dropped sender means the serve task is gone.
        let _ = state.wait_for(|s| *s == ListenerState::Stopped).await;
    }
}

/// Drive a serve future through Serving, ShuttingDown and Stopped. After
/// cancellation the server gets `SHUTDOWN_GRACE` to drain before it is dropped.
async fn supervise<F, C>(
    serve: F,
    on_cancel: C,
    cancel: CancellationToken,
    state: watch::Sender<ListenerState>,
    addr: SocketAddr,
) where
    F: Future<Output = io::Result<()>>,
    C: FnOnce(),
{
    let mut serve = Box::pin(serve);
    state.send_replace(ListenerState::Serving);

    tokio::select! {
        res = &mut serve => {
            if let Err(e) = res {
                log::error!("listener http serve failed on {}: {}", addr, e);
            }
        }
        _ = cancel.cancelled() => {
            state.send_replace(ListenerState::ShuttingDown);
            log::info!("listener http shutting down on {}", addr);
            on_cancel();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("listener http shutdown failed on {}: {}", addr, e),
                Err(_) => log::warn!(
                    "listener http on {} did not drain within {:?}; closing remaining connections",
                    addr,
                    SHUTDOWN_GRACE
                ),
            }
        }
    }
    // Close the socket and any remaining connections before reporting Stopped.
    drop(serve);

    state.send_replace(ListenerState::Stopped);
    log::info!("listener http stopped on {}", addr);
}

fn router(state: HandlerState) -> Router {
    Router::new()
        .route(COMMAND_PATH, any(command_http))
        .with_state(state)
}

/// PUT /: authenticate and enqueue a command request.
async fn command_http(
    State(state): State<HandlerState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> StatusCode {
    log::info!("request received: {} {} from {}", method, COMMAND_PATH, remote);
    if method != Method::PUT {
        return StatusCode::METHOD_NOT_ALLOWED;
    }
    match state.write_timeout {
        Some(limit) => tokio::time::timeout(limit, admit(&state, remote, &headers, body))
            .await
            .unwrap_or_else(|_| {
                log::warn!("request from {} exceeded write timeout {:?}", remote, limit);
                StatusCode::SERVICE_UNAVAILABLE
            }),
        None => admit(&state, remote, &headers, body).await,
    }
}

async fn admit(
    state: &HandlerState,
    remote: SocketAddr,
    headers: &HeaderMap,
    body: Body,
) -> StatusCode {
    let read = axum::body::to_bytes(body, MAX_BODY_BYTES);
    let bytes = match state.read_timeout {
        Some(limit) => match tokio::time::timeout(limit, read).await {
            Ok(res) => res,
            Err(_) => {
                log::warn!("request body from {} not read within {:?}", remote, limit);
                return StatusCode::REQUEST_TIMEOUT;
            }
        },
        None => read.await,
    };
    let bytes = match bytes {
        Ok(b) => b,
        Err(e) => {
            log::warn!("failed to read request body from {}: {}", remote, e);
            return StatusCode::BAD_REQUEST;
        }
    };

    let payload: CommandPayload = match serde_json::from_slice(&bytes) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("invalid json from {}: {}", remote, e);
            return StatusCode::BAD_REQUEST;
        }
    };
    let Some(command_id) = payload.command_id() else {
        log::warn!("missing command id from {}", remote);
        return StatusCode::BAD_REQUEST;
    };

    if let Err(e) = authenticate(&state.auth, headers) {
        log::warn!(
            "auth failed for command {} from {}: {}",
            command_id,
            remote,
            e
        );
        return StatusCode::UNAUTHORIZED;
    }

    enqueue(&state.tx, &state.cancel, command_id).await
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("")
}

/// Build the auth context from headers and validate it against `auth`.
fn authenticate(auth: &Auth, headers: &HeaderMap) -> Result<(), AuthError> {
    let method = header_value(headers, AUTH_METHOD_HEADER);
    if method.is_empty() {
        return Err(AuthError::MissingAuthKind);
    }
    if auth.get(method).is_none() {
        return Err(AuthError::UnsupportedMethod(method.to_string()));
    }
    let ctx = match AuthMethod::from_name(method) {
        Some(AuthMethod::ApiToken) => {
            AuthContext::api_token(LISTENER_TYPE, header_value(headers, API_TOKEN_HEADER))
        }
        None => return Err(AuthError::UnsupportedMethod(method.to_string())),
    };
    auth.validate(&ctx)
}

/// Push onto the shared channel unless shutdown has started.
async fn enqueue(
    tx: &mpsc::Sender<CommandRequest>,
    cancel: &CancellationToken,
    command_id: &str,
) -> StatusCode {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            log::warn!("shutdown in progress, dropping request for command {}", command_id);
            StatusCode::SERVICE_UNAVAILABLE
        }
        res = tx.send(CommandRequest::new(command_id)) => match res {
            Ok(()) => {
                log::info!("request enqueued for command {}", command_id);
                StatusCode::ACCEPTED
            }
            Err(_) => {
                log::warn!("request channel closed, dropping request for command {}", command_id);
                StatusCode::SERVICE_UNAVAILABLE
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiTokenConfig;
    use axum::http::HeaderValue;

    fn auth() -> Auth {
        Auth::new().with_validator(ApiTokenConfig::literal("secret").unwrap())
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(*k, HeaderValue::from_static(*v));
        }
        h
    }

    #[test]
    fn authenticate_accepts_valid_token() {
        let h = headers(&[
            ("x-poke-auth-method", "api_token"),
            ("x-poke-api-token", " secret "),
        ]);
        assert!(authenticate(&auth(), &h).is_ok());
    }

    #[test]
    fn authenticate_requires_method_header() {
        let h = headers(&[("x-poke-api-token", "secret")]);
        assert!(matches!(
            authenticate(&auth(), &h),
            Err(AuthError::MissingAuthKind)
        ));
    }

    #[test]
    fn authenticate_rejects_unknown_method() {
        let h = headers(&[("x-poke-auth-method", "basic")]);
        assert!(matches!(
            authenticate(&auth(), &h),
            Err(AuthError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn authenticate_rejects_wrong_token() {
        let h = headers(&[
            ("x-poke-auth-method", "api_token"),
            ("x-poke-api-token", "wrong"),
        ]);
        assert!(matches!(
            authenticate(&auth(), &h),
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn enqueue_after_cancel_is_unavailable() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            enqueue(&tx, &cancel, "uptime").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enqueue_on_closed_channel_is_unavailable() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert_eq!(
            enqueue(&tx, &CancellationToken::new(), "uptime").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn enqueue_pushes_request() {
        let (tx, mut rx) = mpsc::channel(1);
        assert_eq!(
            enqueue(&tx, &CancellationToken::new(), "uptime").await,
            StatusCode::ACCEPTED
        );
        assert_eq!(rx.recv().await.unwrap(), CommandRequest::new("uptime"));
    }

    #[tokio::test]
    async fn full_channel_unblocks_on_cancel() {
        let (tx, _rx) = mpsc::channel(1);
        tx.send(CommandRequest::new("first")).await.unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let status = tokio::time::timeout(Duration::from_secs(5), enqueue(&tx, &cancel, "second"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
