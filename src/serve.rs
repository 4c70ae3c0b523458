//! Purpose: Host the authoritative stash mapping over HTTP/JSON.
//! Exports: `ServeConfig`, `StashServer`.
//! Role: Axum-based server implementing the stash v0 protocol.
//! Invariants: Every mutation is atomic under the store lock; put is
//! insert-if-absent and take is remove-and-return, server-side.
//! Invariants: All routes require the shared secret; envelopes and error
//! kinds match `api/remote.rs`.
//! Invariants: The listener is released on every exit path, including drop.

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::core::config::{SessionConfig, StashAddress};
use crate::core::error::{Error, ErrorKind};
use crate::core::key::StashKey;
use crate::core::store::StashMap;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct ServeConfig {
    /// Address to bind; a loopback ephemeral port when unset.
    pub bind: Option<SocketAddr>,
    /// Shared secret; generated when unset.
    pub secret: Option<String>,
    pub max_body_bytes: u64,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: None,
            secret: None,
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Clone)]
struct AppState {
    map: Arc<StashMap>,
    secret: String,
}

/// A running stash server.
///
/// `start` binds the listener and returns the effective address and secret so
/// the launcher can propagate them (see [`SessionConfig`]). Exactly one
/// process can hold a given bind address, which is what keeps the mapping
/// single-homed. The mapping and all remaining entries are dropped with the
/// server.
pub struct StashServer {
    address: SocketAddr,
    secret: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<(), Error>>>,
}

impl StashServer {
    /// Bind and begin accepting connections.
    pub async fn start(config: ServeConfig) -> Result<Self, Error> {
        validate_config(&config)?;
        init_tracing();

        let max_body_bytes: usize = config.max_body_bytes.try_into().map_err(|_| {
            Error::new(ErrorKind::Config).with_message("max_body_bytes is too large")
        })?;
        let secret = match config.secret {
            Some(secret) => secret,
            None => generate_secret()?,
        };
        let state = AppState {
            map: Arc::new(StashMap::new()),
            secret: secret.clone(),
        };

        let app = Router::new()
            .route("/v0/health", get(health))
            .route("/v0/entries/put", post(put_entry))
            .route("/v0/entries/take", post(take_entry))
            .route("/v0/entries/get", post(get_entry))
            .route("/v0/entries/contains", post(contains_entry))
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let bind = config
            .bind
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));
        let listener = tokio::net::TcpListener::bind(bind).await.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind stash server")
                .with_source(err)
        })?;
        let address = listener.local_addr().map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read bound address")
                .with_source(err)
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("stash server failed")
                        .with_source(err)
                })
        });

        tracing::info!(%address, "stash server listening");
        Ok(Self {
            address,
            secret,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// The effective bound address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// The effective shared secret.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Session config for propagating this server to sibling processes.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            StashAddress::HostPort(self.address.ip().to_string(), self.address.port()),
            self.secret.clone(),
        )
    }

    /// Stop accepting connections and release the mapping. Idempotent.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        let Some(shutdown) = self.shutdown.take() else {
            return Ok(());
        };
        let _ = shutdown.send(());
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(Error::new(ErrorKind::Internal)
                .with_message("stash server task failed")
                .with_source(err)),
            Err(_) => {
                Err(Error::new(ErrorKind::Io).with_message("stash server shutdown timed out"))
            }
        }
    }
}

impl Drop for StashServer {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Config)
            .with_message("max_body_bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

fn generate_secret() -> Result<String, Error> {
    let mut bytes = [0u8; 32];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message(format!("failed to generate shared secret: {err}"))
    })?;
    Ok(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(nibble_hex(byte >> 4));
        out.push(nibble_hex(byte & 0x0f));
    }
    out
}

fn nibble_hex(nibble: u8) -> char {
    match nibble {
        0..=9 => char::from(b'0' + nibble),
        _ => char::from(b'a' + (nibble - 10)),
    }
}

fn authorize(headers: &HeaderMap, state: &AppState) -> Result<(), Error> {
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(Error::new(ErrorKind::Permission).with_message("missing bearer secret"));
    };
    let value = value.to_str().unwrap_or_default();
    let expected = format!("Bearer {}", state.secret);
    if value != expected {
        return Err(Error::new(ErrorKind::Permission).with_message("invalid bearer secret"));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    key: StashKey,
    value: Value,
}

#[derive(Debug, Deserialize)]
struct KeyRequest {
    key: StashKey,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    json_response(json!({ "ok": true }))
}

async fn put_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<PutRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    match state.map.insert_if_absent(payload.key, payload.value) {
        Ok(()) => json_response(json!({ "ok": true })),
        Err(err) => error_response(err),
    }
}

async fn take_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<KeyRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    json_response(json!({ "value": state.map.take(&payload.key) }))
}

async fn get_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<KeyRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    json_response(json!({ "value": state.map.get(&payload.key) }))
}

async fn contains_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<KeyRequest>,
) -> Response {
    if let Err(err) = authorize(&headers, &state) {
        return error_response(err);
    }
    json_response(json!({ "present": state.map.contains(&payload.key) }))
}

fn json_response(payload: Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("cubby-version", HeaderValue::from_static("0"));
    response
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::InvalidKey | ErrorKind::InvalidValue | ErrorKind::Config => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::Duplicate => StatusCode::CONFLICT,
        ErrorKind::Permission => StatusCode::UNAUTHORIZED,
        ErrorKind::Connection | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            key: err.key().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("cubby-version", HeaderValue::from_static("0"));
    response
}

#[cfg(test)]
mod tests {
    use super::{
        AppState, ErrorKind, ServeConfig, StashServer, authorize, generate_secret, validate_config,
    };
    use crate::core::store::StashMap;
    use axum::http::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    fn state(secret: &str) -> AppState {
        AppState {
            map: Arc::new(StashMap::new()),
            secret: secret.to_string(),
        }
    }

    #[test]
    fn zero_body_cap_is_rejected() {
        let config = ServeConfig {
            max_body_bytes: 0,
            ..ServeConfig::default()
        };
        let err = validate_config(&config).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn generated_secret_is_hex() {
        let secret = generate_secret().expect("secret");
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn authorize_requires_exact_bearer_secret() {
        let state = state("s3cr3t");
        let mut headers = HeaderMap::new();
        assert_eq!(
            authorize(&headers, &state).expect_err("err").kind(),
            ErrorKind::Permission
        );

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert_eq!(
            authorize(&headers, &state).expect_err("err").kind(),
            ErrorKind::Permission
        );

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer s3cr3t"),
        );
        authorize(&headers, &state).expect("authorized");
    }

    #[tokio::test]
    async fn start_reports_effective_address_and_secret() {
        let mut server = StashServer::start(ServeConfig::default()).await.expect("start");
        assert_ne!(server.address().port(), 0);
        assert_eq!(server.secret().len(), 64);
        let config = server.session_config();
        assert_eq!(config.secret, server.secret());
        server.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let mut server = StashServer::start(ServeConfig::default()).await.expect("start");
        server.shutdown().await.expect("first shutdown");
        server.shutdown().await.expect("second shutdown");
    }
}
