//! Purpose: Synchronous HTTP client for the stash v0 protocol.
//! Exports: `RemoteStore`.
//! Role: One network round trip per operation against the stash server.
//! Invariants: Request/response envelopes match `serve.rs` exactly.
//! Invariants: Secret rejection surfaces as `Connection`, never `Permission`.
//! Invariants: No local caching of entries; the server is the source of truth.
#![allow(clippy::result_large_err)]

use crate::core::config::StashAddress;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::StashKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<RemoteStoreInner>,
}

struct RemoteStoreInner {
    base_url: Url,
    secret: String,
    agent: ureq::Agent,
}

#[derive(Serialize)]
struct PutRequest<'a> {
    key: &'a StashKey,
    value: &'a Value,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    key: &'a StashKey,
}

#[derive(Deserialize)]
struct OkEnvelope {
    #[allow(dead_code)]
    ok: bool,
}

#[derive(Deserialize)]
struct ValueEnvelope {
    value: Option<Value>,
}

#[derive(Deserialize)]
struct PresentEnvelope {
    present: bool,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: RemoteError,
}

#[derive(Deserialize)]
struct RemoteError {
    kind: String,
    message: Option<String>,
    key: Option<String>,
}

impl RemoteStore {
    /// Connect to the stash server at `address`, authenticating with `secret`.
    ///
    /// Performs a health-check round trip so an unreachable address or a
    /// rejected secret fails here, bounded by `timeout` (a default connect
    /// timeout applies when `None`).
    pub fn connect(
        address: &StashAddress,
        secret: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, Error> {
        let base_url = base_url_from_address(address)?;
        let connect_timeout = timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);
        let mut builder = ureq::builder().timeout_connect(connect_timeout);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let store = Self {
            inner: Arc::new(RemoteStoreInner {
                base_url,
                secret: secret.into(),
                agent: builder.build(),
            }),
        };
        store.handshake()?;
        Ok(store)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Atomic insert-if-absent on the server; `Duplicate` if the key exists.
    pub fn insert_if_absent(&self, key: &StashKey, value: &Value) -> Result<(), Error> {
        let url = build_url(&self.inner.base_url, &["v0", "entries", "put"])?;
        let _envelope: OkEnvelope = self.request_json(&url, &PutRequest { key, value })?;
        Ok(())
    }

    /// Atomic remove-and-return on the server; `None` when absent.
    pub fn take(&self, key: &StashKey) -> Result<Option<Value>, Error> {
        let url = build_url(&self.inner.base_url, &["v0", "entries", "take"])?;
        let envelope: ValueEnvelope = self.request_json(&url, &KeyRequest { key })?;
        Ok(envelope.value)
    }

    /// Non-destructive read; `None` when absent.
    pub fn get(&self, key: &StashKey) -> Result<Option<Value>, Error> {
        let url = build_url(&self.inner.base_url, &["v0", "entries", "get"])?;
        let envelope: ValueEnvelope = self.request_json(&url, &KeyRequest { key })?;
        Ok(envelope.value)
    }

    pub fn contains(&self, key: &StashKey) -> Result<bool, Error> {
        let url = build_url(&self.inner.base_url, &["v0", "entries", "contains"])?;
        let envelope: PresentEnvelope = self.request_json(&url, &KeyRequest { key })?;
        Ok(envelope.present)
    }

    fn handshake(&self) -> Result<(), Error> {
        let url = build_url(&self.inner.base_url, &["v0", "health"])?;
        let response = self.request("GET", &url).call();
        match response {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, resp)) => {
                let err = parse_error_response(status, resp);
                if matches!(err.kind(), ErrorKind::Permission | ErrorKind::Connection) {
                    Err(Error::new(ErrorKind::Connection)
                        .with_message("stash server rejected the shared secret"))
                } else {
                    Err(Error::new(ErrorKind::Connection)
                        .with_message(format!("stash server handshake failed: {err}")))
                }
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Connection)
                .with_message(format!(
                    "stash server unreachable at {}",
                    self.inner.base_url
                ))
                .with_source(err)),
        }
    }

    fn request_json<T, R>(&self, url: &Url, body: &T) -> Result<R, Error>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_string(body).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode request json")
                .with_source(err)
        })?;
        let response = self
            .request("POST", url)
            .set("Accept", "application/json")
            .set("Content-Type", "application/json")
            .send_string(&payload);

        match response {
            Ok(resp) => read_json_response(resp),
            Err(ureq::Error::Status(status, resp)) => {
                Err(map_remote_error(parse_error_response(status, resp)))
            }
            Err(ureq::Error::Transport(err)) => Err(Error::new(ErrorKind::Connection)
                .with_message("request to stash server failed")
                .with_source(err)),
        }
    }

    fn request(&self, method: &str, url: &Url) -> ureq::Request {
        self.inner
            .agent
            .request(method, url.as_str())
            .set("Authorization", &format!("Bearer {}", self.inner.secret))
    }
}

fn base_url_from_address(address: &StashAddress) -> Result<Url, Error> {
    let raw = match address {
        StashAddress::Named(endpoint) if endpoint.contains("://") => endpoint.clone(),
        StashAddress::Named(endpoint) => format!("http://{endpoint}"),
        StashAddress::HostPort(host, port) => format!("http://{host}:{port}"),
    };
    normalize_base_url(raw)
}

fn normalize_base_url(raw: String) -> Result<Url, Error> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Config)
            .with_message("invalid stash server address")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Config)
            .with_message("stash server address must use http or https"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Config).with_message("stash server address must not have a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Config).with_message("stash server address cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

fn read_json_response<R>(response: ureq::Response) -> Result<R, Error>
where
    R: DeserializeOwned,
{
    let body = response.into_string().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read response body")
            .with_source(err)
    })?;
    serde_json::from_str(&body).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("invalid response json")
            .with_source(err)
    })
}

fn parse_error_response(status: u16, response: ureq::Response) -> Error {
    let body = response.into_string().unwrap_or_default();
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(&body) {
        return error_from_remote(envelope.error);
    }
    let kind = error_kind_from_status(status);
    Error::new(kind).with_message(format!("remote error status {status}"))
}

// Authentication failures surface as connection errors; callers treat
// "unreachable" and "rejected" the same way.
fn map_remote_error(err: Error) -> Error {
    if err.kind() == ErrorKind::Permission {
        return Error::new(ErrorKind::Connection)
            .with_message("stash server rejected the shared secret");
    }
    err
}

fn error_from_remote(remote: RemoteError) -> Error {
    let mut err = Error::new(parse_error_kind(&remote.kind));
    if let Some(message) = remote.message {
        err = err.with_message(message);
    }
    if let Some(key) = remote.key {
        err = err.with_key(key);
    }
    err
}

fn parse_error_kind(kind: &str) -> ErrorKind {
    match kind {
        "InvalidKey" => ErrorKind::InvalidKey,
        "InvalidValue" => ErrorKind::InvalidValue,
        "Duplicate" => ErrorKind::Duplicate,
        "Permission" => ErrorKind::Permission,
        "Connection" => ErrorKind::Connection,
        "Config" => ErrorKind::Config,
        "Io" => ErrorKind::Io,
        _ => ErrorKind::Internal,
    }
}

fn error_kind_from_status(status: u16) -> ErrorKind {
    match status {
        401 | 403 => ErrorKind::Permission,
        409 => ErrorKind::Duplicate,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Io,
    }
}

#[cfg(test)]
mod tests {
    use super::{base_url_from_address, build_url, normalize_base_url, parse_error_kind};
    use crate::core::config::StashAddress;
    use crate::core::error::ErrorKind;

    #[test]
    fn host_port_address_becomes_http_base() {
        let url = base_url_from_address(&StashAddress::HostPort("127.0.0.1".to_string(), 7700))
            .expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:7700/");
    }

    #[test]
    fn named_address_gets_default_scheme() {
        let url =
            base_url_from_address(&StashAddress::Named("stash.local:7700".to_string())).expect("url");
        assert_eq!(url.as_str(), "http://stash.local:7700/");
    }

    #[test]
    fn named_address_keeps_explicit_scheme() {
        let url = base_url_from_address(&StashAddress::Named(
            "http://127.0.0.1:7700".to_string(),
        ))
        .expect("url");
        assert_eq!(url.as_str(), "http://127.0.0.1:7700/");
    }

    #[test]
    fn address_with_path_is_rejected() {
        let err = normalize_base_url("http://localhost:7700/extra".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn address_with_other_scheme_is_rejected() {
        let err = normalize_base_url("ftp://localhost:7700".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn build_url_joins_segments() {
        let base = normalize_base_url("http://localhost:7700".to_string()).expect("url");
        let url = build_url(&base, &["v0", "entries", "take"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:7700/v0/entries/take");
    }

    #[test]
    fn parse_error_kind_maps_known_values() {
        assert_eq!(parse_error_kind("InvalidKey"), ErrorKind::InvalidKey);
        assert_eq!(parse_error_kind("InvalidValue"), ErrorKind::InvalidValue);
        assert_eq!(parse_error_kind("Duplicate"), ErrorKind::Duplicate);
        assert_eq!(parse_error_kind("Permission"), ErrorKind::Permission);
        assert_eq!(parse_error_kind("anything-else"), ErrorKind::Internal);
    }
}
