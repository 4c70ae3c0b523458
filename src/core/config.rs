//! Purpose: Rendezvous configuration passed between unrelated processes.
//! Exports: `StashAddress`, `SessionConfig`, `ENV_CONFIG_VAR`.
//! Role: Encode/decode the server's address and secret into one env token.
//! Invariants: `decode(encode(c)) == c` for both address forms.
//! Invariants: The secret travels base64-encoded inside the token.

use crate::core::error::{Error, ErrorKind};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Environment variable carrying the encoded session config through the
/// process tree rooted at the server's launcher.
pub const ENV_CONFIG_VAR: &str = "CUBBY_STASH_CONFIG";

/// Where the stash server listens.
///
/// Either a single-string endpoint (`host:port` or a full `http://` URL) or an
/// explicit host/port pair. Both forms survive the token round trip.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StashAddress {
    Named(String),
    HostPort(String, u16),
}

impl fmt::Display for StashAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StashAddress::Named(endpoint) => write!(f, "{endpoint}"),
            StashAddress::HostPort(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// The effective address and shared secret of a running stash server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionConfig {
    pub address: StashAddress,
    pub secret: String,
}

impl SessionConfig {
    pub fn new(address: StashAddress, secret: impl Into<String>) -> Self {
        Self {
            address,
            secret: secret.into(),
        }
    }

    /// Encode as a single transmissible token: a JSON two-tuple of the address
    /// and the base64 of the secret.
    pub fn encode(&self) -> Result<String, Error> {
        let secret = BASE64.encode(self.secret.as_bytes());
        serde_json::to_string(&(&self.address, secret)).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode session config")
                .with_source(err)
        })
    }

    /// Exact inverse of [`SessionConfig::encode`].
    pub fn decode(token: &str) -> Result<Self, Error> {
        let (address, secret): (StashAddress, String) =
            serde_json::from_str(token).map_err(|err| {
                Error::new(ErrorKind::Config)
                    .with_message("malformed session config token")
                    .with_source(err)
            })?;
        let secret = BASE64.decode(secret.as_bytes()).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("session config secret is not valid base64")
                .with_source(err)
        })?;
        let secret = String::from_utf8(secret).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message("session config secret is not valid UTF-8")
                .with_source(err)
        })?;
        Ok(Self { address, secret })
    }

    /// The `(name, value)` pair for injecting the token into a child process
    /// environment, e.g. via `Command::env`.
    pub fn env_pair(&self) -> Result<(&'static str, String), Error> {
        Ok((ENV_CONFIG_VAR, self.encode()?))
    }

    /// Publish the token into this process's own environment.
    ///
    /// Environment mutation must happen before worker threads exist; prefer
    /// [`SessionConfig::env_pair`] when spawning children directly.
    pub fn store_env(&self) -> Result<(), Error> {
        let token = self.encode()?;
        unsafe { std::env::set_var(ENV_CONFIG_VAR, token) };
        Ok(())
    }

    /// Load the config published by an ancestor process.
    pub fn load_env() -> Result<Self, Error> {
        let token = std::env::var(ENV_CONFIG_VAR).map_err(|err| {
            Error::new(ErrorKind::Config)
                .with_message(format!("{ENV_CONFIG_VAR} is not set"))
                .with_hint("Start a stash server and propagate its session config first.")
                .with_source(err)
        })?;
        Self::decode(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::{ENV_CONFIG_VAR, SessionConfig, StashAddress};
    use crate::core::error::ErrorKind;

    #[test]
    fn token_round_trips_host_port_address() {
        let config = SessionConfig::new(
            StashAddress::HostPort("127.0.0.1".to_string(), 49152),
            "0a1b2c",
        );
        let token = config.encode().expect("encode");
        assert_eq!(SessionConfig::decode(&token).expect("decode"), config);
    }

    #[test]
    fn token_round_trips_named_address() {
        let config = SessionConfig::new(StashAddress::Named("stash.local:7700".to_string()), "s3");
        let token = config.encode().expect("encode");
        assert_eq!(SessionConfig::decode(&token).expect("decode"), config);
    }

    #[test]
    fn token_is_a_json_two_tuple() {
        let config = SessionConfig::new(
            StashAddress::HostPort("127.0.0.1".to_string(), 7700),
            "secret",
        );
        let token = config.encode().expect("encode");
        let parsed: serde_json::Value = serde_json::from_str(&token).expect("json");
        assert_eq!(parsed[0], serde_json::json!(["127.0.0.1", 7700]));
        assert_eq!(parsed[1], serde_json::json!("c2VjcmV0"));
    }

    #[test]
    fn decode_rejects_malformed_token() {
        let err = SessionConfig::decode("not json").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn decode_rejects_bad_secret_encoding() {
        let err = SessionConfig::decode(r#"["127.0.0.1:1", "!!not-base64!!"]"#).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn env_pair_names_the_config_variable() {
        let config = SessionConfig::new(StashAddress::Named("x:1".to_string()), "s");
        let (name, token) = config.env_pair().expect("pair");
        assert_eq!(name, ENV_CONFIG_VAR);
        assert_eq!(SessionConfig::decode(&token).expect("decode"), config);
    }
}
