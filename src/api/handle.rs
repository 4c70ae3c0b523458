//! Purpose: Per-process connector to the shared mapping.
//! Exports: `StashHandle`.
//! Role: Make the remote mapping look like a local associative structure.
//! Invariants: One round trip per remote call; no client-side entry cache.
//! Invariants: Local and remote modes observe identical semantics.
#![allow(clippy::result_large_err)]

use crate::api::remote::RemoteStore;
use crate::core::config::SessionConfig;
use crate::core::error::Error;
use crate::core::key::StashKey;
use crate::core::store::StashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Connector to a stash mapping, constructed once per consumer process and
/// injected into [`crate::api::Stash`].
///
/// With a session config it attaches to the remote server; without one it
/// degrades to an in-process map so the façade is testable without a running
/// server.
#[derive(Clone)]
pub enum StashHandle {
    Local(Arc<StashMap>),
    Remote(RemoteStore),
}

impl StashHandle {
    /// Single-process mode backed by a private in-memory map.
    pub fn in_process() -> Self {
        StashHandle::Local(Arc::new(StashMap::new()))
    }

    /// Attach to the server described by `config`.
    pub fn connect(config: &SessionConfig) -> Result<Self, Error> {
        Self::connect_inner(config, None)
    }

    /// Attach with an explicit bound on the connection attempt.
    pub fn connect_with_timeout(config: &SessionConfig, timeout: Duration) -> Result<Self, Error> {
        Self::connect_inner(config, Some(timeout))
    }

    fn connect_inner(config: &SessionConfig, timeout: Option<Duration>) -> Result<Self, Error> {
        let store = RemoteStore::connect(&config.address, config.secret.clone(), timeout)?;
        Ok(StashHandle::Remote(store))
    }

    /// Insert-if-absent; `Duplicate` when the key is already present.
    pub fn insert_if_absent(&self, key: StashKey, value: Value) -> Result<(), Error> {
        match self {
            StashHandle::Local(map) => map.insert_if_absent(key, value),
            StashHandle::Remote(store) => store.insert_if_absent(&key, &value),
        }
    }

    /// Remove-and-return; `Ok(None)` when the key is absent.
    pub fn take(&self, key: &StashKey) -> Result<Option<Value>, Error> {
        match self {
            StashHandle::Local(map) => Ok(map.take(key)),
            StashHandle::Remote(store) => store.take(key),
        }
    }

    /// Non-destructive read.
    pub fn get(&self, key: &StashKey) -> Result<Option<Value>, Error> {
        match self {
            StashHandle::Local(map) => Ok(map.get(key)),
            StashHandle::Remote(store) => store.get(key),
        }
    }

    pub fn contains(&self, key: &StashKey) -> Result<bool, Error> {
        match self {
            StashHandle::Local(map) => Ok(map.contains(key)),
            StashHandle::Remote(store) => store.contains(key),
        }
    }
}
