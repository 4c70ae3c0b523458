//! Purpose: The authoritative write-once/read-once mapping.
//! Exports: `StashMap`.
//! Role: Single point of mutation; owned by the server (or shared in-process).
//! Invariants: Put is insert-if-absent in one critical section; a duplicate is
//! an error, never a silent update.
//! Invariants: Take removes the entry as part of returning it; a second take
//! observes absence.
//! Invariants: Null is not a storable value.

use crate::core::error::{Error, ErrorKind};
use crate::core::key::StashKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

/// The shared mapping behind every stash handle.
///
/// Lives for the lifetime of the process hosting it; entries never expire and
/// nothing persists across restarts.
#[derive(Debug, Default)]
pub struct StashMap {
    entries: Mutex<HashMap<StashKey, Value>>,
}

impl StashMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key` unless the key is already present.
    ///
    /// Check and insert happen under one lock, so two racing puts for the same
    /// key cannot both believe they are first. The duplicate error names the
    /// key and both values for diagnostics.
    pub fn insert_if_absent(&self, key: StashKey, value: Value) -> Result<(), Error> {
        if value.is_null() {
            return Err(Error::new(ErrorKind::InvalidValue)
                .with_message("stash value may not be null")
                .with_key(key.to_string()));
        }
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&key) {
            return Err(Error::new(ErrorKind::Duplicate)
                .with_message(format!(
                    "cannot overwrite existing stash entry (existing value {existing}, attempted value {value})"
                ))
                .with_key(key.to_string()));
        }
        entries.insert(key, value);
        Ok(())
    }

    /// Remove the entry for `key` and return its value, if present.
    ///
    /// Removal and return are one operation under the lock: of two racing
    /// takes, exactly one sees the value and the other sees `None`.
    pub fn take(&self, key: &StashKey) -> Option<Value> {
        self.entries.lock().remove(key)
    }

    /// Non-destructive read of the value under `key`.
    pub fn get(&self, key: &StashKey) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &StashKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
