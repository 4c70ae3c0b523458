//! Purpose: The public write-once/read-once stash surface.
//! Exports: `Stash`.
//! Role: Enforce put/take policy and scope defaulting over a raw handle.
//! Invariants: Precondition failures (bad UUID, null value) are raised before
//! any network call.
//! Invariants: Absence is an `Ok(None)` result for take, never an error.
#![allow(clippy::result_large_err)]

use crate::api::handle::StashHandle;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::StashKey;
use serde_json::Value;

/// Key-value store for passing data between unrelated requests.
///
/// Keys are `(scope, uuid)` pairs, scope defaulting to the one the stash was
/// built with (typically the current request's path). The store is write-once
/// and read-once: a value cannot be overwritten once put, and `take` removes
/// it as part of returning it. Together these make it hard for data to leak
/// between different resources or different requests for the same resource.
#[derive(Clone)]
pub struct Stash {
    default_scope: String,
    handle: StashHandle,
}

impl Stash {
    /// Build a stash over an existing handle, usually one connected at
    /// process start.
    pub fn new(default_scope: impl Into<String>, handle: StashHandle) -> Self {
        Self {
            default_scope: default_scope.into(),
            handle,
        }
    }

    /// Single-process stash over a private in-memory map.
    pub fn in_process(default_scope: impl Into<String>) -> Self {
        Self::new(default_scope, StashHandle::in_process())
    }

    pub fn default_scope(&self) -> &str {
        &self.default_scope
    }

    /// Place a value in the stash.
    ///
    /// `id` must be a UUID; `scope` defaults to the stash's default scope.
    /// Fails with `InvalidValue` for a null value, `InvalidKey` for a
    /// malformed identifier (both before any network call), and `Duplicate`
    /// if the key was already put — the first value stays in place.
    pub fn put(&self, id: &str, value: Value, scope: Option<&str>) -> Result<(), Error> {
        if value.is_null() {
            return Err(Error::new(ErrorKind::InvalidValue)
                .with_message("stash value may not be null"));
        }
        let key = self.wrap(id, scope)?;
        self.handle.insert_if_absent(key, value)
    }

    /// Remove a value from the stash and return it.
    ///
    /// `Ok(None)` when nothing was put under the key, or when it was already
    /// taken; a second take always observes absence.
    pub fn take(&self, id: &str, scope: Option<&str>) -> Result<Option<Value>, Error> {
        let key = self.wrap(id, scope)?;
        self.handle.take(&key)
    }

    fn wrap(&self, id: &str, scope: Option<&str>) -> Result<StashKey, Error> {
        StashKey::wrap(id, scope.unwrap_or(&self.default_scope))
    }
}

#[cfg(test)]
mod tests {
    use super::Stash;
    use crate::core::error::ErrorKind;
    use serde_json::json;
    use uuid::Uuid;

    fn fresh_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[test]
    fn put_then_take_returns_the_value() {
        let stash = Stash::in_process("/echo");
        let id = fresh_id();
        stash.put(&id, json!({"token": 7}), None).expect("put");
        assert_eq!(
            stash.take(&id, None).expect("take"),
            Some(json!({"token": 7}))
        );
    }

    #[test]
    fn take_of_never_put_key_is_absent() {
        let stash = Stash::in_process("/echo");
        assert_eq!(stash.take(&fresh_id(), None).expect("take"), None);
    }

    #[test]
    fn second_take_observes_absence() {
        let stash = Stash::in_process("/echo");
        let id = fresh_id();
        stash.put(&id, json!(1), None).expect("put");
        assert_eq!(stash.take(&id, None).expect("take"), Some(json!(1)));
        assert_eq!(stash.take(&id, None).expect("take"), None);
    }

    #[test]
    fn second_put_fails_and_first_value_survives() {
        let stash = Stash::in_process("/echo");
        let id = fresh_id();
        stash.put(&id, json!("first"), None).expect("put");
        let err = stash.put(&id, json!("second"), None).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Duplicate);
        assert_eq!(stash.take(&id, None).expect("take"), Some(json!("first")));
    }

    #[test]
    fn scopes_do_not_interfere() {
        let stash = Stash::in_process("/default");
        let id = fresh_id();
        stash.put(&id, json!("a"), Some("/a")).expect("put");
        stash.put(&id, json!("b"), Some("/b")).expect("put");
        assert_eq!(stash.take(&id, Some("/a")).expect("take"), Some(json!("a")));
        assert_eq!(stash.take(&id, Some("/b")).expect("take"), Some(json!("b")));
    }

    #[test]
    fn explicit_scope_matching_default_hits_the_same_entry() {
        let stash = Stash::in_process("/echo");
        let id = fresh_id();
        stash.put(&id, json!(9), None).expect("put");
        assert_eq!(stash.take(&id, Some("/echo")).expect("take"), Some(json!(9)));
    }

    #[test]
    fn null_put_is_rejected_and_stores_nothing() {
        let stash = Stash::in_process("/echo");
        let id = fresh_id();
        let err = stash.put(&id, serde_json::Value::Null, None).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
        assert_eq!(stash.take(&id, None).expect("take"), None);
    }

    #[test]
    fn malformed_identifier_is_rejected_up_front() {
        let stash = Stash::in_process("/echo");
        let err = stash.put("zzz", json!(1), None).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
        let err = stash.take("zzz", None).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidKey);
    }
}
