//! Purpose: Derive canonical stash keys from caller identifiers and scopes.
//! Exports: `StashKey`.
//! Role: Pure key codec; the only way to construct a mapping key.
//! Invariants: Identifiers are canonical hyphenated lowercase UUIDs.
//! Invariants: Serde round trip is identity, so keys built in different
//! processes compare equal.

use crate::core::error::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The internal `(scope, identifier)` key of the shared mapping.
///
/// Two identical identifiers under different scopes are unrelated entries.
/// Construction goes through [`StashKey::wrap`], which validates the
/// identifier; once built the key is immutable.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StashKey {
    scope: String,
    id: String,
}

impl StashKey {
    /// Wrap a caller-supplied identifier and scope into a canonical key.
    ///
    /// The identifier must parse as a UUID (any form `uuid` accepts, such as
    /// hyphenated or plain hex) and is normalized to hyphenated lowercase.
    /// The scope is taken verbatim.
    pub fn wrap(id: &str, scope: impl Into<String>) -> Result<Self, Error> {
        let id = Uuid::parse_str(id).map_err(|err| {
            Error::new(ErrorKind::InvalidKey)
                .with_message(format!("identifier is not a valid UUID: {id:?}"))
                .with_source(err)
        })?;
        Ok(Self {
            scope: scope.into(),
            id: id.to_string(),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for StashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.scope, self.id)
    }
}
