//! Purpose: Define the stable public API boundary for cubby.
//! Exports: The stash façade, handle, remote store, and core types.
//! Role: Public, additive-only surface; consumers never reach around it.
//! Invariants: This module is the only public path to the stash primitives.

mod handle;
mod remote;
mod stash;

pub use crate::core::config::{ENV_CONFIG_VAR, SessionConfig, StashAddress};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::key::StashKey;
pub use crate::core::store::StashMap;
pub use handle::StashHandle;
pub use remote::RemoteStore;
pub use stash::Stash;
