//! Purpose: Write-once/read-once shared stash for cross-process coordination.
//! Exports: `api` (stable surface), `core` (primitives), `serve` (the server).
//! Role: Library crate; one server process owns the mapping, consumers attach
//! through `api::StashHandle`.
//! Invariants: Consumers go through `api`; `core` stays free of transport
//! concerns.
pub mod api;
pub mod core;
pub mod serve;
