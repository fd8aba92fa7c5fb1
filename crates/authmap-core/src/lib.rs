//! Core domain logic for authmap.
//!
//! Everything in this crate is independent of how snippets are delivered or
//! scheduled:
//!
//! - [`model`] - mapping entries, snippets, the shared table.
//! - [`version`] - content fingerprints and the table generation counter.
//! - [`merge`] - the merge engine (`apply`, `remove`, drift detection).
//! - [`store`] - the shared-table client trait, its document codec and the
//!   in-memory and file-backed implementations.
//! - [`failpoints`] - feature-gated fault injection for crash tests.

pub mod failpoints;
pub mod merge;
pub mod model;
pub mod store;
pub mod version;
