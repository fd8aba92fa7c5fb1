//! authmap library crate: the controller runtime behind the `authmap`
//! binary.
//!
//! Domain logic (model, merge engine, shared-table stores) lives in
//! `authmap-core`, re-exported here. This crate adds the snippet
//! store, the work queue and worker pool, configuration and logging, so that
//! integration tests can drive the controller without going through the CLI.

pub use authmap_core;

pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod manifest;
pub mod snippets;
pub mod telemetry;
