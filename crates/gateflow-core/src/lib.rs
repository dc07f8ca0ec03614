#![forbid(unsafe_code)]
//! gateflow-core: the declarative half of the orchestrator.
//!
//! - `task`: the immutable `TaskNode` model (kind, target, operation, policies).
//! - `graph`: compiles nodes + edges into an acyclic `Graph` and answers
//!   ready-set / downstream queries for the engine.
//! - `run`: the mutable `Run` / `TaskInstance` records and their legal transitions.
//! - `manifest`, `hash`, `config`: provenance and engine settings.
//!
//! No I/O and no async here. The exec crate drives these types.

pub mod config;
pub mod error;
pub mod graph;
pub mod hash;
pub mod id;
pub mod manifest;
pub mod prelude;
pub mod run;
pub mod task;

pub use error::{Error, Result};

/// Engine version recorded in every run manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
