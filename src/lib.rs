#![forbid(unsafe_code)]
//! gateflow: batch ETL orchestration.
//!
//! Umbrella crate re-exporting the workspace members, plus the bundled
//! hourly warehouse pipeline.

pub use gateflow_core as core;
pub use gateflow_exec as exec;
pub use gateflow_operators as operators;
pub use gateflow_planner as planner;
pub use gateflow_warehouse as warehouse;

/// Two staged sources, one fact, four dimensions, one quality gate.
pub const SPARKIFY_PIPELINE: &str = include_str!("../pipelines/sparkify.yaml");
