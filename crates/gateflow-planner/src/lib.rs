#![forbid(unsafe_code)]
//! gateflow-planner: static pipeline definitions → compiled `Graph`.
//!
//! Design:
//! - The YAML document is a thin serde layer (`dsl::yaml`). Turning it into
//!   `TaskNode`s is where defaults are materialised, so a compiled node never
//!   consults global config at execution time.
//! - Edges can be declared per task (`depends_on`) or as collection→collection
//!   fans in a top-level `edges:` list; both are merged at compile time.
//! - `explain` renders a compiled graph for humans.

pub mod dsl;
pub mod error;
pub mod explain;

pub use dsl::yaml::{
    build_definition, load_pipeline, parse_yaml_pipeline, PipelineDefaults, PipelineDefinition,
    PipelineDoc,
};
pub use error::PlanError;
pub use explain::{explain, ExplainLevel};
