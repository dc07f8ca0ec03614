//! Convenient re-exports for downstream crates.

pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::graph::{compile, CompileError, Graph, GraphBuilder};
pub use crate::hash::Hash256;
pub use crate::id::{NodeId, RunId};
pub use crate::manifest::RunManifest;
pub use crate::run::{Run, RunResult, RunStatus, TaskFailure, TaskInstance, TaskStatus};
pub use crate::task::{
    CopyAuth, CopyFormat, IdempotencyMode, Operation, Predicate, QualityCheck, RetryPolicy,
    TaskKind, TaskNode,
};
