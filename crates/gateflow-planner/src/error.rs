use gateflow_core::graph::CompileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("task '{task}': {reason}")]
    Invalid { task: String, reason: String },

    #[error(transparent)]
    Compile(#[from] CompileError),
}

impl PlanError {
    pub(crate) fn invalid(task: &str, reason: impl Into<String>) -> Self {
        PlanError::Invalid {
            task: task.to_string(),
            reason: reason.into(),
        }
    }
}
