use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Illegal state transition for '{node}': {from:?} -> {to:?}")]
    Transition {
        node: String,
        from: crate::run::TaskStatus,
        to: crate::run::TaskStatus,
    },

    #[error("Run {0} is terminal and can no longer be mutated")]
    RunTerminal(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
