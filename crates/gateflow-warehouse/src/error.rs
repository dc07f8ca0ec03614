use thiserror::Error;

/// Result type local to gateflow-warehouse.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("statement failed: {0}")]
    Statement(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("relation \"{0}\" does not exist")]
    UnknownTable(String),

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("no connection registered for '{0}'")]
    MissingConnection(String),

    #[error("no objects found under {0}")]
    EmptySource(String),
}
