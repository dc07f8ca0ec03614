//! Operator outcome and error types.

use gateflow_core::run::TaskFailure;
use thiserror::Error;

/// Successful completion of one operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ack {
    /// Statements sent to the warehouse.
    pub statements: usize,
}

/// A quality gate rejected the data. Never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QualityError {
    /// Structural failure: table missing, query malformed, or empty result.
    #[error("quality check #{index} returned no rows: {sql}")]
    NoRows { index: usize, sql: String },

    /// The query ran and the predicate rejected its value.
    #[error("quality check #{index} failed: {sql} expected {expected} but got {observed}")]
    ValueMismatch {
        index: usize,
        sql: String,
        observed: String,
        expected: String,
    },
}

#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Warehouse(#[from] gateflow_warehouse::Error),

    #[error(transparent)]
    Quality(#[from] QualityError),

    #[error("invalid node: {0}")]
    Config(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("operator panicked: {0}")]
    Panicked(String),
}

impl OpError {
    /// Transient failures consume the retry budget; quality and
    /// configuration failures do not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OpError::Quality(_) | OpError::Config(_))
    }

    pub fn to_failure(&self) -> TaskFailure {
        match self {
            OpError::Quality(QualityError::NoRows { index, sql }) => TaskFailure::QualityNoRows {
                check: *index,
                sql: sql.clone(),
            },
            OpError::Quality(QualityError::ValueMismatch {
                index,
                sql,
                observed,
                expected,
            }) => TaskFailure::QualityMismatch {
                check: *index,
                sql: sql.clone(),
                observed: observed.clone(),
                expected: expected.clone(),
            },
            OpError::Timeout(ms) => TaskFailure::Timeout { after_ms: *ms },
            other => TaskFailure::Handler {
                message: other.to_string(),
            },
        }
    }
}
