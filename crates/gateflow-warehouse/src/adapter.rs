//! The warehouse seam.
//!
//! Implementations own connection pooling; callers assume each call gets an
//! exclusive connection for the statement's duration. Calls may block.

use crate::error::Result;
use crate::types::Row;

pub trait Warehouse: Send + Sync {
    /// Run a statement that returns no rows (DELETE, TRUNCATE, COPY, INSERT).
    fn execute(&self, statement: &str) -> Result<()>;

    /// Run a statement and collect its rows.
    fn query(&self, statement: &str) -> Result<Vec<Row>>;
}
