//! Quality gate: ordered scalar checks, evaluated fail-fast.
//!
//! Each check reads row 0, column 0 of its query. No rows (or a missing
//! table, or a query the warehouse cannot parse) is a structural failure;
//! a value the predicate rejects, NULL and non-numeric values included,
//! is a value failure.

use gateflow_core::task::QualityCheck;
use gateflow_warehouse::{Error as WarehouseError, Warehouse};
use tracing::{error, info};

use crate::traits::{Ack, OpError, QualityError};

pub fn check(wh: &dyn Warehouse, checks: &[QualityCheck]) -> Result<Ack, OpError> {
    for (index, c) in checks.iter().enumerate() {
        let no_rows = || QualityError::NoRows {
            index,
            sql: c.sql.clone(),
        };

        let rows = match wh.query(&c.sql) {
            Ok(rows) => rows,
            Err(WarehouseError::UnknownTable(_) | WarehouseError::Unsupported(_)) => {
                error!(check = index, sql = %c.sql, "quality query could not run");
                return Err(no_rows().into());
            }
            Err(e) => return Err(e.into()),
        };

        let value = rows.first().and_then(|r| r.first()).ok_or_else(no_rows)?;
        let passed = value.as_f64().is_some_and(|v| c.predicate.holds(v));
        if !passed {
            error!(check = index, sql = %c.sql, observed = %value, expected = %c.predicate, "quality check failed");
            return Err(QualityError::ValueMismatch {
                index,
                sql: c.sql.clone(),
                observed: value.to_string(),
                expected: c.predicate.to_string(),
            }
            .into());
        }
        info!(check = index, sql = %c.sql, observed = %value, "quality check passed");
    }
    Ok(Ack {
        statements: checks.len(),
    })
}
