//! Stage: replace a staging table with everything under an object-store prefix.
//!
//! Always `DELETE FROM` then `COPY`, so any attempt (first or retry) leaves
//! the table holding exactly one copy of the source.

use gateflow_core::task::CopyFormat;
use gateflow_warehouse::Warehouse;
use tracing::info;

use crate::sql::{self, CopyCredentials};
use crate::traits::{Ack, OpError};

pub fn stage(
    wh: &dyn Warehouse,
    target: &str,
    source: &str,
    format: &CopyFormat,
    creds: CopyCredentials<'_>,
) -> Result<Ack, OpError> {
    info!(table = target, source, "clearing staging table");
    wh.execute(&sql::delete_all(target))?;

    info!(
        statement = %sql::copy_redacted(target, source, format, creds),
        "copying into staging table"
    );
    wh.execute(&sql::copy(target, source, format, creds))?;

    Ok(Ack { statements: 2 })
}
