//! Load: populate a fact or dimension table from staging.

use gateflow_core::task::IdempotencyMode;
use gateflow_warehouse::Warehouse;
use tracing::{info, warn};

use crate::sql;
use crate::traits::{Ack, OpError};

pub fn load(
    wh: &dyn Warehouse,
    target: &str,
    query: &str,
    mode: IdempotencyMode,
) -> Result<Ack, OpError> {
    let mut statements = 0;
    match mode {
        IdempotencyMode::ReplaceAll => {
            info!(table = target, "deleting rows before insert");
            wh.execute(&sql::delete_all(target))?;
            statements += 1;
        }
        IdempotencyMode::TruncateInsert => {
            info!(table = target, "truncating table before insert");
            wh.execute(&sql::truncate(target))?;
            statements += 1;
        }
        IdempotencyMode::AppendOnly => {}
    }

    let stmt = sql::insert_select(target, query);
    info!(table = target, ?mode, "inserting from staging");
    if let Err(e) = wh.execute(&stmt) {
        if !mode.is_idempotent() {
            warn!(table = target, "append-only insert failed; a retry may duplicate committed rows");
        }
        return Err(e.into());
    }
    statements += 1;

    Ok(Ack { statements })
}
