//! Handler selection: one `match` over the closed set of node kinds.

use gateflow_core::task::{CopyAuth, IdempotencyMode, Operation, TaskKind, TaskNode};
use gateflow_warehouse::{ConnectionProvider, ObjectStoreCredentials};

use crate::sql::{self, CopyCredentials};
use crate::traits::{Ack, OpError};
use crate::{load, quality, stage};

/// Run one attempt of `node`, resolving its connections through `provider`.
pub fn execute_node(node: &TaskNode, provider: &dyn ConnectionProvider) -> Result<Ack, OpError> {
    match (node.kind, &node.operation) {
        (TaskKind::Barrier, Operation::Noop) => Ok(Ack::default()),

        (TaskKind::Stage, Operation::Copy { source, format, auth }) => {
            let wh = provider.warehouse(&node.warehouse_conn)?;
            match auth {
                CopyAuth::IamRole(arn) => {
                    stage::stage(wh.as_ref(), &node.target, source, format, CopyCredentials::Role(arn))
                }
                CopyAuth::AccessKeys => {
                    let conn = node.object_store_conn.as_deref().ok_or_else(|| {
                        OpError::Config(format!("{} has no object_store_conn", node.id))
                    })?;
                    let keys = provider.object_store(conn)?;
                    stage::stage(wh.as_ref(), &node.target, source, format, CopyCredentials::Keys(&keys))
                }
            }
        }

        (TaskKind::LoadFact | TaskKind::LoadDimension, Operation::Insert { query }) => {
            let wh = provider.warehouse(&node.warehouse_conn)?;
            load::load(wh.as_ref(), &node.target, query, node.idempotency)
        }

        (TaskKind::QualityCheck, Operation::Checks { checks }) => {
            let wh = provider.warehouse(&node.warehouse_conn)?;
            quality::check(wh.as_ref(), checks)
        }

        (kind, _) => Err(OpError::Config(format!(
            "{} has an operation that does not fit a {kind} node",
            node.id
        ))),
    }
}

/// Statements `node` would send, in order, with credentials masked.
pub fn preview(node: &TaskNode) -> Vec<String> {
    match &node.operation {
        Operation::Noop => Vec::new(),
        Operation::Copy { source, format, auth } => {
            let placeholder;
            let creds = match auth {
                CopyAuth::IamRole(arn) => CopyCredentials::Role(arn),
                CopyAuth::AccessKeys => {
                    let conn = node.object_store_conn.as_deref().unwrap_or("?");
                    placeholder = ObjectStoreCredentials::new(format!("<{conn}>"), "");
                    CopyCredentials::Keys(&placeholder)
                }
            };
            vec![
                sql::delete_all(&node.target),
                sql::copy_redacted(&node.target, source, format, creds),
            ]
        }
        Operation::Insert { query } => {
            let mut out = Vec::new();
            match node.idempotency {
                IdempotencyMode::ReplaceAll => out.push(sql::delete_all(&node.target)),
                IdempotencyMode::TruncateInsert => out.push(sql::truncate(&node.target)),
                IdempotencyMode::AppendOnly => {}
            }
            out.push(sql::insert_select(&node.target, query));
            out
        }
        Operation::Checks { checks } => checks.iter().map(|c| c.sql.clone()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use gateflow_core::task::{CopyFormat, IdempotencyMode, QualityCheck};
    use gateflow_warehouse::{MemoryWarehouse, ObjectStoreCredentials, Scalar, StaticProvider};

    fn provider(wh: &MemoryWarehouse) -> StaticProvider {
        StaticProvider::new()
            .with_warehouse("redshift", Arc::new(wh.clone()))
            .with_object_store("aws_credentials", ObjectStoreCredentials::new("AKIA", "secret"))
    }

    #[test]
    fn stage_resolves_keys_from_provider() {
        let wh = MemoryWarehouse::new().with_tables(&["staging_songs"]);
        wh.put_object("s3://udacity-dend/song-data/A/x.json", vec![vec![Scalar::Int(1)]]);
        let node = TaskNode::stage(
            "stage_songs",
            "staging_songs",
            "s3://udacity-dend/song-data",
            CopyFormat::JsonAuto,
        );

        let ack = execute_node(&node, &provider(&wh)).unwrap();
        assert_eq!(ack.statements, 2);
        let copy = &wh.statements()[1];
        assert!(copy.contains("ACCESS_KEY_ID 'AKIA'"));
        assert_eq!(wh.row_count("staging_songs"), Some(1));
    }

    #[test]
    fn missing_connection_is_a_retryable_handler_error() {
        let wh = MemoryWarehouse::new().with_tables(&["users"]);
        let node = TaskNode::load_dimension("load_users", "users", "SELECT 1", IdempotencyMode::TruncateInsert)
            .with_warehouse_conn("postgres");
        let err = execute_node(&node, &provider(&wh)).unwrap_err();
        assert!(err.is_retryable());
        assert!(wh.statements().is_empty());
    }

    #[test]
    fn preview_masks_keys() {
        let node = TaskNode::stage(
            "stage_events",
            "staging_events",
            "s3://udacity-dend/log-data",
            CopyFormat::JsonAuto,
        );
        let stmts = preview(&node);
        assert_eq!(stmts[0], "DELETE FROM staging_events");
        assert!(stmts[1].contains("ACCESS_KEY_ID '<aws_credentials>'"));
        assert!(stmts[1].contains("SECRET_ACCESS_KEY '***'"));

        let dim = TaskNode::load_dimension("load_time", "time", "SELECT 1", IdempotencyMode::TruncateInsert);
        assert_eq!(preview(&dim), vec!["TRUNCATE TABLE time", "INSERT INTO time\nSELECT 1"]);
    }

    #[test]
    fn barrier_touches_nothing() {
        let wh = MemoryWarehouse::new();
        let ack = execute_node(&TaskNode::barrier("stop_execution"), &provider(&wh)).unwrap();
        assert_eq!(ack, Ack::default());
        assert!(wh.statements().is_empty());
    }

    #[test]
    fn quality_node_runs_checks() {
        let wh = MemoryWarehouse::new().with_tables(&["users"]);
        let node = TaskNode::quality_check(
            "run_data_quality_checks",
            vec![QualityCheck::at_least("SELECT COUNT(*) FROM users", 1.0)],
        );
        let err = execute_node(&node, &provider(&wh)).unwrap_err();
        assert!(!err.is_retryable());
    }
}
