//! Retry budget, backoff, and what retries do to the warehouse.

mod common;

use std::time::Duration;

use common::*;
use gateflow_core::run::{RunStatus, TaskFailure, TaskStatus};
use gateflow_core::task::RetryPolicy;

#[tokio::test]
async fn test_transient_stage_failure_is_retried_until_success() {
    let wh = seeded_warehouse();
    wh.fail_next("COPY staging_events", 2);
    let graph = reference_graph(quick_retry(3));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    let attempts = result.attempts("stage_events");
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|i| i.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(attempts[0].status, TaskStatus::Failed);
    assert_eq!(attempts[1].status, TaskStatus::Failed);
    assert_eq!(attempts[2].status, TaskStatus::Succeeded);
    assert!(matches!(attempts[0].last_error, Some(TaskFailure::Handler { .. })));

    // Every attempt clears the table first, so the rows land exactly once.
    assert_eq!(wh.count_statements("DELETE FROM staging_events"), 3);
    assert_eq!(wh.row_count("staging_events"), Some(5));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_node() {
    let wh = seeded_warehouse();
    wh.fail_next("COPY staging_songs", u32::MAX);
    let graph = reference_graph(quick_retry(3));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Failed);
    let attempts = result.attempts("stage_songs");
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|i| i.status == TaskStatus::Failed));
    assert_eq!(wh.count_statements("COPY staging_songs"), 3);
    assert_eq!(result.instance(FACT).unwrap().status, TaskStatus::UpstreamFailed);
}

#[tokio::test]
async fn test_retry_waits_out_the_backoff() {
    let wh = seeded_warehouse();
    wh.fail_next("INSERT INTO users", 1);
    let graph = reference_graph(RetryPolicy::fixed(2, Duration::from_millis(60)));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    let attempts = result.attempts("load_user_dim_table");
    assert_eq!(attempts.len(), 2);
    let failed_at = attempts[0].finished_at_ms.unwrap();
    let retried_at = attempts[1].started_at_ms.unwrap();
    assert!(retried_at >= failed_at + 60, "{retried_at} < {failed_at} + 60");
}

#[tokio::test]
async fn test_exponential_backoff_grows_between_attempts() {
    let wh = seeded_warehouse();
    wh.fail_next("INSERT INTO time", 2);
    let retry = RetryPolicy::exponential(3, Duration::from_millis(25), Duration::from_secs(1));
    let graph = reference_graph(retry);
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    let a = result.attempts("load_time_dim_table");
    assert_eq!(a.len(), 3);
    assert!(a[1].started_at_ms.unwrap() >= a[0].finished_at_ms.unwrap() + 25);
    assert!(a[2].started_at_ms.unwrap() >= a[1].finished_at_ms.unwrap() + 50);
}

#[tokio::test]
async fn test_truncate_insert_retry_leaves_one_copy() {
    let wh = seeded_warehouse();
    wh.fail_next("INSERT INTO songs", 1);
    let graph = reference_graph(quick_retry(2));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    assert_eq!(wh.count_statements("TRUNCATE TABLE songs"), 2);
    assert_eq!(wh.row_count("songs"), Some(2));
}

#[tokio::test]
async fn test_quality_query_connection_errors_are_retried() {
    let wh = seeded_warehouse();
    wh.fail_next("SELECT COUNT(*) FROM users", 1);
    let graph = reference_graph(quick_retry(2));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    let gate = result.attempts(GATE);
    assert_eq!(gate.len(), 2);
    assert!(matches!(gate[0].last_error, Some(TaskFailure::Handler { .. })));
    assert_eq!(gate[1].status, TaskStatus::Succeeded);
}

#[tokio::test]
async fn test_retry_does_not_block_independent_siblings() {
    let wh = seeded_warehouse();
    wh.fail_next("INSERT INTO artists", 1);
    let graph = reference_graph(RetryPolicy::fixed(2, Duration::from_millis(80)));
    let result = engine(&wh, config()).run(&graph, 0).await.unwrap();

    assert_eq!(result.status(), RunStatus::Succeeded);
    let artists = result.attempts("load_artist_dim_table");
    let users = result.instance("load_user_dim_table").unwrap();
    // The sibling finished while the retry was still sleeping.
    assert!(users.finished_at_ms.unwrap() <= artists[1].started_at_ms.unwrap());
}
