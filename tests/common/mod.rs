//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use gateflow_core::prelude::*;
use gateflow_exec::Engine;
use gateflow_warehouse::{
    ConnectionProvider, MemoryWarehouse, ObjectStoreCredentials, Row, Scalar, StaticProvider,
};

pub const STAGES: [&str; 2] = ["stage_events", "stage_songs"];
pub const FACT: &str = "load_songplays_fact_table";
pub const DIMS: [&str; 4] = [
    "load_user_dim_table",
    "load_song_dim_table",
    "load_artist_dim_table",
    "load_time_dim_table",
];
pub const GATE: &str = "run_data_quality_checks";
pub const STOP: &str = "stop_execution";

pub const TABLES: [&str; 7] = [
    "staging_events",
    "staging_songs",
    "songplays",
    "users",
    "songs",
    "artists",
    "time",
];

pub fn rows(n: i64) -> Vec<Row> {
    (0..n).map(|i| vec![Scalar::Int(i)]).collect()
}

pub fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::fixed(max_attempts, Duration::from_millis(20))
}

/// Stages → fact → four dimensions → quality gate → stop marker.
pub fn reference_nodes(retry: RetryPolicy) -> Vec<TaskNode> {
    let mut nodes = vec![
        TaskNode::stage(
            "stage_events",
            "staging_events",
            "s3://udacity-dend/log-data",
            CopyFormat::JsonPaths("s3://udacity-dend/log_json_path.json".into()),
        )
        .with_retry(retry),
        TaskNode::stage(
            "stage_songs",
            "staging_songs",
            "s3://udacity-dend/song-data",
            CopyFormat::JsonAuto,
        )
        .with_retry(retry),
        TaskNode::load_fact(FACT, "songplays", "SELECT * FROM staging_events").with_retry(retry),
    ];
    for (id, table) in DIMS.iter().zip(["users", "songs", "artists", "time"]) {
        nodes.push(
            TaskNode::load_dimension(
                *id,
                table,
                "SELECT * FROM staging_songs",
                IdempotencyMode::TruncateInsert,
            )
            .with_retry(retry),
        );
    }
    nodes.push(
        TaskNode::quality_check(
            GATE,
            vec![
                QualityCheck::at_least("SELECT COUNT(*) FROM users", 1.0),
                QualityCheck::at_least("SELECT COUNT(*) FROM songs", 1.0),
            ],
        )
        .with_retry(retry),
    );
    nodes.push(TaskNode::barrier(STOP));
    nodes
}

pub fn reference_graph(retry: RetryPolicy) -> Graph {
    graph_from(reference_nodes(retry))
}

pub fn graph_from(nodes: Vec<TaskNode>) -> Graph {
    let mut b = GraphBuilder::new();
    for n in nodes {
        b.add_node(n);
    }
    b.fan(STAGES, [FACT])
        .fan([FACT], DIMS)
        .fan(DIMS, [GATE])
        .fan([GATE], [STOP]);
    b.compile().expect("reference graph compiles")
}

/// Tables created, five log rows and four song rows in the object store,
/// two rows produced by every transform.
pub fn seeded_warehouse() -> MemoryWarehouse {
    let wh = MemoryWarehouse::new().with_tables(&TABLES);
    wh.put_object("s3://udacity-dend/log-data/2018/11/01.json", rows(3));
    wh.put_object("s3://udacity-dend/log-data/2018/11/02.json", rows(2));
    wh.put_object("s3://udacity-dend/song-data/A/A/A/a.json", rows(4));
    for t in ["songplays", "users", "songs", "artists", "time"] {
        wh.set_transform(t, rows(2));
    }
    wh
}

pub fn provider(wh: &MemoryWarehouse) -> Arc<dyn ConnectionProvider> {
    Arc::new(
        StaticProvider::new()
            .with_warehouse("redshift", Arc::new(wh.clone()))
            .with_object_store(
                "aws_credentials",
                ObjectStoreCredentials::new("AKIAEXAMPLE", "secret"),
            ),
    )
}

pub fn config() -> EngineConfig {
    EngineConfig {
        max_parallel_tasks: 8,
        ..EngineConfig::default()
    }
}

pub fn engine(wh: &MemoryWarehouse, cfg: EngineConfig) -> Engine {
    Engine::new(cfg, provider(wh))
}
