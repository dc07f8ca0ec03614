//! YAML → `PipelineDefinition` loader.
//!
//! Example:
//! ```yaml
//! name: sparkify
//! schedule: "0 * * * *"
//! defaults: { retries: 3, retry_delay_ms: 300000 }
//! tasks:
//!   - { id: stage_songs, kind: stage, target: staging_songs,
//!       bucket: udacity-dend, key: song-data, format: auto }
//!   - { id: load_songplays, kind: load_fact, target: songplays,
//!       query: "SELECT ...", depends_on: [stage_songs] }
//!   - id: quality
//!     kind: quality_check
//!     checks: [ { sql: "SELECT COUNT(*) FROM songplays", at_least: 1 } ]
//! edges:
//!   - { from: [load_songplays], to: [quality] }
//! ```
//!
//! `retries` counts retries, not attempts: `retries: 3` allows four attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use gateflow_core::config::EngineConfig;
use gateflow_core::graph::{compile, Graph};
use gateflow_core::id::NodeId;
use gateflow_core::task::{
    CopyAuth, CopyFormat, IdempotencyMode, Operation, Predicate, QualityCheck, RetryPolicy,
    TaskNode,
};

use crate::error::PlanError;

fn default_schedule() -> String {
    "0 * * * *".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDoc {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Cron expression; carried for the external trigger, never interpreted here.
    #[serde(default = "default_schedule")]
    pub schedule: String,
    #[serde(default)]
    pub defaults: PipelineDefaults,
    pub tasks: Vec<TaskDoc>,
    #[serde(default)]
    pub edges: Vec<EdgeDoc>,
}

/// Document-level overrides of `EngineConfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    pub retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub exponential_backoff: Option<bool>,
    pub max_retry_delay_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub max_parallel_tasks: Option<usize>,
    pub fail_fast: Option<bool>,
    pub warehouse_conn: Option<String>,
    pub object_store_conn: Option<String>,
}

impl PipelineDefaults {
    /// Layer these values over `cfg`.
    pub fn apply_to(&self, cfg: &mut EngineConfig) {
        if let Some(r) = self.retries {
            cfg.default_max_attempts = r.saturating_add(1);
        }
        if let Some(ms) = self.retry_delay_ms {
            cfg.default_retry_delay_ms = ms;
        }
        if let Some(b) = self.exponential_backoff {
            cfg.default_exponential_backoff = b;
        }
        if let Some(ms) = self.max_retry_delay_ms {
            cfg.max_retry_delay_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            cfg.default_task_timeout_ms = Some(ms);
        }
        if let Some(n) = self.max_parallel_tasks {
            cfg.max_parallel_tasks = n;
        }
        if let Some(b) = self.fail_fast {
            cfg.fail_fast = b;
        }
        if let Some(c) = &self.warehouse_conn {
            cfg.warehouse_conn_id = c.clone();
        }
        if let Some(c) = &self.object_store_conn {
            cfg.object_store_conn_id = c.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDoc {
    pub id: String,
    #[serde(flatten)]
    pub body: TaskBody,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub warehouse_conn: Option<String>,
}

fn default_format() -> String {
    "auto".to_string()
}

fn default_dimension_mode() -> IdempotencyMode {
    IdempotencyMode::TruncateInsert
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskBody {
    Stage {
        target: String,
        bucket: String,
        key: String,
        /// `auto` or a JSONPaths document URI.
        #[serde(default = "default_format")]
        format: String,
        #[serde(default)]
        iam_role: Option<String>,
        #[serde(default)]
        object_store_conn: Option<String>,
    },
    LoadFact {
        target: String,
        query: String,
    },
    LoadDimension {
        target: String,
        query: String,
        #[serde(default = "default_dimension_mode")]
        mode: IdempotencyMode,
    },
    QualityCheck {
        checks: Vec<CheckDoc>,
    },
    Barrier,
}

/// One check; exactly one comparison field must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckDoc {
    pub sql: String,
    #[serde(default)]
    pub at_least: Option<f64>,
    #[serde(default)]
    pub at_most: Option<f64>,
    #[serde(default)]
    pub equals: Option<f64>,
    #[serde(default)]
    pub non_zero: bool,
}

impl CheckDoc {
    fn predicate(&self) -> Result<Predicate, String> {
        let mut found = Vec::new();
        if let Some(v) = self.at_least {
            found.push(Predicate::AtLeast(v));
        }
        if let Some(v) = self.at_most {
            found.push(Predicate::AtMost(v));
        }
        if let Some(v) = self.equals {
            found.push(Predicate::Equals(v));
        }
        if self.non_zero {
            found.push(Predicate::NonZero);
        }
        match found.as_slice() {
            [p] => Ok(*p),
            [] => Err(format!("check '{}' has no comparison", self.sql)),
            _ => Err(format!("check '{}' has more than one comparison", self.sql)),
        }
    }
}

/// Collection → collection fan: every `from` precedes every `to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from: Vec<String>,
    pub to: Vec<String>,
}

/// Nodes and edges with every default resolved, ready for `compile`.
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    pub description: Option<String>,
    pub schedule: String,
    pub nodes: Vec<TaskNode>,
    pub edges: Vec<(NodeId, NodeId)>,
}

impl PipelineDefinition {
    pub fn compile(&self) -> Result<Graph, PlanError> {
        Ok(compile(self.nodes.clone(), &self.edges)?)
    }
}

pub fn parse_yaml_pipeline(yaml_src: &str) -> Result<PipelineDoc, PlanError> {
    Ok(serde_yaml::from_str(yaml_src)?)
}

fn build_node(task: &TaskDoc, cfg: &EngineConfig) -> Result<TaskNode, PlanError> {
    let mut node = match &task.body {
        TaskBody::Stage {
            target,
            bucket,
            key,
            format,
            iam_role,
            object_store_conn,
        } => {
            let bucket = bucket.trim_matches('/');
            let key = key.trim_matches('/');
            if bucket.is_empty() {
                return Err(PlanError::invalid(&task.id, "stage bucket is empty"));
            }
            let source = format!("s3://{bucket}/{key}");
            let mut node = TaskNode::stage(task.id.as_str(), target, source, CopyFormat::parse(format));
            match iam_role {
                Some(arn) => {
                    if let Operation::Copy { auth, .. } = &mut node.operation {
                        *auth = CopyAuth::IamRole(arn.clone());
                    }
                    node.object_store_conn = None;
                }
                None => {
                    let conn = object_store_conn
                        .clone()
                        .unwrap_or_else(|| cfg.object_store_conn_id.clone());
                    node = node.with_object_store_conn(conn);
                }
            }
            node
        }
        TaskBody::LoadFact { target, query } => TaskNode::load_fact(task.id.as_str(), target, query.as_str()),
        TaskBody::LoadDimension {
            target,
            query,
            mode,
        } => TaskNode::load_dimension(task.id.as_str(), target, query.as_str(), *mode),
        TaskBody::QualityCheck { checks } => {
            let checks = checks
                .iter()
                .map(|c| c.predicate().map(|p| QualityCheck::new(c.sql.clone(), p)))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|reason| PlanError::invalid(&task.id, reason))?;
            TaskNode::quality_check(task.id.as_str(), checks)
        }
        TaskBody::Barrier => TaskNode::barrier(task.id.as_str()),
    };

    let mut retry = cfg.default_retry_policy();
    if let Some(r) = task.retries {
        retry.max_attempts = r.saturating_add(1);
    }
    if let Some(ms) = task.retry_delay_ms {
        retry.backoff_ms = ms;
    }
    node = node.with_retry(retry);

    if let Some(ms) = task.timeout_ms.or(cfg.default_task_timeout_ms) {
        node = node.with_timeout(Duration::from_millis(ms));
    }
    let conn = task
        .warehouse_conn
        .clone()
        .unwrap_or_else(|| cfg.warehouse_conn_id.clone());
    node = node.with_warehouse_conn(conn);

    Ok(node.depends_on(task.depends_on.iter().map(String::as_str)))
}

/// Resolve every default against `cfg` and expand edge fans.
pub fn build_definition(doc: &PipelineDoc, cfg: &EngineConfig) -> Result<PipelineDefinition, PlanError> {
    let nodes = doc
        .tasks
        .iter()
        .map(|t| build_node(t, cfg))
        .collect::<Result<Vec<_>, _>>()?;

    let mut edges = Vec::new();
    for fan in &doc.edges {
        for from in &fan.from {
            for to in &fan.to {
                edges.push((NodeId::from(from.as_str()), NodeId::from(to.as_str())));
            }
        }
    }

    Ok(PipelineDefinition {
        name: doc.name.clone(),
        description: doc.description.clone(),
        schedule: doc.schedule.clone(),
        nodes,
        edges,
    })
}

/// Parse, layer the document's `defaults:` over `cfg`, build and compile.
/// Returns the effective config alongside the graph.
pub fn load_pipeline(
    yaml_src: &str,
    mut cfg: EngineConfig,
) -> Result<(PipelineDefinition, Graph, EngineConfig), PlanError> {
    let doc = parse_yaml_pipeline(yaml_src)?;
    doc.defaults.apply_to(&mut cfg);
    let def = build_definition(&doc, &cfg)?;
    let graph = def.compile()?;
    Ok((def, graph, cfg))
}
