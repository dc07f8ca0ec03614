//! Declarative task model: one `TaskNode` per unit of work in a pipeline.
//!
//! Nodes are immutable once compiled into a `Graph`. Everything the engine
//! needs to execute or retry a node lives on the node itself (retry policy,
//! timeout, connection ids), so nothing is read from ambient defaults at
//! execution time.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// Closed set of node kinds; the engine dispatches on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Stage,
    LoadFact,
    LoadDimension,
    QualityCheck,
    Barrier,
}

impl TaskKind {
    /// Gate kinds block their dependents until they succeed.
    pub fn is_gate(self) -> bool {
        matches!(self, TaskKind::QualityCheck | TaskKind::Barrier)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Stage => "stage",
            TaskKind::LoadFact => "load_fact",
            TaskKind::LoadDimension => "load_dimension",
            TaskKind::QualityCheck => "quality_check",
            TaskKind::Barrier => "barrier",
        };
        f.write_str(s)
    }
}

/// How repeating a write affects the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyMode {
    /// `DELETE FROM` the target, then write.
    ReplaceAll,
    /// `TRUNCATE TABLE` the target, then write.
    TruncateInsert,
    /// Write without clearing. Not idempotent under retry.
    AppendOnly,
}

impl IdempotencyMode {
    pub fn is_idempotent(self) -> bool {
        !matches!(self, IdempotencyMode::AppendOnly)
    }
}

/// Retry budget and delay between attempts of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be >= 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub backoff_ms: u64,
    /// Double the delay after each failed attempt, capped at `max_backoff_ms`.
    #[serde(default)]
    pub exponential: bool,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_backoff_ms() -> u64 {
    3_600_000
}

impl RetryPolicy {
    /// Single attempt, no retry.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            exponential: false,
            max_backoff_ms: 0,
        }
    }

    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
            exponential: false,
            max_backoff_ms: default_max_backoff_ms(),
        }
    }

    pub fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: initial.as_millis() as u64,
            exponential: true,
            max_backoff_ms: max.as_millis() as u64,
        }
    }

    /// Whether another attempt may follow a failure of `attempt` (1-based).
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return Duration::from_millis(self.backoff_ms);
        }
        let shift = attempt.saturating_sub(1).min(32);
        let ms = self.backoff_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Input layout for a bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyFormat {
    /// JSON with column names matched automatically.
    JsonAuto,
    /// JSON mapped through a JSONPaths document at this URI.
    JsonPaths(String),
}

impl CopyFormat {
    /// Accepts the pipeline-file spelling: `auto` or a JSONPaths URI.
    pub fn parse(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("auto") {
            CopyFormat::JsonAuto
        } else {
            CopyFormat::JsonPaths(s.trim().to_string())
        }
    }
}

/// How the bulk load authenticates against the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CopyAuth {
    /// Access keys resolved from the node's `object_store_conn`.
    #[default]
    AccessKeys,
    /// A warehouse-side role; no keys leave the credential provider.
    IamRole(String),
}

/// Comparison applied to the scalar a quality query returns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    AtLeast(f64),
    AtMost(f64),
    Equals(f64),
    NonZero,
}

impl Predicate {
    pub fn holds(&self, observed: f64) -> bool {
        match *self {
            Predicate::AtLeast(min) => observed >= min,
            Predicate::AtMost(max) => observed <= max,
            Predicate::Equals(v) => observed == v,
            Predicate::NonZero => observed != 0.0,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::AtLeast(v) => write!(f, ">= {v}"),
            Predicate::AtMost(v) => write!(f, "<= {v}"),
            Predicate::Equals(v) => write!(f, "== {v}"),
            Predicate::NonZero => f.write_str("!= 0"),
        }
    }
}

/// One `(query, predicate)` pair of a quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCheck {
    pub sql: String,
    pub predicate: Predicate,
}

impl QualityCheck {
    pub fn new(sql: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            sql: sql.into(),
            predicate,
        }
    }

    /// The source DAG's `(query, expected)` tuple: observed must be >= expected.
    pub fn at_least(sql: impl Into<String>, expected: f64) -> Self {
        Self::new(sql, Predicate::AtLeast(expected))
    }
}

/// What a node does when dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Operation {
    /// Bulk-load every object under `source` into the target.
    Copy {
        source: String,
        format: CopyFormat,
        #[serde(default)]
        auth: CopyAuth,
    },
    /// `INSERT INTO target` from this select.
    Insert { query: String },
    /// Ordered quality checks, evaluated fail-fast.
    Checks { checks: Vec<QualityCheck> },
    /// Marker node; nothing is executed.
    Noop,
}

/// Immutable definition of one unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: NodeId,
    pub kind: TaskKind,
    /// Table (or storage path) the node writes or checks.
    pub target: String,
    pub operation: Operation,
    pub idempotency: IdempotencyMode,
    pub retry: RetryPolicy,
    /// Per-attempt deadline; `None` waits indefinitely.
    pub timeout_ms: Option<u64>,
    pub depends_on: BTreeSet<NodeId>,
    pub warehouse_conn: String,
    pub object_store_conn: Option<String>,
}

impl TaskNode {
    fn base(id: impl Into<NodeId>, kind: TaskKind, target: &str, operation: Operation) -> Self {
        Self {
            id: id.into(),
            kind,
            target: target.to_string(),
            operation,
            idempotency: IdempotencyMode::AppendOnly,
            retry: RetryPolicy::none(),
            timeout_ms: None,
            depends_on: BTreeSet::new(),
            warehouse_conn: "redshift".to_string(),
            object_store_conn: None,
        }
    }

    /// Staging copy from `source` into `target`; always ReplaceAll.
    pub fn stage(
        id: impl Into<NodeId>,
        target: &str,
        source: impl Into<String>,
        format: CopyFormat,
    ) -> Self {
        let op = Operation::Copy {
            source: source.into(),
            format,
            auth: CopyAuth::AccessKeys,
        };
        let mut node = Self::base(id, TaskKind::Stage, target, op);
        node.idempotency = IdempotencyMode::ReplaceAll;
        node.object_store_conn = Some("aws_credentials".to_string());
        node
    }

    /// Fact load; append-only.
    pub fn load_fact(id: impl Into<NodeId>, target: &str, query: impl Into<String>) -> Self {
        let op = Operation::Insert {
            query: query.into(),
        };
        Self::base(id, TaskKind::LoadFact, target, op)
    }

    pub fn load_dimension(
        id: impl Into<NodeId>,
        target: &str,
        query: impl Into<String>,
        mode: IdempotencyMode,
    ) -> Self {
        let op = Operation::Insert {
            query: query.into(),
        };
        let mut node = Self::base(id, TaskKind::LoadDimension, target, op);
        node.idempotency = mode;
        node
    }

    pub fn quality_check(id: impl Into<NodeId>, checks: Vec<QualityCheck>) -> Self {
        Self::base(id, TaskKind::QualityCheck, "", Operation::Checks { checks })
    }

    pub fn barrier(id: impl Into<NodeId>) -> Self {
        Self::base(id, TaskKind::Barrier, "", Operation::Noop)
    }

    pub fn depends_on<I, N>(mut self, upstream: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        self.depends_on.extend(upstream.into_iter().map(Into::into));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_warehouse_conn(mut self, conn: impl Into<String>) -> Self {
        self.warehouse_conn = conn.into();
        self
    }

    pub fn with_object_store_conn(mut self, conn: impl Into<String>) -> Self {
        self.object_store_conn = Some(conn.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check that kind, operation, and idempotency mode agree.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("node id must not be empty".into());
        }
        if self.retry.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".into());
        }
        match (self.kind, &self.operation) {
            (TaskKind::Stage, Operation::Copy { source, auth, .. }) => {
                if self.idempotency != IdempotencyMode::ReplaceAll {
                    return Err("stage nodes must use replace_all".into());
                }
                if source.trim().is_empty() {
                    return Err("stage source location is empty".into());
                }
                if *auth == CopyAuth::AccessKeys && self.object_store_conn.is_none() {
                    return Err("stage with access keys needs an object_store_conn".into());
                }
            }
            (TaskKind::LoadFact | TaskKind::LoadDimension, Operation::Insert { query }) => {
                if self.kind == TaskKind::LoadFact && self.idempotency != IdempotencyMode::AppendOnly {
                    return Err("fact loads must use append_only".into());
                }
                if query.trim().is_empty() {
                    return Err("transform query is empty".into());
                }
            }
            (TaskKind::QualityCheck, Operation::Checks { checks }) => {
                if checks.is_empty() {
                    return Err("quality gate has no checks".into());
                }
                return Ok(());
            }
            (TaskKind::Barrier, Operation::Noop) => return Ok(()),
            (kind, op) => {
                return Err(format!("operation {op:?} does not fit a {kind} node"));
            }
        }
        if self.target.trim().is_empty() {
            return Err(format!("{} node has no target", self.kind));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_keeps_delay_constant() {
        let p = RetryPolicy::fixed(3, Duration::from_secs(300));
        assert_eq!(p.delay_after(1), Duration::from_secs(300));
        assert_eq!(p.delay_after(2), Duration::from_secs(300));
        assert!(p.allows_retry_after(2));
        assert!(!p.allows_retry_after(3));
    }

    #[test]
    fn exponential_policy_doubles_and_caps() {
        let p = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(350));
        assert_eq!(p.delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn copy_format_parses_auto_and_paths() {
        assert_eq!(CopyFormat::parse("auto"), CopyFormat::JsonAuto);
        assert_eq!(
            CopyFormat::parse("s3://bucket/log_json_path.json"),
            CopyFormat::JsonPaths("s3://bucket/log_json_path.json".into())
        );
    }

    #[test]
    fn predicates_compare_observed_values() {
        assert!(Predicate::AtLeast(1.0).holds(1.0));
        assert!(!Predicate::AtLeast(1.0).holds(0.0));
        assert!(Predicate::NonZero.holds(3.0));
        assert!(!Predicate::NonZero.holds(0.0));
        assert!(Predicate::Equals(2.0).holds(2.0));
        assert!(Predicate::AtMost(2.0).holds(1.0));
        assert_eq!(Predicate::AtLeast(1.0).to_string(), ">= 1");
    }

    #[test]
    fn stage_must_replace_all() {
        let mut node = TaskNode::stage("stage_events", "staging_events", "s3://b/log-data", CopyFormat::JsonAuto);
        assert!(node.validate().is_ok());
        node.idempotency = IdempotencyMode::AppendOnly;
        assert!(node.validate().unwrap_err().contains("replace_all"));
    }

    #[test]
    fn fact_load_must_append() {
        let mut node = TaskNode::load_fact("load_songplays", "songplays", "SELECT * FROM staging_events");
        assert!(node.validate().is_ok());
        for mode in [IdempotencyMode::TruncateInsert, IdempotencyMode::ReplaceAll] {
            node.idempotency = mode;
            assert!(node.validate().unwrap_err().contains("append_only"));
        }
    }

    #[test]
    fn mismatched_operation_is_rejected() {
        let mut node = TaskNode::barrier("stop");
        node.kind = TaskKind::LoadFact;
        assert!(node.validate().is_err());

        let gate = TaskNode::quality_check("gate", vec![]);
        assert!(gate.validate().unwrap_err().contains("no checks"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let node = TaskNode::barrier("stop").with_retry(RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::none()
        });
        assert!(node.validate().is_err());
    }
}
