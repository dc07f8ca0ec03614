//! Engine configuration that downstream crates can serialize/deserialize.
//!
//! The retry/timeout fields are *defaults for the pipeline loader*: the loader
//! copies them onto each `TaskNode` it builds. The engine itself only reads
//! `max_parallel_tasks` and `fail_fast`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrently running task attempts within one run.
    pub max_parallel_tasks: usize,

    /// Attempts per node, first try included (the source DAG retries 3 times).
    pub default_max_attempts: u32,

    /// Delay between attempts.
    pub default_retry_delay_ms: u64,

    /// Double the delay after each failure.
    pub default_exponential_backoff: bool,

    /// Cap for exponential backoff.
    pub max_retry_delay_ms: u64,

    /// Per-attempt deadline; `None` means no deadline.
    pub default_task_timeout_ms: Option<u64>,

    /// Stop dispatching new nodes after the first permanent failure.
    pub fail_fast: bool,

    /// Connection id the operators use for the warehouse.
    pub warehouse_conn_id: String,

    /// Connection id the stage operator uses for object-store keys.
    pub object_store_conn_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            default_max_attempts: 4,
            default_retry_delay_ms: 5 * 60 * 1000,
            default_exponential_backoff: false,
            max_retry_delay_ms: 60 * 60 * 1000,
            default_task_timeout_ms: None,
            fail_fast: true,
            warehouse_conn_id: "redshift".to_string(),
            object_store_conn_id: "aws_credentials".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `GATEFLOW_MAX_PARALLEL_TASKS`
    /// - `GATEFLOW_MAX_ATTEMPTS`
    /// - `GATEFLOW_RETRY_DELAY_MS`
    /// - `GATEFLOW_EXPONENTIAL_BACKOFF` (`true`/`false`)
    /// - `GATEFLOW_MAX_RETRY_DELAY_MS`
    /// - `GATEFLOW_TASK_TIMEOUT_MS`
    /// - `GATEFLOW_FAIL_FAST` (`true`/`false`)
    /// - `GATEFLOW_WAREHOUSE_CONN`
    /// - `GATEFLOW_OBJECT_STORE_CONN`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading through `lookup` instead of the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(v) = lookup("GATEFLOW_MAX_PARALLEL_TASKS").and_then(|s| s.parse().ok()) {
            cfg.max_parallel_tasks = v;
        }

        if let Some(v) = lookup("GATEFLOW_MAX_ATTEMPTS").and_then(|s| s.parse().ok()) {
            cfg.default_max_attempts = v;
        }

        if let Some(v) = lookup("GATEFLOW_RETRY_DELAY_MS").and_then(|s| s.parse().ok()) {
            cfg.default_retry_delay_ms = v;
        }

        if let Some(v) = lookup("GATEFLOW_EXPONENTIAL_BACKOFF").and_then(|s| s.parse().ok()) {
            cfg.default_exponential_backoff = v;
        }

        if let Some(v) = lookup("GATEFLOW_MAX_RETRY_DELAY_MS").and_then(|s| s.parse().ok()) {
            cfg.max_retry_delay_ms = v;
        }

        if let Some(v) = lookup("GATEFLOW_TASK_TIMEOUT_MS").and_then(|s| s.parse().ok()) {
            cfg.default_task_timeout_ms = Some(v);
        }

        if let Some(v) = lookup("GATEFLOW_FAIL_FAST").and_then(|s| s.parse().ok()) {
            cfg.fail_fast = v;
        }

        if let Some(s) = lookup("GATEFLOW_WAREHOUSE_CONN") {
            cfg.warehouse_conn_id = s;
        }

        if let Some(s) = lookup("GATEFLOW_OBJECT_STORE_CONN") {
            cfg.object_store_conn_id = s;
        }

        cfg
    }

    /// Retry policy the loader attaches to nodes that do not declare one.
    pub fn default_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.default_max_attempts.max(1),
            backoff_ms: self.default_retry_delay_ms,
            exponential: self.default_exponential_backoff,
            max_backoff_ms: self.max_retry_delay_ms,
        }
    }

    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_ms.map(Duration::from_millis)
    }
}
