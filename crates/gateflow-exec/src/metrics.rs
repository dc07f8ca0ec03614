//! Run metrics, derived from the finished `RunResult` and logged once.

use serde::Serialize;
use tracing::info;

use gateflow_core::run::{RunResult, TaskStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunMetrics {
    pub nodes: usize,
    /// Attempt records that actually ran.
    pub attempts: usize,
    pub retries: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub upstream_failed: usize,
    /// Nodes never dispatched.
    pub not_run: usize,
    pub wall_ms: u64,
    /// Longest single attempt, as `(node, ms)`.
    pub slowest: Option<(String, u64)>,
}

impl RunMetrics {
    pub fn from_result(result: &RunResult) -> Self {
        let mut m = RunMetrics {
            wall_ms: result.manifest.duration_ms(),
            ..Default::default()
        };

        for inst in result.instances() {
            if inst.started_at_ms.is_some() {
                m.attempts += 1;
                if inst.attempt > 1 {
                    m.retries += 1;
                }
            }
            if let Some(ms) = inst.duration_ms() {
                if m.slowest.as_ref().map_or(true, |(_, best)| ms > *best) {
                    m.slowest = Some((inst.node_id.to_string(), ms));
                }
            }
        }

        for inst in result.run.latest().into_values() {
            m.nodes += 1;
            match inst.status {
                TaskStatus::Succeeded => m.succeeded += 1,
                TaskStatus::Failed => m.failed += 1,
                TaskStatus::UpstreamFailed => m.upstream_failed += 1,
                TaskStatus::Waiting | TaskStatus::Ready | TaskStatus::Running => m.not_run += 1,
            }
        }
        m
    }

    pub fn log(&self, result: &RunResult) {
        info!(
            run_id = %result.run.id,
            status = ?result.status(),
            aborted = result.aborted,
            nodes = self.nodes,
            attempts = self.attempts,
            retries = self.retries,
            succeeded = self.succeeded,
            failed = self.failed,
            upstream_failed = self.upstream_failed,
            not_run = self.not_run,
            wall_ms = self.wall_ms,
            "run finished"
        );
    }
}
