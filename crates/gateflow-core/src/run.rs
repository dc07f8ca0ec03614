//! Mutable execution records: one `Run` per schedule tick, one `TaskInstance`
//! per node attempt.
//!
//! Transitions are checked here so the engine cannot move a record backwards.
//! A terminal instance is never edited; a retry appends a new attempt record.
//! A terminal run rejects every further mutation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::{NodeId, RunId};
use crate::manifest::RunManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Waiting,
    Ready,
    Running,
    Succeeded,
    Failed,
    UpstreamFailed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::UpstreamFailed
        )
    }

    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Waiting, Ready)
                | (Waiting, UpstreamFailed)
                | (Ready, Running)
                | (Running, Succeeded)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why an attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TaskFailure {
    /// Statement, connection, or credential failure inside a handler.
    Handler { message: String },
    /// The attempt exceeded the node's deadline.
    Timeout { after_ms: u64 },
    /// The quality query returned no rows (table missing, query malformed).
    QualityNoRows { check: usize, sql: String },
    /// The quality query returned a value the predicate rejected.
    QualityMismatch {
        check: usize,
        sql: String,
        observed: String,
        expected: String,
    },
    /// Not executed because a dependency failed permanently.
    Upstream { failed: NodeId },
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Handler { message } => f.write_str(message),
            TaskFailure::Timeout { after_ms } => write!(f, "timed out after {after_ms}ms"),
            TaskFailure::QualityNoRows { check, sql } => {
                write!(f, "quality check #{check} returned no rows: {sql}")
            }
            TaskFailure::QualityMismatch {
                check,
                sql,
                observed,
                expected,
            } => write!(
                f,
                "quality check #{check} failed: {sql} expected {expected} but got {observed}"
            ),
            TaskFailure::Upstream { failed } => write!(f, "upstream '{failed}' failed"),
        }
    }
}

/// Execution record of one attempt of one node within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub node_id: NodeId,
    /// 1-based.
    pub attempt: u32,
    pub status: TaskStatus,
    pub started_at_ms: Option<u64>,
    pub finished_at_ms: Option<u64>,
    pub last_error: Option<TaskFailure>,
}

impl TaskInstance {
    pub fn new(node_id: NodeId, attempt: u32) -> Self {
        Self {
            node_id,
            attempt,
            status: TaskStatus::Waiting,
            started_at_ms: None,
            finished_at_ms: None,
            last_error: None,
        }
    }

    fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Transition {
                node: self.node_id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_ready(&mut self) -> Result<()> {
        self.transition(TaskStatus::Ready)
    }

    pub fn start(&mut self, now_ms: u64) -> Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at_ms = Some(now_ms);
        Ok(())
    }

    pub fn succeed(&mut self, now_ms: u64) -> Result<()> {
        self.transition(TaskStatus::Succeeded)?;
        self.finished_at_ms = Some(now_ms);
        Ok(())
    }

    pub fn fail(&mut self, now_ms: u64, failure: TaskFailure) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.finished_at_ms = Some(now_ms);
        self.last_error = Some(failure);
        Ok(())
    }

    pub fn upstream_failed(&mut self, failed: NodeId) -> Result<()> {
        self.transition(TaskStatus::UpstreamFailed)?;
        self.last_error = Some(TaskFailure::Upstream { failed });
        Ok(())
    }

    pub fn duration_ms(&self) -> Option<u64> {
        Some(self.finished_at_ms?.saturating_sub(self.started_at_ms?))
    }
}

/// One instantiation of the full graph at a schedule tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub scheduled_at_ms: u64,
    status: RunStatus,
    instances: Vec<TaskInstance>,
}

impl Run {
    pub fn new(scheduled_at_ms: u64) -> Self {
        Self {
            id: RunId::new(),
            scheduled_at_ms,
            status: RunStatus::Pending,
            instances: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Every attempt record in creation order.
    pub fn instances(&self) -> &[TaskInstance] {
        &self.instances
    }

    fn ensure_open(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::RunTerminal(self.id.to_string()));
        }
        Ok(())
    }

    pub fn begin(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.status != RunStatus::Pending {
            return Err(Error::Invariant(format!("run {} already started", self.id)));
        }
        self.status = RunStatus::InProgress;
        Ok(())
    }

    /// Append a new attempt record for `node` and return its slot.
    pub fn push_instance(&mut self, node: NodeId, attempt: u32) -> Result<usize> {
        self.ensure_open()?;
        self.instances.push(TaskInstance::new(node, attempt));
        Ok(self.instances.len() - 1)
    }

    /// Mutable access to a non-terminal record of an open run.
    pub fn instance_mut(&mut self, slot: usize) -> Result<&mut TaskInstance> {
        self.ensure_open()?;
        let inst = self
            .instances
            .get_mut(slot)
            .ok_or_else(|| Error::Invariant(format!("no instance in slot {slot}")))?;
        if inst.status.is_terminal() {
            return Err(Error::Invariant(format!(
                "instance {} attempt {} is terminal",
                inst.node_id, inst.attempt
            )));
        }
        Ok(inst)
    }

    pub fn finish(&mut self, status: RunStatus) -> Result<()> {
        self.ensure_open()?;
        if self.status != RunStatus::InProgress {
            return Err(Error::Invariant(format!("run {} was never started", self.id)));
        }
        if !status.is_terminal() {
            return Err(Error::Invariant(format!("{status:?} is not a terminal run status")));
        }
        self.status = status;
        Ok(())
    }

    /// The most recent attempt record of every node, keyed by node id.
    pub fn latest(&self) -> BTreeMap<&NodeId, &TaskInstance> {
        let mut out = BTreeMap::new();
        for inst in &self.instances {
            out.insert(&inst.node_id, inst);
        }
        out
    }
}

/// Archived outcome of a run: the terminal `Run` plus its manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run: Run,
    pub manifest: RunManifest,
    /// An abort signal stopped dispatch before the graph drained.
    pub aborted: bool,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        self.run.status()
    }

    pub fn instances(&self) -> &[TaskInstance] {
        self.run.instances()
    }

    /// Latest attempt record of `node`.
    pub fn instance(&self, node: &str) -> Option<&TaskInstance> {
        self.run
            .instances()
            .iter()
            .rev()
            .find(|i| i.node_id.as_str() == node)
    }

    /// All attempt records of `node`, oldest first.
    pub fn attempts(&self, node: &str) -> Vec<&TaskInstance> {
        self.run
            .instances()
            .iter()
            .filter(|i| i.node_id.as_str() == node)
            .collect()
    }

    /// Latest records that did not succeed, with their errors.
    pub fn failures(&self) -> Vec<&TaskInstance> {
        self.run
            .latest()
            .into_values()
            .filter(|i| i.status != TaskStatus::Succeeded)
            .collect()
    }
}
