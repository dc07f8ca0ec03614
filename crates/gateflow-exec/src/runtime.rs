//! Runtime: drive a compiled `Graph` to a terminal `Run`.
//!
//! Behavior:
//! - Ready nodes (every upstream succeeded, not yet instantiated) are
//!   dispatched in topological order, at most `max_parallel_tasks` at once.
//! - Each attempt runs on a blocking thread under the node's deadline. A timed
//!   out attempt is recorded as failed at the deadline and the run moves on;
//!   only that node's retry waits for the stray statement to return.
//! - Retryable failures wait out the node's backoff and run again as a new
//!   attempt record. Quality failures are never retried.
//! - A permanent failure marks every not-yet-instantiated descendant
//!   `UpstreamFailed`. With `fail_fast`, nothing new is dispatched afterwards.
//! - Abort is scoped to one run. It stops dispatch and cancels waiting
//!   retries; attempts in flight are allowed to finish and are recorded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{error, info, warn};

use gateflow_core::config::EngineConfig;
use gateflow_core::graph::Graph;
use gateflow_core::id::NodeId;
use gateflow_core::manifest::RunManifest;
use gateflow_core::run::{Run, RunResult, RunStatus};
use gateflow_core::task::{IdempotencyMode, TaskNode};
use gateflow_operators::{execute_node, Ack, OpError};
use gateflow_warehouse::ConnectionProvider;

use crate::metrics::RunMetrics;
use crate::scheduler::RunState;

/// Engine-side failures. Handler errors never show up here; they are
/// recorded on the task instance instead.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("run state: {0}")]
    State(#[from] gateflow_core::Error),
    #[error("node '{0}' is not part of the graph")]
    UnknownNode(String),
    #[error("completion channel closed")]
    ChannelClosed,
}

/// Cloneable signal that stops one run from dispatching more work.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

struct Completion {
    node: NodeId,
    slot: usize,
    attempt: u32,
    result: Result<Ack, OpError>,
    finished_ms: u64,
    /// The blocking call outlived the deadline and is still running.
    straggling: bool,
}

enum Event {
    Finished(Completion),
    /// A straggling call of this node returned.
    Drained(NodeId),
}

/// Engine owns the config and the connection provider; each run gets its
/// own abort signal.
pub struct Engine {
    cfg: EngineConfig,
    provider: Arc<dyn ConnectionProvider>,
}

impl Engine {
    pub fn new(cfg: EngineConfig, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self { cfg, provider }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    /// Execute one run of `graph` for the tick at `scheduled_at_ms`.
    pub async fn run(&self, graph: &Graph, scheduled_at_ms: u64) -> Result<RunResult, ExecError> {
        self.run_with_abort(graph, scheduled_at_ms, &AbortHandle::new())
            .await
    }

    /// Same as `run`, stopping early once `abort` is raised. A handle that is
    /// already raised dispatches nothing.
    pub async fn run_with_abort(
        &self,
        graph: &Graph,
        scheduled_at_ms: u64,
        abort: &AbortHandle,
    ) -> Result<RunResult, ExecError> {
        let graph_hash = graph.fingerprint()?;
        let mut run = Run::new(scheduled_at_ms);
        let started_ms = now_millis();
        run.begin()?;
        info!(run_id = %run.id, nodes = graph.len(), "run started");

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut st = RunState::new();
        let max_parallel = self.cfg.max_parallel_tasks.max(1);

        loop {
            let stopping = abort.is_aborted() || st.halted;
            if stopping {
                for node in st.cancel_retries() {
                    warn!(run_id = %run.id, node = %node, "retry cancelled");
                    self.fail_permanently(&mut run, &mut st, graph, &node)?;
                }
            } else {
                st.promote_due(Instant::now());
                while st.running < max_parallel {
                    let Some(ticket) = st.pop_dispatchable() else { break };
                    self.dispatch(&mut run, &mut st, graph, &ticket.node, ticket.attempt, &tx)?;
                }
                if st.running < max_parallel {
                    let ready = graph.topological_ready_set(&st.completed, &st.instantiated);
                    for id in ready.into_iter().take(max_parallel - st.running) {
                        self.dispatch(&mut run, &mut st, graph, &id, 1, &tx)?;
                    }
                }
            }

            if st.is_idle() {
                break;
            }

            let next_due = st.next_due();
            tokio::select! {
                event = rx.recv() => match event.ok_or(ExecError::ChannelClosed)? {
                    Event::Finished(done) => {
                        self.complete(&mut run, &mut st, graph, abort, done)?;
                    }
                    Event::Drained(node) => {
                        info!(run_id = %run.id, node = %node, "timed out call returned");
                        st.draining.remove(&node);
                    }
                },
                _ = sleep_until_due(next_due), if next_due.is_some() => {}
                _ = abort.notify.notified() => {
                    warn!(run_id = %run.id, "abort requested");
                }
            }
        }

        for node in graph.nodes() {
            if !st.instantiated.contains(&node.id) {
                run.push_instance(node.id.clone(), 1)?;
            }
        }

        let succeeded = st.all_succeeded(graph);
        let status = if succeeded {
            RunStatus::Succeeded
        } else {
            RunStatus::Failed
        };
        run.finish(status)?;

        let manifest = RunManifest::new(run.id, graph_hash, scheduled_at_ms, started_ms)
            .finish(now_millis());
        let result = RunResult {
            run,
            manifest,
            aborted: abort.is_aborted() && !succeeded,
        };

        let metrics = RunMetrics::from_result(&result);
        metrics.log(&result);
        Ok(result)
    }

    fn dispatch(
        &self,
        run: &mut Run,
        st: &mut RunState,
        graph: &Graph,
        id: &NodeId,
        attempt: u32,
        tx: &mpsc::UnboundedSender<Event>,
    ) -> Result<(), ExecError> {
        let node = graph
            .node(id.as_str())
            .ok_or_else(|| ExecError::UnknownNode(id.to_string()))?
            .clone();

        let slot = run.push_instance(id.clone(), attempt)?;
        let inst = run.instance_mut(slot)?;
        inst.mark_ready()?;
        inst.start(now_millis())?;
        st.instantiated.insert(id.clone());
        st.running += 1;

        info!(run_id = %run.id, node = %id, kind = %node.kind, attempt, "dispatching");

        let provider = Arc::clone(&self.provider);
        let tx = tx.clone();
        let id = id.clone();
        tokio::spawn(run_attempt(node, provider, slot, attempt, tx));
        Ok(())
    }

    fn complete(
        &self,
        run: &mut Run,
        st: &mut RunState,
        graph: &Graph,
        abort: &AbortHandle,
        done: Completion,
    ) -> Result<(), ExecError> {
        st.running = st.running.saturating_sub(1);
        let Completion {
            node: id,
            slot,
            attempt,
            result,
            finished_ms,
            straggling,
        } = done;
        if straggling {
            st.draining.insert(id.clone());
        }

        let err = match result {
            Ok(ack) => {
                run.instance_mut(slot)?.succeed(finished_ms)?;
                st.completed.insert(id.clone());
                info!(run_id = %run.id, node = %id, attempt, statements = ack.statements, "succeeded");
                return Ok(());
            }
            Err(e) => e,
        };

        run.instance_mut(slot)?.fail(finished_ms, err.to_failure())?;

        let node = graph
            .node(id.as_str())
            .ok_or_else(|| ExecError::UnknownNode(id.to_string()))?;
        let stopping = abort.is_aborted() || st.halted;

        if err.is_retryable() && node.retry.allows_retry_after(attempt) && !stopping {
            let delay = node.retry.delay_after(attempt);
            warn!(
                run_id = %run.id,
                node = %id,
                attempt,
                max_attempts = node.retry.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            warn_if_append_only(node);
            st.schedule_retry(id, attempt + 1, Instant::now() + delay);
            return Ok(());
        }

        error!(run_id = %run.id, node = %id, attempt, error = %err, "failed permanently");
        self.fail_permanently(run, st, graph, &id)
    }

    fn fail_permanently(
        &self,
        run: &mut Run,
        st: &mut RunState,
        graph: &Graph,
        failed: &NodeId,
    ) -> Result<(), ExecError> {
        st.failed.push(failed.clone());
        for down in graph.downstream_of(failed.as_str()) {
            if st.instantiated.contains(&down) {
                continue;
            }
            let slot = run.push_instance(down.clone(), 1)?;
            run.instance_mut(slot)?.upstream_failed(failed.clone())?;
            info!(run_id = %run.id, node = %down, upstream = %failed, "upstream failed");
            st.instantiated.insert(down);
        }
        if self.cfg.fail_fast {
            st.halted = true;
        }
        Ok(())
    }
}

fn warn_if_append_only(node: &TaskNode) {
    if node.idempotency == IdempotencyMode::AppendOnly {
        warn!(
            node = %node.id,
            table = %node.target,
            "retrying an append-only load; rows committed by the failed attempt will be duplicated"
        );
    }
}

/// Run one attempt on a blocking thread and report it as finished at the
/// deadline at the latest. A call that outlives its deadline is reported
/// again once it returns.
async fn run_attempt(
    node: TaskNode,
    provider: Arc<dyn ConnectionProvider>,
    slot: usize,
    attempt: u32,
    tx: mpsc::UnboundedSender<Event>,
) {
    let id = node.id.clone();
    let node_id = node.id.clone();
    let timeout = node.timeout();
    let mut handle = tokio::task::spawn_blocking(move || execute_node(&node, provider.as_ref()));

    let finished = |result: Result<Ack, OpError>, straggling: bool| {
        Event::Finished(Completion {
            node: id.clone(),
            slot,
            attempt,
            result,
            finished_ms: now_millis(),
            straggling,
        })
    };

    let Some(limit) = timeout else {
        let _ = tx.send(finished(joined(handle.await), false));
        return;
    };

    match tokio::time::timeout(limit, &mut handle).await {
        Ok(res) => {
            let _ = tx.send(finished(joined(res), false));
        }
        Err(_) => {
            let timed_out = Err(OpError::Timeout(limit.as_millis() as u64));
            let _ = tx.send(finished(timed_out, true));
            // The blocking call cannot be interrupted; the node stays draining until it returns.
            let _ = handle.await;
            let _ = tx.send(Event::Drained(node_id));
        }
    }
}

fn joined(res: Result<Result<Ack, OpError>, tokio::task::JoinError>) -> Result<Ack, OpError> {
    match res {
        Ok(inner) => inner,
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(OpError::Panicked(msg))
        }
        Err(e) => Err(OpError::Panicked(e.to_string())),
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    if let Some(due) = due {
        tokio::time::sleep_until(due).await;
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
