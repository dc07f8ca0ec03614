//! Bookkeeping for one run: which nodes finished, which are instantiated,
//! how many attempts are in flight, and which retries are waiting.

use std::collections::{HashSet, VecDeque};

use gateflow_core::graph::Graph;
use gateflow_core::id::NodeId;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTicket {
    pub node: NodeId,
    /// Attempt number the retry will run as.
    pub attempt: u32,
    pub due: Instant,
}

#[derive(Debug, Default)]
pub struct RunState {
    /// Nodes whose latest attempt succeeded.
    pub completed: HashSet<NodeId>,
    /// Nodes with at least one record in the run.
    pub instantiated: HashSet<NodeId>,
    /// Nodes that failed permanently, in failure order.
    pub failed: Vec<NodeId>,
    /// Attempts dispatched and not yet reported.
    pub running: usize,
    /// Set once a permanent failure stops further dispatch.
    pub halted: bool,
    /// Nodes whose timed-out call has not returned yet.
    pub draining: HashSet<NodeId>,
    sleeping: Vec<RetryTicket>,
    due: VecDeque<RetryTicket>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_retry(&mut self, node: NodeId, attempt: u32, due: Instant) {
        self.sleeping.push(RetryTicket { node, attempt, due });
    }

    /// Move every retry whose delay has elapsed to the dispatch queue,
    /// earliest first.
    pub fn promote_due(&mut self, now: Instant) {
        let (mut ready, rest): (Vec<_>, Vec<_>) =
            self.sleeping.drain(..).partition(|t| t.due <= now);
        self.sleeping = rest;
        ready.sort_by_key(|t| t.due);
        self.due.extend(ready);
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.sleeping.iter().map(|t| t.due).min()
    }

    /// Earliest due retry whose node has no call still draining.
    pub fn pop_dispatchable(&mut self) -> Option<RetryTicket> {
        let pos = self
            .due
            .iter()
            .position(|t| !self.draining.contains(&t.node))?;
        self.due.remove(pos)
    }

    /// Drop every waiting retry and return the affected nodes.
    pub fn cancel_retries(&mut self) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.due.drain(..).map(|t| t.node).collect();
        out.extend(self.sleeping.drain(..).map(|t| t.node));
        out
    }

    pub fn has_retries(&self) -> bool {
        !self.sleeping.is_empty() || !self.due.is_empty()
    }

    /// Nothing running and nothing waiting to be retried.
    pub fn is_idle(&self) -> bool {
        self.running == 0 && !self.has_retries()
    }

    pub fn all_succeeded(&self, graph: &Graph) -> bool {
        graph.nodes().iter().all(|n| self.completed.contains(&n.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn due_retries_are_promoted_in_due_order() {
        let t0 = Instant::now();
        let mut st = RunState::new();
        st.schedule_retry("late".into(), 2, t0 + Duration::from_millis(30));
        st.schedule_retry("early".into(), 2, t0 + Duration::from_millis(10));
        st.schedule_retry("later".into(), 3, t0 + Duration::from_secs(60));

        assert_eq!(st.next_due(), Some(t0 + Duration::from_millis(10)));
        st.promote_due(t0 + Duration::from_millis(40));
        assert_eq!(st.pop_dispatchable().unwrap().node.as_str(), "early");
        assert_eq!(st.pop_dispatchable().unwrap().node.as_str(), "late");
        assert!(st.pop_dispatchable().is_none());
        assert!(st.has_retries());
        assert!(!st.is_idle());
    }

    #[test]
    fn draining_node_is_skipped_until_it_returns() {
        let t0 = Instant::now();
        let mut st = RunState::new();
        st.schedule_retry("stage_songs".into(), 2, t0);
        st.schedule_retry("stage_events".into(), 2, t0 + Duration::from_millis(5));
        st.draining.insert("stage_songs".into());
        st.promote_due(t0 + Duration::from_millis(10));

        assert_eq!(st.pop_dispatchable().unwrap().node.as_str(), "stage_events");
        assert!(st.pop_dispatchable().is_none());
        assert!(!st.is_idle());

        st.draining.remove("stage_songs");
        assert_eq!(st.pop_dispatchable().unwrap().node.as_str(), "stage_songs");
        assert!(st.is_idle());
    }

    #[test]
    fn cancel_drains_both_queues() {
        let t0 = Instant::now();
        let mut st = RunState::new();
        st.schedule_retry("a".into(), 2, t0);
        st.schedule_retry("b".into(), 2, t0 + Duration::from_secs(300));
        st.promote_due(t0);
        let cancelled = st.cancel_retries();
        assert_eq!(cancelled, vec![NodeId::from("a"), NodeId::from("b")]);
        assert!(st.is_idle());
    }
}
