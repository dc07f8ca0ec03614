//! Human-readable rendering of a compiled graph.

use std::fmt::Write;

use gateflow_core::graph::Graph;
use gateflow_core::task::TaskNode;
use gateflow_operators::preview;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExplainLevel {
    /// Topological levels; nodes on one level may run concurrently.
    #[default]
    Levels,
    /// Levels plus the statements every node would issue.
    Statements,
}

fn describe(node: &TaskNode) -> String {
    let mut s = format!("{} [{}", node.id, node.kind);
    if !node.target.is_empty() {
        let _ = write!(s, " → {}, {:?}", node.target, node.idempotency);
    }
    if node.retry.max_attempts > 1 {
        let _ = write!(
            s,
            ", {} attempts / {}ms",
            node.retry.max_attempts, node.retry.backoff_ms
        );
    }
    if let Some(ms) = node.timeout_ms {
        let _ = write!(s, ", timeout {ms}ms");
    }
    if node.kind.is_gate() {
        s.push_str(", gate");
    }
    s.push(']');
    s
}

pub fn explain(graph: &Graph, level: ExplainLevel) -> String {
    let mut out = String::new();
    let levels = graph.levels();
    let _ = writeln!(out, "{} nodes, {} edges, {} levels", graph.len(), graph.edges().len(), levels.len());

    for (depth, ids) in levels.iter().enumerate() {
        let _ = writeln!(out, "level {depth}:");
        for id in ids {
            let Some(node) = graph.node(id.as_str()) else {
                continue;
            };
            let _ = writeln!(out, "  {}", describe(node));
            let ups = graph.upstream_of(id.as_str());
            if !ups.is_empty() {
                let names: Vec<&str> = ups.iter().map(|u| u.as_str()).collect();
                let _ = writeln!(out, "    after: {}", names.join(", "));
            }
            if level == ExplainLevel::Statements {
                for stmt in preview(node) {
                    for line in stmt.lines() {
                        let _ = writeln!(out, "    | {line}");
                    }
                }
            }
        }
    }
    out
}
