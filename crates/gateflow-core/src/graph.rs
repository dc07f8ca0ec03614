//! Dependency graph compilation and queries.
//!
//! `compile` turns a flat list of `TaskNode`s plus an explicit edge list into an
//! immutable `Graph`. Edges are `(upstream, downstream)` pairs; they are merged
//! with each node's own `depends_on`. The compiled graph stores nodes in a
//! deterministic topological order (declaration order breaks ties).

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::hash::{hash_serde, Hash256};
use crate::id::NodeId;
use crate::task::TaskNode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(NodeId),

    #[error("edge {from} -> {to} references an undeclared node")]
    UnknownNode { from: NodeId, to: NodeId },

    #[error("cyclic dependency: {}", format_cycle(.cycle))]
    CyclicDependency { cycle: Vec<NodeId> },

    #[error("invalid node '{id}': {reason}")]
    InvalidNode { id: NodeId, reason: String },
}

fn format_cycle(cycle: &[NodeId]) -> String {
    cycle
        .iter()
        .map(NodeId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Immutable DAG of task nodes.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<TaskNode>,
    index: HashMap<NodeId, usize>,
    upstream: Vec<BTreeSet<usize>>,
    downstream: Vec<BTreeSet<usize>>,
}

/// Compile nodes and `(upstream, downstream)` edges into a validated graph.
pub fn compile(nodes: Vec<TaskNode>, edges: &[(NodeId, NodeId)]) -> Result<Graph, CompileError> {
    let mut index: HashMap<NodeId, usize> = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        if index.insert(node.id.clone(), i).is_some() {
            return Err(CompileError::DuplicateNode(node.id.clone()));
        }
        node.validate().map_err(|reason| CompileError::InvalidNode {
            id: node.id.clone(),
            reason,
        })?;
    }

    let n = nodes.len();
    let mut upstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let declared = nodes
        .iter()
        .flat_map(|node| node.depends_on.iter().map(|up| (up.clone(), node.id.clone())));
    for (from, to) in declared.chain(edges.iter().cloned()) {
        match (index.get(&from), index.get(&to)) {
            (Some(&u), Some(&v)) => {
                upstream[v].insert(u);
            }
            _ => return Err(CompileError::UnknownNode { from, to }),
        }
    }

    let mut downstream: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    for (v, ups) in upstream.iter().enumerate() {
        for &u in ups {
            downstream[u].insert(v);
        }
    }

    // Kahn's algorithm; the BTreeSet keeps declaration order among ready nodes.
    let mut in_degree: Vec<usize> = upstream.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(u) = ready.pop_first() {
        order.push(u);
        for &v in &downstream[u] {
            in_degree[v] -= 1;
            if in_degree[v] == 0 {
                ready.insert(v);
            }
        }
    }

    if order.len() < n {
        let cycle = find_cycle(&downstream, &in_degree)
            .into_iter()
            .map(|i| nodes[i].id.clone())
            .collect();
        return Err(CompileError::CyclicDependency { cycle });
    }

    // Re-index in topological order and materialise the full upstream set on each node.
    let mut remap = vec![0usize; n];
    for (new, &old) in order.iter().enumerate() {
        remap[old] = new;
    }
    let ids: Vec<NodeId> = nodes.iter().map(|node| node.id.clone()).collect();
    let mut tagged: Vec<(usize, usize, TaskNode)> = nodes
        .into_iter()
        .enumerate()
        .map(|(old, node)| (remap[old], old, node))
        .collect();
    tagged.sort_by_key(|(new, _, _)| *new);

    let mut sorted = Vec::with_capacity(n);
    let mut sorted_up = Vec::with_capacity(n);
    let mut sorted_down = Vec::with_capacity(n);
    for (_, old, mut node) in tagged {
        node.depends_on = upstream[old].iter().map(|&u| ids[u].clone()).collect();
        sorted_up.push(upstream[old].iter().map(|&u| remap[u]).collect());
        sorted_down.push(downstream[old].iter().map(|&d| remap[d]).collect());
        sorted.push(node);
    }
    let index = sorted
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.clone(), i))
        .collect();

    Ok(Graph {
        nodes: sorted,
        index,
        upstream: sorted_up,
        downstream: sorted_down,
    })
}

/// Walk the nodes Kahn could not order and return one cycle, closed on its start.
fn find_cycle(downstream: &[BTreeSet<usize>], in_degree: &[usize]) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        OnStack,
        Done,
    }

    let n = downstream.len();
    let mut mark = vec![Mark::New; n];
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        u: usize,
        downstream: &[BTreeSet<usize>],
        in_degree: &[usize],
        mark: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        mark[u] = Mark::OnStack;
        stack.push(u);
        for &v in &downstream[u] {
            if in_degree[v] == 0 {
                continue;
            }
            match mark[v] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&s| s == v).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(v);
                    return Some(cycle);
                }
                Mark::New => {
                    if let Some(c) = visit(v, downstream, in_degree, mark, stack) {
                        return Some(c);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        mark[u] = Mark::Done;
        None
    }

    for start in 0..n {
        if in_degree[start] > 0 && mark[start] == Mark::New {
            if let Some(c) = visit(start, downstream, in_degree, &mut mark, &mut stack) {
                return c;
            }
        }
    }
    Vec::new()
}

impl Graph {
    /// Nodes in topological order.
    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `id`.
    pub fn upstream_of(&self, id: &str) -> BTreeSet<NodeId> {
        self.neighbours(id, &self.upstream)
    }

    /// Direct dependents of `id`.
    pub fn dependents_of(&self, id: &str) -> BTreeSet<NodeId> {
        self.neighbours(id, &self.downstream)
    }

    fn neighbours(&self, id: &str, adj: &[BTreeSet<usize>]) -> BTreeSet<NodeId> {
        self.index
            .get(id)
            .map(|&i| adj[i].iter().map(|&j| self.nodes[j].id.clone()).collect())
            .unwrap_or_default()
    }

    /// Every node reachable from `id` (excluding `id`): the subgraph a failure dominates.
    pub fn downstream_of(&self, id: &str) -> BTreeSet<NodeId> {
        let Some(&start) = self.index.get(id) else {
            return BTreeSet::new();
        };
        let mut seen: BTreeSet<usize> = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(u) = stack.pop() {
            for &v in &self.downstream[u] {
                if seen.insert(v) {
                    stack.push(v);
                }
            }
        }
        seen.into_iter().map(|i| self.nodes[i].id.clone()).collect()
    }

    /// Nodes whose whole upstream set is in `completed` and that are not in
    /// `instantiated`, in topological order.
    pub fn topological_ready_set(
        &self,
        completed: &HashSet<NodeId>,
        instantiated: &HashSet<NodeId>,
    ) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| !instantiated.contains(&node.id))
            .filter(|(i, _)| {
                self.upstream[*i]
                    .iter()
                    .all(|&u| completed.contains(&self.nodes[u].id))
            })
            .map(|(_, node)| node.id.clone())
            .collect()
    }

    /// Nodes with no dependencies.
    pub fn roots(&self) -> Vec<NodeId> {
        self.select(|i| self.upstream[i].is_empty())
    }

    /// Nodes nothing depends on.
    pub fn sinks(&self) -> Vec<NodeId> {
        self.select(|i| self.downstream[i].is_empty())
    }

    fn select(&self, pred: impl Fn(usize) -> bool) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| pred(i))
            .map(|i| self.nodes[i].id.clone())
            .collect()
    }

    /// All `(upstream, downstream)` pairs in topological order of the upstream.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut out = Vec::new();
        for (u, downs) in self.downstream.iter().enumerate() {
            for &v in downs {
                out.push((self.nodes[u].id.clone(), self.nodes[v].id.clone()));
            }
        }
        out
    }

    /// Group nodes by longest distance from a root. Nodes in one level have no
    /// mutual dependencies and may run concurrently.
    pub fn levels(&self) -> Vec<Vec<NodeId>> {
        let mut depth = vec![0usize; self.nodes.len()];
        for i in 0..self.nodes.len() {
            let d = self.upstream[i]
                .iter()
                .map(|&u| depth[u] + 1)
                .max()
                .unwrap_or(0);
            depth[i] = d;
        }
        let max = depth.iter().copied().max().map_or(0, |d| d + 1);
        let mut levels = vec![Vec::new(); max];
        for (i, d) in depth.into_iter().enumerate() {
            levels[d].push(self.nodes[i].id.clone());
        }
        levels
    }

    /// Stable digest of the compiled definition, recorded in run manifests.
    pub fn fingerprint(&self) -> crate::error::Result<Hash256> {
        hash_serde(&self.nodes)
    }
}

/// Explicit builder that replaces operator-overloaded edge wiring.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<TaskNode>,
    edges: Vec<(NodeId, NodeId)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: TaskNode) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn add_edge(&mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// `node` depends on every id in `upstream`.
    pub fn depends_on<I, N>(&mut self, node: impl Into<NodeId>, upstream: I) -> &mut Self
    where
        I: IntoIterator<Item = N>,
        N: Into<NodeId>,
    {
        let node = node.into();
        for up in upstream {
            self.edges.push((up.into(), node.clone()));
        }
        self
    }

    /// Every node in `from` feeds every node in `to`.
    pub fn fan<A, B, N, M>(&mut self, from: A, to: B) -> &mut Self
    where
        A: IntoIterator<Item = N>,
        B: IntoIterator<Item = M>,
        N: Into<NodeId>,
        M: Into<NodeId>,
    {
        let to: Vec<NodeId> = to.into_iter().map(Into::into).collect();
        for f in from {
            let f = f.into();
            for t in &to {
                self.edges.push((f.clone(), t.clone()));
            }
        }
        self
    }

    pub fn compile(self) -> Result<Graph, CompileError> {
        compile(self.nodes, &self.edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{CopyFormat, IdempotencyMode, QualityCheck};

    fn ids(v: &[&str]) -> Vec<NodeId> {
        v.iter().map(|s| NodeId::from(*s)).collect()
    }

    fn set(v: &[&str]) -> HashSet<NodeId> {
        v.iter().map(|s| NodeId::from(*s)).collect()
    }

    fn diamond() -> Graph {
        let mut b = GraphBuilder::new();
        b.add_node(TaskNode::barrier("a"))
            .add_node(TaskNode::barrier("b"))
            .add_node(TaskNode::barrier("c"))
            .add_node(TaskNode::barrier("d"))
            .fan(["a"], ["b", "c"])
            .fan(["b", "c"], ["d"]);
        b.compile().unwrap()
    }

    #[test]
    fn ready_set_waits_for_full_upstream() {
        let g = diamond();
        assert_eq!(g.topological_ready_set(&set(&[]), &set(&[])), ids(&["a"]));
        assert_eq!(
            g.topological_ready_set(&set(&["a"]), &set(&["a"])),
            ids(&["b", "c"])
        );
        assert!(g
            .topological_ready_set(&set(&["a", "b"]), &set(&["a", "b", "c"]))
            .is_empty());
        assert_eq!(
            g.topological_ready_set(&set(&["a", "b", "c"]), &set(&["a", "b", "c"])),
            ids(&["d"])
        );
    }

    #[test]
    fn downstream_is_transitive() {
        let g = diamond();
        let down: Vec<NodeId> = g.downstream_of("a").into_iter().collect();
        assert_eq!(down, ids(&["b", "c", "d"]));
        assert!(g.downstream_of("d").is_empty());
        assert!(g.downstream_of("missing").is_empty());
    }

    #[test]
    fn depends_on_merges_with_edges() {
        let nodes = vec![
            TaskNode::barrier("a"),
            TaskNode::barrier("b").depends_on(["a"]),
            TaskNode::barrier("c"),
        ];
        let g = compile(nodes, &[(NodeId::from("b"), NodeId::from("c"))]).unwrap();
        assert_eq!(g.upstream_of("c"), BTreeSet::from([NodeId::from("b")]));
        assert_eq!(g.node("b").unwrap().depends_on.len(), 1);
        assert_eq!(g.roots(), ids(&["a"]));
        assert_eq!(g.sinks(), ids(&["c"]));
    }

    #[test]
    fn nodes_come_out_topologically_sorted() {
        let nodes = vec![
            TaskNode::barrier("last").depends_on(["mid"]),
            TaskNode::barrier("mid").depends_on(["first"]),
            TaskNode::barrier("first"),
        ];
        let g = compile(nodes, &[]).unwrap();
        let order: Vec<&str> = g.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["first", "mid", "last"]);
        assert_eq!(g.edges().len(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = compile(vec![TaskNode::barrier("x"), TaskNode::barrier("x")], &[]).unwrap_err();
        assert_eq!(err, CompileError::DuplicateNode("x".into()));
    }

    #[test]
    fn unknown_endpoint_is_rejected() {
        let err = compile(
            vec![TaskNode::barrier("x")],
            &[(NodeId::from("x"), NodeId::from("ghost"))],
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnknownNode { .. }));
    }

    #[test]
    fn cycle_is_named() {
        let nodes = vec![
            TaskNode::barrier("root"),
            TaskNode::barrier("a").depends_on(["root", "c"]),
            TaskNode::barrier("b").depends_on(["a"]),
            TaskNode::barrier("c").depends_on(["b"]),
        ];
        let err = compile(nodes, &[]).unwrap_err();
        let CompileError::CyclicDependency { cycle } = err else {
            panic!("expected cycle, got {err:?}");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        for id in ["a", "b", "c"] {
            assert!(cycle.contains(&NodeId::from(id)));
        }
        assert!(!cycle.contains(&NodeId::from("root")));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let err = compile(vec![TaskNode::barrier("solo").depends_on(["solo"])], &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cyclic dependency: solo -> solo".to_string()
        );
    }

    #[test]
    fn invalid_node_fails_compile() {
        let gate = TaskNode::quality_check("gate", vec![]);
        assert!(matches!(
            compile(vec![gate], &[]),
            Err(CompileError::InvalidNode { .. })
        ));
    }

    #[test]
    fn levels_group_independent_siblings() {
        let mut b = GraphBuilder::new();
        b.add_node(TaskNode::stage("s1", "staging_events", "s3://b/log", CopyFormat::JsonAuto))
            .add_node(TaskNode::stage("s2", "staging_songs", "s3://b/song", CopyFormat::JsonAuto))
            .add_node(TaskNode::load_fact("fact", "songplays", "SELECT 1"))
            .add_node(TaskNode::load_dimension(
                "dim",
                "users",
                "SELECT 1",
                IdempotencyMode::TruncateInsert,
            ))
            .add_node(TaskNode::quality_check(
                "gate",
                vec![QualityCheck::at_least("SELECT COUNT(*) FROM users", 1.0)],
            ))
            .fan(["s1", "s2"], ["fact"])
            .depends_on("dim", ["fact"])
            .add_edge("dim", "gate");
        let g = b.compile().unwrap();
        assert_eq!(
            g.levels(),
            vec![ids(&["s1", "s2"]), ids(&["fact"]), ids(&["dim"]), ids(&["gate"])]
        );
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive() {
        let a = diamond().fingerprint().unwrap();
        let b = diamond().fingerprint().unwrap();
        assert_eq!(a, b);

        let mut other = GraphBuilder::new();
        other.add_node(TaskNode::barrier("a"));
        assert_ne!(a, other.compile().unwrap().fingerprint().unwrap());
    }
}
