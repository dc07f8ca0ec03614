//! Compile-time checks and scheduling queries on the reference graph.

mod common;

use std::collections::{BTreeSet, HashSet};

use common::*;
use gateflow_core::graph::{compile, CompileError, GraphBuilder};
use gateflow_core::id::NodeId;
use gateflow_core::task::{RetryPolicy, TaskNode};

fn ids(v: &[&str]) -> HashSet<NodeId> {
    v.iter().map(|s| NodeId::from(*s)).collect()
}

#[test]
fn test_reference_graph_levels() {
    let graph = reference_graph(RetryPolicy::none());
    let widths: Vec<usize> = graph.levels().iter().map(Vec::len).collect();
    assert_eq!(widths, vec![2, 1, 4, 1, 1]);
    assert_eq!(graph.roots(), STAGES.map(NodeId::from).to_vec());
    assert_eq!(graph.sinks(), vec![NodeId::from(STOP)]);
    assert_eq!(graph.edges().len(), 2 + 4 + 4 + 1);
}

#[test]
fn test_ready_set_walks_the_pipeline() {
    let graph = reference_graph(RetryPolicy::none());
    let none = HashSet::new();

    let first: HashSet<NodeId> = graph.topological_ready_set(&none, &none).into_iter().collect();
    assert_eq!(first, ids(&STAGES));

    // One stage done is not enough for the fact.
    let half = ids(&["stage_events"]);
    assert!(graph.topological_ready_set(&half, &ids(&STAGES)).is_empty());

    let staged = ids(&STAGES);
    assert_eq!(
        graph.topological_ready_set(&staged, &staged),
        vec![NodeId::from(FACT)]
    );

    let mut done = staged.clone();
    done.insert(FACT.into());
    let dims: HashSet<NodeId> = graph
        .topological_ready_set(&done, &done)
        .into_iter()
        .collect();
    assert_eq!(dims, ids(&DIMS));

    // Three of four dimensions finished: the gate still waits.
    done.extend(DIMS[..3].iter().map(|d| NodeId::from(*d)));
    let mut started = done.clone();
    started.insert(DIMS[3].into());
    assert!(graph.topological_ready_set(&done, &started).is_empty());
}

#[test]
fn test_downstream_of_fact_is_everything_after_it() {
    let graph = reference_graph(RetryPolicy::none());
    let expected: BTreeSet<NodeId> = DIMS
        .iter()
        .chain([GATE, STOP].iter())
        .map(|s| NodeId::from(*s))
        .collect();
    assert_eq!(graph.downstream_of(FACT), expected);
    assert!(graph.downstream_of(STOP).is_empty());
    assert_eq!(graph.downstream_of("stage_events").len(), 7);
    assert_eq!(graph.dependents_of(FACT).len(), DIMS.len());
    assert_eq!(graph.dependents_of(GATE), [STOP].map(NodeId::from).into());
}

#[test]
fn test_back_edge_is_rejected_with_the_cycle() {
    let mut b = GraphBuilder::new();
    for n in reference_nodes(RetryPolicy::none()) {
        b.add_node(n);
    }
    b.fan(STAGES, [FACT])
        .fan([FACT], DIMS)
        .fan(DIMS, [GATE])
        .add_edge(GATE, FACT);
    let err = b.compile().unwrap_err();
    let CompileError::CyclicDependency { cycle } = &err else {
        panic!("expected cycle, got {err:?}");
    };
    assert!(cycle.contains(&NodeId::from(FACT)));
    assert!(cycle.contains(&NodeId::from(GATE)));
    assert!(!cycle.contains(&NodeId::from("stage_events")));
    assert!(err.to_string().starts_with("cyclic dependency: "));
}

#[test]
fn test_duplicate_and_dangling_ids_are_rejected() {
    let dup = compile(
        vec![TaskNode::barrier("start"), TaskNode::barrier("start")],
        &[],
    )
    .unwrap_err();
    assert_eq!(dup, CompileError::DuplicateNode("start".into()));

    let dangling = compile(
        vec![TaskNode::barrier("start").depends_on(["begin_execution"])],
        &[],
    )
    .unwrap_err();
    assert!(matches!(dangling, CompileError::UnknownNode { .. }));
}

#[test]
fn test_shape_is_not_hard_coded() {
    // A diamond of markers, unrelated to the warehouse pipeline.
    let mut b = GraphBuilder::new();
    b.add_node(TaskNode::barrier("start"))
        .add_node(TaskNode::barrier("a"))
        .add_node(TaskNode::barrier("b"))
        .add_node(TaskNode::barrier("end"))
        .fan(["start"], ["a", "b"])
        .depends_on("end", ["a", "b"]);
    let graph = b.compile().unwrap();
    let widths: Vec<usize> = graph.levels().iter().map(Vec::len).collect();
    assert_eq!(widths, vec![1, 2, 1]);
    assert_eq!(graph.upstream_of("end"), ["a", "b"].map(NodeId::from).into());
}

#[test]
fn test_fingerprint_tracks_node_definitions() {
    let a = reference_graph(RetryPolicy::none());
    let b = reference_graph(RetryPolicy::none());
    let c = reference_graph(quick_retry(3));
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
}

#[test]
fn test_fact_load_cannot_be_made_idempotent() {
    let mut nodes = reference_nodes(RetryPolicy::none());
    for n in nodes.iter_mut() {
        if n.id.as_str() == FACT {
            n.idempotency = gateflow_core::task::IdempotencyMode::TruncateInsert;
        }
    }
    let err = compile(nodes, &[]).unwrap_err();
    match err {
        CompileError::InvalidNode { id, reason } => {
            assert_eq!(id, NodeId::from(FACT));
            assert!(reason.contains("append_only"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}
