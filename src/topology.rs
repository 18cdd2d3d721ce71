//! NUMA placement of the worker team, consumed by the adaptive dispatcher to
//! bias steals toward same-node victims.
//!
//! This crate does not discover the machine topology; the caller provides it
//! through the [`Topology`] trait. [`SingleNode`] is the trivial implementation
//! for machines (or callers) without NUMA; [`NodeMap`] wraps an explicit
//! worker-to-node assignment.

/// Reports NUMA-node membership for the members of a worker team.
///
/// Implementations must be consistent: `workers_on(node_of(w))` contains `w`
/// for every team id `w`, and every team id appears on exactly one node.
pub trait Topology: Send + Sync {
    /// The node that worker `team_id` runs on.
    fn node_of(&self, team_id: usize) -> usize;

    /// The team ids of all workers on `node_id`, including the asking worker.
    fn workers_on(&self, node_id: usize) -> &[usize];
}

/// Every worker on one node.
pub struct SingleNode {
    workers: Vec<usize>,
}

impl SingleNode {
    pub fn new(nthreads: usize) -> Self {
        Self {
            workers: (0..nthreads).collect(),
        }
    }
}

impl Topology for SingleNode {
    fn node_of(&self, _team_id: usize) -> usize {
        0
    }

    fn workers_on(&self, _node_id: usize) -> &[usize] {
        &self.workers
    }
}

/// An explicit worker-to-node assignment.
pub struct NodeMap {
    node_of: Vec<usize>,
    nodes: Vec<Vec<usize>>,
}

impl NodeMap {
    /// Build a topology where `assignment[team_id]` is that worker's node.
    /// Node ids must be dense starting at 0.
    pub fn new(assignment: &[usize]) -> Self {
        let nnodes = assignment.iter().copied().max().map_or(0, |max| max + 1);

        let mut nodes = vec![Vec::new(); nnodes];
        for (worker, &node) in assignment.iter().enumerate() {
            nodes[node].push(worker);
        }

        Self {
            node_of: assignment.to_vec(),
            nodes,
        }
    }
}

impl Topology for NodeMap {
    fn node_of(&self, team_id: usize) -> usize {
        self.node_of[team_id]
    }

    fn workers_on(&self, node_id: usize) -> &[usize] {
        &self.nodes[node_id]
    }
}
