//! Per-procedure MST state, closed into a struct with a tagged
//! `NodeState` in place of an open dynamic-keyed record.

use super::message::Edge;
use crate::hash::ProcId;
use std::collections::VecDeque;

/// `IDLE | WAIT_MOE | DONE_MOE | MERGE`. Every message handler guards on
/// this before mutating a node; a message that arrives in the wrong state
/// is silently skipped — retries and reorderings are normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    WaitMoe,
    DoneMoe,
    Merge,
}

/// One procedure's node in the evolving MST fragment forest.
#[derive(Debug, Clone)]
pub struct ProcNode {
    pub proc_id: ProcId,
    pub proc_name: String,

    /// Undirected edge weights to every procedure this one has a
    /// call-graph relationship with, after cutoff filtering.
    pub neighbors: std::collections::HashMap<ProcId, i64>,
    /// Unvisited candidate edges, ordered by descending weight — the head
    /// is always the heaviest remaining candidate.
    pub outer_edges: VecDeque<ProcId>,
    /// Candidates confirmed to lie inside this node's own fragment.
    pub inner_edges: Vec<ProcId>,

    /// This node's fragment identifier (the fragment root's `procId`).
    pub root: ProcId,
    /// Spanning-tree parent; equals `proc_id` for a fragment root.
    pub parent: ProcId,
    /// Spanning-tree children.
    pub children: Vec<ProcId>,

    /// Best outgoing edge found so far this MOE search.
    pub moe: Edge,
    /// Decrement counter for the MOE convergecast: starts at
    /// `children.len() + 1` (the `+1` is this node's own pending local
    /// test).
    pub awaiting: usize,

    pub state: NodeState,
}

impl ProcNode {
    pub fn new(proc_id: ProcId, proc_name: String) -> Self {
        Self {
            proc_id,
            proc_name,
            neighbors: std::collections::HashMap::new(),
            outer_edges: VecDeque::new(),
            inner_edges: Vec::new(),
            root: proc_id,
            parent: proc_id,
            children: Vec::new(),
            moe: Edge::degenerate(proc_id),
            awaiting: 0,
            state: NodeState::Idle,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent == self.proc_id
    }

    /// Phase 0: sort `outerEdges` by descending weight. Weight lookups go
    /// through `neighbors`; any candidate lacking a neighbor entry (which
    /// shouldn't happen — `outerEdges` is built from `neighbors`'s own
    /// keys) sorts last.
    pub fn prepare(&mut self) {
        let mut candidates: Vec<ProcId> = self.neighbors.keys().copied().collect();
        candidates.sort_by(|a, b| {
            let wa = self.neighbors.get(a).copied().unwrap_or(i64::MIN);
            let wb = self.neighbors.get(b).copied().unwrap_or(i64::MIN);
            wb.cmp(&wa).then(a.cmp(b))
        });
        self.outer_edges = candidates.into();
        self.inner_edges.clear();
    }

    pub fn weight_of(&self, candidate: ProcId) -> i64 {
        self.neighbors.get(&candidate).copied().unwrap_or(0)
    }
}
