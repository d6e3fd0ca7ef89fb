//! Per-worker machine state and the `WorkerContext` each worker loop
//! borrows into its handlers, in place of process-wide globals
//! (`myself`, `machines`, roster).

use super::message::MachineId;
use super::node::ProcNode;
use crate::hash::ProcId;
use std::collections::{HashMap, HashSet};

/// The five phases driving one GHS round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    FindMoe,
    Merge,
    ReqActive,
    Summarize,
}

impl Phase {
    pub fn next(self, procs_active: usize) -> Option<Phase> {
        match self {
            Phase::Prepare => Some(Phase::FindMoe),
            Phase::FindMoe => Some(Phase::Merge),
            Phase::Merge => Some(Phase::ReqActive),
            Phase::ReqActive => {
                if procs_active > 0 {
                    Some(Phase::FindMoe)
                } else {
                    Some(Phase::Summarize)
                }
            }
            Phase::Summarize => None,
        }
    }
}

/// Immutable per-worker identity, borrowed by every handler. Replaces the
/// source's module-wide `myself`/`machines`/supervisor-handle globals.
#[derive(Debug, Clone, Copy)]
pub struct WorkerContext {
    pub myself: MachineId,
    pub machines: usize,
}

impl WorkerContext {
    pub fn owner_of(&self, proc: ProcId) -> MachineId {
        (proc.rem_euclid(self.machines as i64)) as usize
    }

    pub fn owns(&self, proc: ProcId) -> bool {
        self.owner_of(proc) == self.myself
    }
}

/// `{ procs, roots, phase, machinesInPhase, procsInPhase, procsActive }`
/// Per-round state held by one worker for the procedures it owns.
pub struct MachineState {
    pub procs: HashMap<ProcId, ProcNode>,
    pub roots: HashSet<ProcId>,
    pub phase: Phase,
    pub machines_in_phase: usize,
    pub procs_in_phase: usize,
    pub procs_active: usize,
}

impl MachineState {
    pub fn new() -> Self {
        Self {
            procs: HashMap::new(),
            roots: HashSet::new(),
            phase: Phase::Prepare,
            machines_in_phase: 0,
            procs_in_phase: 0,
            procs_active: 0,
        }
    }

    pub fn insert(&mut self, node: ProcNode) {
        if node.is_root() {
            self.roots.insert(node.proc_id);
        }
        self.procs.insert(node.proc_id, node);
    }

    pub fn node(&self, proc: ProcId) -> Option<&ProcNode> {
        self.procs.get(&proc)
    }

    pub fn node_mut(&mut self, proc: ProcId) -> Option<&mut ProcNode> {
        self.procs.get_mut(&proc)
    }

    /// Re-derive whether `proc` is currently a fragment root and keep
    /// `roots` in sync. Called after anything that can change a node's
    /// `parent` (a merge or a re-rooting cascade).
    pub fn sync_root(&mut self, proc: ProcId) {
        if let Some(node) = self.procs.get(&proc) {
            if node.is_root() {
                self.roots.insert(proc);
            } else {
                self.roots.remove(&proc);
            }
        }
    }
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}
