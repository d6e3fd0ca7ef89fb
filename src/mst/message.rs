//! The thirteen message kinds the GHS engine passes between workers, plus
//! the `Outbox` each handler returns in place of a dynamic
//! command-dictionary.

use crate::hash::ProcId;

/// Which of the `K` simulated machines a message is addressed to.
pub type MachineId = usize;

/// `(u, v, w)`: the best outgoing edge a fragment has found so far, with
/// `u` the fragment-internal endpoint and `v` the external one. The
/// degenerate value `(procId, procId, 0)` — `u == v` — means "no real
/// outgoing edge found yet"; any genuine edge dominates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub u: ProcId,
    pub v: ProcId,
    pub w: i64,
}

impl Edge {
    pub fn degenerate(proc: ProcId) -> Self {
        Edge { u: proc, v: proc, w: 0 }
    }

    pub fn is_degenerate(&self) -> bool {
        self.u == self.v
    }
}

/// A message routed between workers. Every variant here corresponds to a
/// named step in the round-based algorithm below.
#[derive(Debug, Clone)]
pub enum Message {
    /// Phase 0 root command: sort `outerEdges` descending by weight.
    Prepare,
    /// Phase 1 down-phase: find the MOE for the fragment rooted here.
    FindMoe { proc: ProcId },
    /// Local MOE test at `proc`, self-scheduled after `find_moe`/`rsp_root`.
    TestMoe { proc: ProcId },
    /// `requester` asks `responder`'s owner for `responder`'s current
    /// fragment root.
    ReqRoot { requester: ProcId, responder: ProcId },
    /// Response to `ReqRoot`, routed back to `requester`'s owner.
    RspRoot {
        requester: ProcId,
        responder: ProcId,
        responder_root: ProcId,
    },
    /// Convergecast of a candidate/confirmed MOE up toward the fragment root.
    FoundMoe { proc: ProcId, moe: Edge },
    /// Downcast of the confirmed fragment MOE from root to children.
    NotifyMoe { proc: ProcId, moe: Edge },
    /// Phase 2: `sender` asks `proc` — the MOE's far endpoint — to combine.
    ReqCombine { proc: ProcId, sender: ProcId },
    /// Downcast of a new fragment root after a merge.
    NewRoot { proc: ProcId, new_root: ProcId, new_parent: ProcId },
    /// Phase 3: count how many of `sender_machine`'s procs still have
    /// outer edges.
    ReqActive { sender_machine: MachineId },
    /// Response to `ReqActive`.
    RspActive { count: usize },
    /// Barrier signal: one machine has finished the current phase.
    PhaseDone,
    /// Clean worker exit; after receiving it, a worker processes no
    /// further messages.
    Bye,
}

/// An ordered batch of `(target machine, message)` pairs a handler emits;
/// not pushing an entry is how a handler signals "nothing to send here".
#[derive(Debug, Default)]
pub struct Outbox(Vec<(MachineId, Message)>);

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, target: MachineId, message: Message) {
        self.0.push((target, message));
    }

    pub fn broadcast(&mut self, machines: usize, message: Message)
    where
        Message: Clone,
    {
        for m in 0..machines {
            self.0.push((m, message.clone()));
        }
    }

    pub fn into_vec(self) -> Vec<(MachineId, Message)> {
        self.0
    }

    pub fn extend(&mut self, other: Outbox) {
        self.0.extend(other.0);
    }
}
