//! Per-message handlers for one GHS round, inverted
//! to find the *maximum* outgoing edge of each fragment rather than the
//! minimum. Every handler takes the worker's immutable [`WorkerContext`]
//! and mutable [`MachineState`] and returns an [`Outbox`] of follow-up
//! messages; a message that arrives for a `proc` this worker doesn't own,
//! or that finds a node in the wrong state, is silently dropped — retries
//! and reorderings are expected.

use super::machine::{MachineState, WorkerContext};
use super::message::{Edge, Message, Outbox};
use super::node::NodeState;
use super::phases::handle_phase_done;
use crate::hash::ProcId;

/// Route one incoming message to its handler.
pub fn handle_message(ctx: &WorkerContext, state: &mut MachineState, msg: Message) -> Outbox {
    match msg {
        Message::Prepare => {
            for node in state.procs.values_mut() {
                node.prepare();
            }
            Outbox::new()
        }
        Message::FindMoe { proc } => handle_find_moe(ctx, state, proc),
        Message::TestMoe { proc } => handle_test_moe(ctx, state, proc),
        Message::ReqRoot { requester, responder } => handle_req_root(ctx, state, requester, responder),
        Message::RspRoot {
            requester,
            responder,
            responder_root,
        } => handle_rsp_root(ctx, state, requester, responder, responder_root),
        Message::FoundMoe { proc, moe } => handle_found_moe(ctx, state, proc, moe),
        Message::NotifyMoe { proc, moe } => handle_notify_moe(ctx, state, proc, moe),
        Message::ReqCombine { proc, sender } => handle_req_combine(ctx, state, proc, sender),
        Message::NewRoot {
            proc,
            new_root,
            new_parent,
        } => handle_new_root(ctx, state, proc, new_root, new_parent),
        Message::ReqActive { sender_machine } => handle_req_active(state, sender_machine),
        Message::RspActive { count } => handle_rsp_active(ctx, state, count),
        Message::PhaseDone => handle_phase_done(ctx, state),
        Message::Bye => Outbox::new(),
    }
}

/// Down-phase: arm the convergecast counter at `children.len() + 1` (the
/// `+1` is this node's own pending local test), then either schedule that
/// local test directly (a leaf has no children to wait on) or forward
/// `find_moe` down to every child.
fn handle_find_moe(ctx: &WorkerContext, state: &mut MachineState, proc: ProcId) -> Outbox {
    let mut outbox = Outbox::new();
    let children = match state.node_mut(proc) {
        Some(node) if node.state == NodeState::Idle => {
            node.state = NodeState::WaitMoe;
            node.moe = Edge::degenerate(proc);
            node.awaiting = node.children.len() + 1;
            node.children.clone()
        }
        _ => return outbox,
    };
    if children.is_empty() {
        outbox.push(ctx.myself, Message::TestMoe { proc });
    } else {
        for child in children {
            outbox.push(ctx.owner_of(child), Message::FindMoe { proc: child });
        }
    }
    outbox
}

/// Walk `proc`'s `outer_edges` head-first (heaviest candidate first),
/// skipping any already confirmed to lie inside this node's fragment. If
/// the list empties out, convergecast the current `moe` to the parent
/// (uniformly through [`handle_found_moe`], even when `proc` is its own
/// parent). Otherwise ask the heaviest remaining candidate's owner for
/// its fragment root.
fn handle_test_moe(ctx: &WorkerContext, state: &mut MachineState, proc: ProcId) -> Outbox {
    loop {
        let node = match state.node(proc) {
            Some(node) if node.state == NodeState::WaitMoe => node,
            _ => return Outbox::new(),
        };
        match node.outer_edges.front().copied() {
            None => {
                let parent = node.parent;
                let moe = node.moe;
                let mut outbox = Outbox::new();
                outbox.push(ctx.owner_of(parent), Message::FoundMoe { proc: parent, moe });
                return outbox;
            }
            Some(candidate) => {
                if node.inner_edges.contains(&candidate) {
                    state.node_mut(proc).unwrap().outer_edges.pop_front();
                    continue;
                }
                let mut outbox = Outbox::new();
                outbox.push(
                    ctx.owner_of(candidate),
                    Message::ReqRoot {
                        requester: proc,
                        responder: candidate,
                    },
                );
                return outbox;
            }
        }
    }
}

/// `requester` wants to know this node's current fragment root, to decide
/// whether the candidate edge `requester -> responder` stays inside one
/// fragment or crosses to another.
fn handle_req_root(ctx: &WorkerContext, state: &MachineState, requester: ProcId, responder: ProcId) -> Outbox {
    let mut outbox = Outbox::new();
    let root = match state.node(responder) {
        Some(node) => node.root,
        None => return outbox,
    };
    outbox.push(
        ctx.owner_of(requester),
        Message::RspRoot {
            requester,
            responder,
            responder_root: root,
        },
    );
    outbox
}

/// `responder` answered `requester`'s root query. If they share a
/// fragment, the candidate edge is internal — retire it and keep testing.
/// Otherwise it's a valid outgoing edge and, since candidates are sorted
/// descending, the heaviest one this node will ever find: self-deliver it
/// to `found_moe` so the comparison/convergecast logic lives in one place.
fn handle_rsp_root(
    ctx: &WorkerContext,
    state: &mut MachineState,
    requester: ProcId,
    responder: ProcId,
    responder_root: ProcId,
) -> Outbox {
    let node = match state.node_mut(requester) {
        Some(node) if node.state == NodeState::WaitMoe && !node.outer_edges.is_empty() => node,
        _ => return Outbox::new(),
    };
    if node.outer_edges.front().copied() != Some(responder) {
        // Stale response for a candidate we've already moved past.
        return Outbox::new();
    }
    if responder_root == node.root {
        node.inner_edges.push(responder);
        node.outer_edges.pop_front();
        return handle_test_moe(ctx, state, requester);
    }
    let weight = node.weight_of(responder);
    let candidate = Edge {
        u: requester,
        v: responder,
        w: weight,
    };
    let mut outbox = Outbox::new();
    outbox.push(ctx.myself, Message::FoundMoe { proc: requester, moe: candidate });
    outbox
}

/// Convergecast step: fold one contribution (a child's reported moe, or
/// this node's own local test result, self-delivered) into `proc`'s
/// best-known moe. Once the local test plus every child has reported
/// (`awaiting` reaches zero), settle the fragment's result: downcast at
/// the root, otherwise forward up toward the parent.
fn handle_found_moe(ctx: &WorkerContext, state: &mut MachineState, proc: ProcId, moe: Edge) -> Outbox {
    let mut outbox = Outbox::new();
    let node = match state.node_mut(proc) {
        Some(node) if node.state == NodeState::WaitMoe => node,
        _ => return outbox,
    };
    node.awaiting = node.awaiting.saturating_sub(1);
    if !moe.is_degenerate() && moe.w > node.moe.w {
        node.moe = moe;
    }
    match node.awaiting {
        1 => {
            outbox.push(ctx.myself, Message::TestMoe { proc });
        }
        0 => {
            node.state = NodeState::DoneMoe;
            let settled = node.moe;
            if node.is_root() {
                outbox.push(ctx.myself, Message::NotifyMoe { proc, moe: settled });
            } else {
                let parent = node.parent;
                outbox.push(ctx.owner_of(parent), Message::FoundMoe { proc: parent, moe: settled });
            }
        }
        _ => {}
    }
    outbox
}

/// Downcast of the fragment's settled moe from root toward every member.
/// Every node that receives this transitions to `MERGE`; `phase_init`
/// filters on `moe.u == proc_id` to find the single node that actually
/// owns the chosen edge and originates `req_combine`.
fn handle_notify_moe(ctx: &WorkerContext, state: &mut MachineState, proc: ProcId, moe: Edge) -> Outbox {
    let mut outbox = Outbox::new();
    let children = match state.node_mut(proc) {
        Some(node) if node.state == NodeState::DoneMoe => {
            node.root = moe.u;
            node.moe = moe;
            node.state = NodeState::Merge;
            node.children.clone()
        }
        _ => return outbox,
    };
    for child in children {
        outbox.push(ctx.owner_of(child), Message::NotifyMoe { proc: child, moe });
    }
    state.procs_in_phase = state.procs_in_phase.saturating_sub(1);
    if state.procs_in_phase == 0 {
        outbox.broadcast(ctx.machines, Message::PhaseDone);
    }
    outbox
}

/// `sender`'s owner believes the edge `sender -> proc` is its fragment's
/// chosen moe. `sender` is unconditionally grafted as a child of `proc`,
/// and `sender`'s whole former fragment is re-rooted around `sender` (the
/// same tree-edge-reversal cascade `new_root` always does) so that every
/// node absorbed through it ends up on `proc`'s root — this fires
/// regardless of whether `proc` also becomes a new overall root, since
/// nothing else ever re-roots `sender`'s side of the merge.
/// `proc` additionally becomes a brand-new overall root — re-rooting its
/// own (pre-existing) fragment around itself via a second `new_root` —
/// only when all three hold: `proc` is itself a moe originator, the two
/// picked each other (a reciprocal edge), and `proc`'s id is the larger
/// (the deterministic merge tie-break).
fn handle_req_combine(ctx: &WorkerContext, state: &mut MachineState, proc: ProcId, sender: ProcId) -> Outbox {
    let mut outbox = Outbox::new();
    let node = match state.node_mut(proc) {
        Some(node) => node,
        None => return outbox,
    };
    node.children.push(sender);
    let becomes_new_root = node.moe.u == proc && node.moe.v == sender && proc > sender;
    let sender_new_root = if becomes_new_root { proc } else { node.root };
    outbox.push(
        ctx.owner_of(sender),
        Message::NewRoot {
            proc: sender,
            new_root: sender_new_root,
            new_parent: proc,
        },
    );
    if becomes_new_root {
        outbox.push(
            ctx.myself,
            Message::NewRoot {
                proc,
                new_root: proc,
                new_parent: proc,
            },
        );
    }
    outbox
}

/// Re-root cascade. `new_parent` is a genuine reassignment: if `proc`'s
/// old parent differs from it, that old parent is demoted to a child
/// (the classic GHS tree-edge reversal that lets a merge re-root an
/// entire existing fragment around the new edge), and `new_parent` itself
/// is pruned from `proc`'s children so the link isn't double-counted.
/// The cascade then continues into every remaining child, including the
/// just-demoted former parent — walking the old parent chain in reverse.
///
/// Guarded on `proc` still being in `Merge`: `req_combine` can reach a
/// node by two independent routes in the same round (an explicit
/// re-root addressed directly to it, and a parent's own cascade that
/// happens to walk through it as a child) — the state flip to `Idle`
/// makes whichever arrives second a no-op instead of a double-settle.
fn handle_new_root(
    ctx: &WorkerContext,
    state: &mut MachineState,
    proc: ProcId,
    new_root: ProcId,
    new_parent: ProcId,
) -> Outbox {
    let mut outbox = Outbox::new();
    let children = match state.node_mut(proc) {
        Some(node) if node.state == NodeState::Merge => {
            node.root = new_root;
            if node.parent != new_parent {
                let old_parent = node.parent;
                if old_parent != proc && !node.children.contains(&old_parent) {
                    node.children.push(old_parent);
                }
            }
            node.children.retain(|&c| c != new_parent);
            node.parent = new_parent;
            node.state = NodeState::Idle;
            node.children.clone()
        }
        _ => return outbox,
    };
    state.sync_root(proc);
    for child in children {
        outbox.push(
            ctx.owner_of(child),
            Message::NewRoot {
                proc: child,
                new_root,
                new_parent: proc,
            },
        );
    }
    state.procs_in_phase = state.procs_in_phase.saturating_sub(1);
    if state.procs_in_phase == 0 {
        outbox.broadcast(ctx.machines, Message::PhaseDone);
    }
    outbox
}

/// How many of this worker's own procs still have unvisited outer edges —
/// the global termination test accumulates these counts across every
/// machine's reply.
fn handle_req_active(state: &MachineState, sender_machine: super::message::MachineId) -> Outbox {
    let count = state.procs.values().filter(|n| !n.outer_edges.is_empty()).count();
    let mut outbox = Outbox::new();
    outbox.push(sender_machine, Message::RspActive { count });
    outbox
}

/// Accumulate one machine's active-proc count. The barrier counter this
/// uses (`machines_in_phase`) was spent counting `RspActive` replies; once
/// every machine has reported, reset it so the very same counter can be
/// reused to count the `PhaseDone` broadcast this triggers.
fn handle_rsp_active(ctx: &WorkerContext, state: &mut MachineState, count: usize) -> Outbox {
    state.procs_active += count;
    state.machines_in_phase = state.machines_in_phase.saturating_sub(1);
    let mut outbox = Outbox::new();
    if state.machines_in_phase == 0 {
        state.machines_in_phase = ctx.machines;
        outbox.broadcast(ctx.machines, Message::PhaseDone);
    }
    outbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mst::node::ProcNode;

    fn ctx() -> WorkerContext {
        WorkerContext { myself: 0, machines: 1 }
    }

    fn single_node_state(neighbors: &[(ProcId, i64)]) -> MachineState {
        let mut state = MachineState::new();
        let mut node = ProcNode::new(1, "a".to_string());
        for &(proc, w) in neighbors {
            node.neighbors.insert(proc, w);
        }
        node.prepare();
        state.insert(node);
        for &(proc, _) in neighbors {
            state.insert(ProcNode::new(proc, format!("n{proc}")));
        }
        state
    }

    fn drain(context: &WorkerContext, state: &mut MachineState, initial: Outbox) -> Vec<(super::super::message::MachineId, Message)> {
        let mut pending = initial.into_vec();
        let mut settled = Vec::new();
        while let Some((target, msg)) = pending.pop() {
            if matches!(msg, Message::NotifyMoe { .. } | Message::NewRoot { .. } | Message::PhaseDone) {
                settled.push((target, msg));
                continue;
            }
            pending.extend(handle_message(context, state, msg).into_vec());
        }
        settled
    }

    #[test]
    fn isolated_node_settles_degenerate_moe() {
        let context = ctx();
        let mut state = single_node_state(&[]);
        let outbox = handle_find_moe(&context, &mut state, 1);
        let settled = drain(&context, &mut state, outbox);
        assert!(settled
            .iter()
            .any(|(_, m)| matches!(m, Message::NotifyMoe { moe, .. } if moe.is_degenerate())));
    }

    #[test]
    fn outgoing_edge_to_different_fragment_becomes_moe() {
        let context = ctx();
        let mut state = single_node_state(&[(2, 7)]);
        if let Some(other) = state.node_mut(2) {
            other.root = 99;
        }

        let outbox = handle_find_moe(&context, &mut state, 1);
        let settled = drain(&context, &mut state, outbox);
        let moe = settled.iter().find_map(|(_, m)| match m {
            Message::NotifyMoe { moe, .. } => Some(*moe),
            _ => None,
        });
        assert_eq!(moe, Some(Edge { u: 1, v: 2, w: 7 }));
    }

    #[test]
    fn reciprocal_req_combine_promotes_larger_id_to_new_root() {
        let context = ctx();
        let mut state = MachineState::new();
        let mut winner = ProcNode::new(10, "a".to_string());
        winner.state = NodeState::Merge;
        winner.moe = Edge { u: 10, v: 3, w: 5 };
        state.insert(winner);
        state.insert(ProcNode::new(3, "b".to_string()));

        let outbox = handle_req_combine(&context, &mut state, 10, 3);
        assert_eq!(state.node(10).unwrap().children, vec![3]);
        let msgs = outbox.into_vec();
        assert!(msgs.iter().any(|(_, m)| matches!(
            m,
            Message::NewRoot { proc: 10, new_root: 10, new_parent: 10 }
        )));
    }

    #[test]
    fn non_reciprocal_req_combine_attaches_without_new_root() {
        let context = ctx();
        let mut state = MachineState::new();
        state.insert(ProcNode::new(10, "a".to_string()));
        state.insert(ProcNode::new(3, "b".to_string()));

        let outbox = handle_req_combine(&context, &mut state, 10, 3);
        assert_eq!(state.node(10).unwrap().children, vec![3]);
        let msgs = outbox.into_vec();
        assert_eq!(msgs.len(), 1);
        assert!(msgs.iter().any(|(_, m)| matches!(
            m,
            Message::NewRoot { proc: 3, new_root: 10, new_parent: 10 }
        )));
    }

    #[test]
    fn non_reciprocal_req_combine_always_re_roots_sender_even_without_new_root() {
        // A sender whose owner never becomes a new overall root must still
        // get re-rooted — nothing else will ever settle it otherwise.
        let context = ctx();
        let mut state = MachineState::new();
        state.insert(ProcNode::new(10, "a".to_string()));
        let mut sender = ProcNode::new(3, "b".to_string());
        sender.state = NodeState::Merge;
        sender.parent = 7; // was a child inside its own old fragment
        state.insert(sender);
        state.insert(ProcNode::new(7, "old-parent".to_string()));

        let outbox = handle_req_combine(&context, &mut state, 10, 3);
        let msgs = outbox.into_vec();
        let (_, settle_sender) = msgs
            .into_iter()
            .find(|(_, m)| matches!(m, Message::NewRoot { proc: 3, .. }))
            .expect("sender must be re-rooted");

        let mut state2 = MachineState::new();
        let mut sender = ProcNode::new(3, "b".to_string());
        sender.state = NodeState::Merge;
        sender.parent = 7;
        state2.insert(sender);
        state2.insert(ProcNode::new(7, "old-parent".to_string()));
        let Message::NewRoot { proc, new_root, new_parent } = settle_sender else {
            unreachable!()
        };
        let settle_outbox = handle_new_root(&context, &mut state2, proc, new_root, new_parent);
        let node = state2.node(3).unwrap();
        assert_eq!(node.parent, 10);
        assert_eq!(node.root, 10);
        assert!(node.children.contains(&7));
        assert!(settle_outbox
            .into_vec()
            .iter()
            .any(|(_, m)| matches!(m, Message::NewRoot { proc: 7, new_root: 10, new_parent: 3 })));
    }

    #[test]
    fn new_root_demotes_old_parent_to_child() {
        let context = ctx();
        let mut state = MachineState::new();
        let mut middle = ProcNode::new(5, "m".to_string());
        middle.parent = 1; // was a child of the old root
        middle.children.push(9);
        middle.state = NodeState::Merge;
        state.insert(middle);
        state.insert(ProcNode::new(1, "old-root".to_string()));
        state.insert(ProcNode::new(9, "leaf".to_string()));

        let outbox = handle_new_root(&context, &mut state, 5, 5, 5);
        let node = state.node(5).unwrap();
        assert_eq!(node.parent, 5);
        assert!(node.children.contains(&1));
        assert!(node.children.contains(&9));
        assert!(state.roots.contains(&5));

        let msgs = outbox.into_vec();
        assert!(msgs
            .iter()
            .any(|(_, m)| matches!(m, Message::NewRoot { proc: 1, new_root: 5, new_parent: 5 })));
        assert!(msgs
            .iter()
            .any(|(_, m)| matches!(m, Message::NewRoot { proc: 9, new_root: 5, new_parent: 5 })));
    }

    #[test]
    fn rsp_active_resets_barrier_before_broadcasting_phase_done() {
        let context = WorkerContext { myself: 0, machines: 2 };
        let mut state = MachineState::new();
        state.machines_in_phase = 1;
        let outbox = handle_rsp_active(&context, &mut state, 3);
        assert_eq!(state.procs_active, 3);
        assert_eq!(state.machines_in_phase, 2);
        let msgs = outbox.into_vec();
        assert_eq!(msgs.len(), 2);
        assert!(msgs.iter().all(|(_, m)| matches!(m, Message::PhaseDone)));
    }
}
