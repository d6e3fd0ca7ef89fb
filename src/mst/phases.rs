//! The barrier protocol driving one GHS round through its five phases
//! Every machine runs this identically and symmetrically —
//! there is no single coordinator process; each worker decides locally
//! when it has finished the current phase and broadcasts `PhaseDone`
//! exactly once per phase.

use super::machine::{MachineState, Phase, WorkerContext};
use super::message::{Message, Outbox};
use super::node::NodeState;

/// Begin `phase` on this worker: reset the barrier counters, then issue
/// whatever kickoff action the phase requires.
///
/// A worker that owns zero procedures (possible when `K` exceeds the
/// number of distinct procedures) has nothing to converge on for
/// `FindMoe`/`Merge` and broadcasts `PhaseDone` immediately rather than
/// waiting on a convergence that will never happen.
pub fn phase_init(ctx: &WorkerContext, state: &mut MachineState, phase: Phase) -> Outbox {
    state.phase = phase;
    state.machines_in_phase = ctx.machines;
    let mut outbox = Outbox::new();

    match phase {
        Phase::Prepare => {
            for node in state.procs.values_mut() {
                node.prepare();
            }
            outbox.broadcast(ctx.machines, Message::PhaseDone);
        }
        Phase::FindMoe => {
            state.procs_in_phase = state.procs.len();
            if state.procs_in_phase == 0 {
                outbox.broadcast(ctx.machines, Message::PhaseDone);
            } else {
                for root in state.roots.clone() {
                    outbox.push(ctx.myself, Message::FindMoe { proc: root });
                }
            }
        }
        Phase::Merge => {
            state.procs_in_phase = state.procs.len();
            if state.procs_in_phase == 0 {
                outbox.broadcast(ctx.machines, Message::PhaseDone);
            } else {
                let originators: Vec<_> = state
                    .procs
                    .values()
                    .filter(|n| n.state == NodeState::Merge && n.moe.u == n.proc_id)
                    .map(|n| (n.proc_id, n.moe.v))
                    .collect();
                for (sender, target) in originators {
                    outbox.push(
                        ctx.owner_of(target),
                        Message::ReqCombine {
                            proc: target,
                            sender,
                        },
                    );
                }
            }
        }
        Phase::ReqActive => {
            state.procs_active = 0;
            outbox.broadcast(ctx.machines, Message::ReqActive { sender_machine: ctx.myself });
        }
        Phase::Summarize => {
            outbox.broadcast(ctx.machines, Message::PhaseDone);
        }
    }

    outbox
}

/// Handle an incoming `PhaseDone` broadcast: decrement this worker's own
/// barrier counter; the worker that drops it to zero advances to the next
/// phase (or, after `Summarize`, broadcasts `Bye`).
pub fn handle_phase_done(ctx: &WorkerContext, state: &mut MachineState) -> Outbox {
    state.machines_in_phase = state.machines_in_phase.saturating_sub(1);
    let mut outbox = Outbox::new();
    if state.machines_in_phase == 0 {
        match state.phase.next(state.procs_active) {
            Some(next) => outbox.extend(phase_init(ctx, state, next)),
            None => outbox.broadcast(ctx.machines, Message::Bye),
        }
    }
    outbox
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mst::node::ProcNode;

    fn ctx(myself: usize, machines: usize) -> WorkerContext {
        WorkerContext { myself, machines }
    }

    #[test]
    fn empty_worker_completes_find_moe_immediately() {
        let context = ctx(0, 1);
        let mut state = MachineState::new();
        let outbox = phase_init(&context, &mut state, Phase::FindMoe);
        let messages = outbox.into_vec();
        assert!(matches!(messages[0].1, Message::PhaseDone));
    }

    #[test]
    fn owning_a_root_issues_find_moe_to_self() {
        let context = ctx(0, 1);
        let mut state = MachineState::new();
        state.insert(ProcNode::new(5, "x".to_string()));
        let outbox = phase_init(&context, &mut state, Phase::FindMoe);
        let messages = outbox.into_vec();
        assert!(matches!(
            messages[0],
            (0, Message::FindMoe { proc: 5 })
        ));
    }
}
