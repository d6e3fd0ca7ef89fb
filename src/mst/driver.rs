//! Supervisor: loads the settled call graph from the store, partitions it
//! across `K` simulated machines (`machineOf(procId) = procId mod K` —
//! a known weakness, kept as documented rather than
//! papered over with a universal hash), and drives each worker as its own
//! `tokio::task` exchanging messages over per-worker `mpsc` channels until
//! every worker has said `bye`.

use super::handlers::handle_message;
use super::machine::{MachineState, Phase, WorkerContext};
use super::message::Message;
use super::node::ProcNode;
use super::phases::phase_init;
use crate::error::{Result, TurtlesError};
use crate::hash::ProcId;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Cutoff/orientation knobs controlling which settled calls become graph
/// edges, plus the simulated machine count.
#[derive(Debug, Clone, Copy)]
pub struct GraphOptions {
    pub machines: usize,
    /// Settled call count below which an edge is dropped entirely.
    pub cutoff: i64,
    /// When set, an edge's weight folds in both call directions
    /// (`calls(u->v) + calls(v->u)`) on both endpoints; otherwise each
    /// endpoint only "knows" about procedures it actually calls.
    pub undirected: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            machines: 1,
            cutoff: 0,
            undirected: false,
        }
    }
}

/// One line of the Phase 4 summary: `root parent edge-weight(self->parent)
/// procId procName`. Nodes sharing a `root` are one connected component
/// under the cutoff filter applied during loading.
#[derive(Debug, Clone)]
pub struct ClusterLine {
    pub root: ProcId,
    pub root_name: String,
    pub parent: ProcId,
    pub edge_weight: i64,
    pub proc_id: ProcId,
    pub proc_name: String,
}

/// Drives one complete k-machine run to termination.
pub struct Supervisor {
    options: GraphOptions,
}

impl Supervisor {
    pub fn new(options: GraphOptions) -> Self {
        Self { options }
    }

    /// Load the graph, run every phase to completion, and return one
    /// [`ClusterLine`] per procedure. Order is whatever each worker
    /// happened to finish in; the `cluster` CLI sorts for display.
    pub async fn run(&self, store: &Store) -> Result<Vec<ClusterLine>> {
        let nodes = load_graph(store, &self.options)?;
        let machines = self.options.machines.max(1);

        let mut partitions: Vec<HashMap<ProcId, ProcNode>> =
            (0..machines).map(|_| HashMap::new()).collect();
        for (proc_id, node) in nodes {
            let owner = proc_id.rem_euclid(machines as i64) as usize;
            partitions[owner].insert(proc_id, node);
        }

        let mut senders = Vec::with_capacity(machines);
        let mut receivers = Vec::with_capacity(machines);
        for _ in 0..machines {
            let (tx, rx) = mpsc::unbounded_channel::<Message>();
            senders.push(tx);
            receivers.push(rx);
        }
        let senders = Arc::new(senders);

        let mut handles = Vec::with_capacity(machines);
        for (myself, mut rx) in receivers.into_iter().enumerate() {
            let ctx = WorkerContext { myself, machines };
            let senders = senders.clone();
            let procs = std::mem::take(&mut partitions[myself]);
            handles.push(tokio::spawn(async move {
                let mut state = MachineState::new();
                for (_, node) in procs {
                    state.insert(node);
                }

                route(&senders, phase_init(&ctx, &mut state, Phase::Prepare));

                while let Some(msg) = rx.recv().await {
                    let is_bye = matches!(msg, Message::Bye);
                    route(&senders, handle_message(&ctx, &mut state, msg));
                    if is_bye {
                        break;
                    }
                }

                summarize(&state)
            }));
        }

        let mut lines = Vec::new();
        for handle in handles {
            let worker_lines = handle
                .await
                .map_err(|e| TurtlesError::Configuration(format!("mst worker panicked: {e}")))?;
            lines.extend(worker_lines);
        }

        let names: HashMap<ProcId, String> = lines
            .iter()
            .map(|line| (line.proc_id, line.proc_name.clone()))
            .collect();
        for line in &mut lines {
            line.root_name = names.get(&line.root).cloned().unwrap_or_default();
        }

        Ok(lines)
    }
}

fn route(senders: &Arc<Vec<mpsc::UnboundedSender<Message>>>, outbox: super::message::Outbox) {
    for (target, msg) in outbox.into_vec() {
        if let Some(sender) = senders.get(target) {
            let _ = sender.send(msg);
        }
    }
}

fn summarize(state: &MachineState) -> Vec<ClusterLine> {
    state
        .procs
        .values()
        .map(|node| ClusterLine {
            root: node.root,
            root_name: String::new(),
            parent: node.parent,
            edge_weight: if node.parent == node.proc_id {
                0
            } else {
                node.weight_of(node.parent)
            },
            proc_id: node.proc_id,
            proc_name: node.proc_name.clone(),
        })
        .collect()
}

/// Read settled calls out of the store and build one [`ProcNode`] per
/// known procedure, with `neighbors` populated from aggregated call
/// counts (`--cutoff` drops edges below the threshold; `--undirected`
/// folds the reverse direction's count into both endpoints).
fn load_graph(store: &Store, opts: &GraphOptions) -> Result<HashMap<ProcId, ProcNode>> {
    let ns = store.read_namespace();
    let conn = store.connection();

    let mut names: HashMap<ProcId, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!("SELECT proc_id, proc_name FROM {ns}.proc_ids"))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, name) = row?;
            names.insert(id, name);
        }
    }

    let mut weights: HashMap<ProcId, HashMap<ProcId, i64>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT caller_id, callee_id, COUNT(*) FROM {ns}.call_pts \
             WHERE time_leave IS NOT NULL AND caller_id != 0 \
             GROUP BY caller_id, callee_id"
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (caller, callee, count) = row?;
            *weights.entry(caller).or_default().entry(callee).or_insert(0) += count;
            if opts.undirected {
                *weights.entry(callee).or_default().entry(caller).or_insert(0) += count;
            }
        }
    }

    let mut nodes: HashMap<ProcId, ProcNode> = HashMap::new();
    for (&proc_id, proc_name) in &names {
        nodes.insert(proc_id, ProcNode::new(proc_id, proc_name.clone()));
    }
    for (proc_id, neighbors) in weights {
        let node = nodes
            .entry(proc_id)
            .or_insert_with(|| ProcNode::new(proc_id, names.get(&proc_id).cloned().unwrap_or_default()));
        for (neighbor, weight) in neighbors {
            if weight >= opts.cutoff {
                node.neighbors.insert(neighbor, weight);
            }
        }
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommitMode, Config, ScheduleMode};
    use crate::recorder::RecorderHandle;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            enabled: true,
            commit_mode: CommitMode::Direct,
            interval_millis: 50,
            db_path: dir.to_path_buf(),
            db_prefix: "turtles".to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
            self_prefix: "turtles::".to_string(),
        }
    }

    #[tokio::test]
    async fn a_chain_of_calls_settles_into_one_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let recorder = RecorderHandle::spawn(config.clone(), 1).unwrap();

        recorder.add_proc(1, "a", 0);
        recorder.add_proc(2, "b", 0);
        recorder.add_proc(3, "c", 0);
        recorder.add_call(1, 2, 100, 0, None);
        recorder.update_call(1, 2, 100, 5);
        recorder.add_call(2, 3, 101, 5, None);
        recorder.update_call(2, 3, 101, 9);
        recorder.shutdown();

        let store = Store::open(&config, 1).unwrap();
        let supervisor = Supervisor::new(GraphOptions {
            machines: 2,
            cutoff: 0,
            undirected: true,
        });
        let lines = supervisor.run(&store).await.unwrap();

        assert_eq!(lines.len(), 3);
        let roots: std::collections::HashSet<_> = lines.iter().map(|l| l.root).collect();
        assert_eq!(roots.len(), 1);
    }

    #[tokio::test]
    async fn disconnected_procs_settle_into_separate_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let recorder = RecorderHandle::spawn(config.clone(), 2).unwrap();

        recorder.add_proc(1, "a", 0);
        recorder.add_proc(2, "b", 0);
        recorder.add_proc(3, "c", 0);
        recorder.add_proc(4, "d", 0);
        recorder.add_call(1, 2, 200, 0, None);
        recorder.update_call(1, 2, 200, 5);
        recorder.add_call(3, 4, 201, 5, None);
        recorder.update_call(3, 4, 201, 9);
        recorder.shutdown();

        let store = Store::open(&config, 2).unwrap();
        let supervisor = Supervisor::new(GraphOptions {
            machines: 3,
            cutoff: 0,
            undirected: true,
        });
        let lines = supervisor.run(&store).await.unwrap();

        let roots: std::collections::HashSet<_> = lines.iter().map(|l| l.root).collect();
        assert_eq!(roots.len(), 2);
    }
}
