//! The post-hoc call-graph clustering engine: a simulated
//! `K`-machine run of an inverted Gallager-Humblet-Spira algorithm that
//! builds a maximum spanning forest over the settled call graph, reported
//! back to the caller as one cluster per surviving fragment root.

pub mod driver;
pub mod handlers;
pub mod machine;
pub mod message;
pub mod node;
pub mod phases;

pub use driver::{ClusterLine, GraphOptions, Supervisor};
pub use machine::{MachineState, Phase, WorkerContext};
pub use message::{Edge, MachineId, Message, Outbox};
pub use node::{NodeState, ProcNode};
