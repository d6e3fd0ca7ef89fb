//! The recorder: a single actor owning the store's write path, selected at
//! startup by `scheduleMode`. Every mutation — `add_proc`, `add_call`,
//! `update_call`, a finalizer tick, shutdown — is serialized through
//! whichever actor is running, so the store never sees concurrent writers.

mod finalizer;
mod task_actor;
mod thread_actor;

pub use finalizer::{finalize_on_shutdown, finalize_once};

use crate::config::{Config, ScheduleMode};
use crate::error::Result;
use crate::hash::{ProcId, TraceId};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One-shot signal a caller can block on, used for orderly actor shutdown.
/// A wait/complete contract a writer thread or task can block on.
#[derive(Default)]
pub struct CompletionSignal {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl CompletionSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        let mut done = self.state.lock().unwrap();
        *done = true;
        self.condvar.notify_all();
    }

    /// Block until `complete()` is called or `timeout` elapses. Returns
    /// `true` if completion was observed.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.state.lock().unwrap();
        if *guard {
            return true;
        }
        let (guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .unwrap();
        *guard
    }
}

/// A mutation submitted to the recorder actor.
#[derive(Debug, Clone)]
pub enum Command {
    AddProc {
        proc_id: ProcId,
        proc_name: String,
        time_defined: i64,
    },
    AddCall {
        caller_id: ProcId,
        callee_id: ProcId,
        trace_id: TraceId,
        time_enter: i64,
        time_leave: Option<i64>,
    },
    UpdateCall {
        caller_id: ProcId,
        callee_id: ProcId,
        trace_id: TraceId,
        time_leave: i64,
    },
    /// Run a finalize pass out of band with the periodic tick (used by the
    /// fork pre-hook, which needs a synchronous finalize on demand).
    FinalizeNow,
    Shutdown,
}

/// Handle to a running recorder actor. Cloning is cheap — it's just a
/// channel sender — so multiple trace-intake call sites can share one
/// recorder without any locking of their own.
pub enum RecorderHandle {
    Mt(thread_actor::ThreadActorHandle),
    Ev(task_actor::TaskActorHandle),
}

impl Clone for RecorderHandle {
    fn clone(&self) -> Self {
        match self {
            RecorderHandle::Mt(h) => RecorderHandle::Mt(h.clone()),
            RecorderHandle::Ev(h) => RecorderHandle::Ev(h.clone()),
        }
    }
}

impl RecorderHandle {
    /// Start the recorder actor for the given config, opening the store on
    /// the actor itself (so the connection never crosses a thread that
    /// didn't create it).
    pub fn spawn(config: Config, pid: u32) -> Result<Self> {
        match config.schedule_mode {
            ScheduleMode::Mt => Ok(RecorderHandle::Mt(thread_actor::spawn(config, pid)?)),
            ScheduleMode::Ev => Ok(RecorderHandle::Ev(task_actor::spawn(config, pid)?)),
        }
    }

    pub fn add_proc(&self, proc_id: ProcId, proc_name: impl Into<String>, time_defined: i64) {
        self.send(Command::AddProc {
            proc_id,
            proc_name: proc_name.into(),
            time_defined,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_call(
        &self,
        caller_id: ProcId,
        callee_id: ProcId,
        trace_id: TraceId,
        time_enter: i64,
        time_leave: Option<i64>,
    ) {
        self.send(Command::AddCall {
            caller_id,
            callee_id,
            trace_id,
            time_enter,
            time_leave,
        })
    }

    pub fn update_call(
        &self,
        caller_id: ProcId,
        callee_id: ProcId,
        trace_id: TraceId,
        time_leave: i64,
    ) {
        self.send(Command::UpdateCall {
            caller_id,
            callee_id,
            trace_id,
            time_leave,
        })
    }

    pub fn finalize_now(&self) {
        self.send(Command::FinalizeNow)
    }

    fn send(&self, command: Command) {
        match self {
            RecorderHandle::Mt(h) => h.send(command),
            RecorderHandle::Ev(h) => h.send(command),
        }
    }

    /// Signal the actor to stop, running a final synchronous finalize and
    /// flush-remaining pass, and block until it has.
    pub fn shutdown(&self) {
        match self {
            RecorderHandle::Mt(h) => h.shutdown(),
            RecorderHandle::Ev(h) => h.shutdown(),
        }
    }
}

pub(crate) fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}
