//! Trace intake: the seam between a host language runtime's own call
//! interception and the recorder. No bytecode/AST instrumentation for any
//! specific host lives here — only the narrow trait a host's hooks report
//! through, and the `Runtime` that wires `enter`/`leave` calls into
//! `add_proc`/`add_call`/`update_call`.

use crate::hash::{hash_str, trace_id, ProcId, TraceId};
use crate::recorder::RecorderHandle;

/// What a host's own enter/leave interception reports. Implemented by the
/// host embedding; TURTLES ships only [`NoOpHook`] (tracing disabled) and,
/// under `#[cfg(test)]`, a recording harness implementation used by this
/// crate's own integration tests.
pub trait TraceHook: Send + Sync {
    /// Called when `caller` is about to call `callee` at `source_line`, on
    /// thread `thread_id` at stack depth `stack_depth`. Returns the
    /// `TraceId` the host must hand back unchanged to the matching
    /// `on_leave`.
    fn on_enter(
        &self,
        thread_id: i64,
        stack_depth: i64,
        caller: &str,
        source_line: i64,
        callee: &str,
        time_enter: i64,
    ) -> TraceId;

    /// Called when `callee` returns to `caller`, with the `TraceId` from
    /// the matching `on_enter`.
    fn on_leave(
        &self,
        thread_id: i64,
        stack_depth: i64,
        caller: &str,
        source_line: i64,
        callee: &str,
        trace_id: TraceId,
        time_leave: i64,
    );
}

/// Tracing disabled: every call is a no-op. Used when `Config::enabled` is
/// false, so callers never need to branch on whether tracing is live.
pub struct NoOpHook;

impl TraceHook for NoOpHook {
    fn on_enter(&self, _: i64, _: i64, _: &str, _: i64, _: &str, _: i64) -> TraceId {
        0
    }
    fn on_leave(&self, _: i64, _: i64, _: &str, _: i64, _: &str, _: TraceId, _: i64) {}
}

/// The live runtime: a recorder actor plus the `ProcId` bookkeeping needed
/// to turn procedure names into the hashes the store keys on.
pub struct Runtime {
    recorder: RecorderHandle,
    self_prefix: String,
}

impl Runtime {
    /// Procedure names under `config.self_prefix` are never recorded, even
    /// while tracing is enabled — otherwise a host that instruments
    /// indiscriminately would have TURTLES trace its own recorder calls,
    /// growing the call graph with noise that has no bearing on the host
    /// program's structure.
    pub fn new(recorder: RecorderHandle, config: &crate::config::Config) -> Self {
        Self {
            recorder,
            self_prefix: config.self_prefix.clone(),
        }
    }

    fn proc_id(name: &str) -> ProcId {
        hash_str(name)
    }

    fn is_self_traced(&self, name: &str) -> bool {
        name.starts_with(self.self_prefix.as_str())
    }
}

impl TraceHook for Runtime {
    fn on_enter(
        &self,
        thread_id: i64,
        stack_depth: i64,
        caller: &str,
        source_line: i64,
        callee: &str,
        time_enter: i64,
    ) -> TraceId {
        if self.is_self_traced(caller) || self.is_self_traced(callee) {
            return 0;
        }

        let caller_id = if caller.is_empty() {
            0
        } else {
            Self::proc_id(caller)
        };
        let callee_id = Self::proc_id(callee);
        let tid = trace_id(thread_id, stack_depth, caller_id, source_line, callee_id);

        if !caller.is_empty() {
            self.recorder.add_proc(caller_id, caller, time_enter);
        }
        self.recorder.add_proc(callee_id, callee, time_enter);
        self.recorder
            .add_call(caller_id, callee_id, tid, time_enter, None);
        tid
    }

    fn on_leave(
        &self,
        _thread_id: i64,
        _stack_depth: i64,
        caller: &str,
        _source_line: i64,
        callee: &str,
        trace_id: TraceId,
        time_leave: i64,
    ) {
        if self.is_self_traced(caller) || self.is_self_traced(callee) {
            return;
        }
        let caller_id = if caller.is_empty() {
            0
        } else {
            Self::proc_id(caller)
        };
        let callee_id = Self::proc_id(callee);
        self.recorder
            .update_call(caller_id, callee_id, trace_id, time_leave);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommitMode, Config, ScheduleMode};

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

    #[test]
    fn self_traced_calls_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let recorder = RecorderHandle::spawn(config.clone(), 1).unwrap();
        let runtime = Runtime::new(recorder.clone(), &config);

        let tid = runtime.on_enter(1, 0, "", 0, "turtles::internal", 1);
        assert_eq!(tid, 0);
        recorder.shutdown();
    }

    #[test]
    fn root_call_uses_sentinel_caller() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let recorder = RecorderHandle::spawn(config.clone(), 2).unwrap();
        let runtime = Runtime::new(recorder.clone(), &config);

        let tid = runtime.on_enter(1, 0, "", 10, "::main", 1);
        assert_ne!(tid, 0);
        runtime.on_leave(1, 0, "", 10, "::main", tid, 5);
        recorder.shutdown();
    }
}
