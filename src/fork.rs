//! Fork lifecycle hooks.
//!
//! TURTLES never decides when to fork — that's the host's call, made with
//! its own `fork(2)`/`posix_spawn` usage. What TURTLES owns is making sure
//! the store is in a safe state straddling that fork: closed and finalized
//! beforehand, reopened (with a freshly-copied DB file in the child)
//! afterward.
//!
//! Gated to Unix targets since `fork(2)` has no meaning elsewhere.

#![cfg(unix)]

use crate::config::Config;
use crate::error::{Result, TurtlesError};
use crate::recorder::RecorderHandle;
use std::sync::{Arc, Mutex};

/// The live recorder for a process, swappable across a fork boundary.
/// A host embeds one of these per process and calls [`prepare_fork`] /
/// [`after_fork`] around its own `fork(2)`.
pub struct ForkAware {
    config: Config,
    recorder: Mutex<Option<RecorderHandle>>,
}

impl ForkAware {
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let pid = std::process::id();
        let recorder = RecorderHandle::spawn(config.clone(), pid)?;
        Ok(Arc::new(Self {
            config,
            recorder: Mutex::new(Some(recorder)),
        }))
    }

    pub fn recorder(&self) -> Option<RecorderHandle> {
        self.recorder.lock().unwrap().clone()
    }

    /// Pre-fork hook: stop the finalizer, finalize synchronously, close
    /// the store. Call this immediately before the host's own `fork(2)`.
    pub fn prepare_fork(&self) {
        let mut guard = self.recorder.lock().unwrap();
        if let Some(recorder) = guard.take() {
            recorder.shutdown();
        }
    }

    /// Post-fork hook, run in both parent and child. `child_pid` is the
    /// return value of the host's `fork(2)` call: `0` in the child,
    /// the child's pid in the parent (matching `nix::unistd::fork`'s
    /// `ForkResult`).
    pub fn after_fork(&self, fork_result: &ForkOutcome) -> Result<()> {
        match fork_result {
            ForkOutcome::Child => {
                // `std::process::id()` returns *our own* (the child's) pid
                // here, same as the parent's would before it called
                // `fork()` — it can't tell us who our parent was. The OS's
                // own parent-pid syscall can.
                let parent_pid = nix::unistd::getppid().as_raw() as u32;
                let parent_path = self.config.db_file_for_pid(parent_pid);
                let child_pid = std::process::id();
                let child_path = self.config.db_file_for_pid(child_pid);
                if parent_path.exists() && parent_path != child_path {
                    std::fs::copy(&parent_path, &child_path).map_err(TurtlesError::Io)?;
                }
                let recorder = RecorderHandle::spawn(self.config.clone(), child_pid)?;
                *self.recorder.lock().unwrap() = Some(recorder);
            }
            ForkOutcome::Parent { .. } => {
                let pid = std::process::id();
                let recorder = RecorderHandle::spawn(self.config.clone(), pid)?;
                *self.recorder.lock().unwrap() = Some(recorder);
            }
        }
        Ok(())
    }
}

/// Mirrors `nix::unistd::ForkResult` without requiring callers to depend on
/// `nix` themselves for this one enum.
pub enum ForkOutcome {
    Parent { child_pid: u32 },
    Child,
}

impl From<nix::unistd::ForkResult> for ForkOutcome {
    fn from(result: nix::unistd::ForkResult) -> Self {
        match result {
            nix::unistd::ForkResult::Parent { child } => ForkOutcome::Parent {
                child_pid: child.as_raw() as u32,
            },
            nix::unistd::ForkResult::Child => ForkOutcome::Child,
        }
    }
}

/// Convenience wrapper around `nix::unistd::fork` that runs the pre/post
/// hooks around it, for hosts happy to let TURTLES own the actual
/// `fork(2)` call too.
///
/// # Safety
/// Same caveats as `nix::unistd::fork`: async-signal-unsafe code must not
/// run between fork and exec/exit in the child.
pub unsafe fn fork_with_hooks(state: &ForkAware) -> Result<ForkOutcome> {
    state.prepare_fork();
    let result = nix::unistd::fork().map_err(|e| {
        TurtlesError::Configuration(format!("fork(2) failed: {e}"))
    })?;
    let outcome = ForkOutcome::from(result);
    state.after_fork(&outcome)?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommitMode, ScheduleMode};

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            enabled: true,
            commit_mode: CommitMode::Staged,
            interval_millis: 50,
            db_path: dir.to_path_buf(),
            db_prefix: "turtles".to_string(),
            schedule_mode: ScheduleMode::Mt,
            debug: false,
            self_prefix: "turtles::".to_string(),
        }
    }

    #[test]
    fn prepare_and_resume_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let state = ForkAware::new(config).unwrap();
        assert!(state.recorder().is_some());
        state.prepare_fork();
        assert!(state.recorder().is_none());
    }

    /// Exercises `after_fork`'s copy-on-child path across a real `fork(2)`,
    /// since `std::process::id()` alone can't distinguish "my pid" from
    /// "my parent's pid" once called from inside the child.
    #[test]
    fn after_fork_copies_parent_db_into_child() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let state = ForkAware::new(config.clone()).unwrap();
        state.prepare_fork();

        let parent_path = config.db_file_for_pid(std::process::id());
        assert!(parent_path.exists());

        match unsafe { nix::unistd::fork() }.unwrap() {
            nix::unistd::ForkResult::Child => {
                let after_fork_ok = state.after_fork(&ForkOutcome::Child).is_ok();
                let child_path = config.db_file_for_pid(std::process::id());
                let copied = child_path.exists() && child_path != parent_path;
                state.prepare_fork();
                std::process::exit(if after_fork_ok && copied { 0 } else { 1 });
            }
            nix::unistd::ForkResult::Parent { child } => {
                let status = nix::sys::wait::waitpid(child, None).unwrap();
                assert_eq!(status, nix::sys::wait::WaitStatus::Exited(child, 0));
            }
        }
    }
}
