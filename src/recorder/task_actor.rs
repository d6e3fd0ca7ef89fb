//! `scheduleMode = ev`: a cooperative `tokio::task`, grounded on the
//! teacher's `Storage::run` — a loop over an `mpsc::Receiver` that runs
//! until the channel closes.

use super::{default_shutdown_timeout, finalize_on_shutdown, finalize_once, Command, CompletionSignal};
use crate::config::Config;
use crate::error::{Result, TurtlesError};
use crate::store::Store;
use rusqlite::params;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 4096;

struct Inner {
    tx: Sender<Command>,
    completion: Arc<CompletionSignal>,
    join: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct TaskActorHandle(Arc<Inner>);

pub fn spawn(config: Config, pid: u32) -> Result<TaskActorHandle> {
    let (tx, rx) = mpsc::channel::<Command>(CHANNEL_CAPACITY);
    let completion = Arc::new(CompletionSignal::new());
    let task_completion = completion.clone();

    let store = Store::open(&config, pid)?;
    let interval = Duration::from_millis(config.interval_millis);

    let join = tokio::spawn(async move {
        run(store, rx, interval).await;
        task_completion.complete();
    });

    Ok(TaskActorHandle(Arc::new(Inner {
        tx,
        completion,
        join: tokio::sync::Mutex::new(Some(join)),
    })))
}

async fn run(mut store: Store, mut rx: mpsc::Receiver<Command>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Consume the immediate first tick so the first finalize happens a
    // full interval after startup, not at t=0.
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe_command = rx.recv() => {
                match maybe_command {
                    Some(Command::Shutdown) | None => {
                        if let Err(e) = finalize_on_shutdown(&store) {
                            tracing::warn!("recorder shutdown finalize failed: {e}");
                        }
                        break;
                    }
                    Some(command) => apply(&store, command),
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = finalize_once(&store) {
                    tracing::warn!("finalizer tick failed: {e}");
                }
            }
        }
    }
    let _ = store.detach_stage1();
}

fn apply(store: &Store, command: Command) {
    let conn = store.connection();
    let result: Result<()> = match command {
        Command::AddProc {
            proc_id,
            proc_name,
            time_defined,
        } => conn
            .execute(
                "INSERT OR IGNORE INTO main.proc_ids (proc_id, proc_name, time_defined) VALUES (?1, ?2, ?3)",
                params![proc_id, proc_name, time_defined],
            )
            .map(|_| ())
            .map_err(TurtlesError::from),
        Command::AddCall {
            caller_id,
            callee_id,
            trace_id,
            time_enter,
            time_leave,
        } => conn
            .execute(
                "INSERT OR IGNORE INTO main.call_pts
                    (caller_id, callee_id, trace_id, time_enter, time_leave)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![caller_id, callee_id, trace_id, time_enter, time_leave],
            )
            .map(|_| ())
            .map_err(TurtlesError::from),
        Command::UpdateCall {
            caller_id,
            callee_id,
            trace_id,
            time_leave,
        } => conn
            .execute(
                "UPDATE main.call_pts SET time_leave = ?1
                 WHERE caller_id = ?2 AND callee_id = ?3 AND trace_id = ?4 AND time_leave IS NULL",
                params![time_leave, caller_id, callee_id, trace_id],
            )
            .map(|_| ())
            .map_err(TurtlesError::from),
        Command::FinalizeNow => finalize_once(store),
        Command::Shutdown => unreachable!("handled by caller"),
    };
    if let Err(e) = result {
        tracing::warn!("recorder command failed: {e}");
    }
}

impl TaskActorHandle {
    pub fn send(&self, command: Command) {
        match self.0.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("recorder backpressure: channel full, dropping command");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!("recorder task disconnected");
            }
        }
    }

    /// Block the calling thread until the actor has shut down. Safe to
    /// call from non-async contexts (the fork pre-hook, `Drop` impls) by
    /// running a short-lived current-thread runtime if no Tokio runtime is
    /// already active on this thread.
    pub fn shutdown(&self) {
        let _ = self.0.tx.try_send(Command::Shutdown);
        let inner = self.0.clone();
        let wait = async move {
            if !inner.completion.wait(default_shutdown_timeout()) {
                tracing::warn!("recorder task did not shut down within timeout");
            }
            if let Some(handle) = inner.join.lock().await.take() {
                let _ = handle.await;
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _ = handle.block_on(wait);
            }
            Err(_) => {
                if let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    rt.block_on(wait);
                }
            }
        }
    }
}
