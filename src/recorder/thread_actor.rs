//! `scheduleMode = mt`: a dedicated OS thread with a bounded
//! `std::sync::mpsc::sync_channel`, mirroring a classic
//! `LifestatsProcessor::writer_thread`.

use super::{default_shutdown_timeout, finalize_on_shutdown, finalize_once, Command, CompletionSignal};
use crate::config::Config;
use crate::error::Result;
use crate::store::Store;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CHANNEL_CAPACITY: usize = 4096;

struct Inner {
    tx: SyncSender<Command>,
    completion: Arc<CompletionSignal>,
    join: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct ThreadActorHandle(Arc<Inner>);

pub fn spawn(config: Config, pid: u32) -> Result<ThreadActorHandle> {
    let (tx, rx) = mpsc::sync_channel::<Command>(CHANNEL_CAPACITY);
    let completion = Arc::new(CompletionSignal::new());
    let writer_completion = completion.clone();

    let store = Store::open(&config, pid)?;
    let interval = Duration::from_millis(config.interval_millis);

    let join = thread::Builder::new()
        .name("turtles-recorder".into())
        .spawn(move || {
            run(store, rx, interval);
            writer_completion.complete();
        })
        .map_err(|e| crate::error::TurtlesError::Configuration(format!(
            "failed to spawn recorder thread: {e}"
        )))?;

    Ok(ThreadActorHandle(Arc::new(Inner {
        tx,
        completion,
        join: Mutex::new(Some(join)),
    })))
}

fn run(mut store: Store, rx: mpsc::Receiver<Command>, interval: Duration) {
    let mut last_finalize = Instant::now();

    loop {
        match rx.recv_timeout(interval) {
            Ok(Command::Shutdown) => {
                if let Err(e) = finalize_on_shutdown(&store) {
                    tracing::warn!("recorder shutdown finalize failed: {e}");
                }
                break;
            }
            Ok(command) => {
                apply(&store, command);
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_finalize.elapsed() >= interval {
                    if let Err(e) = finalize_once(&store) {
                        tracing::warn!("finalizer tick failed: {e}");
                    }
                    last_finalize = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if let Err(e) = finalize_on_shutdown(&store) {
                    tracing::warn!("recorder shutdown finalize failed: {e}");
                }
                break;
            }
        }
    }
    let _ = store.detach_stage1();
}

fn apply(store: &Store, command: Command) {
    use crate::error::TurtlesError;
    use rusqlite::params;
    let conn = store.connection();
    let result: Result<(), TurtlesError> = match command {
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

impl ThreadActorHandle {
    pub fn send(&self, command: Command) {
        match self.0.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("recorder backpressure: channel full, dropping command");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::error!("recorder thread disconnected");
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.0.tx.send(Command::Shutdown);
        if !self.0.completion.wait(default_shutdown_timeout()) {
            tracing::warn!("recorder thread did not shut down within timeout");
        }
        if let Some(handle) = self.0.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
