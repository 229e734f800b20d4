//! Background auto-snapshot and retention cleanup.

use super::SnapshotManager;
use crate::state::State;
use crate::store::Store;
use crossbeam_channel::{bounded, never, select, tick, Receiver, Sender};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Something the worker can snapshot.
pub trait StateSource: Send + Sync {
    fn current_state(&self) -> State;

    /// Counter that changes whenever the state does.
    fn revision(&self) -> u64;
}

impl StateSource for Store {
    fn current_state(&self) -> State {
        self.get_state()
    }

    fn revision(&self) -> u64 {
        Store::revision(self)
    }
}

/// Handle to the background snapshot thread. Stops on drop.
pub struct SnapshotWorker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotWorker {
    /// Start the worker with the manager's configured intervals.
    pub fn spawn(manager: Arc<SnapshotManager>, source: Arc<dyn StateSource>) -> Self {
        let snapshot_every = manager.config().auto_snapshot_interval;
        let cleanup_every = manager.config().cleanup_interval;
        Self::spawn_with(manager, source, snapshot_every, Some(cleanup_every))
    }

    /// Start the worker with explicit intervals. None disables a task.
    pub fn spawn_with(
        manager: Arc<SnapshotManager>,
        source: Arc<dyn StateSource>,
        snapshot_every: Option<Duration>,
        cleanup_every: Option<Duration>,
    ) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("snapshot-worker".to_string())
            .spawn(move || run(manager, source, stop_rx, snapshot_every, cleanup_every));

        match handle {
            Ok(handle) => Self {
                stop: Some(stop_tx),
                handle: Some(handle),
            },
            Err(e) => {
                tracing::error!(error = %e, "failed to start snapshot worker");
                Self {
                    stop: None,
                    handle: None,
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("snapshot worker panicked");
            }
        }
    }
}

impl Drop for SnapshotWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker(every: Option<Duration>) -> Receiver<std::time::Instant> {
    match every {
        Some(d) if !d.is_zero() => tick(d),
        _ => never(),
    }
}

fn run(
    manager: Arc<SnapshotManager>,
    source: Arc<dyn StateSource>,
    stop: Receiver<()>,
    snapshot_every: Option<Duration>,
    cleanup_every: Option<Duration>,
) {
    tracing::debug!("snapshot worker started");
    let snapshot_tick = ticker(snapshot_every);
    let cleanup_tick = ticker(cleanup_every);
    let mut last_revision: Option<u64> = None;

    loop {
        select! {
            recv(stop) -> _ => break,
            recv(snapshot_tick) -> _ => {
                let revision = source.revision();
                if last_revision == Some(revision) {
                    continue;
                }
                let mut metadata = BTreeMap::new();
                metadata.insert("auto".to_string(), Value::Bool(true));
                match manager.create_snapshot(
                    &source.current_state(),
                    Some(metadata),
                    Some(vec!["auto".to_string()]),
                    None,
                ) {
                    Ok(id) => {
                        tracing::debug!(id = %id, revision, "auto snapshot created");
                        last_revision = Some(revision);
                    }
                    Err(e) => tracing::warn!(error = %e, "auto snapshot failed"),
                }
            }
            recv(cleanup_tick) -> _ => {
                if let Err(e) = manager.cleanup_expired() {
                    tracing::warn!(error = %e, "snapshot cleanup failed");
                }
            }
        }
    }
    tracing::debug!("snapshot worker stopped");
}
