//! Save scheduling in front of a persistence backend.

use super::{LoadedState, PersistenceBackend, SaveMetadata, VersionMetadata, CURRENT_SCHEMA_VERSION};
use crate::error::{Result, StoreError};
use crate::migration::MigrationRegistry;
use crate::state::State;
use crate::types::VersionGenerator;
use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// When saves are written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStrategy {
    /// Write inline after every eligible action.
    Immediate,
    /// Write the latest request once `debounce_delay` passes without another.
    #[default]
    Debounced,
    /// Every `batch_interval`, write the latest of up to `batch_size` queued
    /// requests and drop the rest.
    Batch,
    /// Only `save_manual` writes.
    Manual,
}

/// Persistence scheduling configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub strategy: SaveStrategy,

    #[serde(with = "crate::types::duration_ms")]
    pub debounce_delay: Duration,

    pub batch_size: usize,

    #[serde(with = "crate::types::duration_ms")]
    pub batch_interval: Duration,

    /// Total attempts per save, including the first.
    pub retry_attempts: u32,

    /// Fixed delay between attempts.
    #[serde(with = "crate::types::duration_ms")]
    pub retry_delay: Duration,

    pub auto_prune: bool,
    pub max_versions: usize,

    /// Action types never saved.
    pub skip_action_types: Vec<String>,

    /// Schema version states are migrated to on load.
    pub schema_version: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            strategy: SaveStrategy::default(),
            debounce_delay: Duration::from_millis(1000),
            batch_size: 10,
            batch_interval: Duration::from_millis(5000),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(100),
            auto_prune: true,
            max_versions: 100,
            skip_action_types: Vec::new(),
            schema_version: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl PersistenceConfig {
    pub fn with_strategy(strategy: SaveStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }
}

/// Counters kept by the manager.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceStats {
    /// Successful saves.
    pub saves: u64,
    /// Saves that failed after every attempt.
    pub failures: u64,
    /// Requests superseded or discarded without being written.
    pub dropped: u64,
    /// Requests waiting for the worker.
    pub pending: usize,
    pub last_version: Option<String>,
    pub last_error: Option<String>,
}

struct SaveRequest {
    state: State,
    metadata: SaveMetadata,
}

enum Signal {
    Scheduled,
    Shutdown,
}

struct Inner {
    config: PersistenceConfig,
    backend: Arc<dyn PersistenceBackend>,
    versions: VersionGenerator,
    queue: Mutex<VecDeque<SaveRequest>>,
    stats: Mutex<PersistenceStats>,
    // Keeps versions in request order when the worker and a flush race
    save_lock: Mutex<()>,
}

impl Inner {
    fn save_with_retry(&self, request: &SaveRequest) -> Result<VersionMetadata> {
        let version = self.versions.next();
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self
                .backend
                .save_state(&request.state, &version, &request.metadata)
            {
                Ok(meta) => {
                    {
                        let mut stats = self.stats.lock();
                        stats.saves += 1;
                        stats.last_version = Some(version.clone());
                    }
                    tracing::debug!(backend = self.backend.name(), version = %version, attempt, "state saved");
                    self.prune();
                    return Ok(meta);
                }
                Err(e) => {
                    tracing::warn!(backend = self.backend.name(), attempt, attempts, error = %e, "save attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        thread::sleep(self.config.retry_delay);
                    }
                }
            }
        }

        let message = last_error.map(|e| e.to_string()).unwrap_or_default();
        let err = StoreError::persistence(attempts, &message);
        {
            let mut stats = self.stats.lock();
            stats.failures += 1;
            stats.last_error = Some(err.to_string());
        }
        tracing::error!(backend = self.backend.name(), error = %err, "save failed");
        Err(err)
    }

    fn prune(&self) {
        if !self.config.auto_prune {
            return;
        }
        match self.backend.prune_old_versions(self.config.max_versions) {
            Ok(0) => {}
            Ok(n) => tracing::debug!(backend = self.backend.name(), pruned = n, "old versions pruned"),
            Err(e) => tracing::warn!(backend = self.backend.name(), error = %e, "prune failed"),
        }
    }

    /// Persist the latest queued request, dropping the rest.
    fn flush_all(&self) -> Result<Option<VersionMetadata>> {
        let _save = self.save_lock.lock();
        let latest = {
            let mut queue = self.queue.lock();
            let latest = queue.pop_back();
            let skipped = queue.len() as u64;
            queue.clear();
            if skipped > 0 {
                self.stats.lock().dropped += skipped;
            }
            latest
        };
        match latest {
            Some(request) => self.save_with_retry(&request).map(Some),
            None => Ok(None),
        }
    }

    /// Take up to `batch_size` queued requests and persist the latest.
    fn flush_batch(&self) -> Result<Option<VersionMetadata>> {
        let _save = self.save_lock.lock();
        let latest = {
            let mut queue = self.queue.lock();
            let take = self.config.batch_size.max(1).min(queue.len());
            let mut batch: Vec<SaveRequest> = queue.drain(..take).collect();
            let latest = batch.pop();
            if !batch.is_empty() {
                self.stats.lock().dropped += batch.len() as u64;
            }
            latest
        };
        match latest {
            Some(request) => self.save_with_retry(&request).map(Some),
            None => Ok(None),
        }
    }
}

struct Worker {
    signals: Sender<Signal>,
    handle: JoinHandle<()>,
}

/// Decides when states reach the backend.
///
/// Debounced and batched saves run on a background worker; the dispatch
/// path only enqueues. [`shutdown`](Self::shutdown) cancels the worker,
/// flushes what is queued and closes the backend, in that order.
pub struct PersistenceManager {
    inner: Arc<Inner>,
    migrations: Option<Arc<MigrationRegistry>>,
    worker: Mutex<Option<Worker>>,
    closed: AtomicBool,
}

impl PersistenceManager {
    /// Initialize `backend` and start the worker the strategy needs.
    pub fn new(backend: Arc<dyn PersistenceBackend>, config: PersistenceConfig) -> Result<Self> {
        backend.initialize()?;

        let inner = Arc::new(Inner {
            config,
            backend,
            versions: VersionGenerator::new(),
            queue: Mutex::new(VecDeque::new()),
            stats: Mutex::new(PersistenceStats::default()),
            save_lock: Mutex::new(()),
        });

        let worker = match inner.config.strategy {
            SaveStrategy::Debounced | SaveStrategy::Batch => Some(spawn_worker(Arc::clone(&inner))?),
            SaveStrategy::Immediate | SaveStrategy::Manual => None,
        };

        Ok(Self {
            inner,
            migrations: None,
            worker: Mutex::new(worker),
            closed: AtomicBool::new(false),
        })
    }

    /// Migrate loaded states with `registry`.
    pub fn with_migrations(mut self, registry: MigrationRegistry) -> Self {
        self.migrations = Some(Arc::new(registry));
        self
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn PersistenceBackend> {
        &self.inner.backend
    }

    /// Whether actions of `action_type` are never saved.
    pub fn skips(&self, action_type: &str) -> bool {
        self.inner
            .config
            .skip_action_types
            .iter()
            .any(|t| t == action_type)
    }

    /// Hand a state to the configured strategy.
    ///
    /// Never fails: immediate save errors are logged and counted, as they
    /// must not fail the dispatch that produced the state.
    pub fn request_save(&self, state: State, metadata: SaveMetadata) {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!("save requested after shutdown, ignoring");
            self.inner.stats.lock().dropped += 1;
            return;
        }

        let request = SaveRequest { state, metadata };
        match self.inner.config.strategy {
            SaveStrategy::Immediate => {
                let _save = self.inner.save_lock.lock();
                // Logged and counted inside
                let _ = self.inner.save_with_retry(&request);
            }
            SaveStrategy::Debounced => {
                {
                    let mut queue = self.inner.queue.lock();
                    let superseded = queue.len() as u64;
                    queue.clear();
                    queue.push_back(request);
                    if superseded > 0 {
                        self.inner.stats.lock().dropped += superseded;
                    }
                }
                self.schedule();
            }
            SaveStrategy::Batch => {
                self.inner.queue.lock().push_back(request);
            }
            SaveStrategy::Manual => {}
        }
    }

    fn schedule(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            // A full channel already holds a pending reschedule
            let _ = worker.signals.try_send(Signal::Scheduled);
        }
    }

    /// Save `state` now, regardless of strategy.
    pub fn save_manual(&self, state: &State, metadata: SaveMetadata) -> Result<VersionMetadata> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::NotInitialized);
        }
        let _save = self.inner.save_lock.lock();
        self.inner.save_with_retry(&SaveRequest {
            state: state.clone(),
            metadata,
        })
    }

    /// Persist whatever is queued. Returns the metadata of the version
    /// written, if any.
    pub fn flush(&self) -> Result<Option<VersionMetadata>> {
        self.inner.flush_all()
    }

    /// Load the latest version, migrated to the configured schema version.
    pub fn load_latest(&self) -> Result<Option<State>> {
        self.load(None)
    }

    /// Load `version`, migrated to the configured schema version.
    pub fn load_version(&self, version: &str) -> Result<Option<State>> {
        self.load(Some(version))
    }

    fn load(&self, version: Option<&str>) -> Result<Option<State>> {
        let loaded = match self.inner.backend.load_state(version)? {
            Some(loaded) => loaded,
            None => return Ok(None),
        };
        self.migrate(loaded).map(Some)
    }

    fn migrate(&self, loaded: LoadedState) -> Result<State> {
        let from = loaded.metadata.schema_version;
        let to = self.inner.config.schema_version;
        if from == to {
            return Ok(loaded.state);
        }
        match &self.migrations {
            Some(registry) => registry.migrate(&loaded.state, from, to),
            None => Err(StoreError::Migration(format!(
                "Stored schema version {} differs from {} and no migrations are registered",
                from, to
            ))),
        }
    }

    pub fn list_versions(&self) -> Result<Vec<String>> {
        self.inner.backend.list_versions()
    }

    pub fn stats(&self) -> PersistenceStats {
        let mut stats = self.inner.stats.lock().clone();
        stats.pending = self.inner.queue.lock().len();
        stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the worker, flush the queue, then close the backend.
    ///
    /// Idempotent. A flush failure is returned after the backend has still
    /// been closed.
    pub fn shutdown(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.signals.send(Signal::Shutdown);
            if worker.handle.join().is_err() {
                tracing::error!("persistence worker panicked");
            }
        }

        let flushed = self.inner.flush_all();
        let closed = self.inner.backend.close();
        tracing::debug!(backend = self.inner.backend.name(), "persistence shut down");
        flushed?;
        closed
    }
}

impl Drop for PersistenceManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "persistence shutdown failed");
        }
    }
}

fn spawn_worker(inner: Arc<Inner>) -> Result<Worker> {
    let (tx, rx) = bounded::<Signal>(1024);
    let handle = thread::Builder::new()
        .name("persistence-worker".to_string())
        .spawn(move || match inner.config.strategy {
            SaveStrategy::Batch => run_batch(&inner, rx),
            _ => run_debounced(&inner, rx),
        })?;
    Ok(Worker { signals: tx, handle })
}

fn run_debounced(inner: &Inner, signals: Receiver<Signal>) {
    tracing::debug!("persistence worker started (debounced)");
    let mut deadline: Option<Instant> = None;

    loop {
        let received = match deadline {
            Some(at) => signals.recv_timeout(at.saturating_duration_since(Instant::now())),
            None => signals.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Signal::Scheduled) => {
                deadline = Some(Instant::now() + inner.config.debounce_delay);
            }
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                deadline = None;
                // Logged and counted inside
                let _ = inner.flush_all();
            }
        }
    }
    tracing::debug!("persistence worker stopped");
}

fn run_batch(inner: &Inner, signals: Receiver<Signal>) {
    tracing::debug!("persistence worker started (batch)");
    let ticker = tick(inner.config.batch_interval.max(Duration::from_millis(1)));

    loop {
        select! {
            recv(signals) -> msg => match msg {
                Ok(Signal::Scheduled) => {}
                Ok(Signal::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => {
                let _ = inner.flush_batch();
            }
        }
    }
    tracing::debug!("persistence worker stopped");
}
