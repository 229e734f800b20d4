//! # Statekeeper
//!
//! A centralized, versioned, observable state store.
//!
//! ## Core Concepts
//!
//! - **Store**: Holds the current [`State`]; `dispatch` is the only way to change it
//! - **Reducers**: Pure functions computing the next state from an [`Action`]
//! - **Middleware**: Interceptors wrapped around dispatch
//! - **History**: Time-travel log of every dispatch, optionally branching
//! - **Snapshots**: Compressed full or incremental copies of the state
//! - **Persistence**: Versioned saves to file, SQLite or key-value backends
//!
//! ## Example
//!
//! ```no_run
//! use statekeeper::actions::creators;
//! use statekeeper::persistence::{FileBackend, PersistenceConfig, PersistenceMiddleware, SaveStrategy};
//! use statekeeper::{default_reducer, PersistenceManager, Store, StoreConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> statekeeper::Result<()> {
//! let store = Store::new(default_reducer(), StoreConfig::default())?;
//!
//! let backend = Arc::new(FileBackend::open("./state-data")?);
//! let persistence = Arc::new(PersistenceManager::new(
//!     backend,
//!     PersistenceConfig::with_strategy(SaveStrategy::Debounced),
//! )?);
//! store.add_middleware(Arc::new(PersistenceMiddleware::new(Arc::clone(&persistence))))?;
//!
//! let _unsubscribe = store.subscribe(|state| println!("{} slices", state.len()));
//! store.dispatch(creators::add_element("rect-1"))?;
//!
//! persistence.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod middleware;
pub mod migration;
pub mod persistence;
pub mod reducers;
pub mod snapshots;
pub mod state;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use actions::{Action, ActionKind};
pub use config::{BackendConfig, Config};
pub use error::{Result, StoreError};
pub use history::{
    HistoryConfig, HistoryEngine, HistoryEntry, HistoryExport, HistoryMiddleware, HistoryMode,
    HistoryStats,
};
pub use middleware::{LoggingMiddleware, Middleware, Next, StoreApi};
pub use migration::MigrationRegistry;
pub use persistence::{
    PersistenceBackend, PersistenceConfig, PersistenceManager, PersistenceMiddleware,
    SaveStrategy, VersionMetadata,
};
pub use reducers::{combine_reducers, default_reducer, Reducer, SliceReducer};
pub use snapshots::{Snapshot, SnapshotConfig, SnapshotManager, SnapshotType};
pub use state::State;
pub use store::{Store, StoreConfig};
pub use subscriptions::{
    StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle, Unsubscribe,
};
pub use types::{Checksum, Timestamp};
