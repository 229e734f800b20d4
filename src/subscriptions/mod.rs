//! Subscription system for live store updates.
//!
//! Two flavours:
//! - Listeners: callbacks run synchronously, in subscription order, at the
//!   end of every dispatch that changed the state.
//! - Watchers: bounded channels receiving [`StoreEvent`]s, filtered by
//!   action type or slice. Slow watchers are dropped instead of blocking
//!   dispatch.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.watch(SubscriptionConfig {
//!     filter: SubscriptionFilter::slices(vec!["elements".to_string()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::StateChanged { changed_slices, .. }) => println!("{:?}", changed_slices),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod listeners;
mod manager;
mod types;

pub use listeners::{Listener, ListenerRegistry, Unsubscribe};
pub use manager::SubscriptionManager;
pub use types::{
    DropReason, StoreEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
