//! Subscription types for live store updates.

use serde::{Deserialize, Serialize};

/// Configuration for a watcher.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the watcher.
    /// Default: 1000
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: SubscriptionFilter::default(),
        }
    }
}

/// Filter criteria for watchers.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Only these action types (None = all).
    pub action_types: Option<Vec<String>>,

    /// Only changes touching these slices (None = all).
    pub slices: Option<Vec<String>>,

    /// Also deliver failed dispatches.
    pub include_failures: bool,
}

impl SubscriptionFilter {
    /// Everything, including failures.
    pub fn all() -> Self {
        Self {
            include_failures: true,
            ..Default::default()
        }
    }

    /// State changes caused by specific action types.
    pub fn action_types(types: Vec<String>) -> Self {
        Self {
            action_types: Some(types),
            ..Default::default()
        }
    }

    /// State changes touching specific slices.
    pub fn slices(slices: Vec<String>) -> Self {
        Self {
            slices: Some(slices),
            ..Default::default()
        }
    }
}

/// Events delivered to watchers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A dispatch changed the state.
    StateChanged {
        action_id: String,
        action_type: String,
        /// Slices whose value differs from the previous state.
        changed_slices: Vec<String>,
        /// Dispatches completed so far, including this one.
        dispatch_count: u64,
    },

    /// A dispatch failed; state is unchanged.
    ActionFailed {
        action_id: String,
        action_type: String,
        error: String,
    },

    /// Watcher was dropped.
    Dropped { reason: DropReason },
}

/// Why a watcher was dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to receive store events.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
