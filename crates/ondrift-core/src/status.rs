//! Status change notifications.
//!
//! Every caller that transitions a [`SyncItem`]/inode's [`ItemState`] —
//! the FUSE layer on local writes, the sync engine on delta application,
//! the upload manager on promotion — reports it through [`StatusTracker`]
//! so that anything watching an item's status (xattr readers, a future
//! tray icon, tests) observes the change as it happens instead of only
//! on the next poll.
//!
//! ## Design Notes
//!
//! - Backed by `tokio::sync::broadcast` rather than an IPC/D-Bus bridge:
//!   this workspace has no desktop-notification crate, and a broadcast
//!   channel is enough for in-process subscribers.
//! - `emit` never blocks and never fails the caller: a lagging or absent
//!   subscriber only means that subscriber misses events, not that the
//!   state transition itself is rejected.

use tokio::sync::broadcast;

use crate::domain::newtypes::{RemoteId, UniqueId};
use crate::domain::sync_item::ItemState;

/// Bounded so a slow subscriber falls behind and drops old events rather
/// than retaining memory indefinitely.
const STATUS_EVENT_CHANNEL_CAPACITY: usize = 256;

/// One item's status having changed.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEvent {
    pub item_id: UniqueId,
    pub remote_id: Option<RemoteId>,
    pub state: ItemState,
}

impl StatusEvent {
    pub fn new(item_id: UniqueId, remote_id: Option<RemoteId>, state: ItemState) -> Self {
        Self {
            item_id,
            remote_id,
            state,
        }
    }
}

/// Publishes [`StatusEvent`]s to any number of subscribers.
///
/// Cloning a `StatusTracker` shares the same underlying channel (the
/// `broadcast::Sender` is itself cheaply cloneable), so it can be handed
/// to every manager that needs to emit without wrapping it in an `Arc`.
#[derive(Clone)]
pub struct StatusTracker {
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(STATUS_EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribes to future status events. Events emitted before this
    /// call are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    /// Publishes `event` to all current subscribers. A no-op if there are
    /// none.
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of subscribers currently listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
