//! Offline change intent records.
//!
//! While the remote is unreachable, filesystem handlers record one
//! [`OfflineChange`] per mutating operation instead of contacting the
//! network. On reconnect these are replayed in timestamp order to bring the
//! remote back in line with what happened locally while offline.

use serde::{Deserialize, Serialize};

use super::newtypes::UniqueId;

/// The operation an [`OfflineChange`] intends to reconcile on replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Modify,
    Delete,
    Rename,
}

/// A single recorded intent, queued while offline.
///
/// `timestamp` is nanosecond-resolution monotonic-of-wall-clock: it only
/// needs to order records relative to each other, not to be comparable
/// across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineChange {
    id: UniqueId,
    kind: ChangeKind,
    timestamp_nanos: i128,
    old_path: Option<String>,
    new_path: Option<String>,
}

impl OfflineChange {
    pub fn new(
        id: UniqueId,
        kind: ChangeKind,
        timestamp_nanos: i128,
        old_path: Option<String>,
        new_path: Option<String>,
    ) -> Self {
        Self {
            id,
            kind,
            timestamp_nanos,
            old_path,
            new_path,
        }
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    pub fn timestamp_nanos(&self) -> i128 {
        self.timestamp_nanos
    }

    pub fn old_path(&self) -> Option<&str> {
        self.old_path.as_deref()
    }

    pub fn new_path(&self) -> Option<&str> {
        self.new_path.as_deref()
    }

    /// Folds an incoming change into an already-queued one for the same
    /// item id, per spec.md §4.6's collapse rules:
    ///
    /// - `create -> modify` collapses to `create` (the create already
    ///   carries the current body, a later modify doesn't need its own
    ///   record).
    /// - `create -> delete` cancels both: the remote object was never
    ///   created, so there is nothing to delete there either. Returns
    ///   `None`.
    /// - `modify -> delete` collapses to `delete`.
    /// - any other pairing keeps the newer record (a `rename` after a
    ///   `create`/`modify` is recorded as its own entry; FSHandlers never
    ///   folds heterogeneous path-changing ops into a single record).
    ///
    /// Returns `Some` with the record that should remain queued, or `None`
    /// if the two cancel out entirely.
    pub fn fold(existing: OfflineChange, incoming: OfflineChange) -> Option<OfflineChange> {
        debug_assert_eq!(existing.id, incoming.id);
        match (existing.kind, incoming.kind) {
            (ChangeKind::Create, ChangeKind::Modify) => Some(existing),
            (ChangeKind::Create, ChangeKind::Delete) => None,
            (ChangeKind::Modify, ChangeKind::Delete) => Some(incoming),
            (ChangeKind::Modify, ChangeKind::Modify) => Some(incoming),
            (ChangeKind::Create, ChangeKind::Create) => Some(incoming),
            _ => Some(incoming),
        }
    }
}
