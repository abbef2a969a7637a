//! sled-backed local state store.
//!
//! `MetaStore` owns the single `sled::Db` and hands out the named trees
//! each piece of domain state lives in. sled gives us crash-safe,
//! lock-free, single-process B+tree storage without an embedded SQL
//! engine or a migrations directory to keep in sync.
//!
//! ## Tree layout
//!
//! | Tree                  | Key                        | Value (serde_json)   |
//! |------------------------|----------------------------|-----------------------|
//! | `metadata`             | item id (UUID string)      | `SyncItem`            |
//! | `metadata_by_path`     | local path string          | item id (UUID string) |
//! | `metadata_by_remote`   | remote id string            | item id (UUID string) |
//! | `item_account`         | item id                    | account id string     |
//! | `accounts`             | account id (UUID string)   | `Account`             |
//! | `sessions`             | session id (UUID string)   | `SyncSession`         |
//! | `delta`                | account id                 | delta token string    |
//! | `audit`                | big-endian u64 sequence    | `AuditEntry`          |
//! | `conflicts`            | conflict id (UUID string)  | `Conflict`            |
//! | `offline_changes`      | item id                    | queued change record  |
//! | `version`              | item id                    | `VersionInfo` history |
//! | `uploads`              | item id                    | upload session state  |
//! | `inodes`               | item id                    | inode (u64 be bytes)  |
//! | `inodes_rev`           | inode (u64 be bytes)       | item id               |
//! | `last_accessed`        | item id                    | RFC 3339 timestamp    |
//! | `hydration_progress`   | item id                    | u8 (0-100)            |
//! | `counters`             | counter name                | u64 be bytes          |

use std::path::Path;

use ondrift_core::domain::newtypes::UniqueId;

use crate::CacheError;

pub const TREE_METADATA: &str = "metadata";
pub const TREE_METADATA_BY_PATH: &str = "metadata_by_path";
pub const TREE_METADATA_BY_REMOTE: &str = "metadata_by_remote";
pub const TREE_ITEM_ACCOUNT: &str = "item_account";
pub const TREE_ACCOUNTS: &str = "accounts";
pub const TREE_SESSIONS: &str = "sessions";
pub const TREE_DELTA: &str = "delta";
pub const TREE_AUDIT: &str = "audit";
pub const TREE_CONFLICTS: &str = "conflicts";
pub const TREE_OFFLINE_CHANGES: &str = "offline_changes";
pub const TREE_VERSION: &str = "version";
pub const TREE_UPLOADS: &str = "uploads";
pub const TREE_INODES: &str = "inodes";
pub const TREE_INODES_REV: &str = "inodes_rev";
pub const TREE_LAST_ACCESSED: &str = "last_accessed";
pub const TREE_HYDRATION_PROGRESS: &str = "hydration_progress";
pub const TREE_COUNTERS: &str = "counters";

const NEXT_INODE_COUNTER: &str = "next_inode";
const AUDIT_SEQ_COUNTER: &str = "audit_seq";

/// First inode handed out. 1 is conventionally reserved for the FUSE root.
const FIRST_INODE: u64 = 2;

/// Owns the sled database and every named tree the repository touches.
#[derive(Clone)]
pub struct MetaStore {
    db: sled::Db,
    pub(crate) metadata: sled::Tree,
    pub(crate) metadata_by_path: sled::Tree,
    pub(crate) metadata_by_remote: sled::Tree,
    pub(crate) item_account: sled::Tree,
    pub(crate) accounts: sled::Tree,
    pub(crate) sessions: sled::Tree,
    pub(crate) delta: sled::Tree,
    pub(crate) audit: sled::Tree,
    pub(crate) conflicts: sled::Tree,
    pub(crate) offline_changes: sled::Tree,
    pub(crate) version: sled::Tree,
    pub(crate) uploads: sled::Tree,
    pub(crate) inodes: sled::Tree,
    pub(crate) inodes_rev: sled::Tree,
    pub(crate) last_accessed: sled::Tree,
    pub(crate) hydration_progress: sled::Tree,
    pub(crate) counters: sled::Tree,
}

impl MetaStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CacheError::OpenFailed {
                path: path.display().to_string(),
                source: sled::Error::Io(e),
            })?;
        }

        let db = sled::Config::new()
            .path(path)
            .cache_capacity(64 * 1024 * 1024)
            .flush_every_ms(Some(1000))
            .open()
            .map_err(|e| CacheError::OpenFailed {
                path: path.display().to_string(),
                source: e,
            })?;

        Self::from_db(db)
    }

    /// Opens a temporary, non-persistent store. Used in tests.
    pub fn temporary() -> Result<Self, CacheError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, CacheError> {
        Ok(Self {
            metadata: db.open_tree(TREE_METADATA)?,
            metadata_by_path: db.open_tree(TREE_METADATA_BY_PATH)?,
            metadata_by_remote: db.open_tree(TREE_METADATA_BY_REMOTE)?,
            item_account: db.open_tree(TREE_ITEM_ACCOUNT)?,
            accounts: db.open_tree(TREE_ACCOUNTS)?,
            sessions: db.open_tree(TREE_SESSIONS)?,
            delta: db.open_tree(TREE_DELTA)?,
            audit: db.open_tree(TREE_AUDIT)?,
            conflicts: db.open_tree(TREE_CONFLICTS)?,
            offline_changes: db.open_tree(TREE_OFFLINE_CHANGES)?,
            version: db.open_tree(TREE_VERSION)?,
            uploads: db.open_tree(TREE_UPLOADS)?,
            inodes: db.open_tree(TREE_INODES)?,
            inodes_rev: db.open_tree(TREE_INODES_REV)?,
            last_accessed: db.open_tree(TREE_LAST_ACCESSED)?,
            hydration_progress: db.open_tree(TREE_HYDRATION_PROGRESS)?,
            counters: db.open_tree(TREE_COUNTERS)?,
            db,
        })
    }

    /// Flushes all trees to disk. The daemon calls this on clean shutdown;
    /// sled also flushes periodically on its own (`flush_every_ms`).
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Atomically allocates the next FUSE inode number.
    pub fn next_inode(&self) -> Result<u64, CacheError> {
        let next = self
            .counters
            .update_and_fetch(NEXT_INODE_COUNTER, |old| {
                let current = old
                    .map(|bytes| u64::from_be_bytes(bytes.try_into().unwrap_or_default()))
                    .unwrap_or(FIRST_INODE - 1);
                Some((current + 1).to_be_bytes().to_vec())
            })?
            .ok_or(CacheError::NotFound("next_inode counter".to_string()))?;
        Ok(u64::from_be_bytes(next.as_ref().try_into().unwrap_or_default()))
    }

    /// Atomically allocates the next audit log sequence number.
    pub(crate) fn next_audit_seq(&self) -> Result<u64, CacheError> {
        let next = self
            .counters
            .update_and_fetch(AUDIT_SEQ_COUNTER, |old| {
                let current = old
                    .map(|bytes| u64::from_be_bytes(bytes.try_into().unwrap_or_default()))
                    .unwrap_or(0);
                Some((current + 1).to_be_bytes().to_vec())
            })?
            .ok_or(CacheError::NotFound("audit_seq counter".to_string()))?;
        Ok(u64::from_be_bytes(next.as_ref().try_into().unwrap_or_default()))
    }

    /// Folds `change` into whatever is already queued for its item id,
    /// applying spec.md §4.6's collapse rules, and persists the result.
    /// A `None` outcome (the two changes cancelled out) removes the record.
    pub fn enqueue_offline_change(
        &self,
        change: ondrift_core::domain::OfflineChange,
    ) -> Result<(), CacheError> {
        let key = change.id().to_string();
        let folded = match self.offline_changes.get(key.as_bytes())? {
            Some(bytes) => {
                let existing: ondrift_core::domain::OfflineChange = serde_json::from_slice(&bytes)?;
                ondrift_core::domain::OfflineChange::fold(existing, change)
            }
            None => Some(change),
        };
        match folded {
            Some(change) => {
                self.offline_changes
                    .insert(key.as_bytes(), serde_json::to_vec(&change)?)?;
            }
            None => {
                self.offline_changes.remove(key.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Lists every queued offline change, ordered by timestamp (oldest
    /// first) for replay.
    pub fn list_offline_changes_ordered(
        &self,
    ) -> Result<Vec<ondrift_core::domain::OfflineChange>, CacheError> {
        let mut changes = Vec::new();
        for entry in self.offline_changes.iter() {
            let (_, value) = entry?;
            changes.push(serde_json::from_slice(&value)?);
        }
        changes.sort_by_key(|c: &ondrift_core::domain::OfflineChange| c.timestamp_nanos());
        Ok(changes)
    }

    /// Removes a queued change once it has been successfully replayed.
    pub fn remove_offline_change(&self, id: &UniqueId) -> Result<(), CacheError> {
        self.offline_changes.remove(id.to_string().as_bytes())?;
        Ok(())
    }

    /// Number of changes currently queued.
    pub fn offline_change_count(&self) -> usize {
        self.offline_changes.len()
    }

    /// Persists (or overwrites) a resumable upload session's progress.
    pub fn save_upload_state(
        &self,
        state: &ondrift_core::domain::UploadState,
    ) -> Result<(), CacheError> {
        let key = state.id().to_string();
        self.uploads
            .insert(key.as_bytes(), serde_json::to_vec(state)?)?;
        Ok(())
    }

    /// Loads a resumable upload session's progress, if one is on file.
    pub fn get_upload_state(
        &self,
        id: &UniqueId,
    ) -> Result<Option<ondrift_core::domain::UploadState>, CacheError> {
        match self.uploads.get(id.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Clears a resumable upload session, on completion, cancellation, or
    /// final failure.
    pub fn remove_upload_state(&self, id: &UniqueId) -> Result<(), CacheError> {
        self.uploads.remove(id.to_string().as_bytes())?;
        Ok(())
    }
}
