//! SyncItem domain entity
//!
//! This module defines the SyncItem entity which represents a file or folder
//! being synchronized between local storage and OneDrive using the
//! Files-On-Demand model.
//!
//! ## State Machine
//!
//! ```text
//!     ┌──────────┐    access     ┌───────────┐   complete   ┌───────────┐
//!     │  Online  │ ────────────► │ Hydrating │ ───────────► │ Hydrated  │
//!     │(placeholder)│            │(downloading)│            │ (local)   │
//!     └──────────┘               └───────────┘              └───────────┘
//!          ▲                                                     │
//!          │                                                     │
//!          │    dehydrate                              modify    │
//!          └─────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//!                              ┌───────────┐
//!                              │ Modified  │ ──── conflict ───► Conflicted
//!                              │ (dirty)   │
//!                              └───────────┘
//!                                     │
//!                                     │ sync
//!                                     ▼
//!                              ┌───────────┐
//!                              │ Hydrated  │
//!                              └───────────┘
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::DomainError;
use super::newtypes::{FileHash, RemoteId, RemotePath, SyncPath, UniqueId};

// ============================================================================
// T025: ItemState enum
// ============================================================================

/// State of a sync item in the Files-On-Demand model
///
/// Represents the hydration state of a file, tracking whether content
/// is available locally or only in the cloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Metadata only, content exists only in cloud (placeholder file)
    #[default]
    Online,
    /// Currently downloading content from cloud
    Hydrating,
    /// Fully synced, content available locally
    Hydrated,
    /// Hydrated and pinned to stay local; never chosen by automatic dehydration
    Pinned,
    /// Local changes pending upload to cloud
    Modified,
    /// Conflict detected between local and remote versions
    Conflicted,
    /// Error state with reason
    Error(String),
    /// Marked for deletion
    Deleted,
}

impl ItemState {
    /// Returns true if the item content is available locally
    pub fn is_local(&self) -> bool {
        matches!(self, ItemState::Hydrated | ItemState::Pinned | ItemState::Modified)
    }

    /// Returns true if the item is only a placeholder
    pub fn is_placeholder(&self) -> bool {
        matches!(self, ItemState::Online)
    }

    /// Returns true if the item is in an active transfer state
    pub fn is_transferring(&self) -> bool {
        matches!(self, ItemState::Hydrating)
    }

    /// Returns true if the item needs user attention
    pub fn needs_attention(&self) -> bool {
        matches!(self, ItemState::Conflicted | ItemState::Error(_))
    }

    /// Returns true if the item has pending changes to sync
    pub fn has_pending_changes(&self) -> bool {
        matches!(self, ItemState::Modified)
    }

    /// Returns true if the item is a dehydration candidate.
    ///
    /// Only fully-hydrated, unmodified, unpinned content can be safely
    /// evicted from the local cache; everything else either has no local
    /// content to remove or has state that would be lost.
    pub fn can_dehydrate(&self) -> bool {
        matches!(self, ItemState::Hydrated)
    }

    /// Returns true if the item is pinned to stay local
    pub fn is_pinned(&self) -> bool {
        matches!(self, ItemState::Pinned)
    }

    /// Returns the state name as a string (without error details)
    pub fn name(&self) -> &'static str {
        match self {
            ItemState::Online => "Online",
            ItemState::Hydrating => "Hydrating",
            ItemState::Hydrated => "Hydrated",
            ItemState::Pinned => "Pinned",
            ItemState::Modified => "Modified",
            ItemState::Conflicted => "Conflicted",
            ItemState::Error(_) => "Error",
            ItemState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Online => write!(f, "online"),
            ItemState::Hydrating => write!(f, "hydrating"),
            ItemState::Hydrated => write!(f, "hydrated"),
            ItemState::Pinned => write!(f, "pinned"),
            ItemState::Modified => write!(f, "modified"),
            ItemState::Conflicted => write!(f, "conflicted"),
            ItemState::Error(reason) => write!(f, "error: {}", reason),
            ItemState::Deleted => write!(f, "deleted"),
        }
    }
}

// ============================================================================
// T026: ItemMetadata struct
// ============================================================================

/// Unix-style file permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Read permission
    pub read: bool,
    /// Write permission
    pub write: bool,
    /// Execute permission (for directories, this means list)
    pub execute: bool,
}

impl Permissions {
    /// Creates permissions with all flags set to true
    pub fn all() -> Self {
        Self {
            read: true,
            write: true,
            execute: true,
        }
    }

    /// Creates read-only permissions
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            execute: false,
        }
    }

    /// Creates permissions from a Unix mode (e.g., 0o644)
    pub fn from_mode(mode: u32) -> Self {
        Self {
            read: (mode & 0o400) != 0,
            write: (mode & 0o200) != 0,
            execute: (mode & 0o100) != 0,
        }
    }

    /// Converts to a Unix mode for the owner bits
    pub fn to_mode(&self) -> u32 {
        let mut mode = 0u32;
        if self.read {
            mode |= 0o400;
        }
        if self.write {
            mode |= 0o200;
        }
        if self.execute {
            mode |= 0o100;
        }
        mode
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// Metadata about a sync item
///
/// Contains file system metadata and OneDrive-specific information
/// needed for synchronization decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Whether this item is a directory
    is_directory: bool,
    /// MIME type of the file (None for directories)
    mime_type: Option<String>,
    /// When the item was originally created
    created_at: DateTime<Utc>,
    /// ETag from OneDrive for optimistic concurrency control
    etag: Option<String>,
    /// File permissions
    permissions: Permissions,
}

impl ItemMetadata {
    /// Creates metadata for a file
    pub fn new_file(mime_type: Option<String>) -> Self {
        Self {
            is_directory: false,
            mime_type,
            created_at: Utc::now(),
            etag: None,
            permissions: Permissions::all(),
        }
    }

    /// Creates metadata for a directory
    pub fn new_directory() -> Self {
        Self {
            is_directory: true,
            mime_type: None,
            created_at: Utc::now(),
            etag: None,
            permissions: Permissions::all(),
        }
    }

    /// Creates metadata with all fields specified
    pub fn new(
        is_directory: bool,
        mime_type: Option<String>,
        created_at: DateTime<Utc>,
        etag: Option<String>,
        permissions: Permissions,
    ) -> Self {
        Self {
            is_directory,
            mime_type,
            created_at,
            etag,
            permissions,
        }
    }

    /// Returns true if this is a directory
    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    /// Returns the MIME type
    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    /// Returns when the item was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the ETag
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Returns the permissions
    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// Sets the ETag
    pub fn set_etag(&mut self, etag: impl Into<String>) {
        self.etag = Some(etag.into());
    }

    /// Clears the ETag
    pub fn clear_etag(&mut self) {
        self.etag = None;
    }

    /// Sets the permissions
    pub fn set_permissions(&mut self, permissions: Permissions) {
        self.permissions = permissions;
    }

    /// Sets the MIME type
    pub fn set_mime_type(&mut self, mime_type: Option<String>) {
        self.mime_type = mime_type;
    }
}

// ============================================================================
// T027: ErrorInfo struct
// ============================================================================

/// Information about an error that occurred during synchronization
///
/// Tracks error details and retry information for failed operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code for categorization (e.g., "NETWORK_ERROR", "AUTH_EXPIRED")
    code: String,
    /// Human-readable error message
    message: String,
    /// Number of retry attempts made
    retry_count: u32,
    /// When the last attempt was made
    last_attempt: DateTime<Utc>,
    /// When the next retry should be attempted (None if no retry scheduled)
    next_retry: Option<DateTime<Utc>>,
}

impl ErrorInfo {
    /// Creates a new ErrorInfo
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retry_count: 0,
            last_attempt: Utc::now(),
            next_retry: None,
        }
    }

    /// Creates an ErrorInfo with a scheduled retry
    pub fn with_retry(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            code: code.into(),
            message: message.into(),
            retry_count: 0,
            last_attempt: now,
            next_retry: Some(now + retry_delay),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the retry count
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns when the last attempt was made
    pub fn last_attempt(&self) -> DateTime<Utc> {
        self.last_attempt
    }

    /// Returns when the next retry is scheduled
    pub fn next_retry(&self) -> Option<DateTime<Utc>> {
        self.next_retry
    }

    /// Returns true if a retry is scheduled
    pub fn has_retry_scheduled(&self) -> bool {
        self.next_retry.is_some()
    }

    /// Returns true if it's time to retry
    pub fn should_retry_now(&self) -> bool {
        match self.next_retry {
            Some(next) => Utc::now() >= next,
            None => false,
        }
    }

    /// Increments the retry count and updates the last attempt time
    pub fn record_retry(&mut self) {
        self.retry_count += 1;
        self.last_attempt = Utc::now();
    }

    /// Schedules the next retry with exponential backoff
    ///
    /// Uses the formula: base_delay * 2^retry_count, capped at max_delay
    pub fn schedule_retry_exponential(&mut self, base_delay: Duration, max_delay: Duration) {
        let multiplier = 2i64.saturating_pow(self.retry_count);
        let delay = base_delay * multiplier as i32;
        let capped_delay = if delay > max_delay { max_delay } else { delay };
        self.next_retry = Some(Utc::now() + capped_delay);
    }

    /// Cancels any scheduled retry
    pub fn cancel_retry(&mut self) {
        self.next_retry = None;
    }

    /// Creates a common network error
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::with_retry("NETWORK_ERROR", message, Duration::seconds(30))
    }

    /// Creates a common authentication error
    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::new("AUTH_ERROR", message)
    }

    /// Creates a common rate limit error
    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::with_retry("RATE_LIMITED", "Rate limit exceeded", retry_after)
    }

    /// Creates a common conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if self.retry_count > 0 {
            write!(f, " (retries: {})", self.retry_count)?;
        }
        Ok(())
    }
}

// ============================================================================
// T028: SyncItem struct
// ============================================================================

/// Represents a file or folder being synchronized between local storage and OneDrive
///
/// SyncItem is the core domain entity that tracks the synchronization state
/// of individual files and directories using the Files-On-Demand model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Unique identifier for this item within OnDrift
    id: UniqueId,
    /// Local file system path
    local_path: SyncPath,
    /// OneDrive item ID (None for new local items not yet uploaded)
    remote_id: Option<RemoteId>,
    /// Remote OneDrive path
    remote_path: RemotePath,
    /// Current synchronization state
    state: ItemState,
    /// Content hash from OneDrive (quickXorHash)
    content_hash: Option<FileHash>,
    /// Local content hash (computed locally)
    local_hash: Option<FileHash>,
    /// File size in bytes (0 for directories)
    size_bytes: u64,
    /// When this item was last successfully synced
    last_sync: Option<DateTime<Utc>>,
    /// Last modified time on the local filesystem
    last_modified_local: Option<DateTime<Utc>>,
    /// Last modified time on OneDrive
    last_modified_remote: Option<DateTime<Utc>>,
    /// Item metadata
    metadata: ItemMetadata,
    /// Error information if state is Error
    error_info: Option<ErrorInfo>,
    /// When set, this item was created locally and has not yet been observed
    /// in a remote delta listing. A delta response omitting it must not be
    /// treated as a remote deletion until `pending_remote_since` falls
    /// outside the configured grace window.
    pending_remote_since: Option<DateTime<Utc>>,
}

// ============================================================================
// T029: SyncItem::new() constructor
// ============================================================================

impl SyncItem {
    /// Creates a new SyncItem with validation
    ///
    /// # Arguments
    ///
    /// * `local_path` - The local filesystem path (must be absolute)
    /// * `remote_path` - The OneDrive path
    /// * `is_directory` - Whether this is a directory
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ValidationFailed` if:
    /// - The paths are inconsistent (e.g., file path ends with /)
    pub fn new(
        local_path: SyncPath,
        remote_path: RemotePath,
        is_directory: bool,
    ) -> Result<Self, DomainError> {
        // Validate that directory flag is consistent
        // (We can't fully validate path consistency without filesystem access)

        let metadata = if is_directory {
            ItemMetadata::new_directory()
        } else {
            ItemMetadata::new_file(None)
        };

        Ok(Self {
            id: UniqueId::new(),
            local_path,
            remote_id: None,
            remote_path,
            state: ItemState::Online,
            content_hash: None,
            local_hash: None,
            size_bytes: 0,
            last_sync: None,
            last_modified_local: None,
            last_modified_remote: None,
            metadata,
            error_info: None,
            pending_remote_since: None,
        })
    }

    /// Creates a new SyncItem for a file with size and MIME type
    pub fn new_file(
        local_path: SyncPath,
        remote_path: RemotePath,
        size_bytes: u64,
        mime_type: Option<String>,
    ) -> Result<Self, DomainError> {
        let mut item = Self::new(local_path, remote_path, false)?;
        item.size_bytes = size_bytes;
        item.metadata.set_mime_type(mime_type);
        Ok(item)
    }

    /// Creates a new SyncItem for a directory
    pub fn new_directory(
        local_path: SyncPath,
        remote_path: RemotePath,
    ) -> Result<Self, DomainError> {
        Self::new(local_path, remote_path, true)
    }

    /// Creates a SyncItem from remote data (for initial sync from cloud)
    pub fn from_remote(
        local_path: SyncPath,
        remote_path: RemotePath,
        remote_id: RemoteId,
        is_directory: bool,
        size_bytes: u64,
        content_hash: Option<FileHash>,
        last_modified_remote: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut item = Self::new(local_path, remote_path, is_directory)?;
        item.remote_id = Some(remote_id);
        item.size_bytes = size_bytes;
        item.content_hash = content_hash;
        item.last_modified_remote = Some(last_modified_remote);
        Ok(item)
    }

    // --- Getters ---

    /// Returns the item's unique identifier
    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    /// Returns the local file path
    pub fn local_path(&self) -> &SyncPath {
        &self.local_path
    }

    /// Returns the remote ID if set
    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.remote_id.as_ref()
    }

    /// Returns the remote path
    pub fn remote_path(&self) -> &RemotePath {
        &self.remote_path
    }

    /// Returns the current state
    pub fn state(&self) -> &ItemState {
        &self.state
    }

    /// Returns the content hash from OneDrive
    pub fn content_hash(&self) -> Option<&FileHash> {
        self.content_hash.as_ref()
    }

    /// Returns the local content hash
    pub fn local_hash(&self) -> Option<&FileHash> {
        self.local_hash.as_ref()
    }

    /// Returns the file size in bytes
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Returns when the item was last synced
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Returns the local last modified time
    pub fn last_modified_local(&self) -> Option<DateTime<Utc>> {
        self.last_modified_local
    }

    /// Returns the remote last modified time
    pub fn last_modified_remote(&self) -> Option<DateTime<Utc>> {
        self.last_modified_remote
    }

    /// Returns the metadata
    pub fn metadata(&self) -> &ItemMetadata {
        &self.metadata
    }

    /// Returns mutable metadata
    pub fn metadata_mut(&mut self) -> &mut ItemMetadata {
        &mut self.metadata
    }

    /// Returns the error info if any
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }

    /// Returns true if this is a directory
    pub fn is_directory(&self) -> bool {
        self.metadata.is_directory()
    }

    /// Returns true if the local and remote hashes match
    pub fn hashes_match(&self) -> bool {
        match (&self.local_hash, &self.content_hash) {
            (Some(local), Some(remote)) => local == remote,
            _ => false,
        }
    }

    // --- Setters ---

    /// Sets the remote ID
    pub fn set_remote_id(&mut self, remote_id: RemoteId) {
        self.remote_id = Some(remote_id);
    }

    /// Sets the content hash from OneDrive
    pub fn set_content_hash(&mut self, hash: FileHash) {
        self.content_hash = Some(hash);
    }

    /// Sets the local content hash
    pub fn set_local_hash(&mut self, hash: FileHash) {
        self.local_hash = Some(hash);
    }

    /// Sets the file size
    pub fn set_size_bytes(&mut self, size: u64) {
        self.size_bytes = size;
    }

    /// Sets the local last modified time
    pub fn set_last_modified_local(&mut self, time: DateTime<Utc>) {
        self.last_modified_local = Some(time);
    }

    /// Sets the remote last modified time
    pub fn set_last_modified_remote(&mut self, time: DateTime<Utc>) {
        self.last_modified_remote = Some(time);
    }

    /// Updates the last sync time to now
    pub fn mark_synced(&mut self) {
        self.last_sync = Some(Utc::now());
    }

    /// Updates the local path
    pub fn update_local_path(&mut self, path: SyncPath) {
        self.local_path = path;
    }

    /// Updates the remote path
    pub fn update_remote_path(&mut self, path: RemotePath) {
        self.remote_path = path;
    }

    /// Returns true if this item is still waiting to be observed in a delta listing
    pub fn is_pending_remote(&self) -> bool {
        self.pending_remote_since.is_some()
    }

    /// Returns when this item first became pending-remote, if it is
    pub fn pending_remote_since(&self) -> Option<DateTime<Utc>> {
        self.pending_remote_since
    }

    /// Marks this item as pending-remote as of now
    ///
    /// Called when a new local file/folder is created and queued for upload,
    /// before its remote counterpart has appeared in any delta response.
    pub fn mark_pending_remote(&mut self) {
        self.pending_remote_since = Some(Utc::now());
    }

    /// Clears the pending-remote marker
    ///
    /// Called once the item is observed in a delta listing (it now has a
    /// confirmed remote identity) or once the grace window has elapsed and
    /// the caller has decided how to handle the absence.
    pub fn clear_pending_remote(&mut self) {
        self.pending_remote_since = None;
    }

    /// Returns true if this item is still within its pending-remote grace
    /// window, i.e. a delta listing that omits it should NOT be treated as
    /// a remote deletion yet.
    pub fn within_pending_remote_grace(&self, grace: Duration) -> bool {
        match self.pending_remote_since {
            Some(since) => Utc::now() - since < grace,
            None => false,
        }
    }
}

// ============================================================================
// T030: State transition methods
// ============================================================================

impl SyncItem {
    /// Checks if a state transition is valid
    ///
    /// Valid transitions:
    /// - Online -> Hydrating, Pinned, Error, Deleted
    /// - Hydrating -> Hydrated, Pinned, Error
    /// - Hydrated -> Modified, Pinned, Online (dehydrate), Error, Deleted
    /// - Pinned -> Hydrated (unpin), Modified, Error, Deleted
    /// - Modified -> Hydrated (after sync), Pinned, Conflicted, Error
    /// - Conflicted -> Hydrated (after resolution), Error
    /// - Error -> any state (retry)
    /// - Deleted -> (terminal state, no transitions)
    pub fn can_transition_to(&self, target: &ItemState) -> bool {
        // Deleted is a terminal state
        if matches!(self.state, ItemState::Deleted) {
            return false;
        }

        // Error state can transition to any state (retry mechanism)
        if matches!(self.state, ItemState::Error(_)) {
            return true;
        }

        match (&self.state, target) {
            // Online transitions
            (ItemState::Online, ItemState::Hydrating) => true,
            (ItemState::Online, ItemState::Pinned) => true, // direct hydrate+pin
            (ItemState::Online, ItemState::Error(_)) => true,
            (ItemState::Online, ItemState::Deleted) => true,

            // Hydrating transitions
            (ItemState::Hydrating, ItemState::Hydrated) => true,
            (ItemState::Hydrating, ItemState::Pinned) => true,
            (ItemState::Hydrating, ItemState::Error(_)) => true,

            // Hydrated transitions
            (ItemState::Hydrated, ItemState::Modified) => true,
            (ItemState::Hydrated, ItemState::Pinned) => true,
            (ItemState::Hydrated, ItemState::Online) => true, // dehydrate
            (ItemState::Hydrated, ItemState::Error(_)) => true,
            (ItemState::Hydrated, ItemState::Deleted) => true,

            // Pinned transitions
            (ItemState::Pinned, ItemState::Hydrated) => true, // unpin
            (ItemState::Pinned, ItemState::Modified) => true,
            (ItemState::Pinned, ItemState::Error(_)) => true,
            (ItemState::Pinned, ItemState::Deleted) => true,

            // Modified transitions
            (ItemState::Modified, ItemState::Hydrated) => true, // after sync
            (ItemState::Modified, ItemState::Pinned) => true,
            (ItemState::Modified, ItemState::Conflicted) => true,
            (ItemState::Modified, ItemState::Error(_)) => true,

            // Conflicted transitions
            (ItemState::Conflicted, ItemState::Hydrated) => true, // after resolution
            (ItemState::Conflicted, ItemState::Error(_)) => true,

            // All other transitions are invalid
            _ => false,
        }
    }

    /// Attempts to transition to a new state
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidState` if the transition is not allowed.
    pub fn transition_to(&mut self, target: ItemState) -> Result<(), DomainError> {
        if !self.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }

        // Clear error info when leaving error state
        if matches!(self.state, ItemState::Error(_)) {
            self.error_info = None;
        }

        // Set error info when entering error state
        if let ItemState::Error(ref reason) = target {
            if self.error_info.is_none() {
                self.error_info = Some(ErrorInfo::new("UNKNOWN", reason.clone()));
            }
        }

        // Update last sync time when transitioning to Hydrated from Modified
        if matches!(self.state, ItemState::Modified) && matches!(target, ItemState::Hydrated) {
            self.mark_synced();
        }

        self.state = target;
        Ok(())
    }

    /// Transitions to error state with detailed error info
    pub fn transition_to_error(&mut self, error: ErrorInfo) -> Result<(), DomainError> {
        let target = ItemState::Error(error.message().to_string());
        if !self.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: "Error".to_string(),
            });
        }

        self.error_info = Some(error);
        self.state = target;
        Ok(())
    }

    /// Convenience method to start hydrating (downloading)
    pub fn start_hydrating(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Hydrating)
    }

    /// Convenience method to complete hydration
    pub fn complete_hydration(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Hydrated)
    }

    /// Convenience method to dehydrate (convert to placeholder)
    pub fn dehydrate(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Online)
    }

    /// Convenience method to mark as modified
    pub fn mark_modified(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Modified)
    }

    /// Convenience method to mark as conflicted
    pub fn mark_conflicted(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Conflicted)
    }

    /// Convenience method to mark as deleted
    pub fn mark_deleted(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Deleted)
    }

    /// Convenience method to resolve conflict (transition to Hydrated)
    pub fn resolve_conflict(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Hydrated)
    }

    /// Convenience method to sync modified item (transition to Hydrated)
    pub fn complete_sync(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Hydrated)
    }

    /// Retry from error state to a target state
    pub fn retry_to(&mut self, target: ItemState) -> Result<(), DomainError> {
        if !matches!(self.state, ItemState::Error(_)) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }

        // Record the retry attempt
        if let Some(ref mut error_info) = self.error_info {
            error_info.record_retry();
        }

        self.transition_to(target)
    }

    /// Force-sets the state, bypassing [`Self::can_transition_to`].
    ///
    /// Used for cases that aren't really "transitions" in the state-machine
    /// sense: resetting a `Hydrating` item stranded by a crash back to
    /// `Online`, or seeding a freshly created local item straight into
    /// `Modified` without first passing through `Hydrated`.
    pub fn reset_state_for_crash_recovery(&mut self, target: ItemState) {
        if matches!(self.state, ItemState::Error(_)) {
            self.error_info = None;
        }
        self.state = target;
    }
}
