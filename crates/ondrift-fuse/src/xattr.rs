//! Extended attributes handler.
//!
//! Handles extended attributes for file metadata, including hydration state
//! indicators (user.ondrift.state, user.ondrift.size, etc.) and the
//! StatusTracker-managed, read-only status xattrs userspace tools poll.
//!
//! ## Supported Extended Attributes
//!
//! - `user.ondrift.state` - Current sync/hydration state (Online, Hydrating, Hydrated, etc.)
//! - `user.ondrift.size` - File size in bytes
//! - `user.ondrift.remote_id` - OneDrive item ID
//! - `user.ondrift.progress` - Hydration progress (only during Hydrating state)
//! - `user.onemount.status` - Read-only status name: one of `Cloud`,
//!   `Downloading`, `Local`, `Uploading`, `LocalModified`, `Syncing`,
//!   `Conflict`, `Error`. Setting this attribute is rejected; it is
//!   derived, never stored directly.
//! - `user.onemount.error` - Read-only last error message, present only
//!   while status is `Error`.

use ondrift_core::domain::ItemState;

use crate::inode_entry::InodeEntry;

// ============================================================================
// Constants for xattr namespace
// ============================================================================

/// Extended attribute for the current sync/hydration state.
///
/// Values: "Online", "Hydrating", "Hydrated", "Modified", "Conflicted", "Error", "Deleted"
pub const XATTR_STATE: &str = "user.ondrift.state";

/// Extended attribute for the file size in bytes.
///
/// Value: decimal string representation of the size (e.g., "1024")
pub const XATTR_SIZE: &str = "user.ondrift.size";

/// Extended attribute for the OneDrive remote item ID.
///
/// Value: the OneDrive item identifier string (only present for items synced with OneDrive)
pub const XATTR_REMOTE_ID: &str = "user.ondrift.remote_id";

/// Extended attribute for hydration download progress.
///
/// Value: percentage string "0" to "100" (only present during Hydrating state)
pub const XATTR_PROGRESS: &str = "user.ondrift.progress";

/// Read-only status name, managed by StatusTracker.
///
/// Value: one of `Cloud`, `Downloading`, `Local`, `Uploading`,
/// `LocalModified`, `Syncing`, `Conflict`, `Error`.
pub const XATTR_STATUS: &str = "user.onemount.status";

/// Read-only last error message. Present only while `user.onemount.status`
/// reads `Error`.
pub const XATTR_ERROR: &str = "user.onemount.error";

/// Maps the crate's internal [`ItemState`] vocabulary onto the status
/// names StatusTracker exposes via [`XATTR_STATUS`].
///
/// `has_local_changes` and `is_transferring` disambiguate states that
/// collapse to the same [`ItemState`] variant but read differently from
/// userspace (a `Modified` item that is mid-upload reads `Uploading`, not
/// `LocalModified`; a `Hydrating` item that is reconciling rather than
/// downloading fresh content reads `Syncing`).
#[must_use]
pub fn status_name(state: &ItemState, is_transferring: bool) -> &'static str {
    match state {
        ItemState::Online => "Cloud",
        ItemState::Hydrating if is_transferring => "Downloading",
        ItemState::Hydrating => "Syncing",
        ItemState::Hydrated => "Local",
        ItemState::Pinned => "Local",
        ItemState::Modified if is_transferring => "Uploading",
        ItemState::Modified => "LocalModified",
        ItemState::Conflicted => "Conflict",
        ItemState::Error(_) => "Error",
        ItemState::Deleted => "Local",
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Returns a list of all supported extended attribute names.
///
/// This is used to respond to `listxattr` FUSE operations.
///
/// # Returns
///
/// A vector containing all supported xattr names.
#[must_use]
pub fn list_xattrs() -> Vec<&'static str> {
    vec![
        XATTR_STATE,
        XATTR_SIZE,
        XATTR_REMOTE_ID,
        XATTR_PROGRESS,
        XATTR_STATUS,
        XATTR_ERROR,
    ]
}

/// Gets the value of an extended attribute from an inode entry.
///
/// # Arguments
///
/// * `entry` - The inode entry to read the attribute from
/// * `name` - The name of the extended attribute to read
///
/// # Returns
///
/// - `Some(Vec<u8>)` containing the attribute value if the attribute exists and has a value
/// - `None` if the attribute is not recognized or has no value for this entry
///
/// # Supported Attributes
///
/// - `XATTR_STATE` - Always returns the state name as bytes
/// - `XATTR_SIZE` - Always returns the file size as a decimal string in bytes
/// - `XATTR_REMOTE_ID` - Returns the OneDrive ID if present, None otherwise
/// - `XATTR_PROGRESS` - Returns hydration progress (0-100) when state is Hydrating, None otherwise
///
/// # Arguments
///
/// * `entry` - The inode entry to read the attribute from
/// * `name` - The name of the extended attribute to read
/// * `hydration_progress` - Current hydration progress percentage (0-100), if available
#[must_use]
pub fn get_xattr(entry: &InodeEntry, name: &str, hydration_progress: Option<u8>) -> Option<Vec<u8>> {
    match name {
        XATTR_STATE => Some(entry.state().name().as_bytes().to_vec()),
        XATTR_SIZE => Some(entry.size().to_string().as_bytes().to_vec()),
        XATTR_REMOTE_ID => entry.remote_id().map(|r| r.as_str().as_bytes().to_vec()),
        XATTR_PROGRESS => {
            if matches!(entry.state(), ItemState::Hydrating) {
                let pct = hydration_progress.unwrap_or(0);
                Some(pct.to_string().as_bytes().to_vec())
            } else {
                None
            }
        }
        XATTR_STATUS => {
            let is_transferring = matches!(entry.state(), ItemState::Hydrating)
                && hydration_progress.is_some();
            Some(status_name(entry.state(), is_transferring).as_bytes().to_vec())
        }
        XATTR_ERROR => match entry.state() {
            ItemState::Error(message) => Some(message.as_bytes().to_vec()),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use ondrift_core::domain::{RemoteId, UniqueId};

    use super::*;
    use crate::inode_entry::InodeNumber;

    fn create_test_entry(state: ItemState, remote_id: Option<RemoteId>) -> InodeEntry {
        InodeEntry::new(
            InodeNumber::new(2),
            UniqueId::new(),
            remote_id,
            InodeNumber::ROOT,
            "test.txt".to_string(),
            fuser::FileType::RegularFile,
            1024,
            0o644,
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            1,
            state,
        )
    }

    #[test]
    fn test_list_xattrs() {
        let xattrs = list_xattrs();
        assert_eq!(xattrs.len(), 6);
        assert!(xattrs.contains(&XATTR_STATE));
        assert!(xattrs.contains(&XATTR_SIZE));
        assert!(xattrs.contains(&XATTR_REMOTE_ID));
        assert!(xattrs.contains(&XATTR_PROGRESS));
        assert!(xattrs.contains(&XATTR_STATUS));
        assert!(xattrs.contains(&XATTR_ERROR));
    }

    #[test]
    fn test_get_xattr_state() {
        let entry = create_test_entry(ItemState::Online, None);
        let value = get_xattr(&entry, XATTR_STATE, None);
        assert!(value.is_some());
        assert_eq!(value.unwrap(), b"Online".to_vec());

        let entry = create_test_entry(ItemState::Hydrated, None);
        let value = get_xattr(&entry, XATTR_STATE, None);
        assert_eq!(value.unwrap(), b"Hydrated".to_vec());

        let entry = create_test_entry(ItemState::Hydrating, None);
        let value = get_xattr(&entry, XATTR_STATE, None);
        assert_eq!(value.unwrap(), b"Hydrating".to_vec());
    }

    #[test]
    fn test_get_xattr_size() {
        let entry = create_test_entry(ItemState::Online, None);
        let value = get_xattr(&entry, XATTR_SIZE, None);
        assert!(value.is_some());
        assert_eq!(value.unwrap(), b"1024".to_vec());
    }

    #[test]
    fn test_get_xattr_remote_id_present() {
        let remote_id = RemoteId::new("ABC123XYZ".to_string()).unwrap();
        let entry = create_test_entry(ItemState::Hydrated, Some(remote_id));
        let value = get_xattr(&entry, XATTR_REMOTE_ID, None);
        assert!(value.is_some());
        assert_eq!(value.unwrap(), b"ABC123XYZ".to_vec());
    }

    #[test]
    fn test_get_xattr_remote_id_absent() {
        let entry = create_test_entry(ItemState::Online, None);
        let value = get_xattr(&entry, XATTR_REMOTE_ID, None);
        assert!(value.is_none());
    }

    #[test]
    fn test_get_xattr_progress_during_hydrating() {
        let entry = create_test_entry(ItemState::Hydrating, None);
        // Without progress info, defaults to 0
        let value = get_xattr(&entry, XATTR_PROGRESS, None);
        assert!(value.is_some());
        assert_eq!(value.unwrap(), b"0".to_vec());

        // With real progress
        let value = get_xattr(&entry, XATTR_PROGRESS, Some(75));
        assert!(value.is_some());
        assert_eq!(value.unwrap(), b"75".to_vec());
    }

    #[test]
    fn test_get_xattr_progress_not_hydrating() {
        let entry = create_test_entry(ItemState::Online, None);
        let value = get_xattr(&entry, XATTR_PROGRESS, None);
        assert!(value.is_none());

        let entry = create_test_entry(ItemState::Hydrated, None);
        let value = get_xattr(&entry, XATTR_PROGRESS, Some(100));
        assert!(value.is_none());

        let entry = create_test_entry(ItemState::Conflicted, None);
        let value = get_xattr(&entry, XATTR_PROGRESS, None);
        assert!(value.is_none());
    }

    #[test]
    fn test_get_xattr_unknown() {
        let entry = create_test_entry(ItemState::Online, None);
        let value = get_xattr(&entry, "user.unknown", None);
        assert!(value.is_none());

        let value = get_xattr(&entry, "security.selinux", None);
        assert!(value.is_none());
    }

    #[test]
    fn test_constants() {
        assert_eq!(XATTR_STATE, "user.ondrift.state");
        assert_eq!(XATTR_SIZE, "user.ondrift.size");
        assert_eq!(XATTR_REMOTE_ID, "user.ondrift.remote_id");
        assert_eq!(XATTR_PROGRESS, "user.ondrift.progress");
        assert_eq!(XATTR_STATUS, "user.onemount.status");
        assert_eq!(XATTR_ERROR, "user.onemount.error");
    }

    #[test]
    fn test_status_name_mapping() {
        assert_eq!(status_name(&ItemState::Online, false), "Cloud");
        assert_eq!(status_name(&ItemState::Hydrating, true), "Downloading");
        assert_eq!(status_name(&ItemState::Hydrating, false), "Syncing");
        assert_eq!(status_name(&ItemState::Hydrated, false), "Local");
        assert_eq!(status_name(&ItemState::Modified, true), "Uploading");
        assert_eq!(status_name(&ItemState::Modified, false), "LocalModified");
        assert_eq!(status_name(&ItemState::Conflicted, false), "Conflict");
        assert_eq!(status_name(&ItemState::Error("boom".into()), false), "Error");
    }

    #[test]
    fn test_get_xattr_status_and_error() {
        let entry = create_test_entry(ItemState::Hydrating, None);
        assert_eq!(
            get_xattr(&entry, XATTR_STATUS, Some(40)).unwrap(),
            b"Downloading".to_vec()
        );
        assert_eq!(
            get_xattr(&entry, XATTR_STATUS, None).unwrap(),
            b"Syncing".to_vec()
        );

        let entry = create_test_entry(ItemState::Error("disk full".to_string()), None);
        assert_eq!(get_xattr(&entry, XATTR_STATUS, None).unwrap(), b"Error".to_vec());
        assert_eq!(
            get_xattr(&entry, XATTR_ERROR, None).unwrap(),
            b"disk full".to_vec()
        );

        let entry = create_test_entry(ItemState::Hydrated, None);
        assert!(get_xattr(&entry, XATTR_ERROR, None).is_none());
    }
}
