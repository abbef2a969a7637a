//! On-disk thumbnail cache.
//!
//! Thumbnails are download-only (the remote renders them; nothing local
//! ever writes one back), so this is a stripped-down
//! [`crate::store::MetaStore`] sibling rather than a full content cache:
//! no partial-download bookkeeping, no eviction-exemption logic, since a
//! missing thumbnail is always safely re-fetchable from the remote.
//!
//! Layout mirrors the persisted-state contract: one file per
//! `(item, size)` pair at `thumbnails/<item-id>_<size>`.

use std::{
    fs,
    path::{Path, PathBuf},
};

use ondrift_core::domain::newtypes::UniqueId;

use crate::error::CacheError;

/// Manages cached thumbnail bytes on disk, keyed by item id and size label.
pub struct ThumbnailStore {
    thumbnails_dir: PathBuf,
}

impl ThumbnailStore {
    /// Creates a new `ThumbnailStore` rooted at `cache_dir`, creating the
    /// `thumbnails` subdirectory if needed.
    pub fn new(cache_dir: impl AsRef<Path>) -> Result<Self, CacheError> {
        let thumbnails_dir = cache_dir.as_ref().join("thumbnails");
        fs::create_dir_all(&thumbnails_dir)?;
        Ok(Self { thumbnails_dir })
    }

    fn path_for(&self, id: &UniqueId, size: &str) -> PathBuf {
        self.thumbnails_dir.join(format!("{id}_{size}"))
    }

    /// Stores `bytes` as the thumbnail for `id` at `size`, overwriting any
    /// existing one for that pair.
    pub fn insert(&self, id: &UniqueId, size: &str, bytes: &[u8]) -> Result<(), CacheError> {
        fs::write(self.path_for(id, size), bytes)?;
        Ok(())
    }

    /// Returns the cached thumbnail bytes for `id` at `size`, if present.
    pub fn get(&self, id: &UniqueId, size: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(id, size);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    /// True if a thumbnail is cached for `id` at `size`.
    pub fn has(&self, id: &UniqueId, size: &str) -> bool {
        self.path_for(id, size).exists()
    }

    /// Deletes every cached size for `id`.
    pub fn delete(&self, id: &UniqueId) -> Result<(), CacheError> {
        let prefix = format!("{id}_");
        for entry in fs::read_dir(&self.thumbnails_dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThumbnailStore::new(dir.path()).unwrap();
        let id = UniqueId::new();

        assert!(!store.has(&id, "small"));
        store.insert(&id, "small", b"jpeg-bytes").unwrap();
        assert!(store.has(&id, "small"));
        assert_eq!(store.get(&id, "small").unwrap(), Some(b"jpeg-bytes".to_vec()));
        assert_eq!(store.get(&id, "large").unwrap(), None);
    }

    #[test]
    fn delete_removes_every_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThumbnailStore::new(dir.path()).unwrap();
        let id = UniqueId::new();

        store.insert(&id, "small", b"a").unwrap();
        store.insert(&id, "large", b"b").unwrap();
        store.delete(&id).unwrap();

        assert!(!store.has(&id, "small"));
        assert!(!store.has(&id, "large"));
    }

    #[test]
    fn distinct_items_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThumbnailStore::new(dir.path()).unwrap();
        let a = UniqueId::new();
        let b = UniqueId::new();

        store.insert(&a, "small", b"a-bytes").unwrap();
        store.insert(&b, "small", b"b-bytes").unwrap();

        assert_eq!(store.get(&a, "small").unwrap(), Some(b"a-bytes".to_vec()));
        assert_eq!(store.get(&b, "small").unwrap(), Some(b"b-bytes".to_vec()));
    }
}
