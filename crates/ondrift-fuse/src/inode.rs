//! Inode table for bidirectional inode ↔ item_id mapping.
//!
//! Provides lock-free concurrent access for FUSE operations.

use std::sync::Arc;

use dashmap::DashMap;
use ondrift_core::domain::newtypes::{RemoteId, UniqueId};
use ondrift_core::domain::sync_item::ItemState;
use ondrift_core::status::{StatusEvent, StatusTracker};
use tokio::sync::broadcast;

use crate::inode_entry::{InodeEntry, InodeNumber};

/// Flattened, serializable view of an [`InodeEntry`], for crash diagnostics
/// and debug dumps.
#[derive(Debug, serde::Serialize)]
struct InodeSnapshot {
    ino: u64,
    item_id: UniqueId,
    remote_id: Option<RemoteId>,
    parent_ino: u64,
    name: String,
    is_directory: bool,
    size: u64,
    perm: u16,
    state: ItemState,
}

impl From<&InodeEntry> for InodeSnapshot {
    fn from(entry: &InodeEntry) -> Self {
        Self {
            ino: entry.ino().get(),
            item_id: *entry.item_id(),
            remote_id: entry.remote_id().cloned(),
            parent_ino: entry.parent_ino().get(),
            name: entry.name().to_string(),
            is_directory: entry.kind() == fuser::FileType::Directory,
            size: entry.size(),
            perm: entry.perm(),
            state: entry.state().clone(),
        }
    }
}

/// Bidirectional mapping between inodes and items.
///
/// Uses DashMap for lock-free concurrent access from multiple FUSE threads.
pub struct InodeTable {
    /// inode -> entry mapping
    by_inode: DashMap<u64, Arc<InodeEntry>>,
    /// item_id -> inode mapping (reverse lookup)
    by_item_id: DashMap<UniqueId, u64>,
    /// Publishes a [`StatusEvent`] every time an entry's state changes via
    /// `insert` (the table is immutable-entry/remove-then-reinsert, so
    /// `insert` is the single choke point every status transition passes
    /// through).
    status_tracker: StatusTracker,
}

impl InodeTable {
    /// Create a new empty inode table.
    pub fn new() -> Self {
        Self {
            by_inode: DashMap::new(),
            by_item_id: DashMap::new(),
            status_tracker: StatusTracker::new(),
        }
    }

    /// Subscribes to status change notifications for every item in this
    /// table.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status_tracker.subscribe()
    }

    /// Insert a new inode entry into the table.
    ///
    /// Creates bidirectional mapping between inode number and item_id,
    /// registers the entry as a child of its parent (if the parent is
    /// already present), and emits a [`StatusEvent`] for the entry's
    /// current state.
    pub fn insert(&self, entry: InodeEntry) {
        let ino = entry.ino().get();
        let item_id = *entry.item_id();
        let parent_ino = entry.parent_ino().get();
        let is_dir = entry.kind() == fuser::FileType::Directory;
        let remote_id = entry.remote_id().cloned();
        let state = entry.state().clone();
        let entry = Arc::new(entry);
        self.by_inode.insert(ino, entry);
        self.by_item_id.insert(item_id, ino);

        if parent_ino != ino {
            if let Some(parent) = self.by_inode.get(&parent_ino) {
                parent.add_child(item_id, is_dir);
            }
        }

        self.status_tracker
            .emit(StatusEvent::new(item_id, remote_id, state));
    }

    /// Retrieve an inode entry by its inode number.
    pub fn get(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        self.by_inode.get(&ino).map(|r| Arc::clone(&r))
    }

    /// Retrieve an inode number by its item_id.
    pub fn get_by_item_id(&self, id: &UniqueId) -> Option<u64> {
        self.by_item_id.get(id).map(|r| *r)
    }

    /// Remove an inode entry by its inode number.
    ///
    /// Removes both the inode->entry and item_id->inode mappings, and
    /// unregisters the entry from its parent's children list.
    pub fn remove(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        if let Some((_, entry)) = self.by_inode.remove(&ino) {
            self.by_item_id.remove(entry.item_id());

            let parent_ino = entry.parent_ino().get();
            if parent_ino != ino {
                if let Some(parent) = self.by_inode.get(&parent_ino) {
                    let is_dir = entry.kind() == fuser::FileType::Directory;
                    parent.remove_child(entry.item_id(), is_dir);
                }
            }

            Some(entry)
        } else {
            None
        }
    }

    /// Retrieve all child entries of a parent inode.
    ///
    /// Reads the parent's `children` list rather than scanning the whole
    /// table; a child whose own entry has since been evicted is silently
    /// skipped.
    pub fn children(&self, parent_ino: u64) -> Vec<Arc<InodeEntry>> {
        let Some(parent) = self.by_inode.get(&parent_ino) else {
            return Vec::new();
        };

        parent
            .children()
            .into_iter()
            .filter_map(|item_id| {
                self.get_by_item_id(&item_id).and_then(|ino| self.get(ino))
            })
            .collect()
    }

    /// Looks up a child by name, fetching and populating it from the
    /// remote if it isn't present locally.
    ///
    /// `fetch_remote` is only invoked on a local miss; it is expected to
    /// query the cloud for `name` under `parent_ino`'s remote folder and
    /// return a ready-to-insert `InodeEntry` (inode already allocated) if
    /// one exists there.
    pub async fn child_by_name<F, Fut>(
        &self,
        parent_ino: u64,
        name: &str,
        fetch_remote: F,
    ) -> Option<Arc<InodeEntry>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Option<InodeEntry>>,
    {
        if let Some(entry) = self.lookup(parent_ino, name) {
            return Some(entry);
        }

        let fetched = fetch_remote().await?;
        self.insert(fetched);
        self.lookup(parent_ino, name)
    }

    /// Builds the full path (`/a/b/c`) of the item identified by `id`,
    /// walking the parent chain up to the root.
    pub fn path(&self, id: &UniqueId) -> Option<String> {
        let ino = self.get_by_item_id(id)?;
        self.path_by_ino(ino)
    }

    /// Builds the full path (`/a/b/c`) of the entry at `ino`, walking the
    /// parent chain up to the root.
    pub fn path_by_ino(&self, ino: u64) -> Option<String> {
        let mut ino = ino;
        let mut components = Vec::new();

        loop {
            let entry = self.get(ino)?;
            if ino == InodeNumber::ROOT.get() {
                break;
            }
            components.push(entry.name().to_string());

            let parent_ino = entry.parent_ino().get();
            if parent_ino == ino {
                break;
            }
            ino = parent_ino;
        }

        components.reverse();
        Some(format!("/{}", components.join("/")))
    }

    /// Graph-level rename: moves the entry named `old_name` under
    /// `old_parent_ino` so it is named `new_name` under `new_parent_ino`,
    /// replacing any existing entry at the destination and updating both
    /// parents' children lists.
    ///
    /// `new_state` overrides the moved entry's sync state if supplied;
    /// `None` keeps its current state. The moved entry's own children
    /// (for a directory) are carried over unchanged.
    pub fn rename(
        &self,
        old_parent_ino: u64,
        new_parent_ino: u64,
        old_name: &str,
        new_name: &str,
        new_state: Option<ItemState>,
    ) -> Option<Arc<InodeEntry>> {
        let source = self.lookup(old_parent_ino, old_name)?;

        if let Some(dest) = self.lookup(new_parent_ino, new_name) {
            if dest.ino().get() != source.ino().get() {
                self.remove(dest.ino().get());
            }
        }

        let ino = source.ino().get();
        self.remove(ino);

        let state = new_state.unwrap_or_else(|| source.state().clone());
        let new_entry = InodeEntry::new(
            source.ino(),
            *source.item_id(),
            source.remote_id().cloned(),
            InodeNumber::new(new_parent_ino),
            new_name.to_string(),
            source.kind(),
            source.size(),
            source.perm(),
            source.mtime(),
            std::time::SystemTime::now(),
            source.atime(),
            source.nlink(),
            state,
        );
        new_entry.adopt_children_from(&source);

        self.insert(new_entry);
        self.get(ino)
    }

    /// Serializes every entry currently in the table to JSON, for crash
    /// diagnostics and debug dumps.
    pub fn serialize_all(&self) -> serde_json::Result<String> {
        let snapshots: Vec<InodeSnapshot> = self
            .by_inode
            .iter()
            .map(|r| InodeSnapshot::from(r.value().as_ref()))
            .collect();
        serde_json::to_string(&snapshots)
    }

    /// Look up a child entry by parent inode and name.
    ///
    /// Performs a linear search through entries to find a matching child.
    pub fn lookup(&self, parent_ino: u64, name: &str) -> Option<Arc<InodeEntry>> {
        self.by_inode
            .iter()
            .find(|r| r.value().parent_ino().get() == parent_ino && r.value().name() == name)
            .map(|r| Arc::clone(r.value()))
    }

    /// Get the total number of entries in the table.
    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use ondrift_core::domain::{ItemState, RemoteId};

    use super::*;
    use crate::inode_entry::InodeNumber;

    /// Helper function to create a test InodeEntry with minimal required fields.
    fn make_test_entry(ino: u64, parent_ino: u64, name: &str, is_dir: bool) -> InodeEntry {
        InodeEntry::new(
            InodeNumber::new(ino),
            UniqueId::new(),
            Some(RemoteId::new(format!("remote_{}", ino)).unwrap()),
            InodeNumber::new(parent_ino),
            name.to_string(),
            if is_dir {
                fuser::FileType::Directory
            } else {
                fuser::FileType::RegularFile
            },
            1024,                               // size
            if is_dir { 0o755 } else { 0o644 }, // perm
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            1, // nlink
            ItemState::Online,
        )
    }

    /// Helper function to create a test InodeEntry with a specific item_id.
    fn make_entry_with_id(ino: u64, parent_ino: u64, name: &str, item_id: UniqueId) -> InodeEntry {
        InodeEntry::new(
            InodeNumber::new(ino),
            item_id,
            Some(RemoteId::new(format!("remote_{}", ino)).unwrap()),
            InodeNumber::new(parent_ino),
            name.to_string(),
            fuser::FileType::RegularFile,
            1024,
            0o644,
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            1,
            ItemState::Online,
        )
    }

    #[test]
    fn test_insert_and_get() {
        let table = InodeTable::new();
        let entry = make_test_entry(42, 1, "test.txt", false);
        let item_id = *entry.item_id();

        table.insert(entry);

        // Test get by inode
        let retrieved = table.get(42).expect("Entry should exist");
        assert_eq!(retrieved.ino().get(), 42);
        assert_eq!(retrieved.name(), "test.txt");
        assert_eq!(*retrieved.item_id(), item_id);

        // Test get non-existent inode
        assert!(table.get(999).is_none());
    }

    #[test]
    fn test_get_by_item_id() {
        let table = InodeTable::new();
        let item_id = UniqueId::new();
        let entry = make_entry_with_id(42, 1, "test.txt", item_id);

        table.insert(entry);

        // Test reverse lookup
        let ino = table.get_by_item_id(&item_id).expect("Item should exist");
        assert_eq!(ino, 42);

        // Test get non-existent item_id
        let random_id = UniqueId::new();
        assert!(table.get_by_item_id(&random_id).is_none());
    }

    #[test]
    fn test_remove() {
        let table = InodeTable::new();
        let item_id = UniqueId::new();
        let entry = make_entry_with_id(42, 1, "test.txt", item_id);

        table.insert(entry);

        // Verify entry exists
        assert!(table.get(42).is_some());
        assert!(table.get_by_item_id(&item_id).is_some());

        // Remove entry
        let removed = table.remove(42).expect("Entry should be removed");
        assert_eq!(removed.ino().get(), 42);

        // Verify both mappings are removed
        assert!(table.get(42).is_none());
        assert!(table.get_by_item_id(&item_id).is_none());

        // Remove non-existent entry
        assert!(table.remove(999).is_none());
    }

    #[test]
    fn test_children() {
        let table = InodeTable::new();

        // Create parent directory (inode 10)
        table.insert(make_test_entry(10, 1, "parent", true));

        // Create children of parent (inode 10)
        table.insert(make_test_entry(20, 10, "child1.txt", false));
        table.insert(make_test_entry(21, 10, "child2.txt", false));
        table.insert(make_test_entry(22, 10, "subdir", true));

        // Create entry in different parent
        table.insert(make_test_entry(30, 1, "other.txt", false));

        // Get children of parent
        let children = table.children(10);

        assert_eq!(children.len(), 3);
        let names: Vec<String> = children.iter().map(|e| e.name().to_string()).collect();
        assert!(names.contains(&"child1.txt".to_string()));
        assert!(names.contains(&"child2.txt".to_string()));
        assert!(names.contains(&"subdir".to_string()));
        assert!(!names.contains(&"other.txt".to_string()));

        // Test non-existent parent
        let no_children = table.children(999);
        assert_eq!(no_children.len(), 0);
    }

    #[test]
    fn test_lookup() {
        let table = InodeTable::new();

        // Create parent directory
        table.insert(make_test_entry(10, 1, "parent", true));

        // Create children
        table.insert(make_test_entry(20, 10, "file1.txt", false));
        table.insert(make_test_entry(21, 10, "file2.txt", false));

        // Test successful lookup
        let found = table.lookup(10, "file1.txt").expect("Should find entry");
        assert_eq!(found.ino().get(), 20);
        assert_eq!(found.name(), "file1.txt");

        // Test lookup with wrong parent
        assert!(table.lookup(999, "file1.txt").is_none());

        // Test lookup with wrong name
        assert!(table.lookup(10, "nonexistent.txt").is_none());

        // Test lookup with both wrong
        assert!(table.lookup(999, "nonexistent.txt").is_none());
    }

    #[test]
    fn test_len_and_is_empty() {
        let table = InodeTable::new();

        assert!(table.is_empty());
        assert_eq!(table.len(), 0);

        table.insert(make_test_entry(10, 1, "file1.txt", false));
        assert!(!table.is_empty());
        assert_eq!(table.len(), 1);

        table.insert(make_test_entry(11, 1, "file2.txt", false));
        assert_eq!(table.len(), 2);

        table.remove(10);
        assert_eq!(table.len(), 1);

        table.remove(11);
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_concurrent_access_multiple_threads() {
        use std::{sync::Arc, thread};

        let table = Arc::new(InodeTable::new());
        let num_threads = 10;
        let entries_per_thread = 100;

        // Spawn threads that concurrently insert entries
        let mut handles = vec![];
        for thread_id in 0..num_threads {
            let table_clone = Arc::clone(&table);
            let handle = thread::spawn(move || {
                for i in 0..entries_per_thread {
                    let ino = (thread_id * entries_per_thread + i) as u64 + 1000;
                    let entry = make_test_entry(ino, 1, &format!("file_{}.txt", ino), false);
                    table_clone.insert(entry);
                }
            });
            handles.push(handle);
        }

        // Wait for all threads to complete
        for handle in handles {
            handle.join().expect("Thread should complete");
        }

        // Verify all entries were inserted
        let expected_count = num_threads * entries_per_thread;
        assert_eq!(table.len(), expected_count);

        // Verify we can retrieve entries
        for thread_id in 0..num_threads {
            for i in 0..entries_per_thread {
                let ino = (thread_id * entries_per_thread + i) as u64 + 1000;
                assert!(table.get(ino).is_some(), "Entry {} should exist", ino);
            }
        }
    }

    #[test]
    fn test_concurrent_insert_and_remove() {
        use std::{sync::Arc, thread};

        let table = Arc::new(InodeTable::new());

        // Pre-populate table
        for i in 0..200 {
            table.insert(make_test_entry(
                i + 1000,
                1,
                &format!("file_{}.txt", i),
                false,
            ));
        }

        // Spawn reader threads
        let mut handles = vec![];
        for _ in 0..5 {
            let table_clone = Arc::clone(&table);
            let handle = thread::spawn(move || {
                for i in 0..200 {
                    let ino = i + 1000;
                    let _ = table_clone.get(ino);
                }
            });
            handles.push(handle);
        }

        // Spawn remover threads
        for start in 0..5 {
            let table_clone = Arc::clone(&table);
            let handle = thread::spawn(move || {
                for i in (start..200).step_by(5) {
                    let ino = i + 1000;
                    let _ = table_clone.remove(ino);
                }
            });
            handles.push(handle);
        }

        // Wait for all threads
        for handle in handles {
            handle.join().expect("Thread should complete");
        }

        // Verify table is empty (all 200 entries removed)
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_concurrent_children_and_lookup() {
        use std::{sync::Arc, thread};

        let table = Arc::new(InodeTable::new());

        // Create a parent with many children
        table.insert(make_test_entry(1, 1, "root", true));
        for i in 0..100 {
            table.insert(make_test_entry(
                i + 100,
                1,
                &format!("child_{}.txt", i),
                false,
            ));
        }

        // Spawn threads that concurrently call children() and lookup()
        let mut handles = vec![];
        for _ in 0..10 {
            let table_clone = Arc::clone(&table);
            let handle = thread::spawn(move || {
                for i in 0..50 {
                    // Call children()
                    let children = table_clone.children(1);
                    assert!(!children.is_empty());

                    // Call lookup()
                    let name = format!("child_{}.txt", i);
                    let found = table_clone.lookup(1, &name);
                    assert!(found.is_some());
                }
            });
            handles.push(handle);
        }

        // Wait for all threads
        for handle in handles {
            handle.join().expect("Thread should complete");
        }

        // Verify table integrity
        assert_eq!(table.len(), 101); // 1 parent + 100 children
    }

    #[test]
    fn test_bidirectional_mapping_consistency() {
        let table = InodeTable::new();
        let item_id = UniqueId::new();
        let entry = make_entry_with_id(42, 1, "test.txt", item_id);

        table.insert(entry);

        // Verify bidirectional consistency
        let ino_from_table = table.get_by_item_id(&item_id).expect("Should exist");
        assert_eq!(ino_from_table, 42);

        let entry_from_table = table.get(42).expect("Should exist");
        assert_eq!(*entry_from_table.item_id(), item_id);

        // Remove and verify both mappings are gone
        table.remove(42);
        assert!(table.get_by_item_id(&item_id).is_none());
        assert!(table.get(42).is_none());
    }

    #[test]
    fn test_default_trait() {
        let table = InodeTable::default();
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
    }
}
