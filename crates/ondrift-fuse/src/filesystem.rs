//! FUSE filesystem implementation.
//!
//! Implements `fuser::Filesystem` trait for OnDrift, handling all FUSE operations
//! including file I/O, directory operations, and metadata management.

use std::{
    collections::HashMap,
    ffi::{c_int, OsStr},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use fuser::{
    FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use ondrift_store::{store::MetaStore, SledStateRepository};
use ondrift_core::{
    config::FuseConfig,
    domain::{
        newtypes::{RemoteId, RemotePath, SyncPath},
        sync_item::{ItemState, SyncItem},
        UniqueId,
    },
    ports::{IStateRepository, ItemFilter},
};
use ondrift_sync::{UploadManager, UploadOutcome, UploadRequest};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    cache::ContentCache,
    dehydration::DehydrationManager,
    hydration::{HydrationManager, HydrationPriority},
    inode::InodeTable,
    inode_entry::{InodeEntry, InodeNumber},
    write_serializer::{WriteSerializer, WriteSerializerHandle},
    xattr,
};

/// TTL for FUSE attribute caching (1 second).
///
/// This duration controls how long the kernel caches file attributes
/// before re-querying the filesystem. A short TTL ensures timely
/// reflection of remote changes while reducing syscall overhead.
const TTL: Duration = Duration::from_secs(1);

/// FUSE open flag indicating the kernel should keep cached data.
///
/// When set in the reply to open/opendir, this flag tells the kernel
/// that file data cached from a previous open is still valid and can
/// be reused. This improves performance by avoiding unnecessary reads.
const FOPEN_KEEP_CACHE: u32 = 1 << 1;

/// Maximum filename length in bytes (POSIX NAME_MAX).
///
/// Used for T098 input validation - file names exceeding this limit
/// will result in ENAMETOOLONG.
const NAME_MAX: usize = 255;

/// Main FUSE filesystem implementation for OnDrift.
///
/// `OnDriftFs` implements the `fuser::Filesystem` trait and handles all FUSE
/// operations for the Files-on-Demand feature. It manages:
/// - Inode allocation and tracking via [`InodeTable`]
/// - Content caching via [`ContentCache`]
/// - Serialized database writes via [`WriteSerializerHandle`]
/// - File handle allocation for open files
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                      OnDriftFs                             │
/// │  ┌─────────────┐  ┌──────────────┐  ┌──────────────────┐   │
/// │  │ InodeTable  │  │ ContentCache │  │ WriteSerializer  │   │
/// │  │ (inode↔id)  │  │ (file data)  │  │ (DB writes)      │   │
/// │  └─────────────┘  └──────────────┘  └──────────────────┘   │
/// │         │                │                   │              │
/// │         └────────────────┼───────────────────┘              │
/// │                          │                                  │
/// │                    ┌─────▼─────┐                            │
/// │                    │ SQLite DB │                            │
/// │                    └───────────┘                            │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```ignore
/// use ondrift_fuse::OnDriftFs;
/// use ondrift_core::config::FuseConfig;
/// use ondrift_store::store::MetaStore;
/// use std::sync::Arc;
///
/// let rt = tokio::runtime::Runtime::new().unwrap();
/// let pool = MetaStore::temporary().unwrap();
/// let cache = Arc::new(ContentCache::new("/tmp/cache".into()).unwrap());
/// let config = FuseConfig::default();
///
/// let fs = OnDriftFs::new(rt.handle().clone(), pool, config, cache);
/// // fs can now be passed to fuser::spawn_mount2() or fuser::mount2()
/// ```
pub struct OnDriftFs {
    /// Handle to the tokio runtime for spawning async tasks from sync FUSE callbacks
    rt_handle: Handle,

    /// Bidirectional mapping between inodes and item IDs
    inode_table: Arc<InodeTable>,

    /// Handle for sending serialized write operations to the database
    write_handle: WriteSerializerHandle,

    /// Cache for hydrated file content
    cache: Arc<ContentCache>,

    /// FUSE filesystem configuration
    config: FuseConfig,

    /// sled-backed state store
    db_pool: MetaStore,

    /// Counter for allocating unique file handles
    next_fh: AtomicU64,

    /// On-demand download orchestrator, wired in by [`Self::with_managers`].
    ///
    /// `None` in unit tests that never exercise hydration; the daemon always
    /// attaches one before mounting.
    hydration: Option<Arc<HydrationManager>>,

    /// Dehydration sweeper, wired in by [`Self::with_managers`].
    dehydration: Option<Arc<DehydrationManager>>,

    /// Upload orchestrator, wired in by [`Self::with_upload_manager`].
    ///
    /// `None` in unit tests that never exercise uploads; the daemon always
    /// attaches one before mounting. `flush` is a no-op with respect to
    /// pushing local changes until it is.
    upload: Option<Arc<UploadManager>>,
}

impl OnDriftFs {
    /// Creates a new `OnDriftFs` instance.
    ///
    /// This constructor:
    /// 1. Creates a [`WriteSerializer`] for serializing database writes
    /// 2. Spawns the WriteSerializer task on the provided runtime
    /// 3. Initializes an empty [`InodeTable`] for inode management
    ///
    /// # Arguments
    ///
    /// * `rt_handle` - Handle to a tokio runtime for spawning async tasks
    /// * `db_pool` - sled-backed state store
    /// * `config` - FUSE filesystem configuration
    /// * `cache` - Shared content cache for hydrated files
    ///
    /// # Returns
    ///
    /// A new `OnDriftFs` instance ready to be mounted.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let fs = OnDriftFs::new(rt_handle, db_pool, config, cache);
    /// ```
    pub fn new(
        rt_handle: Handle,
        db_pool: MetaStore,
        config: FuseConfig,
        cache: Arc<ContentCache>,
    ) -> Self {
        // Create the WriteSerializer for serialized database writes
        let (serializer, write_handle) = WriteSerializer::new(db_pool.clone());

        // Spawn the WriteSerializer task on the tokio runtime
        rt_handle.spawn(async move {
            serializer.run().await;
        });

        // Initialize an empty inode table
        let inode_table = Arc::new(InodeTable::new());

        Self {
            rt_handle,
            inode_table,
            write_handle,
            cache,
            config,
            db_pool,
            next_fh: AtomicU64::new(1),
            hydration: None,
            dehydration: None,
            upload: None,
        }
    }

    /// Attaches the hydration and dehydration managers.
    ///
    /// Built separately from [`Self::new`] because both managers need a
    /// [`WriteSerializerHandle`] and `Arc<ContentCache>` that only exist once
    /// the filesystem itself has been constructed. Call this before handing
    /// the filesystem to `fuser::mount2`; `open`, `read`, and `release` are
    /// no-ops with respect to hydration/dehydration until it is.
    pub fn with_managers(
        mut self,
        hydration: Arc<HydrationManager>,
        dehydration: Arc<DehydrationManager>,
    ) -> Self {
        self.hydration = Some(hydration);
        self.dehydration = Some(dehydration);
        self
    }

    /// Attaches the upload manager.
    ///
    /// Separate from [`Self::with_managers`] since `UploadManager` lives in
    /// `ondrift-sync`, a crate that has nothing to do with hydration. Call
    /// this before handing the filesystem to `fuser::mount2`; `flush` is a
    /// no-op with respect to pushing local changes until it is.
    pub fn with_upload_manager(mut self, upload: Arc<UploadManager>) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Returns the upload manager, if attached.
    pub fn upload(&self) -> Option<&Arc<UploadManager>> {
        self.upload.as_ref()
    }

    /// Returns the hydration manager, if attached.
    pub fn hydration(&self) -> Option<&Arc<HydrationManager>> {
        self.hydration.as_ref()
    }

    /// Returns the dehydration manager, if attached.
    pub fn dehydration(&self) -> Option<&Arc<DehydrationManager>> {
        self.dehydration.as_ref()
    }

    /// Returns a reference to the tokio runtime handle.
    pub fn rt_handle(&self) -> &Handle {
        &self.rt_handle
    }

    /// Returns a reference to the inode table.
    pub fn inode_table(&self) -> &Arc<InodeTable> {
        &self.inode_table
    }

    /// Returns a reference to the write serializer handle.
    pub fn write_handle(&self) -> &WriteSerializerHandle {
        &self.write_handle
    }

    /// Returns a reference to the content cache.
    pub fn cache(&self) -> &Arc<ContentCache> {
        &self.cache
    }

    /// Returns a reference to the FUSE configuration.
    pub fn config(&self) -> &FuseConfig {
        &self.config
    }

    /// Returns a reference to the database pool.
    pub fn db_pool(&self) -> &MetaStore {
        &self.db_pool
    }

    /// Allocates a new unique file handle.
    ///
    /// File handles are used to track open files and must be unique
    /// for the lifetime of the open file descriptor.
    pub fn alloc_fh(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Converts a SyncItem from the database to an InodeEntry for the FUSE filesystem.
///
/// This function maps domain model fields to the FUSE-specific InodeEntry structure,
/// handling the conversion of timestamps, permissions, and file types.
///
/// # Arguments
///
/// * `item` - The SyncItem to convert
/// * `ino` - The inode number to assign to this entry
/// * `parent_ino` - The inode number of the parent directory
///
/// # Returns
///
/// An InodeEntry ready to be inserted into the inode table.
fn sync_item_to_inode_entry(
    item: &SyncItem,
    ino: InodeNumber,
    parent_ino: InodeNumber,
) -> InodeEntry {
    // Determine file type
    let kind = if item.is_directory() {
        FileType::Directory
    } else {
        FileType::RegularFile
    };

    // Get file size (0 for directories)
    let size = if item.is_directory() {
        0
    } else {
        item.size_bytes()
    };

    // Set permissions based on file type
    // Directories get 0o755 (rwxr-xr-x), files get 0o644 (rw-r--r--)
    let perm = if item.is_directory() { 0o755 } else { 0o644 };

    // Convert timestamps
    // Use last_modified_local if available, otherwise use current time
    let now = SystemTime::now();
    let mtime = item
        .last_modified_local()
        .and_then(|dt| {
            let timestamp = dt.timestamp();
            let nanos = dt.timestamp_subsec_nanos();
            std::time::UNIX_EPOCH.checked_add(Duration::new(timestamp as u64, nanos))
        })
        .unwrap_or(now);

    // For ctime, use the same as mtime
    let ctime = mtime;

    // For atime, use last_accessed if available
    let atime = item
        .last_accessed()
        .and_then(|dt| {
            let timestamp = dt.timestamp();
            let nanos = dt.timestamp_subsec_nanos();
            std::time::UNIX_EPOCH.checked_add(Duration::new(timestamp as u64, nanos))
        })
        .unwrap_or(now);

    // Extract the file name from the local path
    let name = item
        .local_path()
        .as_path()
        .file_name()
        .and_then(|s: &std::ffi::OsStr| s.to_str())
        .unwrap_or("")
        .to_string();

    // Get remote ID if available
    let remote_id = item.remote_id().cloned();

    InodeEntry::new(
        ino,
        *item.id(),
        remote_id,
        parent_ino,
        name,
        kind,
        size,
        perm,
        mtime,
        ctime,
        atime,
        1, // nlink is always 1 for OneDrive files
        item.state().clone(),
    )
}

// ============================================================================
// Filesystem trait implementation
// ============================================================================

impl Filesystem for OnDriftFs {
    /// Initialize filesystem.
    ///
    /// Called before any other filesystem method. This method:
    /// 1. Negotiates kernel capabilities (sets FUSE_CAP_EXPORT_SUPPORT if available)
    /// 2. Loads all SyncItems from the state repository
    /// 3. Creates the root inode (ino=1) for the mount point
    /// 4. Assigns inodes to all items and populates the InodeTable
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context
    /// * `config` - Kernel configuration for negotiating capabilities
    ///
    /// # Returns
    ///
    /// `Ok(())` on success, or an error code on failure.
    #[tracing::instrument(level = "info", skip(self, _req, config))]
    fn init(&mut self, _req: &Request<'_>, config: &mut KernelConfig) -> Result<(), c_int> {
        tracing::info!("Initializing OnDrift FUSE filesystem");

        // Negotiate kernel capabilities
        // FUSE_EXPORT_SUPPORT (bit 4) allows the kernel to handle lookups of "." and ".."
        // This capability was introduced in FUSE protocol 7.10
        const FUSE_EXPORT_SUPPORT: u64 = 1 << 4;
        if let Err(unsupported) = config.add_capabilities(FUSE_EXPORT_SUPPORT) {
            tracing::debug!(
                unsupported_bits = unsupported,
                "FUSE_EXPORT_SUPPORT not available from kernel"
            );
        } else {
            tracing::debug!("FUSE_EXPORT_SUPPORT capability enabled");
        }

        // Create the state repository from the database pool
        let repository = SledStateRepository::new(self.db_pool.clone());

        // Load all SyncItems from the database using block_on
        // This is safe because init() is called before any other FUSE operations
        let mut items = match self
            .rt_handle
            .block_on(repository.query_items(&ItemFilter::new()))
        {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load sync items from database");
                return Err(libc::EIO);
            }
        };

        tracing::debug!(count = items.len(), "Loaded sync items from database");

        // Crash recovery: handle stale Hydrating states from previous crash
        // When the FUSE daemon crashes while files are being hydrated, items may be
        // left in the Hydrating state. We need to reset these to Online.
        let stale_count = items
            .iter()
            .filter(|item| {
                matches!(
                    item.state(),
                    ondrift_core::domain::sync_item::ItemState::Hydrating
                )
            })
            .count();

        if stale_count > 0 {
            tracing::info!(
                count = stale_count,
                "Found items with stale Hydrating state from crash, resetting to Online"
            );

            for item in items.iter_mut() {
                if !matches!(
                    item.state(),
                    ondrift_core::domain::sync_item::ItemState::Hydrating
                ) {
                    continue;
                }

                // Check for partial file and log information
                if let Some(remote_id) = item.remote_id() {
                    let partial_path = self.cache.partial_path(remote_id);
                    if partial_path.exists() {
                        if let Ok(metadata) = std::fs::metadata(&partial_path) {
                            if metadata.len() > 0 {
                                tracing::debug!(
                                    path = %item.local_path(),
                                    partial_bytes = metadata.len(),
                                    "Found partial file, will resume later (not implemented yet)"
                                );
                            }
                        }
                        // Clean up partial file - actual resume will be implemented later
                        if let Err(e) = std::fs::remove_file(&partial_path) {
                            tracing::warn!(
                                path = %partial_path.display(),
                                error = %e,
                                "Failed to remove partial file during crash recovery"
                            );
                        }
                    }
                }

                // Reset state to Online using crash recovery method
                item.reset_state_for_crash_recovery(
                    ondrift_core::domain::sync_item::ItemState::Online,
                );

                // Save the updated item back to the database
                if let Err(e) = self.rt_handle.block_on(repository.save_item(item)) {
                    tracing::error!(
                        item_id = %item.id(),
                        error = %e,
                        "Failed to save crash-recovered item state"
                    );
                    // Continue processing other items, don't fail init
                }
            }

            tracing::info!(
                count = stale_count,
                "Completed crash recovery for stale Hydrating items"
            );
        }

        // Create the root inode (ino=1) for the mount point
        // The root inode represents the mount point directory itself
        let root_entry = InodeEntry::new(
            InodeNumber::ROOT,
            UniqueId::new(),   // Generate a unique ID for the root
            None,              // No remote ID for root
            InodeNumber::ROOT, // Root's parent is itself
            String::new(),     // Root has no name
            FileType::Directory,
            0,     // Size is 0 for directories
            0o755, // rwxr-xr-x
            SystemTime::now(),
            SystemTime::now(),
            SystemTime::now(),
            2, // nlink=2 for directories (. and ..)
            ondrift_core::domain::sync_item::ItemState::Hydrated, // Root is always hydrated
        );
        self.inode_table.insert(root_entry);

        // Build a mapping from item path to inode for parent resolution
        // This is needed to assign correct parent inodes to each item
        let mut path_to_inode: HashMap<String, InodeNumber> = HashMap::new();

        // First pass: assign inodes to all items
        let mut item_inodes: Vec<(SyncItem, InodeNumber)> = Vec::with_capacity(items.len());

        for item in items {
            // Get or assign an inode number
            let ino = if let Some(existing_ino) = item.inode() {
                InodeNumber::new(existing_ino)
            } else {
                // Allocate a new inode using the write serializer
                match self
                    .rt_handle
                    .block_on(self.write_handle.increment_inode_counter())
                {
                    Ok(new_ino) => InodeNumber::new(new_ino),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to allocate inode");
                        return Err(libc::EIO);
                    }
                }
            };

            // Store the path -> inode mapping for parent resolution
            let path_str = item.local_path().to_string();
            path_to_inode.insert(path_str, ino);

            item_inodes.push((item, ino));
        }

        // Second pass: create InodeEntries with correct parent inodes.
        //
        // Sorted shallowest-first so a directory's InodeEntry always exists
        // in the table by the time its children are inserted; InodeTable::insert
        // registers each new entry into its parent's children list, which
        // only works if the parent is already present.
        item_inodes.sort_by_key(|(item, _)| item.local_path().to_string().matches('/').count());

        for (item, ino) in item_inodes {
            // Determine parent inode by looking up parent path
            let parent_ino = item
                .local_path()
                .as_path()
                .parent()
                .and_then(|p: &std::path::Path| p.to_str())
                .and_then(|parent_path| path_to_inode.get(parent_path))
                .copied()
                .unwrap_or(InodeNumber::ROOT);

            // Convert SyncItem to InodeEntry
            let entry = sync_item_to_inode_entry(&item, ino, parent_ino);

            // Insert into the inode table
            self.inode_table.insert(entry);
        }

        tracing::info!(
            items_loaded = self.inode_table.len(),
            "OnDrift FUSE filesystem initialized"
        );

        Ok(())
    }

    /// Clean up filesystem.
    ///
    /// Called on filesystem exit. This method:
    /// 1. Logs a shutdown message
    /// 2. The WriteSerializer handle is automatically dropped when OnDriftFs is dropped,
    ///    which signals the writer task to stop.
    #[tracing::instrument(level = "info", skip(self))]
    fn destroy(&mut self) {
        tracing::info!(
            items_in_table = self.inode_table.len(),
            "OnDrift FUSE filesystem shutting down"
        );

        // The WriteSerializerHandle will be dropped when OnDriftFs is dropped,
        // which will close the channel and signal the writer task to exit.
        // No explicit cleanup is needed here.
    }

    /// Look up a directory entry by name and get its attributes.
    ///
    /// This method is called by the kernel to resolve a filename within a directory
    /// to an inode. It searches the inode table for a child entry matching the
    /// given parent inode and name.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `parent` - Inode number of the parent directory
    /// * `name` - Name of the entry to look up
    /// * `reply` - Reply with entry attributes or error
    ///
    /// # Behavior
    ///
    /// 1. Searches `inode_table.lookup(parent, name)` for a matching entry
    /// 2. If found:
    ///    - Increments the entry's `lookup_count` (kernel reference count)
    ///    - Returns `ReplyEntry` with TTL (1 second), `FileAttr` from `InodeEntry::to_file_attr()`,
    ///      and generation=0
    /// 3. If not found: replies with `ENOENT`
    ///
    /// # Performance
    ///
    /// Target: <1ms. Uses lock-free DashMap lookup.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(parent, name = ?name))]
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        // Convert OsStr to &str for lookup
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                // Invalid UTF-8 in filename - file not found
                debug!("lookup: invalid UTF-8 in name {:?}", name);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // T098: Validate filename length
        if name_str.len() > NAME_MAX {
            debug!("lookup: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("lookup(parent={}, name={})", parent, name_str);

        // Search for the entry in the inode table, falling back to a
        // MetaStore lookup on a miss: the in-memory table is seeded from
        // the store at mount time, but an item saved by another process
        // (or a delta applied between mounts) may not be in memory yet.
        let db_pool = self.db_pool.clone();
        let inode_table = Arc::clone(&self.inode_table);
        let parent_path = self.inode_table.path_by_ino(parent);
        let name_owned = name_str.to_string();

        let entry = self.rt_handle.block_on(async move {
            let fetch_name = name_owned.clone();
            inode_table
                .child_by_name(parent, &name_owned, || async move {
                    let Some(parent_path) = parent_path else {
                        return None;
                    };
                    let child_path = format!(
                        "{}/{}",
                        parent_path.trim_end_matches('/'),
                        fetch_name
                    );
                    let Ok(sync_path) = SyncPath::new(std::path::PathBuf::from(child_path)) else {
                        return None;
                    };

                    let repository = SledStateRepository::new(db_pool.clone());
                    let item = repository.get_item_by_path(&sync_path).await.ok().flatten()?;
                    let ino = db_pool.next_inode().ok()?;
                    Some(sync_item_to_inode_entry(
                        &item,
                        InodeNumber::new(ino),
                        InodeNumber::new(parent),
                    ))
                })
                .await
        });

        match entry {
            Some(entry) => {
                // Found the entry - increment lookup count
                entry.increment_lookup();

                // Get file attributes
                let attr = entry.to_file_attr();

                debug!(
                    "lookup: found inode {} for {}, lookup_count={}",
                    entry.ino().get(),
                    name_str,
                    entry.lookup_count()
                );

                // Reply with entry attributes
                // TTL is 1 second, generation is 0 (we don't use inode generations)
                reply.entry(&TTL, &attr, 0);
            }
            None => {
                // Entry not found locally or remotely
                debug!("lookup: {} not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
            }
        }
    }

    /// Get file attributes.
    ///
    /// Returns the attributes for the given inode. This method is called frequently
    /// by the kernel to get file metadata (size, permissions, timestamps, etc.).
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number to get attributes for
    /// * `_fh` - Optional file handle (unused - we always use inode lookup)
    /// * `reply` - Reply with file attributes or error
    ///
    /// # Behavior
    ///
    /// 1. Looks up the inode in `inode_table.get(ino)`
    /// 2. If found: returns `ReplyAttr` with TTL (1 second) and attributes from
    ///    `InodeEntry::to_file_attr()`. The size field returns the real file size
    ///    (from the `size` field on `InodeEntry`, which holds the remote size even
    ///    for placeholders).
    /// 3. If not found: replies with `ENOENT`
    ///
    /// # Performance
    ///
    /// Target: <1ms. Uses lock-free DashMap lookup with O(1) access.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino))]
    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        debug!("getattr(ino={})", ino);

        // Look up the inode in the table
        match self.inode_table.get(ino) {
            Some(entry) => {
                // Get file attributes (includes real size from remote)
                let attr = entry.to_file_attr();

                debug!(
                    "getattr: inode {} size={} kind={:?}",
                    ino, attr.size, attr.kind
                );

                // Reply with attributes and TTL
                reply.attr(&TTL, &attr);
            }
            None => {
                // Inode not found
                debug!("getattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
            }
        }
    }

    /// Reads directory entries.
    ///
    /// Returns entries for the directory identified by `ino`, starting from `offset`.
    /// This method is purely local - it reads from the in-memory inode table without
    /// making any network requests.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the directory to read
    /// * `_fh` - File handle from opendir (unused)
    /// * `offset` - Offset into the directory listing to start from (0-indexed)
    /// * `reply` - Reply buffer for directory entries
    ///
    /// # Entry Format
    ///
    /// Each entry is added with:
    /// - `ino`: The inode number of the entry
    /// - `offset`: Position + 1 (next offset for kernel to request)
    /// - `kind`: FileType (Directory or RegularFile)
    /// - `name`: Entry name
    ///
    /// # Special Entries
    ///
    /// - `.` (current directory) is prepended at offset 0
    /// - `..` (parent directory) is prepended at offset 1
    ///
    /// # Performance
    ///
    /// Target: <10ms for 1000 entries. This is achieved by:
    /// - Using lock-free DashMap for inode table access
    /// - No database queries or network requests
    /// - Early termination when buffer is full
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, offset))]
    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        // Get the current directory entry to determine parent inode
        let current_entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Verify this is a directory
        if current_entry.kind() != FileType::Directory {
            reply.error(libc::ENOTDIR);
            return;
        }

        // Get the parent inode (for ".." entry)
        // For root directory, parent is itself
        let parent_ino = if ino == InodeNumber::ROOT.get() {
            InodeNumber::ROOT.get()
        } else {
            current_entry.parent_ino().get()
        };

        // Get children from inode table
        let children = self.inode_table.children(ino);

        // Build the complete entry list: ".", "..", then children
        // We use an iterator approach to avoid allocating a large vec

        let mut current_offset: i64 = 0;

        // Entry 0: "." (current directory)
        if offset <= current_offset {
            current_offset += 1;
            if reply.add(ino, current_offset, FileType::Directory, OsStr::new(".")) {
                reply.ok();
                return;
            }
        } else {
            current_offset += 1;
        }

        // Entry 1: ".." (parent directory)
        if offset <= current_offset {
            current_offset += 1;
            if reply.add(
                parent_ino,
                current_offset,
                FileType::Directory,
                OsStr::new(".."),
            ) {
                reply.ok();
                return;
            }
        } else {
            current_offset += 1;
        }

        // Remaining entries: children
        for child in children {
            if offset <= current_offset {
                current_offset += 1;
                if reply.add(
                    child.ino().get(),
                    current_offset,
                    child.kind(),
                    OsStr::new(child.name()),
                ) {
                    // Buffer is full, stop adding entries
                    reply.ok();
                    return;
                }
            } else {
                current_offset += 1;
            }
        }

        // All entries added successfully
        reply.ok();
    }

    /// Sets file attributes.
    ///
    /// This method handles FUSE setattr requests for modifying file metadata.
    /// Currently, it provides a minimal implementation that returns the current
    /// attributes, as full write support is deferred to Stage 5.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file to modify
    /// * `mode` - Optional new permission mode
    /// * `_uid` - Optional new user ID (unsupported - OneDrive doesn't have Unix ownership)
    /// * `_gid` - Optional new group ID (unsupported - OneDrive doesn't have Unix ownership)
    /// * `size` - Optional new file size (for truncate operations)
    /// * `atime` - Optional new access time
    /// * `mtime` - Optional new modification time
    /// * `_ctime` - Optional new change time (handled automatically)
    /// * `_fh` - Optional file handle
    /// * `_crtime` - Optional creation time (macOS only)
    /// * `_chgtime` - Optional change time (macOS only)
    /// * `_bkuptime` - Optional backup time (macOS only)
    /// * `_flags` - Optional flags
    /// * `reply` - Reply with updated FileAttr
    ///
    /// # Notes
    ///
    /// - Permission changes update the `perm` field in the inode entry
    /// - Timestamp changes update `mtime`/`atime`/`ctime` fields
    /// - Size changes (truncate) will mark the file as modified (deferred to Stage 5)
    /// - uid/gid changes are ignored as OneDrive doesn't support Unix ownership
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, mode, size))]
    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr(ino={}, mode={:?}, size={:?}, atime={:?}, mtime={:?})",
            ino, mode, size, atime, mtime
        );

        // Look up the inode entry
        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("setattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Log what would be changed (actual modification deferred to Stage 5)
        if let Some(new_mode) = mode {
            debug!(
                "setattr: would update mode from {:o} to {:o}",
                entry.perm(),
                new_mode as u16 & 0o7777
            );
        }

        if let Some(new_size) = size {
            if new_size != entry.size() {
                debug!(
                    "setattr: truncate from {} to {} bytes (deferred to Stage 5)",
                    entry.size(),
                    new_size
                );
            }
        }

        if let Some(ref new_atime) = atime {
            let new_atime_display = match new_atime {
                TimeOrNow::Now => "now".to_string(),
                TimeOrNow::SpecificTime(t) => format!("{:?}", t),
            };
            debug!("setattr: would update atime to {}", new_atime_display);
        }

        if let Some(ref new_mtime) = mtime {
            let new_mtime_display = match new_mtime {
                TimeOrNow::Now => "now".to_string(),
                TimeOrNow::SpecificTime(t) => format!("{:?}", t),
            };
            debug!("setattr: would update mtime to {}", new_mtime_display);
        }

        // For now, return the current attributes without modification
        // Full write implementation will be added in Stage 5
        let attr = entry.to_file_attr();
        reply.attr(&TTL, &attr);
    }

    /// Returns filesystem statistics.
    ///
    /// Provides information about the filesystem capacity and usage,
    /// derived from the cache configuration and current disk usage.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `_ino` - Inode number (unused, stats are filesystem-wide)
    /// * `reply` - Reply with filesystem statistics
    ///
    /// # Statistics Returned
    ///
    /// - `blocks`: Total number of blocks based on cache_max_size_gb
    /// - `bfree`/`bavail`: Free blocks based on cache disk usage
    /// - `files`: Current number of inodes in the inode table
    /// - `ffree`: Arbitrary large number (no inode limit)
    /// - `bsize`: Block size (4096 bytes)
    /// - `namelen`: Maximum filename length (255 characters)
    /// - `frsize`: Fragment size (same as block size)
    #[tracing::instrument(level = "debug", skip(self, _req, reply))]
    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        debug!("statfs called");

        const BLOCK_SIZE: u32 = 4096;
        const NAME_MAX: u32 = 255;

        // Calculate total capacity from config (cache_max_size_gb * 1024^3)
        let total_bytes = (self.config.cache_max_size_gb as u64) * 1024 * 1024 * 1024;
        let total_blocks = total_bytes / (BLOCK_SIZE as u64);

        // Get current disk usage from the cache
        let used_bytes = match self.cache.disk_usage() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("statfs: failed to get disk usage: {}", e);
                0
            }
        };
        let used_blocks = used_bytes / (BLOCK_SIZE as u64);

        // Calculate free blocks
        let free_blocks = total_blocks.saturating_sub(used_blocks);

        // Count files (inodes currently in table)
        let file_count = self.inode_table.len() as u64;

        // Large number for free inodes (we don't have a hard limit)
        let free_files = u64::MAX / 2;

        debug!(
            "statfs: total_blocks={}, free_blocks={}, files={}",
            total_blocks, free_blocks, file_count
        );

        reply.statfs(
            total_blocks, // blocks: Total data blocks in filesystem
            free_blocks,  // bfree: Free blocks in filesystem
            free_blocks,  // bavail: Free blocks available to unprivileged user
            file_count,   // files: Total file nodes in filesystem
            free_files,   // ffree: Free file nodes in filesystem
            BLOCK_SIZE,   // bsize: Filesystem block size
            NAME_MAX,     // namelen: Maximum length of filenames
            BLOCK_SIZE,   // frsize: Fragment size (same as block size)
        );
    }

    /// Forgets about an inode.
    ///
    /// Called by the kernel when it no longer references an inode.
    /// The `nlookup` parameter indicates the number of lookups being forgotten.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number to forget
    /// * `nlookup` - Number of lookups to decrement
    ///
    /// # Notes
    ///
    /// This method decrements the lookup count on the inode entry.
    /// When the lookup count reaches zero and there are no open handles,
    /// the entry becomes eligible for garbage collection (handled separately).
    ///
    /// There is no reply for this method - it completes silently.
    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget(ino={}, nlookup={})", ino, nlookup);

        // Look up the inode entry
        if let Some(entry) = self.inode_table.get(ino) {
            // Decrement the lookup count by nlookup
            let new_count = entry.decrement_lookup_by(nlookup);
            debug!(
                "forget: inode {} lookup count decremented from {} to {}",
                ino,
                new_count + nlookup,
                new_count
            );

            // Log if the entry is now eligible for eviction
            if entry.is_expired() {
                debug!(
                    "forget: inode {} is now eligible for eviction (lookup=0, handles=0)",
                    ino
                );
                // Actual GC will be handled by a separate background task
            }
        } else {
            warn!("forget: inode {} not found in table", ino);
        }

        // No reply for forget - it completes silently
    }

    /// Opens a directory for reading.
    ///
    /// This method is called by the kernel before readdir() to obtain a file handle
    /// for the directory. It validates that the inode exists and is a directory,
    /// then allocates a unique file handle for tracking the open directory.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the directory to open
    /// * `_flags` - Open flags (unused for directories)
    /// * `reply` - Reply with file handle and open flags
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist in the inode table
    /// - `ENOTDIR` - The inode exists but is not a directory
    ///
    /// # Performance
    ///
    /// Target: <1ms. Uses lock-free DashMap lookup and atomic file handle allocation.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino))]
    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir(ino={})", ino);

        // Look up the inode in the table
        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                debug!("opendir: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Verify this is a directory
        if entry.kind() != FileType::Directory {
            debug!("opendir: inode {} is not a directory", ino);
            reply.error(libc::ENOTDIR);
            return;
        }

        // Allocate a file handle for this open directory
        let fh = self.alloc_fh();

        debug!("opendir: opened directory ino={} with fh={}", ino, fh);

        // Reply with the file handle and FOPEN_KEEP_CACHE flag
        // FOPEN_KEEP_CACHE tells the kernel to keep cached directory data
        reply.opened(fh, FOPEN_KEEP_CACHE);
    }

    /// Releases (closes) an open directory.
    ///
    /// This method is called by the kernel when a directory opened with opendir()
    /// is being closed. For directories, this is typically a no-op beyond logging,
    /// as the file handle is released automatically.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the directory being released
    /// * `fh` - File handle returned from opendir()
    /// * `_flags` - Open flags (unused)
    /// * `reply` - Reply indicating success
    ///
    /// # Notes
    ///
    /// Unlike regular files, directories don't require explicit cleanup of
    /// file handles since they don't maintain open file state. This method
    /// simply logs the release and replies with success.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, fh))]
    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!("releasedir(ino={}, fh={})", ino, fh);

        // No explicit cleanup needed for directory handles
        // The file handle is simply released

        reply.ok();
    }

    // ========================================================================
    // T055-T058: File operations (open, read, release, flush)
    // ========================================================================

    /// Opens a file for reading or writing.
    ///
    /// This method is called by the kernel when a file is opened. It validates
    /// that the inode exists and is a regular file, increments the open handles
    /// counter, and triggers hydration for online (placeholder) files.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file to open
    /// * `flags` - Open flags (e.g., O_RDONLY, O_WRONLY, O_RDWR)
    /// * `reply` - Reply with file handle and open flags
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist in the inode table
    /// - `EISDIR` - The inode exists but is a directory (use opendir instead)
    ///
    /// # Hydration Behavior
    ///
    /// - If state is `Online`: Log that hydration would be triggered (placeholder for
    ///   future HydrationManager integration)
    /// - If state is `Hydrating`: File is already being hydrated (placeholder for
    ///   getting the watch receiver)
    /// - If state is `Hydrated`, `Pinned`, or `Modified`: File content is available
    ///   locally, return FOPEN_KEEP_CACHE to use cached data
    ///
    /// # Performance
    ///
    /// Target: <1ms for already-hydrated files. Uses lock-free DashMap lookup
    /// and atomic file handle allocation.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, flags))]
    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open(ino={}, flags={:#x})", ino, flags);

        // Look up the inode in the table
        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                debug!("open: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Verify this is not a directory
        if entry.kind() == FileType::Directory {
            debug!("open: inode {} is a directory, use opendir", ino);
            reply.error(libc::EISDIR);
            return;
        }

        // Increment open handles counter
        entry.increment_open_handles();
        debug!(
            "open: inode {} open_handles incremented to {}",
            ino,
            entry.open_handles()
        );

        // Allocate a file handle
        let fh = self.alloc_fh();

        // Determine open flags based on state
        let open_flags = match entry.state() {
            ondrift_core::domain::sync_item::ItemState::Online => {
                debug!("open: inode {} is Online (placeholder), hydrating", ino);

                if let Some(hydration) = self.hydration.clone() {
                    if let Some(remote_id) = entry.remote_id().cloned() {
                        let item_id = *entry.item_id();
                        let size = entry.size();
                        let result = self.rt_handle.block_on(hydration.hydrate(
                            ino,
                            item_id,
                            remote_id,
                            size,
                            HydrationPriority::UserOpen,
                        ));
                        match result {
                            Ok(_) => {
                                if let Err(e) =
                                    self.rt_handle.block_on(hydration.wait_for_completion(ino))
                                {
                                    warn!("open: hydration failed for inode {}: {}", ino, e);
                                    reply.error(libc::EIO);
                                    return;
                                }
                            }
                            Err(e) => {
                                warn!("open: failed to start hydration for inode {}: {}", ino, e);
                                reply.error(libc::EIO);
                                return;
                            }
                        }
                    } else {
                        warn!("open: inode {} is Online but has no remote_id", ino);
                        reply.error(libc::EIO);
                        return;
                    }
                }

                // Update last_accessed timestamp asynchronously
                let item_id = *entry.item_id();
                let write_handle = self.write_handle.clone();
                self.rt_handle.spawn(async move {
                    let now = chrono::Utc::now();
                    if let Err(e) = write_handle.update_last_accessed(item_id, now).await {
                        warn!("Failed to update last_accessed: {}", e);
                    }
                });

                FOPEN_KEEP_CACHE
            }
            ondrift_core::domain::sync_item::ItemState::Hydrating => {
                debug!("open: inode {} is Hydrating, waiting for completion", ino);

                if let Some(hydration) = self.hydration.clone() {
                    if let Err(e) = self.rt_handle.block_on(hydration.wait_for_completion(ino)) {
                        warn!("open: waiting on hydration failed for inode {}: {}", ino, e);
                        reply.error(libc::EIO);
                        return;
                    }
                }

                // Update last_accessed timestamp asynchronously
                let item_id = *entry.item_id();
                let write_handle = self.write_handle.clone();
                self.rt_handle.spawn(async move {
                    let now = chrono::Utc::now();
                    if let Err(e) = write_handle.update_last_accessed(item_id, now).await {
                        warn!("Failed to update last_accessed: {}", e);
                    }
                });

                FOPEN_KEEP_CACHE
            }
            ondrift_core::domain::sync_item::ItemState::Hydrated
            | ondrift_core::domain::sync_item::ItemState::Pinned
            | ondrift_core::domain::sync_item::ItemState::Modified => {
                // File is available locally - use cached data
                debug!(
                    "open: inode {} is locally available, using FOPEN_KEEP_CACHE",
                    ino
                );

                // Update last_accessed timestamp asynchronously
                let item_id = *entry.item_id();
                let write_handle = self.write_handle.clone();
                self.rt_handle.spawn(async move {
                    let now = chrono::Utc::now();
                    if let Err(e) = write_handle.update_last_accessed(item_id, now).await {
                        warn!("Failed to update last_accessed: {}", e);
                    }
                });

                FOPEN_KEEP_CACHE
            }
            _ => {
                // Other states (Error, Conflicted, Deleted)
                debug!("open: inode {} has state {:?}", ino, entry.state());

                // Update last_accessed timestamp asynchronously
                let item_id = *entry.item_id();
                let write_handle = self.write_handle.clone();
                self.rt_handle.spawn(async move {
                    let now = chrono::Utc::now();
                    if let Err(e) = write_handle.update_last_accessed(item_id, now).await {
                        warn!("Failed to update last_accessed: {}", e);
                    }
                });

                0
            }
        };

        debug!("open: opened file ino={} with fh={}", ino, fh);
        reply.opened(fh, open_flags);
    }

    /// Reads data from an open file.
    ///
    /// This method reads data from the local cache for hydrated files.
    /// For files that are not yet hydrated, it returns an error.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file to read
    /// * `fh` - File handle from open()
    /// * `offset` - Byte offset to start reading from
    /// * `size` - Number of bytes to read
    /// * `_flags` - Read flags (unused)
    /// * `_lock_owner` - Lock owner (unused)
    /// * `reply` - Reply with data or error
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist in the inode table
    /// - `EIO` - File is not hydrated (Online or Hydrating state), or read failed
    ///
    /// # State Handling
    ///
    /// - `Online`: Returns EIO (file needs to be hydrated first)
    /// - `Hydrating`: Returns EIO (hydration in progress, will wait when HydrationManager
    ///   is integrated)
    /// - `Hydrated`, `Pinned`, `Modified`: Reads from local cache
    ///
    /// # Memory-Mapped Files (mmap)
    ///
    /// T099: FUSE handles mmap via `read()` by default - no special implementation is
    /// required. When an application memory-maps a file, the kernel issues `read()` calls
    /// to this method to populate the page cache. This means:
    ///
    /// - For hydrated files: mmap works normally, reading from the local cache
    /// - For unhydrated files: mmap access triggers `read()`, which returns EIO until
    ///   the file is hydrated. The application will receive SIGBUS on mmap access.
    /// - Once hydrated, subsequent mmap accesses succeed via normal page cache reads.
    ///
    /// # Concurrent Access
    ///
    /// T099: Multiple processes reading the same file during hydration:
    /// - All readers get EIO until hydration completes
    /// - Once hydrated, all readers get consistent data from the cache
    /// - The ContentCache handles concurrent reads safely via file-level locking
    ///
    /// # Performance
    ///
    /// Target: <1ms for cached reads. Uses direct file I/O from the content cache.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, offset, size))]
    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!(
            "read(ino={}, fh={}, offset={}, size={})",
            ino, fh, offset, size
        );

        // Look up the inode in the table
        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("read: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Handle based on state
        match entry.state() {
            ondrift_core::domain::sync_item::ItemState::Online => {
                // File is not hydrated - open() should have triggered hydration already
                debug!(
                    "read: inode {} is Online (not hydrated), returning EIO",
                    ino
                );
                reply.error(libc::EIO);
            }
            ondrift_core::domain::sync_item::ItemState::Hydrating => {
                if let Some(hydration) = self.hydration.clone() {
                    if hydration.is_hydrating(ino) {
                        let wait = self.rt_handle.block_on(hydration.wait_for_range(
                            ino,
                            offset as u64,
                            size as u64,
                        ));
                        if let Err(e) = wait {
                            warn!("read: waiting on hydration range failed for inode {}: {}", ino, e);
                            reply.error(libc::EIO);
                            return;
                        }

                        let remote_id = match entry.remote_id() {
                            Some(id) => id.clone(),
                            None => {
                                warn!("read: inode {} has no remote_id", ino);
                                reply.error(libc::EIO);
                                return;
                            }
                        };

                        match self.cache.read(&remote_id, offset as u64, size) {
                            Ok(data) => reply.data(&data),
                            Err(e) => {
                                warn!("read: failed to read from cache for inode {}: {}", ino, e);
                                reply.error(libc::EIO);
                            }
                        }
                        return;
                    }
                }

                debug!("read: inode {} is Hydrating, returning EIO", ino);
                reply.error(libc::EIO);
            }
            ondrift_core::domain::sync_item::ItemState::Hydrated
            | ondrift_core::domain::sync_item::ItemState::Pinned
            | ondrift_core::domain::sync_item::ItemState::Modified => {
                // File is available locally - read from cache
                let remote_id = match entry.remote_id() {
                    Some(id) => id.clone(),
                    None => {
                        warn!("read: inode {} has no remote_id", ino);
                        reply.error(libc::EIO);
                        return;
                    }
                };

                // Read from the content cache
                match self.cache.read(&remote_id, offset as u64, size) {
                    Ok(data) => {
                        debug!(
                            "read: successfully read {} bytes from inode {}",
                            data.len(),
                            ino
                        );
                        reply.data(&data);
                    }
                    Err(e) => {
                        warn!("read: failed to read from cache for inode {}: {}", ino, e);
                        reply.error(libc::EIO);
                    }
                }
            }
            _ => {
                // Other states (Error, Conflicted, Deleted)
                debug!(
                    "read: inode {} has state {:?}, returning EIO",
                    ino,
                    entry.state()
                );
                reply.error(libc::EIO);
            }
        }
    }

    /// Writes data to an open file.
    ///
    /// This method writes data to the local cache for hydrated files.
    /// For files that are not yet hydrated (Online or Hydrating), it returns an error.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file to write
    /// * `_fh` - File handle from open() (unused, data is written directly to cache)
    /// * `offset` - Byte offset to start writing at
    /// * `data` - Data to write
    /// * `_write_flags` - Write flags (unused)
    /// * `_flags` - Open flags (unused)
    /// * `_lock_owner` - Lock owner (unused)
    /// * `reply` - Reply with bytes written or error
    ///
    /// # Errors
    ///
    /// - `ENOENT` - The inode does not exist in the inode table
    /// - `EIO` - File is not hydrated (Online or Hydrating state), has no remote_id,
    ///   or write failed
    ///
    /// # State Handling
    ///
    /// - `Online`: Returns EIO (file needs to be hydrated first)
    /// - `Hydrating`: Returns EIO (hydration in progress)
    /// - `Hydrated`, `Pinned`, `Modified`: Writes to local cache, transitions to Modified
    ///   if not already in that state
    ///
    /// # Write During Hydration (T099)
    ///
    /// When a file is being hydrated (state = Hydrating), write operations return EIO.
    /// This prevents data corruption that could occur if a write modified partial content.
    /// The application should retry the write after hydration completes. In practice:
    ///
    /// - Most applications will have opened the file with O_RDONLY for initial read
    /// - If opened with O_RDWR and hydration is triggered by read, writes will fail
    ///   until hydration completes
    /// - This is consistent with how network filesystems handle similar scenarios
    ///
    /// # Performance
    ///
    /// Target: <5ms for cache writes. Uses direct file I/O to the content cache
    /// and asynchronous state updates via WriteSerializer.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, data, reply), fields(ino, offset, size = data.len()))]
    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write(ino={}, offset={}, size={})", ino, offset, data.len());

        // Look up the inode in the table
        let entry = match self.inode_table.get(ino) {
            Some(entry) => entry,
            None => {
                warn!("write: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Handle based on state
        match entry.state() {
            ondrift_core::domain::sync_item::ItemState::Online => {
                // File is not hydrated - cannot write without hydrating first
                debug!(
                    "write: inode {} is Online (not hydrated), hydration would be needed first",
                    ino
                );
                reply.error(libc::EIO);
            }
            ondrift_core::domain::sync_item::ItemState::Hydrating => {
                // File is being hydrated - would need to wait for completion
                debug!(
                    "write: inode {} is Hydrating, would wait for completion before writing",
                    ino
                );
                reply.error(libc::EIO);
            }
            ondrift_core::domain::sync_item::ItemState::Hydrated
            | ondrift_core::domain::sync_item::ItemState::Pinned
            | ondrift_core::domain::sync_item::ItemState::Modified => {
                // File is available locally - write to cache
                let remote_id = match entry.remote_id() {
                    Some(id) => id.clone(),
                    None => {
                        warn!("write: inode {} has no remote_id", ino);
                        reply.error(libc::EIO);
                        return;
                    }
                };

                // Write to the content cache
                match self.cache.write_at(&remote_id, offset as u64, data) {
                    Ok(bytes_written) => {
                        debug!(
                            "write: successfully wrote {} bytes to inode {}",
                            bytes_written, ino
                        );

                        // Check if file grew (offset + data.len > current size)
                        let new_end = offset as u64 + data.len() as u64;
                        if new_end > entry.size() {
                            debug!(
                                "write: inode {} size increased from {} to {}",
                                ino,
                                entry.size(),
                                new_end
                            );
                            // Note: In-memory size update would require mutable access to entry
                            // The size will be correctly reported on next stat call from cache
                        }

                        // Transition to Modified state if not already Modified
                        if !matches!(
                            entry.state(),
                            ondrift_core::domain::sync_item::ItemState::Modified
                        ) {
                            let item_id = *entry.item_id();
                            let write_handle = self.write_handle.clone();
                            self.rt_handle.spawn(async move {
                                if let Err(e) = write_handle
                                    .update_state(
                                        item_id,
                                        ondrift_core::domain::sync_item::ItemState::Modified,
                                    )
                                    .await
                                {
                                    warn!("Failed to transition to Modified state: {}", e);
                                }
                            });
                        }

                        reply.written(bytes_written);
                    }
                    Err(e) => {
                        warn!("write: failed to write to cache for inode {}: {}", ino, e);
                        reply.error(libc::EIO);
                    }
                }
            }
            _ => {
                // Other states (Error, Conflicted, Deleted)
                debug!(
                    "write: inode {} has state {:?}, returning EIO",
                    ino,
                    entry.state()
                );
                reply.error(libc::EIO);
            }
        }
    }

    /// Releases (closes) an open file.
    ///
    /// This method is called by the kernel when a file opened with open()
    /// is being closed. It decrements the open handles counter and logs
    /// when a file becomes eligible for dehydration.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file being released
    /// * `fh` - File handle returned from open()
    /// * `_flags` - Open flags (unused)
    /// * `_lock_owner` - Lock owner (unused)
    /// * `_flush` - Whether to flush data before release (unused, writes go to cache
    ///   immediately)
    /// * `reply` - Reply indicating success
    ///
    /// # Dehydration Eligibility
    ///
    /// When the open handles count reaches 0 and the file is in Hydrated state,
    /// the file becomes eligible for dehydration by the DehydrationManager.
    /// This is logged for future integration with the dehydration system.
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, fh))]
    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release(ino={}, fh={})", ino, fh);

        // Look up the inode in the table
        if let Some(entry) = self.inode_table.get(ino) {
            // Decrement open handles counter
            let new_count = entry.decrement_open_handles();
            debug!(
                "release: inode {} open_handles decremented to {}",
                ino, new_count
            );

            // Notify the dehydration sweeper when a hydrated file becomes eligible
            if new_count == 0 {
                if let ondrift_core::domain::sync_item::ItemState::Hydrated = entry.state() {
                    debug!(
                        "release: inode {} is now eligible for dehydration (handles=0, state=Hydrated)",
                        ino
                    );
                    if let Some(dehydration) = self.dehydration.clone() {
                        self.rt_handle.spawn(async move {
                            dehydration.notify_file_closed(ino).await;
                        });
                    }
                }
            }
        } else {
            warn!("release: inode {} not found (may have been evicted)", ino);
        }

        reply.ok();
    }

    /// Flushes cached data to permanent storage.
    ///
    /// Writes go directly to the local cache immediately (write-through
    /// caching), so there is nothing to flush to disk here. What this method
    /// does do, when an [`UploadManager`] is attached and the inode is
    /// `Modified`, is hand the file's current bytes to it so the cloud copy
    /// catches up. The upload itself runs in the background; `flush` does
    /// not wait for it to finish.
    ///
    /// Per the FUSE contract, flush() may be called multiple times for a single
    /// open() (e.g., when the file is dup()'ed), and must always succeed unless
    /// there's an actual error to report.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `ino` - Inode number of the file
    /// * `fh` - File handle (unused)
    /// * `_lock_owner` - Lock owner (unused)
    /// * `reply` - Reply indicating success
    fn flush(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        debug!("flush(ino={}, fh={})", ino, fh);

        if let (Some(upload), Some(entry)) = (self.upload.clone(), self.inode_table.get(ino)) {
            if matches!(entry.state(), ItemState::Modified) {
                if let Some(remote_id) = entry.remote_id().cloned() {
                    match self.cache.read_all(&remote_id) {
                        Ok(data) => {
                            let item_id = *entry.item_id();
                            let repository = SledStateRepository::new(self.db_pool.clone());
                            let inode_table = self.inode_table.clone();
                            let cache = self.cache.clone();
                            let old_remote_id = remote_id.clone();
                            self.rt_handle.spawn(async move {
                                let item = match repository.get_item(&item_id).await {
                                    Ok(Some(item)) => item,
                                    Ok(None) => {
                                        warn!("flush: item {} vanished before upload", item_id);
                                        return;
                                    }
                                    Err(e) => {
                                        warn!(error = %e, "flush: failed to load item for upload");
                                        return;
                                    }
                                };

                                let request = UploadRequest {
                                    item_id,
                                    remote_path: item.remote_path().clone(),
                                    if_match_etag: item.etag().map(String::from),
                                    data,
                                };

                                let mut outcome_rx = upload.enqueue(request);
                                if outcome_rx.changed().await.is_err() {
                                    return;
                                }
                                let outcome = outcome_rx.borrow().clone();
                                match outcome {
                                    Some(UploadOutcome::Uploaded(uploaded))
                                    | Some(UploadOutcome::Conflicted(uploaded)) => {
                                        if let Ok(new_remote_id) = RemoteId::new(uploaded.id.clone())
                                        {
                                            if new_remote_id != old_remote_id {
                                                if let Err(e) =
                                                    cache.move_content(&old_remote_id, &new_remote_id)
                                                {
                                                    warn!(
                                                        error = %e,
                                                        "flush: failed to move cached content to promoted id"
                                                    );
                                                }
                                            }
                                            if let Some(old) = inode_table.remove(ino) {
                                                let size = uploaded.size.unwrap_or_else(|| old.size());
                                                let refreshed = InodeEntry::new(
                                                    old.ino(),
                                                    *old.item_id(),
                                                    Some(new_remote_id),
                                                    old.parent_ino(),
                                                    old.name().to_string(),
                                                    old.kind(),
                                                    size,
                                                    old.perm(),
                                                    old.mtime(),
                                                    old.ctime(),
                                                    old.atime(),
                                                    old.nlink(),
                                                    ItemState::Hydrated,
                                                );
                                                inode_table.insert(refreshed);
                                            }
                                        }
                                    }
                                    Some(UploadOutcome::Failed(err)) => {
                                        warn!(error = %err, "flush: upload failed for inode {}", ino);
                                    }
                                    Some(UploadOutcome::Superseded) | None => {}
                                }
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "flush: failed to read cached content for upload");
                        }
                    }
                } else {
                    warn!("flush: modified inode {} has no remote id, skipping upload", ino);
                }
            }
        }

        reply.ok();
    }

    // ========================================================================
    // T067-T068: Directory creation and removal
    // ========================================================================

    /// Creates a new directory.
    ///
    /// This method creates a new directory entry within the specified parent
    /// directory. The new directory is created with the Modified state to
    /// indicate it needs to be synced to the cloud.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `parent` - Inode number of the parent directory
    /// * `name` - Name for the new directory
    /// * `mode` - Requested permission mode
    /// * `umask` - Umask to apply to the mode
    /// * `reply` - Reply with entry attributes or error
    ///
    /// # Errors
    ///
    /// - `EINVAL` - The name contains invalid UTF-8
    /// - `ENOENT` - The parent inode does not exist
    /// - `ENOTDIR` - The parent inode is not a directory
    /// - `EEXIST` - An entry with the same name already exists in the parent
    /// - `EIO` - Failed to allocate a new inode number
    ///
    /// # State
    ///
    /// The new directory is created with `ItemState::Modified` to indicate
    /// it needs to be uploaded to the cloud during the next sync cycle.
    ///
    /// # Performance
    ///
    /// Target: <10ms. Most time is spent on the async inode allocation.
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, mode))]
    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        // Convert OsStr to &str
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("mkdir: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        // T098: Validate filename length
        if name_str.len() > NAME_MAX {
            debug!("mkdir: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "mkdir(parent={}, name={}, mode={:#o}, umask={:#o})",
            parent, name_str, mode, umask
        );

        // Check parent inode exists and is a directory
        let parent_entry = match self.inode_table.get(parent) {
            Some(entry) => entry,
            None => {
                debug!("mkdir: parent inode {} not found", parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if parent_entry.kind() != FileType::Directory {
            debug!("mkdir: parent inode {} is not a directory", parent);
            reply.error(libc::ENOTDIR);
            return;
        }

        // Check that name doesn't already exist in parent
        if self.inode_table.lookup(parent, name_str).is_some() {
            debug!(
                "mkdir: entry '{}' already exists in parent {}",
                name_str, parent
            );
            reply.error(libc::EEXIST);
            return;
        }

        // Generate a new inode number
        let new_ino = match self
            .rt_handle
            .block_on(self.write_handle.increment_inode_counter())
        {
            Ok(ino) => InodeNumber::new(ino),
            Err(e) => {
                warn!("mkdir: failed to allocate inode: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        // Calculate permissions: apply umask and ensure execute bits for directory
        // Directories need execute bits to be traversable
        let perm = ((mode & !umask) | 0o111) as u16;

        let now = SystemTime::now();

        // Build local/remote paths and persist a SyncItem, the same way create() does,
        // so this directory is visible to the sync engine and survives a remount.
        let local_path = self.build_local_path(parent, name_str);
        let remote_path = self.build_remote_path(parent, name_str);

        let mut sync_item = match SyncItem::new_directory(
            match SyncPath::new(local_path.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("mkdir: invalid local path: {}", e);
                    reply.error(libc::EIO);
                    return;
                }
            },
            match RemotePath::new(remote_path.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("mkdir: invalid remote path: {}", e);
                    reply.error(libc::EIO);
                    return;
                }
            },
        ) {
            Ok(item) => item,
            Err(e) => {
                warn!("mkdir: failed to create SyncItem: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        sync_item.reset_state_for_crash_recovery(ItemState::Modified);
        sync_item.mark_pending_remote();

        // Same provisional remote id convention as create(): gives this
        // directory a RemoteId immediately so it is addressable before the
        // first sync assigns the server-side one.
        let provisional_remote_id = RemoteId::new_provisional();
        sync_item.set_remote_id(provisional_remote_id.clone());

        let item_id = *sync_item.id();

        if let Err(e) = self.rt_handle.block_on(self.write_handle.save_item(sync_item)) {
            warn!("mkdir: failed to save SyncItem: {}", e);
            reply.error(libc::EIO);
            return;
        }

        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.update_inode(item_id, new_ino.get()))
        {
            warn!("mkdir: failed to record inode mapping: {}", e);
        }

        // Create InodeEntry for the new directory
        let entry = InodeEntry::new(
            new_ino,
            item_id,
            Some(provisional_remote_id),   // Provisional until the first sync assigns the real one
            InodeNumber::new(parent),      // Parent inode
            name_str.to_string(),          // Directory name
            FileType::Directory,           // This is a directory
            0,                             // Size is 0 for directories
            perm,                          // Calculated permissions
            now,                           // mtime
            now,                           // ctime
            now,                           // atime
            2,                             // nlink=2 (. and parent link)
            ondrift_core::domain::sync_item::ItemState::Modified, // Needs to be synced
        );

        // Get file attributes before inserting (entry will be moved)
        let attr = entry.to_file_attr();

        // Increment lookup count since we're returning this entry
        entry.increment_lookup();

        // Insert into inode table
        self.inode_table.insert(entry);

        debug!(
            "mkdir: created directory '{}' with inode {}",
            name_str,
            new_ino.get()
        );

        // Reply with entry attributes
        reply.entry(&TTL, &attr, 0);
    }

    /// Removes an empty directory.
    ///
    /// This method removes a directory entry from the specified parent
    /// directory. The directory must be empty (no children).
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `parent` - Inode number of the parent directory
    /// * `name` - Name of the directory to remove
    /// * `reply` - Reply with success or error
    ///
    /// # Errors
    ///
    /// - `EINVAL` - The name contains invalid UTF-8
    /// - `ENOENT` - The directory does not exist
    /// - `ENOTDIR` - The entry exists but is not a directory
    /// - `ENOTEMPTY` - The directory is not empty
    ///
    /// # State Transition
    ///
    /// The directory's state is transitioned to `ItemState::Deleted` via the
    /// WriteSerializer before being removed from the inode table.
    ///
    /// # Performance
    ///
    /// Target: <10ms. Most time is spent checking for children.
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name))]
    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        // Convert OsStr to &str
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("rmdir: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        // T098: Validate filename length
        if name_str.len() > NAME_MAX {
            debug!("rmdir: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("rmdir(parent={}, name={})", parent, name_str);

        // Look up the child entry
        let child_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!("rmdir: '{}' not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Verify it's a directory
        if child_entry.kind() != FileType::Directory {
            debug!(
                "rmdir: '{}' (inode {}) is not a directory",
                name_str,
                child_entry.ino().get()
            );
            reply.error(libc::ENOTDIR);
            return;
        }

        let child_ino = child_entry.ino().get();

        // Check if directory is empty (no children with this as parent)
        let children = self.inode_table.children(child_ino);
        if !children.is_empty() {
            debug!(
                "rmdir: directory '{}' (inode {}) is not empty ({} children)",
                name_str,
                child_ino,
                children.len()
            );
            reply.error(libc::ENOTEMPTY);
            return;
        }

        // Transition state to Deleted via WriteSerializer (if the item has a database entry)
        // For newly created directories that haven't been synced, they may not have a DB entry
        let item_id = *child_entry.item_id();
        let write_handle = self.write_handle.clone();
        let rt_handle = self.rt_handle.clone();

        // Try to update the state, but don't fail if the item doesn't exist in DB
        // (for locally-created directories that haven't been synced yet)
        rt_handle.spawn(async move {
            if let Err(e) = write_handle
                .update_state(item_id, ondrift_core::domain::sync_item::ItemState::Deleted)
                .await
            {
                // Log but don't fail - the directory may not exist in the database yet
                debug!(
                    "rmdir: failed to update state to Deleted for item {}: {} (may not exist in DB)",
                    item_id, e
                );
            }
        });

        // Remove from inode table
        self.inode_table.remove(child_ino);

        debug!(
            "rmdir: removed directory '{}' (inode {})",
            name_str, child_ino
        );

        reply.ok();
    }

    // ========================================================================
    // T069: Rename operation
    // ========================================================================

    /// Renames a file or directory.
    ///
    /// This method handles the FUSE rename operation, which moves a file or
    /// directory from one location to another, potentially replacing an existing
    /// entry at the destination.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context (unused)
    /// * `parent` - Inode number of the source parent directory
    /// * `name` - Name of the entry to rename in the source directory
    /// * `newparent` - Inode number of the destination parent directory
    /// * `newname` - New name for the entry in the destination directory
    /// * `_flags` - Rename flags (e.g., RENAME_NOREPLACE, RENAME_EXCHANGE)
    /// * `reply` - Reply indicating success or error
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in name or newname
    /// - `ENOENT` - Source entry not found
    /// - `EISDIR` - Destination is a directory but source is a file
    /// - `ENOTDIR` - Destination is a file but source is a directory
    ///
    /// # Behavior
    ///
    /// 1. Validates UTF-8 encoding of both names
    /// 2. Looks up the source entry by parent inode and name
    /// 3. If destination exists:
    ///    - Validates type compatibility (file->file, dir->dir)
    ///    - Removes the existing destination entry
    /// 4. Updates the source entry with new parent and name
    /// 5. Marks the entry as Modified for later sync
    ///
    /// # Implementation Notes
    ///
    /// Since `InodeEntry` fields are not mutable after creation (stored in Arc),
    /// rename is implemented by:
    /// 1. Removing the source entry from the inode table
    /// 2. Creating a new entry with updated parent_ino and name
    /// 3. Inserting the new entry back into the inode table
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, newparent, newname = ?newname))]
    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        // Step 1: Convert names to &str, return EINVAL if invalid UTF-8
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("rename: invalid UTF-8 in source name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        let newname_str = match newname.to_str() {
            Some(s) => s,
            None => {
                debug!("rename: invalid UTF-8 in destination name {:?}", newname);
                reply.error(libc::EINVAL);
                return;
            }
        };

        // T098: Validate filename lengths
        if name_str.len() > NAME_MAX {
            debug!("rename: source name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }
        if newname_str.len() > NAME_MAX {
            debug!("rename: dest name too long ({} > {})", newname_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "rename(parent={}, name={}, newparent={}, newname={})",
            parent, name_str, newparent, newname_str
        );

        // Step 2: Look up source entry
        let source_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!(
                    "rename: source {} not found in parent {}",
                    name_str, parent
                );
                reply.error(libc::ENOENT);
                return;
            }
        };

        let source_ino = source_entry.ino().get();
        let source_kind = source_entry.kind();

        // Step 3: Check destination type compatibility; the move/replace
        // itself is delegated to InodeTable::rename below.
        if let Some(dest_entry) = self.inode_table.lookup(newparent, newname_str) {
            let dest_kind = dest_entry.kind();

            if dest_kind == FileType::Directory && source_kind != FileType::Directory {
                debug!(
                    "rename: cannot replace directory {} with file {}",
                    newname_str, name_str
                );
                reply.error(libc::EISDIR);
                return;
            }

            if dest_kind != FileType::Directory && source_kind == FileType::Directory {
                debug!(
                    "rename: cannot replace file {} with directory {}",
                    newname_str, name_str
                );
                reply.error(libc::ENOTDIR);
                return;
            }
        }

        // Step 4: Determine the new state (mark as Modified if not already)
        let new_state = match source_entry.state() {
            ondrift_core::domain::sync_item::ItemState::Modified => {
                ondrift_core::domain::sync_item::ItemState::Modified
            }
            ondrift_core::domain::sync_item::ItemState::Hydrated
            | ondrift_core::domain::sync_item::ItemState::Pinned => {
                // Transition to Modified since we're making a local change
                ondrift_core::domain::sync_item::ItemState::Modified
            }
            other => {
                // Keep other states (Online, Hydrating, Error, etc.)
                // For Online files, the rename will be tracked and synced when the file is hydrated
                other.clone()
            }
        };

        // Step 5: Let the graph move the entry, preserving its children
        // list (relevant for directory renames) via adopt_children_from.
        if self
            .inode_table
            .rename(parent, newparent, name_str, newname_str, Some(new_state))
            .is_none()
        {
            warn!("rename: source entry {} disappeared", source_ino);
            reply.error(libc::ENOENT);
            return;
        }

        debug!(
            "rename: successfully renamed {} -> {} (ino={})",
            name_str, newname_str, source_ino
        );

        // Reply success
        reply.ok();
    }

    // ========================================================================
    // T065-T066: File creation and deletion (create, unlink)
    // ========================================================================

    /// Creates a new regular file.
    ///
    /// This method is called by the kernel when a new file is created (e.g., via
    /// `open()` with O_CREAT, or `creat()` syscall). It creates a new SyncItem
    /// with Modified state (since it's a new file without a remote counterpart)
    /// and allocates an inode for it.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context
    /// * `parent` - Inode number of the parent directory
    /// * `name` - Name of the file to create
    /// * `mode` - File mode (permissions and file type bits)
    /// * `umask` - Umask to apply to the mode
    /// * `flags` - Open flags
    /// * `reply` - Reply with file attributes and handle
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in filename
    /// - `ENOENT` - Parent directory not found
    /// - `ENOTDIR` - Parent is not a directory
    /// - `EEXIST` - File already exists
    /// - `EIO` - Database or internal error
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name, mode, flags))]
    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        // Convert name to &str
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("create: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        // T098: Validate filename length
        if name_str.len() > NAME_MAX {
            debug!("create: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!(
            "create(parent={}, name={}, mode={:#o}, umask={:#o}, flags={:#x})",
            parent, name_str, mode, umask, flags
        );

        // Check parent inode exists and is a directory
        let parent_entry = match self.inode_table.get(parent) {
            Some(entry) => entry,
            None => {
                debug!("create: parent inode {} not found", parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        if parent_entry.kind() != FileType::Directory {
            debug!("create: parent inode {} is not a directory", parent);
            reply.error(libc::ENOTDIR);
            return;
        }

        // Check name doesn't already exist in parent
        if self.inode_table.lookup(parent, name_str).is_some() {
            debug!("create: {} already exists in parent {}", name_str, parent);
            reply.error(libc::EEXIST);
            return;
        }

        // Generate a new inode number
        let new_ino = match self.rt_handle.block_on(self.write_handle.increment_inode_counter()) {
            Ok(ino) => InodeNumber::new(ino),
            Err(e) => {
                warn!("create: failed to allocate inode: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        // Build the local path by traversing parent hierarchy
        let local_path = self.build_local_path(parent, name_str);
        let remote_path = self.build_remote_path(parent, name_str);

        // Create a new SyncItem with Modified state
        let mut sync_item = match SyncItem::new(
            match SyncPath::new(local_path.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("create: invalid local path: {}", e);
                    reply.error(libc::EIO);
                    return;
                }
            },
            match RemotePath::new(remote_path.clone()) {
                Ok(p) => p,
                Err(e) => {
                    warn!("create: invalid remote path: {}", e);
                    reply.error(libc::EIO);
                    return;
                }
            },
            false, // is_directory = false
        ) {
            Ok(item) => item,
            Err(e) => {
                warn!("create: failed to create SyncItem: {}", e);
                reply.error(libc::EIO);
                return;
            }
        };

        // Transition to Modified state (new file without remote counterpart)
        // New items start in Online state, but we need to mark them as Modified
        // since they need to be uploaded. We use reset_state_for_crash_recovery
        // to bypass the state machine for this initialization case.
        sync_item.reset_state_for_crash_recovery(ItemState::Modified);

        // No remote counterpart yet: guard against a delta listing that
        // hasn't caught up from deleting this entry out from under us.
        sync_item.mark_pending_remote();

        // Stand in a provisional remote id so the content cache (keyed by
        // RemoteId) has somewhere to put the bytes write() is about to
        // receive. UploadManager replaces this with the server-assigned id
        // once the first upload completes.
        let provisional_remote_id = RemoteId::new_provisional();
        sync_item.set_remote_id(provisional_remote_id.clone());

        let item_id = *sync_item.id();

        // Save the SyncItem to the database
        if let Err(e) = self.rt_handle.block_on(self.write_handle.save_item(sync_item)) {
            warn!("create: failed to save SyncItem: {}", e);
            reply.error(libc::EIO);
            return;
        }

        // Record the inode <-> item_id mapping so get_item_by_inode resolves
        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.update_inode(item_id, new_ino.get()))
        {
            warn!("create: failed to record inode mapping: {}", e);
        }

        // Calculate file permissions: mode & !umask (apply umask)
        let perm = (mode & !umask) as u16 & 0o7777;

        let now = std::time::SystemTime::now();

        // Create InodeEntry for the new file
        let entry = InodeEntry::new(
            new_ino,
            item_id,
            Some(provisional_remote_id),
            InodeNumber::new(parent),
            name_str.to_string(),
            FileType::RegularFile,
            0,    // Size is 0 for newly created files
            perm,
            now,  // mtime
            now,  // ctime
            now,  // atime
            1,    // nlink
            ItemState::Modified,
        );

        // Get file attributes before inserting (for reply)
        let attr = entry.to_file_attr();

        // Insert into inode_table
        self.inode_table.insert(entry);

        // Increment lookup count (kernel now has a reference)
        if let Some(entry) = self.inode_table.get(new_ino.get()) {
            entry.increment_lookup();
            entry.increment_open_handles();
        }

        // Allocate a file handle
        let fh = self.alloc_fh();

        debug!(
            "create: created file {} with inode {}, fh={}",
            name_str,
            new_ino.get(),
            fh
        );

        // Reply with file attributes
        // TTL is 1 second, generation is 0, flags indicate FOPEN_KEEP_CACHE
        reply.created(&TTL, &attr, 0, fh, flags as u32);
    }

    /// Removes a file (unlink).
    ///
    /// This method is called by the kernel when a file is deleted via `unlink()`.
    /// It marks the file as Deleted in the database, removes its cached content,
    /// and removes it from the inode table.
    ///
    /// # Arguments
    ///
    /// * `_req` - FUSE request context
    /// * `parent` - Inode number of the parent directory
    /// * `name` - Name of the file to remove
    /// * `reply` - Reply indicating success or failure
    ///
    /// # Errors
    ///
    /// - `EINVAL` - Invalid UTF-8 in filename
    /// - `ENOENT` - File not found
    /// - `EISDIR` - Target is a directory (use rmdir instead)
    /// - `EIO` - Database or internal error
    #[tracing::instrument(level = "info", skip(self, _req, reply), fields(parent, name = ?name))]
    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        // Convert name to &str
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("unlink: invalid UTF-8 in name {:?}", name);
                reply.error(libc::EINVAL);
                return;
            }
        };

        // T098: Validate filename length
        if name_str.len() > NAME_MAX {
            debug!("unlink: name too long ({} > {})", name_str.len(), NAME_MAX);
            reply.error(libc::ENAMETOOLONG);
            return;
        }

        debug!("unlink(parent={}, name={})", parent, name_str);

        // Look up child via inode_table.lookup(parent, name)
        let child_entry = match self.inode_table.lookup(parent, name_str) {
            Some(entry) => entry,
            None => {
                debug!("unlink: {} not found in parent {}", name_str, parent);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // If it's a directory, return EISDIR
        if child_entry.kind() == FileType::Directory {
            debug!("unlink: {} is a directory, use rmdir", name_str);
            reply.error(libc::EISDIR);
            return;
        }

        let child_ino = child_entry.ino().get();
        let item_id = *child_entry.item_id();
        let remote_id = child_entry.remote_id().cloned();

        // Check if file has open handles - if so, we still unlink but the
        // actual cleanup happens when the last handle is released.
        // For now, we proceed with the unlink regardless of open handles,
        // as the inode entry will be retained due to the lookup_count.
        let open_handles = child_entry.open_handles();
        if open_handles > 0 {
            debug!(
                "unlink: {} has {} open handles, marking as deleted",
                name_str, open_handles
            );
        }

        // Transition state to Deleted via WriteSerializer
        if let Err(e) = self
            .rt_handle
            .block_on(self.write_handle.update_state(item_id, ItemState::Deleted))
        {
            warn!("unlink: failed to update state to Deleted: {}", e);
            reply.error(libc::EIO);
            return;
        }

        // Remove cached content if remote_id exists
        if let Some(ref rid) = remote_id {
            if let Err(e) = self.cache.remove(rid) {
                // Log but don't fail - the file is already marked as deleted
                warn!("unlink: failed to remove cached content: {}", e);
            }
        }

        // Remove from inode_table
        self.inode_table.remove(child_ino);

        debug!("unlink: removed file {} (inode {})", name_str, child_ino);

        reply.ok();
    }

    // ========================================================================
    // T089-T092: Extended Attributes (xattr) operations
    // ========================================================================

    /// Gets the value of an extended attribute.
    ///
    /// Returns the value of the requested extended attribute for the given inode.
    /// If `size` is 0, returns the size needed to store the attribute value.
    /// If `size` is non-zero and too small, returns ERANGE.
    ///
    /// # Supported Attributes
    ///
    /// - `user.ondrift.state` - Current sync/hydration state
    /// - `user.ondrift.size` - File size in bytes
    /// - `user.ondrift.remote_id` - OneDrive item ID (if present)
    /// - `user.ondrift.progress` - Hydration progress (only during Hydrating)
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, name = ?name, size))]
    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                debug!("getxattr: invalid attribute name for inode {}", ino);
                reply.error(libc::ENODATA);
                return;
            }
        };

        debug!("getxattr: ino={}, name={}, size={}", ino, name_str, size);

        // Look up the inode entry
        let entry = match self.inode_table.get(ino) {
            Some(e) => e,
            None => {
                debug!("getxattr: inode {} not found", ino);
                reply.error(libc::ENOENT);
                return;
            }
        };

        // Get the attribute value using the xattr module
        let value = match xattr::get_xattr(&entry, name_str) {
            Some(v) => v,
            None => {
                debug!("getxattr: attribute {} not found for inode {}", name_str, ino);
                reply.error(libc::ENODATA);
                return;
            }
        };

        // If size is 0, return the size needed
        if size == 0 {
            reply.size(value.len() as u32);
            return;
        }

        // If the provided buffer is too small, return ERANGE
        if (size as usize) < value.len() {
            debug!(
                "getxattr: buffer too small ({} < {}) for inode {}",
                size,
                value.len(),
                ino
            );
            reply.error(libc::ERANGE);
            return;
        }

        reply.data(&value);
    }

    /// Lists extended attributes for an inode.
    ///
    /// Returns a null-separated list of extended attribute names.
    /// If `size` is 0, returns the size needed to store all attribute names.
    /// If `size` is non-zero and too small, returns ERANGE.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, size))]
    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr: ino={}, size={}", ino, size);

        // Verify the inode exists
        if self.inode_table.get(ino).is_none() {
            debug!("listxattr: inode {} not found", ino);
            reply.error(libc::ENOENT);
            return;
        }

        // Get all supported attribute names
        let attrs = xattr::list_xattrs();

        // Build null-separated list of names
        let mut data = Vec::new();
        for attr in attrs {
            data.extend_from_slice(attr.as_bytes());
            data.push(0); // null separator
        }

        // If size is 0, return the size needed
        if size == 0 {
            reply.size(data.len() as u32);
            return;
        }

        // If the provided buffer is too small, return ERANGE
        if (size as usize) < data.len() {
            debug!(
                "listxattr: buffer too small ({} < {}) for inode {}",
                size,
                data.len(),
                ino
            );
            reply.error(libc::ERANGE);
            return;
        }

        reply.data(&data);
    }

    /// Sets an extended attribute value.
    ///
    /// OnDrift extended attributes are read-only and managed by the sync engine.
    /// This method always returns EACCES (permission denied) for our namespace
    /// and ENOTSUP (not supported) for other namespaces.
    #[tracing::instrument(level = "debug", skip(self, _req, _value, reply), fields(ino, name = ?name))]
    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        _value: &[u8],
        _flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        let name_str = name.to_str().unwrap_or("<invalid>");
        debug!("setxattr: ino={}, name={} (denied)", ino, name_str);

        // Reject writes to our namespace with EACCES (permission denied)
        if name_str.starts_with("user.ondrift.") || name_str.starts_with("user.onemount.") {
            reply.error(libc::EACCES);
        } else {
            // For other namespaces, return ENOTSUP
            reply.error(libc::ENOTSUP);
        }
    }

    /// Removes an extended attribute.
    ///
    /// OnDrift extended attributes are read-only and managed by the sync engine.
    /// This method always returns EACCES (permission denied) for our namespace
    /// and ENOTSUP (not supported) for other namespaces.
    #[tracing::instrument(level = "debug", skip(self, _req, reply), fields(ino, name = ?name))]
    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        let name_str = name.to_str().unwrap_or("<invalid>");
        debug!("removexattr: ino={}, name={} (denied)", ino, name_str);

        // Reject removal from our namespace with EACCES (permission denied)
        if name_str.starts_with("user.ondrift.") || name_str.starts_with("user.onemount.") {
            reply.error(libc::EACCES);
        } else {
            // For other namespaces, return ENOTSUP
            reply.error(libc::ENOTSUP);
        }
    }
}

// ============================================================================
// Path building helpers
// ============================================================================

impl OnDriftFs {
    /// Builds the full local path for a new file given its parent inode and name.
    ///
    /// This method traverses the inode hierarchy from the parent up to the root
    /// to construct the complete path.
    fn build_local_path(&self, parent_ino: u64, name: &str) -> std::path::PathBuf {
        let mount_point = std::path::PathBuf::from(&self.config.mount_point);

        if parent_ino == InodeNumber::ROOT.get() {
            // Parent is root, path is just mount_point/name
            return mount_point.join(name);
        }

        // Build path by traversing parent hierarchy
        let mut components = vec![name.to_string()];
        let mut current_ino = parent_ino;

        while current_ino != InodeNumber::ROOT.get() {
            if let Some(entry) = self.inode_table.get(current_ino) {
                if !entry.name().is_empty() {
                    components.push(entry.name().to_string());
                }
                current_ino = entry.parent_ino().get();
            } else {
                // Parent not found, stop traversing
                break;
            }
        }

        // Reverse to get root-to-leaf order
        components.reverse();

        let mut path = mount_point;
        for component in components {
            path = path.join(component);
        }

        path
    }

    /// Builds the remote path for a new file given its parent inode and name.
    ///
    /// This method traverses the inode hierarchy to construct the OneDrive path.
    fn build_remote_path(&self, parent_ino: u64, name: &str) -> String {
        if parent_ino == InodeNumber::ROOT.get() {
            // Parent is root, path is just /name
            return format!("/{}", name);
        }

        // Build path by traversing parent hierarchy
        let mut components = vec![name.to_string()];
        let mut current_ino = parent_ino;

        while current_ino != InodeNumber::ROOT.get() {
            if let Some(entry) = self.inode_table.get(current_ino) {
                if !entry.name().is_empty() {
                    components.push(entry.name().to_string());
                }
                current_ino = entry.parent_ino().get();
            } else {
                // Parent not found, stop traversing
                break;
            }
        }

        // Reverse to get root-to-leaf order
        components.reverse();

        format!("/{}", components.join("/"))
    }
}

// ============================================================================
// Test helper methods for OnDriftFs
// ============================================================================

#[cfg(test)]
impl OnDriftFs {
    /// Test helper: get entry by inode
    pub fn get_entry(&self, ino: u64) -> Option<Arc<InodeEntry>> {
        self.inode_table.get(ino)
    }

    /// Test helper: lookup entry by parent and name
    pub fn lookup_entry(&self, parent: u64, name: &str) -> Option<Arc<InodeEntry>> {
        self.inode_table.lookup(parent, name)
    }

    /// Test helper: get children of a directory (excludes the directory itself)
    ///
    /// Unlike `InodeTable::children()`, this filters out entries where
    /// the entry's inode equals its parent_ino (like the root directory).
    pub fn get_children(&self, parent: u64) -> Vec<Arc<InodeEntry>> {
        self.inode_table
            .children(parent)
            .into_iter()
            .filter(|e| e.ino().get() != e.parent_ino().get())
            .collect()
    }

    /// Test helper: insert an inode entry directly into the table
    pub fn insert_entry(&self, entry: InodeEntry) {
        self.inode_table.insert(entry);
    }
}
