//! OnDrift Sync - Delta synchronization engine
//!
//! Provides:
//! - Incremental delta sync with Microsoft Graph
//! - Adaptive rate limiting
//! - Conflict detection
//! - Bidirectional synchronization

pub mod engine;
pub mod filesystem;
pub mod offline_tracker;
pub mod scheduler;
pub mod upload_manager;
pub mod watcher;

pub use engine::{ChangeEvent, SyncEngine, SyncResult};
pub use filesystem::LocalFileSystemAdapter;
pub use offline_tracker::{OfflineTracker, ReplayContext, ReplaySummary};
pub use scheduler::SyncScheduler;
pub use upload_manager::{RetryPolicy as UploadRetryPolicy, UploadManager, UploadOutcome, UploadRequest};
pub use watcher::{DebouncedChangeQueue, FileWatcher, WatchHandle};
