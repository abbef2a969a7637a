//! Offline change intent tracking and replay.
//!
//! While the remote is unreachable, [`FSHandlers`]-level write operations
//! record an intent here instead of calling the cloud provider directly.
//! [`OfflineTracker::replay`] drains the queue in timestamp order once
//! [`SyncEngine`](crate::engine::SyncEngine) transitions back online.
//!
//! Grounded on the same queue/dedup shape as [`crate::watcher`]'s
//! `DebouncedChangeQueue`, adapted from inotify-origin events to intents
//! recorded directly by FUSE handlers (there is nothing to watch
//! externally once FUSE sees every write itself).

use std::sync::Arc;

use ondrift_core::domain::newtypes::{RemoteId, UniqueId};
use ondrift_core::domain::offline_change::{ChangeKind, OfflineChange};
use ondrift_core::ports::cloud_provider::ICloudProvider;
use ondrift_store::MetaStore;
use tracing::{debug, info, warn};

/// What replay needs from the caller to resolve a queued create/modify:
/// the current local body and remote-facing identity for the item.
#[async_trait::async_trait]
pub trait ReplayContext: Send + Sync {
    /// Enqueues (or performs) the upload for `id`'s current local body.
    /// Returns `Ok(())` once the upload has been handed off - the tracker
    /// does not wait for transfer completion, only for the handoff to the
    /// upload manager to succeed.
    async fn enqueue_upload(&self, id: &UniqueId) -> anyhow::Result<()>;

    /// True if `id` never completed its first upload (its remote id, if
    /// any, still carries the `local-id-` provisional prefix). A queued
    /// delete for such an item is a no-op: the create it would be undoing
    /// never reached the remote.
    async fn is_provisional(&self, id: &UniqueId) -> anyhow::Result<bool>;

    /// The item's current remote id, to address it in a `delete`/`move`
    /// call against the cloud provider.
    async fn remote_id(&self, id: &UniqueId) -> anyhow::Result<RemoteId>;

    /// Resolves `new_path` (as recorded on the queued rename) into the
    /// remote id of its parent folder and the item's new base name.
    /// `new_parent_id` is `None` when the rename keeps the item in its
    /// current parent.
    async fn resolve_rename_target(
        &self,
        id: &UniqueId,
        new_path: &str,
    ) -> anyhow::Result<(Option<RemoteId>, String)>;
}

/// Records and replays [`OfflineChange`] intents against a [`MetaStore`].
pub struct OfflineTracker {
    store: Arc<MetaStore>,
    cloud: Arc<dyn ICloudProvider + Send + Sync>,
}

impl OfflineTracker {
    pub fn new(store: Arc<MetaStore>, cloud: Arc<dyn ICloudProvider + Send + Sync>) -> Self {
        Self { store, cloud }
    }

    /// Records that `id` was created while offline.
    pub fn record_create(&self, id: UniqueId, path: impl Into<String>, ts_nanos: i128) {
        self.record(OfflineChange::new(
            id,
            ChangeKind::Create,
            ts_nanos,
            None,
            Some(path.into()),
        ));
    }

    /// Records that `id`'s content or metadata was modified while offline.
    pub fn record_modify(&self, id: UniqueId, ts_nanos: i128) {
        self.record(OfflineChange::new(id, ChangeKind::Modify, ts_nanos, None, None));
    }

    /// Records that `id` was deleted while offline.
    pub fn record_delete(&self, id: UniqueId, ts_nanos: i128) {
        self.record(OfflineChange::new(id, ChangeKind::Delete, ts_nanos, None, None));
    }

    /// Records that `id` was renamed/moved while offline.
    pub fn record_rename(
        &self,
        id: UniqueId,
        old_path: impl Into<String>,
        new_path: impl Into<String>,
        ts_nanos: i128,
    ) {
        self.record(OfflineChange::new(
            id,
            ChangeKind::Rename,
            ts_nanos,
            Some(old_path.into()),
            Some(new_path.into()),
        ));
    }

    fn record(&self, change: OfflineChange) {
        if let Err(err) = self.store.enqueue_offline_change(change) {
            warn!(%err, "failed to persist offline change, will be lost on restart");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.store.offline_change_count()
    }

    /// Replays every queued change in timestamp order. A failure on one
    /// item does not block the rest - it is re-queued for a future replay
    /// attempt and replay moves on to the next item.
    pub async fn replay(&self, ctx: &dyn ReplayContext) -> anyhow::Result<ReplaySummary> {
        let queued = self.store.list_offline_changes_ordered()?;
        let mut summary = ReplaySummary::default();
        info!(count = queued.len(), "replaying queued offline changes");

        for change in queued {
            let id = *change.id();
            let outcome = match change.kind() {
                ChangeKind::Create | ChangeKind::Modify => ctx.enqueue_upload(&id).await,
                ChangeKind::Delete => self.replay_delete(&id, ctx).await,
                ChangeKind::Rename => self.replay_rename(&change, ctx).await,
            };

            match outcome {
                Ok(()) => {
                    self.store.remove_offline_change(&id)?;
                    summary.replayed += 1;
                }
                Err(err) => {
                    warn!(item_id = %id, %err, "offline change replay failed, left queued");
                    summary.failed += 1;
                }
            }
        }

        debug!(?summary, "offline replay complete");
        Ok(summary)
    }

    async fn replay_delete(&self, id: &UniqueId, ctx: &dyn ReplayContext) -> anyhow::Result<()> {
        if ctx.is_provisional(id).await? {
            // the create never reached the remote; nothing to delete there.
            return Ok(());
        }
        let remote_id = ctx.remote_id(id).await?;
        self.cloud
            .delete_item(&remote_id)
            .await
            .map_err(|e| anyhow::anyhow!("remote delete failed: {e}"))
    }

    async fn replay_rename(
        &self,
        change: &OfflineChange,
        ctx: &dyn ReplayContext,
    ) -> anyhow::Result<()> {
        let id = *change.id();
        let Some(new_path) = change.new_path() else {
            return Err(anyhow::anyhow!("rename change missing new path"));
        };
        let remote_id = ctx.remote_id(&id).await?;
        let (new_parent_id, new_name) = ctx.resolve_rename_target(&id, new_path).await?;
        self.cloud
            .move_item(&remote_id, new_parent_id.as_ref(), &new_name)
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("remote rename failed: {e}"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReplaySummary {
    pub replayed: u32,
    pub failed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ondrift_core::domain::newtypes::{DeltaToken, RemotePath};
    use ondrift_core::ports::cloud_provider::{
        AuthFlow, DeltaItem, DeltaResponse, ICloudProvider, Tokens, UserInfo,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubCloud {
        delete_calls: AtomicUsize,
        move_calls: AtomicUsize,
    }

    fn stub_delta_item(id: &str) -> DeltaItem {
        DeltaItem {
            id: id.to_string(),
            name: "stub".to_string(),
            path: None,
            size: None,
            hash: None,
            modified: None,
            is_deleted: false,
            is_directory: false,
            parent_id: None,
        }
    }

    #[async_trait::async_trait]
    impl ICloudProvider for StubCloud {
        async fn authenticate(&self, _auth_flow: &AuthFlow) -> anyhow::Result<Tokens> {
            unimplemented!("not exercised by offline_tracker tests")
        }

        async fn refresh_tokens(&self, _refresh_token: &str) -> anyhow::Result<Tokens> {
            unimplemented!()
        }

        async fn get_delta(&self, _token: Option<&DeltaToken>) -> anyhow::Result<DeltaResponse> {
            unimplemented!()
        }

        async fn download_file(&self, _remote_id: &RemoteId) -> anyhow::Result<Vec<u8>> {
            unimplemented!()
        }

        async fn upload_file(
            &self,
            _parent_path: &RemotePath,
            _name: &str,
            _data: &[u8],
            _if_match_etag: Option<&str>,
        ) -> anyhow::Result<DeltaItem> {
            unimplemented!()
        }

        async fn upload_file_session(
            &self,
            _parent_path: &RemotePath,
            _name: &str,
            _data: &[u8],
            _progress: Option<Box<dyn Fn(u64, u64) + Send>>,
        ) -> anyhow::Result<DeltaItem> {
            unimplemented!()
        }

        async fn get_metadata(&self, _remote_id: &RemoteId) -> anyhow::Result<DeltaItem> {
            unimplemented!()
        }

        async fn get_user_info(&self) -> anyhow::Result<UserInfo> {
            unimplemented!()
        }

        async fn delete_item(&self, _remote_id: &RemoteId) -> anyhow::Result<()> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn move_item(
            &self,
            remote_id: &RemoteId,
            _new_parent_id: Option<&RemoteId>,
            _new_name: &str,
        ) -> anyhow::Result<DeltaItem> {
            self.move_calls.fetch_add(1, Ordering::SeqCst);
            Ok(stub_delta_item(remote_id.as_str()))
        }

        async fn get_thumbnail(&self, _remote_id: &RemoteId, _size: &str) -> anyhow::Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    struct StubCtx {
        uploaded: Mutex<Vec<UniqueId>>,
        provisional: bool,
    }

    #[async_trait::async_trait]
    impl ReplayContext for StubCtx {
        async fn enqueue_upload(&self, id: &UniqueId) -> anyhow::Result<()> {
            self.uploaded.lock().unwrap().push(*id);
            Ok(())
        }

        async fn is_provisional(&self, _id: &UniqueId) -> anyhow::Result<bool> {
            Ok(self.provisional)
        }

        async fn remote_id(&self, id: &UniqueId) -> anyhow::Result<RemoteId> {
            RemoteId::new(format!("remote-{id}"))
        }

        async fn resolve_rename_target(
            &self,
            _id: &UniqueId,
            new_path: &str,
        ) -> anyhow::Result<(Option<RemoteId>, String)> {
            let name = new_path
                .rsplit('/')
                .next()
                .unwrap_or(new_path)
                .to_string();
            Ok((None, name))
        }
    }

    fn tracker() -> (OfflineTracker, Arc<MetaStore>) {
        let store = Arc::new(MetaStore::temporary().unwrap());
        let cloud = Arc::new(StubCloud {
            delete_calls: AtomicUsize::new(0),
            move_calls: AtomicUsize::new(0),
        });
        (OfflineTracker::new(store.clone(), cloud), store)
    }

    #[tokio::test]
    async fn replay_uploads_creates_and_modifies() {
        let (tracker, _store) = tracker();
        let id = UniqueId::new();
        tracker.record_create(id, "/a/b.txt", 1);

        let ctx = StubCtx {
            uploaded: Mutex::new(Vec::new()),
            provisional: false,
        };
        let summary = tracker.replay(&ctx).await.unwrap();
        assert_eq!(summary.replayed, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(ctx.uploaded.lock().unwrap().as_slice(), &[id]);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn replay_skips_delete_of_a_still_provisional_item() {
        let (tracker, _store) = tracker();
        let id = UniqueId::new();
        tracker.record_delete(id, 1);

        let ctx = StubCtx {
            uploaded: Mutex::new(Vec::new()),
            provisional: true,
        };
        let summary = tracker.replay(&ctx).await.unwrap();
        assert_eq!(summary.replayed, 1);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn create_then_delete_leaves_nothing_to_replay() {
        let (tracker, _store) = tracker();
        let id = UniqueId::new();
        tracker.record_create(id, "/a.txt", 1);
        tracker.record_delete(id, 2);

        assert_eq!(tracker.pending_count(), 0);
        let ctx = StubCtx {
            uploaded: Mutex::new(Vec::new()),
            provisional: false,
        };
        let summary = tracker.replay(&ctx).await.unwrap();
        assert_eq!(summary.replayed, 0);
        assert_eq!(summary.failed, 0);
    }
}
