//! Upload manager: pushes local content to the cloud provider.
//!
//! Mirrors `ondrift_fuse::hydration::HydrationManager`'s shape on the way
//! up instead of down: a bounded worker pool, one active upload per item,
//! and a watch channel callers can await for the outcome. Callers (FUSE's
//! `flush`/`release`, or `OfflineTracker::replay` via `ReplayContext`) hand
//! over the bytes to send; this module does not read from disk itself.
//!
//! Large files go through `ICloudProvider::upload_file_session`, which
//! already retries individual chunks with backoff inside
//! `ondrift_graph::upload::upload_large`. What this manager adds on top is
//! whole-attempt retry (the session is re-created from scratch if it is
//! abandoned), conflict-copy handling on 409/412, and crash-resumable
//! bookkeeping of which item is mid-upload via [`UploadState`].

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;
use dashmap::DashMap;
use ondrift_core::domain::conflict::{Conflict, Resolution, ResolutionSource, VersionInfo};
use ondrift_core::domain::newtypes::{FileHash, RemoteId, RemotePath, UniqueId};
use ondrift_core::domain::sync_item::ItemState;
use ondrift_core::domain::upload_state::{UploadPhase, UploadState};
use ondrift_core::ports::cloud_provider::{DeltaItem, ICloudProvider};
use ondrift_core::ports::content_relocator::ContentRelocator;
use ondrift_core::ports::state_repository::IStateRepository;
use ondrift_store::MetaStore;
use tokio::{
    runtime::Handle,
    sync::{watch, Semaphore},
    task::JoinHandle,
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default threshold, in bytes, above which a file uploads through a
/// resumable session instead of a single PUT (4 MiB; matches Graph's
/// simple-upload ceiling).
const DEFAULT_SMALL_FILE_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Exponential backoff parameters for whole-attempt upload retry.
///
/// Same shape as `ondrift_fuse::hydration::RetryPolicy`; kept as a separate
/// type since the two crates don't share a dependency edge.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_secs: u64,
    pub cap_secs: u64,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: 1,
            cap_secs: 16,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let secs = self.base_secs.saturating_mul(1u64 << attempt.min(32).saturating_sub(1));
        Duration::from_secs(secs.min(self.cap_secs))
    }
}

/// quickXorHash of an in-memory buffer, base64-encoded.
///
/// Same algorithm as `filesystem.rs`'s on-disk version and
/// `ondrift_fuse::hydration`'s file-based one, run directly over bytes
/// already held in memory by the caller.
fn quick_xor_hash_bytes(input: &[u8]) -> String {
    const WIDTH_BITS: usize = 160;
    const SHIFT_STEP: usize = 11;

    let mut data = [0u8; 20];
    let mut shift = 0usize;

    for &byte in input {
        let byte_pos = shift / 8;
        let bit_offset = shift % 8;

        data[byte_pos % 20] ^= byte << bit_offset;
        if bit_offset > 0 {
            data[(byte_pos + 1) % 20] ^= byte >> (8 - bit_offset);
        }

        shift = (shift + SHIFT_STEP) % WIDTH_BITS;
    }

    let length_bytes = (input.len() as u64).to_le_bytes();
    for (i, &lb) in length_bytes.iter().enumerate() {
        data[i] ^= lb;
    }

    base64::engine::general_purpose::STANDARD.encode(data)
}

/// A request to push local content up to the cloud.
pub struct UploadRequest {
    /// Database item ID being uploaded.
    pub item_id: UniqueId,
    /// Full remote path (parent + name) the content should land at.
    pub remote_path: RemotePath,
    /// `If-Match` etag for optimistic concurrency; `None` for a first
    /// upload of a brand-new item.
    pub if_match_etag: Option<String>,
    /// File content to send.
    pub data: Vec<u8>,
}

/// Result of a completed upload attempt.
#[derive(Debug, Clone)]
pub enum UploadOutcome {
    /// Upload landed cleanly; item's remote id/hash are now current.
    Uploaded(DeltaItem),
    /// A 409/412 conflict was detected; the local body was uploaded under
    /// a conflict-copy name instead, and the original item is left
    /// `Conflicted` pending the next delta pull.
    Conflicted(DeltaItem),
    /// Every retry attempt failed; the item remains `Modified`.
    Failed(String),
    /// A newer upload for the same item superseded this one.
    Superseded,
}

struct ActiveUpload {
    fingerprint: String,
    cancel_token: CancellationToken,
    outcome_tx: watch::Sender<Option<UploadOutcome>>,
    _task_handle: JoinHandle<()>,
}

/// Coordinates concurrent uploads of locally-modified items to the cloud.
pub struct UploadManager {
    active: Arc<DashMap<UniqueId, ActiveUpload>>,
    semaphore: Arc<Semaphore>,
    provider: Arc<dyn ICloudProvider + Send + Sync>,
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    store: Arc<MetaStore>,
    rt_handle: Handle,
    small_file_threshold: u64,
    retry: RetryPolicy,
    content_relocator: Option<Arc<dyn ContentRelocator + Send + Sync>>,
}

impl UploadManager {
    pub fn new(
        max_concurrent: usize,
        provider: Arc<dyn ICloudProvider + Send + Sync>,
        state_repository: Arc<dyn IStateRepository + Send + Sync>,
        store: Arc<MetaStore>,
        rt_handle: Handle,
    ) -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            provider,
            state_repository,
            store,
            rt_handle,
            small_file_threshold: DEFAULT_SMALL_FILE_THRESHOLD,
            retry: RetryPolicy::default(),
            content_relocator: None,
        }
    }

    /// Applies transfer tuning from `ondrift_core::config::TransferConfig`
    /// in place of the built-in defaults.
    pub fn with_transfer_config(mut self, config: &ondrift_core::config::TransferConfig) -> Self {
        self.retry = RetryPolicy {
            base_secs: config.retry_base_secs.max(1),
            cap_secs: config.retry_cap_secs.max(1),
            max_attempts: config.retry_max_attempts.max(1),
        };
        self
    }

    /// Supplies the adapter that relocates cached content when a promoted
    /// item's remote id changes. Without one, `promote_item` updates the
    /// item record but leaves any cached body under its old id's key.
    pub fn with_content_relocator(mut self, relocator: Arc<dyn ContentRelocator + Send + Sync>) -> Self {
        self.content_relocator = Some(relocator);
        self
    }

    /// Enqueues `request` for upload, or attaches to an already-running
    /// upload of the same item if its content fingerprint hasn't changed.
    ///
    /// If a different upload is already in flight for this item (a second
    /// write landed before the first upload finished), that earlier attempt
    /// is cancelled and superseded by this one.
    #[instrument(skip(self, request), fields(item_id = %request.item_id, bytes = request.data.len()))]
    pub fn enqueue(&self, request: UploadRequest) -> watch::Receiver<Option<UploadOutcome>> {
        let fingerprint = quick_xor_hash_bytes(&request.data);

        if let Some(existing) = self.active.get(&request.item_id) {
            if existing.fingerprint == fingerprint {
                debug!("upload already in flight for this content, attaching");
                return existing.outcome_tx.subscribe();
            }
            debug!("superseding in-flight upload with newer content");
            existing.cancel_token.cancel();
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        let cancel_token = CancellationToken::new();

        let provider = self.provider.clone();
        let state_repository = self.state_repository.clone();
        let store = self.store.clone();
        let semaphore = self.semaphore.clone();
        let retry = self.retry;
        let threshold = self.small_file_threshold;
        let content_relocator = self.content_relocator.clone();
        let active_map = self.active.clone();
        let item_id = request.item_id.clone();
        let fp = fingerprint.clone();
        let task_cancel = cancel_token.clone();
        let task_outcome_tx = outcome_tx.clone();

        let task_handle = self.rt_handle.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            if task_cancel.is_cancelled() {
                let _ = task_outcome_tx.send(Some(UploadOutcome::Superseded));
                active_map.remove(&item_id);
                return;
            }

            let outcome = run_upload(
                provider.as_ref(),
                state_repository.as_ref(),
                content_relocator.as_deref(),
                &store,
                &request,
                &fp,
                &task_cancel,
                retry,
                threshold,
            )
            .await;

            let _ = task_outcome_tx.send(Some(outcome));
            active_map.remove(&item_id);
        });

        self.active.insert(
            request.item_id.clone(),
            ActiveUpload {
                fingerprint,
                cancel_token,
                outcome_tx,
                _task_handle: task_handle,
            },
        );

        outcome_rx
    }

    /// Cancels an in-flight upload for `item_id`, if one is running.
    pub fn cancel(&self, item_id: &UniqueId) {
        if let Some(active) = self.active.get(item_id) {
            active.cancel_token.cancel();
        }
    }

    /// True if `item_id` currently has an upload in flight.
    pub fn is_uploading(&self, item_id: &UniqueId) -> bool {
        self.active.contains_key(item_id)
    }
}

fn is_transient_upload_error(error: &anyhow::Error) -> bool {
    let msg = error.to_string();
    msg.contains("error sending request")
        || msg.contains("connection")
        || msg.contains("timed out")
        || msg.contains("status 5")
}

fn is_conflict_upload_error(error: &anyhow::Error) -> bool {
    let msg = error.to_string();
    msg.contains("409") || msg.contains("412")
}

#[allow(clippy::too_many_arguments)]
async fn run_upload(
    provider: &(dyn ICloudProvider + Send + Sync),
    state_repository: &(dyn IStateRepository + Send + Sync),
    content_relocator: Option<&(dyn ContentRelocator + Send + Sync)>,
    store: &MetaStore,
    request: &UploadRequest,
    fingerprint: &str,
    cancel: &CancellationToken,
    retry: RetryPolicy,
    small_file_threshold: u64,
) -> UploadOutcome {
    let Some(parent_path) = request.remote_path.parent() else {
        return UploadOutcome::Failed("remote path has no parent".to_string());
    };
    let Some(name) = request.remote_path.file_name() else {
        return UploadOutcome::Failed("remote path has no file name".to_string());
    };

    let mut state = UploadState::new(
        request.item_id.clone(),
        fingerprint.to_string(),
        String::new(),
        request.data.len() as u64,
    );
    state.set_phase(UploadPhase::InProgress);
    if let Err(e) = store.save_upload_state(&state) {
        warn!(error = %e, "failed to persist upload state, continuing without crash-resume bookkeeping");
    }

    let mut attempt = 0u32;
    let result = loop {
        attempt += 1;
        if cancel.is_cancelled() {
            let _ = store.remove_upload_state(&request.item_id);
            return UploadOutcome::Superseded;
        }

        let attempted = if request.data.len() as u64 <= small_file_threshold {
            provider
                .upload_file(&parent_path, name, &request.data, request.if_match_etag.as_deref())
                .await
        } else {
            provider
                .upload_file_session(&parent_path, name, &request.data, None)
                .await
        };

        match attempted {
            Ok(item) => break Ok(item),
            Err(e) if is_conflict_upload_error(&e) => break Err(e),
            Err(e) if attempt < retry.max_attempts && is_transient_upload_error(&e) => {
                state.record_failed_attempt();
                let _ = store.save_upload_state(&state);
                let delay = retry.backoff(attempt);
                warn!(attempt, delay_secs = delay.as_secs(), error = %e, "upload attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(item) => {
            state.set_phase(UploadPhase::Completed);
            let _ = store.remove_upload_state(&request.item_id);
            if let Err(e) = promote_item(state_repository, content_relocator, &request.item_id, &item).await {
                warn!(error = %e, "upload succeeded but failed to update item record");
                return UploadOutcome::Failed(format!("uploaded but failed to persist result: {e}"));
            }
            info!(remote_id = %item.id, "upload completed");
            UploadOutcome::Uploaded(item)
        }
        Err(e) if is_conflict_upload_error(&e) => {
            info!(error = %e, "upload conflict detected, uploading as conflict copy");
            match handle_conflict(provider, state_repository, &parent_path, name, request).await {
                Ok(item) => {
                    state.set_phase(UploadPhase::Completed);
                    let _ = store.remove_upload_state(&request.item_id);
                    UploadOutcome::Conflicted(item)
                }
                Err(conflict_err) => {
                    state.set_phase(UploadPhase::Errored);
                    let _ = store.save_upload_state(&state);
                    UploadOutcome::Failed(format!("conflict handling failed: {conflict_err}"))
                }
            }
        }
        Err(e) => {
            state.set_phase(UploadPhase::Errored);
            let _ = store.save_upload_state(&state);
            warn!(error = %e, "upload failed after all retries");
            UploadOutcome::Failed(e.to_string())
        }
    }
}

/// Applies a successful upload's result to the item's persisted record:
/// promotes a provisional remote id to the server-assigned one, refreshes
/// the content hash, and clears the pending-remote/modified flags.
///
/// If `content_relocator` is supplied and the remote id actually changed
/// (a provisional `local-id-...` id being confirmed), any content cached
/// under the old id is moved to the new one after the record is saved, so
/// reads against the promoted id don't miss the bytes already on disk.
async fn promote_item(
    state_repository: &(dyn IStateRepository + Send + Sync),
    content_relocator: Option<&(dyn ContentRelocator + Send + Sync)>,
    item_id: &UniqueId,
    uploaded: &DeltaItem,
) -> anyhow::Result<()> {
    let Some(mut item) = state_repository.get_item(item_id).await? else {
        anyhow::bail!("item {} disappeared while its upload was in flight", item_id);
    };

    let old_remote_id = item.remote_id().cloned();
    let new_remote_id = RemoteId::new(uploaded.id.clone())?;
    item.set_remote_id(new_remote_id.clone());
    if let Some(hash) = uploaded.hash.as_ref() {
        if let Ok(hash) = FileHash::new(hash.clone()) {
            item.set_content_hash(hash.clone());
            item.set_local_hash(hash);
        }
    }
    if let Some(size) = uploaded.size {
        item.set_size_bytes(size);
    }
    item.clear_pending_remote();
    item.mark_synced();
    if item.state() != &ItemState::Hydrated {
        item.transition_to(ItemState::Hydrated)?;
    }

    state_repository.save_item(&item).await?;

    if let Some(relocator) = content_relocator {
        if let Some(old_id) = old_remote_id {
            if old_id != new_remote_id {
                if let Err(e) = relocator.move_content(&old_id, &new_remote_id).await {
                    warn!(error = %e, "upload succeeded but failed to relocate cached content to promoted id");
                }
            }
        }
    }

    Ok(())
}

/// Uploads the local body under a conflict-copy name, leaving the original
/// item `Conflicted` so the next delta pull can reconcile it against
/// whatever the remote actually holds.
async fn handle_conflict(
    provider: &(dyn ICloudProvider + Send + Sync),
    state_repository: &(dyn IStateRepository + Send + Sync),
    parent_path: &RemotePath,
    name: &str,
    request: &UploadRequest,
) -> anyhow::Result<DeltaItem> {
    let conflict_name = ondrift_conflict::ConflictNamer::generate(name);
    let copy = provider
        .upload_file(parent_path, &conflict_name, &request.data, None)
        .await?;

    if let Some(mut item) = state_repository.get_item(&request.item_id).await? {
        let local_hash = item
            .local_hash()
            .cloned()
            .or_else(|| item.content_hash().cloned())
            .unwrap_or_else(|| FileHash::new("A".repeat(27) + "=").expect("static placeholder hash is valid"));
        let remote_version = match item.remote_id() {
            Some(remote_id) => match provider.get_metadata(remote_id).await {
                Ok(remote) => remote
                    .hash
                    .and_then(|h| FileHash::new(h).ok())
                    .map(|h| VersionInfo::new(h, remote.size.unwrap_or(0), remote.modified.unwrap_or_else(Utc::now))),
                Err(_) => None,
            },
            None => None,
        }
        .unwrap_or_else(|| VersionInfo::new(local_hash.clone(), item.size_bytes(), Utc::now()));

        let local_version = VersionInfo::new(local_hash, item.size_bytes(), Utc::now());
        let conflict = Conflict::new(item.id().clone(), local_version, remote_version)
            .resolve(Resolution::KeepBoth, ResolutionSource::Policy);
        let _ = state_repository.save_conflict(&conflict).await;

        if item.can_transition_to(&ItemState::Conflicted) {
            item.transition_to(ItemState::Conflicted)?;
            state_repository.save_item(&item).await?;
        }
    }

    Ok(copy)
}
