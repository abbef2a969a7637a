//! Persisted progress for chunked uploads.
//!
//! Large files upload through a resumable session: the remote hands back an
//! `upload_url` good for a fixed window, and bytes go up in fixed-size
//! chunks. [`UploadState`] is the record that survives a crash mid-upload,
//! keyed by item id under MetaStore's `uploads` tree.

use serde::{Deserialize, Serialize};

use super::newtypes::UniqueId;

/// Where a resumable upload session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Queued,
    InProgress,
    Completed,
    Errored,
    Cancelled,
}

/// Resumable upload session state for one item.
///
/// `fingerprint` is the content hash of the body being uploaded, taken at
/// session creation. If the local content changes mid-upload the fingerprint
/// no longer matches and the manager cancels the stale session rather than
/// finish uploading bytes nobody asked for anymore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadState {
    id: UniqueId,
    fingerprint: String,
    upload_url: String,
    next_chunk_offset: u64,
    total_size: u64,
    attempt: u32,
    phase: UploadPhase,
}

impl UploadState {
    pub fn new(id: UniqueId, fingerprint: String, upload_url: String, total_size: u64) -> Self {
        Self {
            id,
            fingerprint,
            upload_url,
            next_chunk_offset: 0,
            total_size,
            attempt: 0,
            phase: UploadPhase::Queued,
        }
    }

    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn next_chunk_offset(&self) -> u64 {
        self.next_chunk_offset
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: UploadPhase) {
        self.phase = phase;
    }

    /// Records a chunk of `len` bytes as uploaded, resetting the per-chunk
    /// attempt counter for the next one.
    pub fn advance(&mut self, len: u64) {
        self.next_chunk_offset += len;
        self.attempt = 0;
        self.phase = UploadPhase::InProgress;
    }

    /// Records a failed chunk attempt. Caller decides, via `attempt()`,
    /// whether to retry or give up.
    pub fn record_failed_attempt(&mut self) {
        self.attempt += 1;
    }

    /// True once every byte has been sent upstream.
    pub fn is_complete(&self) -> bool {
        self.next_chunk_offset >= self.total_size
    }

    /// The incoming fingerprint no longer matches what this session was
    /// created for; the local file changed mid-upload.
    pub fn is_stale(&self, current_fingerprint: &str) -> bool {
        self.fingerprint != current_fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_tracks_offset_and_resets_attempt() {
        let mut state = UploadState::new(UniqueId::new(), "hash".to_string(), "https://up".to_string(), 100);
        state.record_failed_attempt();
        state.record_failed_attempt();
        assert_eq!(state.attempt(), 2);

        state.advance(40);
        assert_eq!(state.next_chunk_offset(), 40);
        assert_eq!(state.attempt(), 0);
        assert_eq!(state.phase(), UploadPhase::InProgress);
        assert!(!state.is_complete());

        state.advance(60);
        assert!(state.is_complete());
    }

    #[test]
    fn stale_fingerprint_detected() {
        let state = UploadState::new(UniqueId::new(), "hash-a".to_string(), "https://up".to_string(), 10);
        assert!(state.is_stale("hash-b"));
        assert!(!state.is_stale("hash-a"));
    }
}
