//! Content relocator port (driven/secondary port)
//!
//! Gives `ondrift-sync`'s upload path a way to move a cached file body
//! when its remote id changes, without depending on `ondrift-fuse` (the
//! crate whose `ContentCache` actually owns the on-disk layout) and
//! without introducing a crate-dependency cycle.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` for the same reason as the other ports: the
//!   failure is adapter-specific (disk I/O), not a domain concern.
//! - A missing source entry is not an error; the id being promoted may
//!   never have had cached content (e.g. a zero-byte file).

use crate::domain::newtypes::RemoteId;

/// Port trait for moving cached content between remote ids
#[async_trait::async_trait]
pub trait ContentRelocator: Send + Sync {
    /// Moves any content cached under `old_id` so it is addressable under
    /// `new_id` instead. A no-op if nothing is cached under `old_id`.
    ///
    /// # Arguments
    /// * `old_id` - The id the content is currently cached under (typically
    ///   a provisional `local-id-...` id)
    /// * `new_id` - The id the content should be cached under afterward
    async fn move_content(&self, old_id: &RemoteId, new_id: &RemoteId) -> anyhow::Result<()>;
}
