//! sled implementation of `IStateRepository`.
//!
//! Every domain entity already derives `Serialize`/`Deserialize`, so each
//! tree simply stores the JSON encoding of the entity keyed by its id
//! string. There is no row/column mapping layer to keep in sync with a
//! schema file - adding a field to a domain struct is transparent here.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};

use ondrift_core::domain::{
    newtypes::{AccountId, RemoteId, SessionId, SyncPath, UniqueId},
    sync_item::ItemState,
    Account, AuditEntry, Conflict, SyncItem, SyncSession,
};
use ondrift_core::ports::{IStateRepository, ItemFilter};

use crate::store::MetaStore;
use crate::CacheError;

/// sled-backed implementation of the state repository port.
pub struct SledStateRepository {
    store: MetaStore,
}

impl SledStateRepository {
    pub fn new(store: MetaStore) -> Self {
        Self { store }
    }

    fn get_item_sync(&self, id: &UniqueId) -> Result<Option<SyncItem>, CacheError> {
        match self.store.metadata.get(id.to_string())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn account_for_item(&self, id: &UniqueId) -> Result<Option<AccountId>, CacheError> {
        match self.store.item_account.get(id.to_string())? {
            Some(bytes) => {
                let s = String::from_utf8_lossy(&bytes);
                Ok(AccountId::from_str(&s).ok())
            }
            None => Ok(None),
        }
    }

    fn default_account_id(&self) -> Result<AccountId, CacheError> {
        for entry in self.store.accounts.iter() {
            let (key, _) = entry?;
            let s = String::from_utf8_lossy(&key);
            if let Ok(id) = AccountId::from_str(&s) {
                return Ok(id);
            }
        }
        Err(CacheError::NoDefaultAccount)
    }
}

#[async_trait::async_trait]
impl IStateRepository for SledStateRepository {
    // --- SyncItem operations ---

    async fn save_item(&self, item: &SyncItem) -> anyhow::Result<()> {
        let id = item.id().to_string();
        let bytes = serde_json::to_vec(item)?;

        self.store.metadata.insert(id.as_bytes(), bytes)?;
        self.store
            .metadata_by_path
            .insert(item.local_path().to_string().as_bytes(), id.as_bytes())?;
        if let Some(remote_id) = item.remote_id() {
            self.store
                .metadata_by_remote
                .insert(remote_id.as_str().as_bytes(), id.as_bytes())?;
        }

        if self.account_for_item(item.id())?.is_none() {
            if let Ok(default_id) = self.default_account_id() {
                self.store
                    .item_account
                    .insert(id.as_bytes(), default_id.to_string().as_bytes())?;
            }
        }

        tracing::trace!(item_id = %id, "saved sync item");
        Ok(())
    }

    async fn get_item(&self, id: &UniqueId) -> anyhow::Result<Option<SyncItem>> {
        Ok(self.get_item_sync(id)?)
    }

    async fn get_item_by_path(&self, path: &SyncPath) -> anyhow::Result<Option<SyncItem>> {
        let Some(id_bytes) = self.store.metadata_by_path.get(path.to_string().as_bytes())? else {
            return Ok(None);
        };
        let id_str = String::from_utf8_lossy(&id_bytes).to_string();
        let id = UniqueId::from_str(&id_str)
            .map_err(|e| anyhow::anyhow!("corrupt path index entry '{id_str}': {e}"))?;
        Ok(self.get_item_sync(&id)?)
    }

    async fn get_item_by_remote_id(
        &self,
        remote_id: &RemoteId,
    ) -> anyhow::Result<Option<SyncItem>> {
        let Some(id_bytes) = self
            .store
            .metadata_by_remote
            .get(remote_id.as_str().as_bytes())?
        else {
            return Ok(None);
        };
        let id_str = String::from_utf8_lossy(&id_bytes).to_string();
        let id = UniqueId::from_str(&id_str)
            .map_err(|e| anyhow::anyhow!("corrupt remote index entry '{id_str}': {e}"))?;
        Ok(self.get_item_sync(&id)?)
    }

    async fn query_items(&self, filter: &ItemFilter) -> anyhow::Result<Vec<SyncItem>> {
        let mut items = Vec::new();
        for entry in self.store.metadata.iter() {
            let (key, value) = entry?;
            let item: SyncItem = serde_json::from_slice(&value)?;

            if let Some(ref account_id) = filter.account_id {
                let id = UniqueId::from_str(&String::from_utf8_lossy(&key))
                    .map_err(|e| anyhow::anyhow!("corrupt metadata key: {e}"))?;
                match self.account_for_item(&id)? {
                    Some(ref item_account) if item_account == account_id => {}
                    _ => continue,
                }
            }

            if let Some(ref state) = filter.state {
                if item.state() != state {
                    continue;
                }
            }

            if let Some(ref prefix) = filter.path_prefix {
                if !item.local_path().to_string().starts_with(&prefix.to_string()) {
                    continue;
                }
            }

            if let Some(ref since) = filter.modified_since {
                match item.last_modified_local() {
                    Some(modified) if modified > *since => {}
                    _ => continue,
                }
            }

            items.push(item);
        }

        Ok(items)
    }

    async fn delete_item(&self, id: &UniqueId) -> anyhow::Result<()> {
        let id_str = id.to_string();
        if let Some(item) = self.get_item_sync(id)? {
            self.store
                .metadata_by_path
                .remove(item.local_path().to_string().as_bytes())?;
            if let Some(remote_id) = item.remote_id() {
                self.store
                    .metadata_by_remote
                    .remove(remote_id.as_str().as_bytes())?;
            }
        }
        self.store.metadata.remove(id_str.as_bytes())?;
        self.store.item_account.remove(id_str.as_bytes())?;
        self.store.last_accessed.remove(id_str.as_bytes())?;
        self.store.hydration_progress.remove(id_str.as_bytes())?;

        tracing::trace!(item_id = %id_str, "deleted sync item");
        Ok(())
    }

    async fn count_items_by_state(
        &self,
        account_id: &AccountId,
    ) -> anyhow::Result<HashMap<String, u64>> {
        let mut counts = HashMap::new();
        for entry in self.store.metadata.iter() {
            let (key, value) = entry?;
            let id = UniqueId::from_str(&String::from_utf8_lossy(&key))
                .map_err(|e| anyhow::anyhow!("corrupt metadata key: {e}"))?;

            match self.account_for_item(&id)? {
                Some(ref item_account) if item_account == account_id => {}
                _ => continue,
            }

            let item: SyncItem = serde_json::from_slice(&value)?;
            *counts.entry(item.state().name().to_string()).or_insert(0u64) += 1;
        }
        Ok(counts)
    }

    // --- Account operations ---

    async fn save_account(&self, account: &Account) -> anyhow::Result<()> {
        let id = account.id().to_string();
        let bytes = serde_json::to_vec(account)?;
        self.store.accounts.insert(id.as_bytes(), bytes)?;
        tracing::trace!(account_id = %id, "saved account");
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> anyhow::Result<Option<Account>> {
        match self.store.accounts.get(id.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_default_account(&self) -> anyhow::Result<Option<Account>> {
        let mut earliest: Option<Account> = None;
        for entry in self.store.accounts.iter() {
            let (_, value) = entry?;
            let account: Account = serde_json::from_slice(&value)?;
            earliest = match earliest {
                Some(current) if current.created_at() <= account.created_at() => Some(current),
                _ => Some(account),
            };
        }
        Ok(earliest)
    }

    // --- Session operations ---

    async fn save_session(&self, session: &SyncSession) -> anyhow::Result<()> {
        let id = session.id().to_string();
        let bytes = serde_json::to_vec(session)?;
        self.store.sessions.insert(id.as_bytes(), bytes)?;
        tracing::trace!(session_id = %id, "saved sync session");
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> anyhow::Result<Option<SyncSession>> {
        match self.store.sessions.get(id.to_string().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // --- Audit operations ---

    async fn save_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let seq = self.store.next_audit_seq()?;
        let entry = entry.clone().with_id(ondrift_core::domain::newtypes::AuditId::new(seq as i64));
        let bytes = serde_json::to_vec(&entry)?;
        self.store.audit.insert(seq.to_be_bytes(), bytes)?;
        tracing::trace!(action = %entry.action(), "saved audit entry");
        Ok(())
    }

    async fn get_audit_trail(&self, item_id: &UniqueId) -> anyhow::Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for entry in self.store.audit.iter() {
            let (_, value) = entry?;
            let audit: AuditEntry = serde_json::from_slice(&value)?;
            if audit.item_id() == Some(item_id) {
                entries.push(audit);
            }
        }
        Ok(entries)
    }

    async fn get_audit_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for entry in self.store.audit.iter().rev() {
            let (_, value) = entry?;
            let audit: AuditEntry = serde_json::from_slice(&value)?;
            if audit.timestamp() > since {
                entries.push(audit);
                if entries.len() as u32 >= limit {
                    break;
                }
            }
        }
        Ok(entries)
    }

    // --- Conflict operations ---

    async fn save_conflict(&self, conflict: &Conflict) -> anyhow::Result<()> {
        let id = conflict.id().to_string();
        let bytes = serde_json::to_vec(conflict)?;
        self.store.conflicts.insert(id.as_bytes(), bytes)?;
        tracing::trace!(conflict_id = %id, "saved conflict");
        Ok(())
    }

    async fn get_unresolved_conflicts(&self) -> anyhow::Result<Vec<Conflict>> {
        let mut conflicts = Vec::new();
        for entry in self.store.conflicts.iter() {
            let (_, value) = entry?;
            let conflict: Conflict = serde_json::from_slice(&value)?;
            if conflict.resolution().is_none() {
                conflicts.push(conflict);
            }
        }
        conflicts.sort_by(|a, b| b.detected_at().cmp(&a.detected_at()));
        Ok(conflicts)
    }

    // --- FUSE inode operations ---

    async fn get_next_inode(&self) -> anyhow::Result<u64> {
        Ok(self.store.next_inode()?)
    }

    async fn update_inode(&self, item_id: &UniqueId, inode: u64) -> anyhow::Result<()> {
        let id_str = item_id.to_string();
        self.store.inodes.insert(id_str.as_bytes(), &inode.to_be_bytes())?;
        self.store
            .inodes_rev
            .insert(inode.to_be_bytes(), id_str.as_bytes())?;
        Ok(())
    }

    async fn get_item_by_inode(&self, inode: u64) -> anyhow::Result<Option<SyncItem>> {
        let Some(id_bytes) = self.store.inodes_rev.get(inode.to_be_bytes())? else {
            return Ok(None);
        };
        let id_str = String::from_utf8_lossy(&id_bytes).to_string();
        let id = UniqueId::from_str(&id_str)
            .map_err(|e| anyhow::anyhow!("corrupt inode index entry '{id_str}': {e}"))?;
        Ok(self.get_item_sync(&id)?)
    }

    async fn update_last_accessed(
        &self,
        item_id: &UniqueId,
        accessed: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.store
            .last_accessed
            .insert(item_id.to_string().as_bytes(), accessed.to_rfc3339().as_bytes())?;
        Ok(())
    }

    async fn update_hydration_progress(
        &self,
        item_id: &UniqueId,
        progress: Option<u8>,
    ) -> anyhow::Result<()> {
        let key = item_id.to_string();
        match progress {
            Some(pct) => {
                self.store.hydration_progress.insert(key.as_bytes(), &[pct])?;
            }
            None => {
                self.store.hydration_progress.remove(key.as_bytes())?;
            }
        }
        Ok(())
    }

    async fn get_items_for_dehydration(
        &self,
        max_age_days: u32,
        limit: u32,
    ) -> anyhow::Result<Vec<SyncItem>> {
        let cutoff = Utc::now() - chrono::Duration::days(max_age_days as i64);
        let mut candidates: Vec<(DateTime<Utc>, SyncItem)> = Vec::new();

        for entry in self.store.metadata.iter() {
            let (key, value) = entry?;
            let item: SyncItem = serde_json::from_slice(&value)?;
            if item.state() != &ItemState::Hydrated {
                continue;
            }

            let last_accessed = match self.store.last_accessed.get(&key)? {
                Some(bytes) => DateTime::parse_from_rfc3339(&String::from_utf8_lossy(&bytes))
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC),
                None => DateTime::<Utc>::MIN_UTC,
            };

            if last_accessed <= cutoff {
                candidates.push((last_accessed, item));
            }
        }

        candidates.sort_by_key(|(ts, _)| *ts);
        Ok(candidates
            .into_iter()
            .take(limit as usize)
            .map(|(_, item)| item)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ondrift_core::domain::newtypes::{RemotePath, SyncPath};

    use super::*;
    use crate::store::MetaStore;

    fn repo() -> SledStateRepository {
        SledStateRepository::new(MetaStore::temporary().expect("open temp store"))
    }

    fn sample_item() -> SyncItem {
        SyncItem::new(
            SyncPath::new(PathBuf::from("/sync/file.txt")).unwrap(),
            RemotePath::new("/file.txt".to_string()).unwrap(),
            false,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_and_get_item_by_path_round_trips() {
        let repo = repo();
        let item = sample_item();
        repo.save_item(&item).await.unwrap();

        let fetched = repo.get_item(item.id()).await.unwrap().unwrap();
        assert_eq!(fetched.id(), item.id());

        let by_path = repo
            .get_item_by_path(item.local_path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_path.id(), item.id());
    }

    #[tokio::test]
    async fn delete_item_removes_path_index() {
        let repo = repo();
        let item = sample_item();
        repo.save_item(&item).await.unwrap();
        repo.delete_item(item.id()).await.unwrap();

        assert!(repo.get_item(item.id()).await.unwrap().is_none());
        assert!(repo
            .get_item_by_path(item.local_path())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn inode_round_trips_both_directions() {
        let repo = repo();
        let item = sample_item();
        repo.save_item(&item).await.unwrap();

        let inode = repo.get_next_inode().await.unwrap();
        repo.update_inode(item.id(), inode).await.unwrap();

        let fetched = repo.get_item_by_inode(inode).await.unwrap().unwrap();
        assert_eq!(fetched.id(), item.id());
    }

    #[tokio::test]
    async fn dehydration_candidates_require_hydrated_state() {
        let repo = repo();
        let item = sample_item();
        repo.save_item(&item).await.unwrap();

        let candidates = repo.get_items_for_dehydration(0, 10).await.unwrap();
        assert!(candidates.is_empty(), "Online items are never dehydration candidates");
    }

    #[tokio::test]
    async fn query_items_filters_by_state() {
        let repo = repo();
        let item = sample_item();
        repo.save_item(&item).await.unwrap();

        let matching = repo
            .query_items(&ItemFilter::new().with_state(ItemState::Online))
            .await
            .unwrap();
        assert_eq!(matching.len(), 1);

        let none = repo
            .query_items(&ItemFilter::new().with_state(ItemState::Conflicted))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
