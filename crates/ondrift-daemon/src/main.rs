//! OnDrift Daemon - Background synchronization service
//!
//! This binary runs as a systemd user service and handles:
//! - File synchronization with OneDrive
//! - D-Bus interface for UI clients
//! - FUSE filesystem for Files-on-Demand
//! - State persistence and recovery
//!
//! Startup sequence:
//! 1. Load configuration and initialize tracing
//! 2. Open the sled-backed `MetaStore`
//! 3. Look up the default account and its on-disk tokens
//! 4. Build the Graph client, content cache, and FUSE filesystem
//! 5. Attach the hydration/dehydration/upload managers and mount
//! 6. Run the periodic delta-sync loop and token refresh until SIGINT/SIGTERM

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ondrift_core::{
    config::Config,
    domain::newtypes::{RemoteId, UniqueId},
    ports::{ContentRelocator, ICloudProvider, ILocalFileSystem, IStateRepository},
};
use ondrift_fuse::{
    cache::ContentCache,
    dehydration::{DehydrationManager, DehydrationPolicy},
    filesystem::OnDriftFs,
    hydration::HydrationManager,
};
use ondrift_graph::{
    auth::{AuthProvider, FileBackedAuthProvider},
    client::GraphClient,
    provider::GraphCloudProvider,
};
use ondrift_store::{repository::SledStateRepository, store::MetaStore};
use ondrift_sync::{
    engine::SyncEngine, filesystem::LocalFileSystemAdapter, offline_tracker::ReplayContext,
    OfflineTracker, UploadManager, UploadRequest,
};

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ondrift")
}

/// Path to the on-disk token file for a given account email.
///
/// `AuthConfig` carries no dedicated field for this - interactive login
/// writes here, and this is just where the daemon expects to find it.
fn token_path(email: &str) -> PathBuf {
    data_dir().join("tokens").join(format!("{email}.json"))
}

/// Bridges [`OfflineTracker::replay`] to the managers this binary wires up:
/// uploads go through [`UploadManager`], everything else queries
/// [`IStateRepository`] directly.
struct DaemonReplayContext {
    state_repository: Arc<dyn IStateRepository + Send + Sync>,
    cache: Arc<ContentCache>,
    upload: Arc<UploadManager>,
}

#[async_trait::async_trait]
impl ReplayContext for DaemonReplayContext {
    async fn enqueue_upload(&self, id: &UniqueId) -> Result<()> {
        let item = self
            .state_repository
            .get_item(id)
            .await?
            .with_context(|| format!("replay: item {id} no longer exists"))?;

        let remote_id = item
            .remote_id()
            .cloned()
            .with_context(|| format!("replay: item {id} has no remote id to upload against"))?;

        let data = self
            .cache
            .read_all(&remote_id)
            .with_context(|| format!("replay: no cached content for item {id}"))?;

        self.upload.enqueue(UploadRequest {
            item_id: *id,
            remote_path: item.remote_path().clone(),
            if_match_etag: item.etag().map(String::from),
            data,
        });

        Ok(())
    }

    async fn is_provisional(&self, id: &UniqueId) -> Result<bool> {
        let item = self.state_repository.get_item(id).await?;
        Ok(match item {
            Some(item) => item.remote_id().map(RemoteId::is_provisional).unwrap_or(true),
            None => true,
        })
    }

    async fn remote_id(&self, id: &UniqueId) -> Result<RemoteId> {
        let item = self
            .state_repository
            .get_item(id)
            .await?
            .with_context(|| format!("replay: item {id} no longer exists"))?;
        item.remote_id()
            .cloned()
            .with_context(|| format!("replay: item {id} has no remote id"))
    }

    async fn resolve_rename_target(
        &self,
        _id: &UniqueId,
        new_path: &str,
    ) -> Result<(Option<RemoteId>, String)> {
        let path = PathBuf::from(new_path);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("replay: rename target '{new_path}' has no file name"))?
            .to_string();

        let parent_remote_id = match path.parent() {
            Some(parent) if parent.as_os_str().len() > 0 => {
                match ondrift_core::domain::newtypes::SyncPath::new(parent.to_path_buf()) {
                    Ok(parent_path) => self
                        .state_repository
                        .get_item_by_path(&parent_path)
                        .await?
                        .and_then(|item| item.remote_id().cloned()),
                    Err(_) => None,
                }
            }
            _ => None,
        };

        Ok((parent_remote_id, name))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    init_tracing(&config);
    info!(config_path = %config_path.display(), "Loaded configuration");

    let db_path = data_dir().join("ondrift.sled");
    tokio::fs::create_dir_all(db_path.parent().unwrap_or(&db_path)).await.ok();
    let db_pool = MetaStore::open(&db_path)
        .with_context(|| format!("Failed to open store at {}", db_path.display()))?;
    let state_repository: Arc<dyn IStateRepository + Send + Sync> =
        Arc::new(SledStateRepository::new(db_pool.clone()));

    let account = state_repository
        .get_default_account()
        .await
        .context("Failed to query default account")?;

    let Some(account) = account else {
        warn!("No account configured. Run 'ondrift auth login' first.");
        return Ok(());
    };

    info!(email = %account.email().as_str(), "Found authenticated account");

    let app_id = config
        .auth
        .app_id
        .clone()
        .unwrap_or_else(|| "common".to_string());
    let auth_provider = Arc::new(
        FileBackedAuthProvider::load(app_id, token_path(account.email().as_str()))
            .context("Failed to load auth tokens; run 'ondrift auth login' again")?,
    );

    let graph_client = GraphClient::new(auth_provider.current_token().access_token.clone());
    let graph_provider = Arc::new(GraphCloudProvider::new(graph_client));

    let cache_dir = expand_tilde(&config.fuse.cache_dir);
    tokio::fs::create_dir_all(&cache_dir)
        .await
        .with_context(|| format!("Failed to create cache dir {}", cache_dir.display()))?;
    let cache = Arc::new(
        ContentCache::new(cache_dir.clone()).context("Failed to initialize content cache")?,
    );

    let rt_handle = tokio::runtime::Handle::current();

    let fs = OnDriftFs::new(
        rt_handle.clone(),
        db_pool.clone(),
        config.fuse.clone(),
        cache.clone(),
    );
    let write_handle = fs.write_handle().clone();
    let inode_table = fs.inode_table().clone();

    let hydration = Arc::new(
        HydrationManager::new(
            config.transfer.download_pool_size.max(1) as usize,
            cache.clone(),
            write_handle.clone(),
            graph_provider.clone(),
            rt_handle.clone(),
        )
        .with_transfer_config(&config.transfer),
    );

    let dehydration = Arc::new(DehydrationManager::new(
        DehydrationPolicy::from_config(&config.fuse),
        cache.clone(),
        inode_table,
        write_handle,
        db_pool.clone(),
    ));
    let dehydration_sweeper = dehydration.clone().start_periodic();

    let cloud_provider: Arc<dyn ICloudProvider + Send + Sync> = graph_provider.clone();

    let content_relocator: Arc<dyn ContentRelocator + Send + Sync> = cache.clone();
    let upload = Arc::new(
        UploadManager::new(
            config.transfer.upload_pool_size.max(1) as usize,
            cloud_provider.clone(),
            state_repository.clone(),
            Arc::new(db_pool.clone()),
            rt_handle.clone(),
        )
        .with_transfer_config(&config.transfer)
        .with_content_relocator(content_relocator),
    );

    let fs = fs
        .with_managers(hydration, dehydration.clone())
        .with_upload_manager(upload.clone());

    let local_filesystem: Arc<dyn ILocalFileSystem + Send + Sync> =
        Arc::new(LocalFileSystemAdapter::new());

    let sync_engine = Arc::new(SyncEngine::new(
        cloud_provider.clone(),
        state_repository.clone(),
        local_filesystem,
        &config,
    ));

    let offline_tracker = Arc::new(OfflineTracker::new(Arc::new(db_pool.clone()), cloud_provider));
    let replay_ctx = DaemonReplayContext {
        state_repository: state_repository.clone(),
        cache: cache.clone(),
        upload: upload.clone(),
    };

    let sync_loop_handle = {
        let engine = sync_engine.clone();
        let tracker = offline_tracker.clone();
        let interval_secs = config.sync.delta_interval_secs.max(1);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                match engine.sync().await {
                    Ok(result) if result.came_back_online => {
                        info!("Back online, replaying queued offline changes");
                        match tracker.replay(&replay_ctx).await {
                            Ok(summary) => info!(?summary, "Offline replay complete"),
                            Err(e) => error!("Offline replay failed: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Sync cycle failed: {}", e),
                }
            }
        })
    };

    let token_refresh_handle = {
        let auth_provider = auth_provider.clone();
        let graph_provider = graph_provider.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                match auth_provider.ensure_fresh(chrono::Duration::minutes(5)).await {
                    Ok(tokens) => graph_provider.set_access_token(tokens.access_token).await,
                    Err(e) => warn!("Token refresh failed: {}", e),
                }
            }
        })
    };

    let mount_point = expand_tilde(&config.fuse.mount_point);
    tokio::fs::create_dir_all(&mount_point)
        .await
        .with_context(|| format!("Failed to create mount point {}", mount_point.display()))?;

    let mount_options = vec![
        fuser::MountOption::FSName("ondrift".to_string()),
        fuser::MountOption::AutoUnmount,
        fuser::MountOption::AllowOther,
    ];

    info!(mount_point = %mount_point.display(), "Mounting OnDrift filesystem");
    let session = fuser::spawn_mount2(fs, &mount_point, &mount_options)
        .context("Failed to mount FUSE filesystem")?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    sync_loop_handle.abort();
    token_refresh_handle.abort();
    dehydration_sweeper.abort();
    dehydration.shutdown().await;
    session.join();

    info!("OnDrift daemon stopped");
    Ok(())
}
