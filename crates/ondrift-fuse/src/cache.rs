//! File content cache for storing hydrated file data.
//!
//! Uses a hash-based directory structure for efficient storage and lookup.

use std::{
    fs::{self, File},
    io::{Read, Seek, SeekFrom, Write},
    path::PathBuf,
};

use ondrift_core::{domain::newtypes::RemoteId, ports::ContentRelocator};
use sha2::{Digest, Sha256};

use crate::error::FuseError;

/// Manages cached file content on disk.
///
/// Content is stored in a hash-based directory structure:
/// `{cache_dir}/content/{first_2_chars_of_hash}/{rest_of_hash}`
pub struct ContentCache {
    #[allow(dead_code)]
    cache_dir: PathBuf,
    content_dir: PathBuf,
}

impl ContentCache {
    /// Create a new ContentCache, creating the content directory if needed.
    pub fn new(cache_dir: PathBuf) -> std::io::Result<Self> {
        let content_dir = cache_dir.join("content");
        fs::create_dir_all(&content_dir)?;
        Ok(Self {
            cache_dir,
            content_dir,
        })
    }

    /// Compute the cache path for a remote ID using SHA-256 hash.
    pub fn cache_path(&self, remote_id: &RemoteId) -> PathBuf {
        let hash = Self::hash_remote_id(remote_id);
        let (prefix, rest) = hash.split_at(2);
        self.content_dir.join(prefix).join(rest)
    }

    /// Get the path for a partial (in-progress) download.
    pub fn partial_path(&self, remote_id: &RemoteId) -> PathBuf {
        let mut path = self.cache_path(remote_id);
        let filename = path.file_name().unwrap().to_string_lossy().to_string();
        path.set_file_name(format!("{}.partial", filename));
        path
    }

    /// Store data in the cache.
    pub fn store(&self, remote_id: &RemoteId, data: &[u8]) -> Result<PathBuf, FuseError> {
        let path = self.cache_path(remote_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.write_all(data)?;
        Ok(path)
    }

    /// Read bytes from cached file at offset.
    pub fn read(&self, remote_id: &RemoteId, offset: u64, size: u32) -> Result<Vec<u8>, FuseError> {
        let path = self.cache_path(remote_id);
        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; size as usize];
        let bytes_read = file.read(&mut buffer)?;
        buffer.truncate(bytes_read);
        Ok(buffer)
    }

    /// Read the entire cached file, regardless of size.
    ///
    /// Used when handing a locally-modified file's full content to the
    /// upload path, where there is no fixed read window the way FUSE's
    /// `read()` handler has one.
    pub fn read_all(&self, remote_id: &RemoteId) -> Result<Vec<u8>, FuseError> {
        let path = self.cache_path(remote_id);
        Ok(fs::read(&path)?)
    }

    /// Check if content exists in cache.
    pub fn exists(&self, remote_id: &RemoteId) -> bool {
        self.cache_path(remote_id).exists()
    }

    /// Remove cached content.
    pub fn remove(&self, remote_id: &RemoteId) -> Result<(), FuseError> {
        let path = self.cache_path(remote_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        // Also try to remove partial file if it exists
        let partial = self.partial_path(remote_id);
        if partial.exists() {
            let _ = fs::remove_file(&partial);
        }
        Ok(())
    }

    /// Moves cached content from one remote id to another.
    ///
    /// Used to promote a locally-created item's cache entry once the cloud
    /// confirms it and assigns a server-side id: the bytes already cached
    /// under the provisional `local-id-...` key need to live under the
    /// server id's key, or a later `read()` against the new id misses them
    /// entirely. A no-op if nothing is cached under `old_id`.
    pub fn move_content(&self, old_id: &RemoteId, new_id: &RemoteId) -> Result<(), FuseError> {
        let old_path = self.cache_path(old_id);
        if !old_path.exists() {
            return Ok(());
        }
        let new_path = self.cache_path(new_id);
        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&old_path, &new_path)?;

        let old_partial = self.partial_path(old_id);
        if old_partial.exists() {
            let new_partial = self.partial_path(new_id);
            if let Some(parent) = new_partial.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&old_partial, &new_partial)?;
        }
        Ok(())
    }

    /// Write data to a cached file at the specified offset.
    ///
    /// Opens the cache file (creating if needed), seeks to offset, and writes data.
    /// Returns the number of bytes written.
    ///
    /// # Arguments
    /// * `remote_id` - The remote ID to identify the cache file
    /// * `offset` - Byte offset to start writing at
    /// * `data` - Data to write
    ///
    /// # Returns
    /// Number of bytes written
    pub fn write_at(
        &self,
        remote_id: &RemoteId,
        offset: u64,
        data: &[u8],
    ) -> Result<u32, FuseError> {
        let path = self.cache_path(remote_id);

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Open file with read/write, create if doesn't exist
        let mut file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        // Seek to offset
        file.seek(SeekFrom::Start(offset))?;

        // Write data
        file.write_all(data)?;

        Ok(data.len() as u32)
    }

    /// Calculate total disk usage of the cache.
    pub fn disk_usage(&self) -> Result<u64, FuseError> {
        let mut total = 0u64;
        if self.content_dir.exists() {
            for entry in fs::read_dir(&self.content_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    for file in fs::read_dir(entry.path())? {
                        let file = file?;
                        if file.file_type()?.is_file() {
                            total += file.metadata()?.len();
                        }
                    }
                }
            }
        }
        Ok(total)
    }

    fn hash_remote_id(remote_id: &RemoteId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(remote_id.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[async_trait::async_trait]
impl ContentRelocator for ContentCache {
    async fn move_content(&self, old_id: &RemoteId, new_id: &RemoteId) -> anyhow::Result<()> {
        Ok(ContentCache::move_content(self, old_id, new_id)?)
    }
}
