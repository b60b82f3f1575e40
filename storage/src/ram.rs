//! In-memory blob store.
//!
//! Used on boards without a mounted flash filesystem. Contents are lost on
//! power cycle, so the app registry degrades to "empty on boot".

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use spin::Mutex;

use crate::store::{is_direct_child, BlobStore};
use crate::{check_path, StoreError};

/// Capacity limits of a [`RamStore`].
#[derive(Debug, Clone)]
pub struct RamStoreConfig {
    /// Maximum number of blobs held at once.
    pub max_files: usize,
    /// Maximum size of a single blob in bytes.
    pub max_file_size: usize,
}

impl Default for RamStoreConfig {
    fn default() -> Self {
        RamStoreConfig {
            max_files: 16,
            max_file_size: 64 * 1024,
        }
    }
}

/// Bounded RAM-backed [`BlobStore`].
pub struct RamStore {
    config: RamStoreConfig,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl RamStore {
    /// Create an empty store with the default limits.
    pub fn new() -> Self {
        Self::with_config(RamStoreConfig::default())
    }

    /// Create an empty store with explicit limits.
    pub fn with_config(config: RamStoreConfig) -> Self {
        RamStore {
            config,
            files: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of blobs currently held.
    pub fn file_count(&self) -> usize {
        self.files.lock().len()
    }

    /// Every path held, in order.
    pub fn all_paths(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Total bytes held.
    pub fn bytes_used(&self) -> usize {
        self.files.lock().values().map(Vec::len).sum()
    }
}

impl Default for RamStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for RamStore {
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        check_path(path)?;
        if data.len() > self.config.max_file_size {
            log::warn!(
                "[Akira/Store] RAM write rejected: {} ({} bytes > {})",
                path,
                data.len(),
                self.config.max_file_size
            );
            return Err(StoreError::TooLarge);
        }

        let mut files = self.files.lock();
        if !files.contains_key(path) && files.len() >= self.config.max_files {
            return Err(StoreError::NoSpace);
        }
        files.insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        check_path(path)?;
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        check_path(path)?;
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path)
    }

    fn size(&self, path: &str) -> Result<usize, StoreError> {
        self.files
            .lock()
            .get(path)
            .map(Vec::len)
            .ok_or(StoreError::NotFound)
    }

    fn list(&self, dir: &str) -> Vec<String> {
        self.files
            .lock()
            .keys()
            .filter(|path| is_direct_child(dir, path))
            .cloned()
            .collect()
    }

    fn remove_dir(&self, dir: &str) -> Result<(), StoreError> {
        let prefix = alloc::format!("{}/", dir.trim_end_matches('/'));
        self.files.lock().retain(|path, _| !path.starts_with(&prefix));
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
