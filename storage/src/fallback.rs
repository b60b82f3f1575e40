//! Durable store with RAM fallback.
//!
//! Boots on whatever medium is available. When flash fails to mount the
//! platform keeps working from RAM; once a durable medium is attached the
//! RAM contents are flushed into it and every later access goes there.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use spin::Mutex;

use crate::ram::RamStore;
use crate::store::BlobStore;
use crate::StoreError;

pub struct FallbackStore {
    durable: Mutex<Option<Box<dyn BlobStore>>>,
    ram: RamStore,
}

impl FallbackStore {
    /// Create a store backed by `durable`, or by RAM when `None`.
    pub fn new(durable: Option<Box<dyn BlobStore>>) -> Self {
        if durable.is_none() {
            log::warn!("[Akira/Store] No durable medium, using RAM fallback");
        }
        FallbackStore {
            durable: Mutex::new(durable),
            ram: RamStore::new(),
        }
    }

    /// Attach a durable medium, moving every RAM blob into it.
    ///
    /// Blobs that fail to migrate stay in RAM and are reported by path.
    pub fn attach(&self, durable: Box<dyn BlobStore>) -> Vec<String> {
        let mut failed = Vec::new();
        for path in self.ram.all_paths() {
            let moved = self
                .ram
                .read(&path)
                .and_then(|data| durable.write(&path, &data));
            match moved {
                Ok(()) => {
                    let _ = self.ram.delete(&path);
                }
                Err(e) => {
                    log::error!("[Akira/Store] Failed to migrate {}: {}", path, e);
                    failed.push(path);
                }
            }
        }
        *self.durable.lock() = Some(durable);
        log::info!("[Akira/Store] Durable medium attached");
        failed
    }

    /// Whether a durable medium is in use.
    pub fn has_durable(&self) -> bool {
        self.durable.lock().is_some()
    }

    fn with<R>(&self, f: impl FnOnce(&dyn BlobStore) -> R) -> R {
        let durable = self.durable.lock();
        match durable.as_deref() {
            Some(store) => f(store),
            None => f(&self.ram),
        }
    }
}

impl BlobStore for FallbackStore {
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        self.with(|s| s.write(path, data))
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.with(|s| s.read(path))
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        self.with(|s| s.delete(path))
    }

    fn exists(&self, path: &str) -> bool {
        self.with(|s| s.exists(path))
    }

    fn size(&self, path: &str) -> Result<usize, StoreError> {
        self.with(|s| s.size(path))
    }

    fn list(&self, dir: &str) -> Vec<String> {
        self.with(|s| s.list(dir))
    }

    fn remove_dir(&self, dir: &str) -> Result<(), StoreError> {
        self.with(|s| s.remove_dir(dir))
    }

    fn is_persistent(&self) -> bool {
        self.with(|s| s.is_persistent())
    }
}
