//! Blob store trait.

use alloc::string::String;
use alloc::vec::Vec;

use crate::StoreError;

/// Name-addressed blob persistence.
///
/// Paths are absolute (`/lfs/apps/001_demo.wasm`). Writes replace the whole
/// blob. Implementations synchronise internally so a store can be shared
/// between the installer and the sandbox.
pub trait BlobStore: Send + Sync {
    /// Write (create or replace) the blob at `path`.
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read the whole blob at `path`.
    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete the blob at `path`.
    fn delete(&self, path: &str) -> Result<(), StoreError>;

    /// Whether a blob exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Size in bytes of the blob at `path`.
    fn size(&self, path: &str) -> Result<usize, StoreError>;

    /// Full paths of the blobs directly inside `dir`.
    fn list(&self, dir: &str) -> Vec<String>;

    /// Remove the blobs inside `dir`. A missing directory is not an error.
    fn remove_dir(&self, dir: &str) -> Result<(), StoreError> {
        for path in self.list(dir) {
            self.delete(&path)?;
        }
        Ok(())
    }

    /// Whether contents survive a power cycle.
    fn is_persistent(&self) -> bool;
}

/// Whether `path` lies directly inside `dir`.
pub(crate) fn is_direct_child(dir: &str, path: &str) -> bool {
    let dir = dir.trim_end_matches('/');
    match path.strip_prefix(dir) {
        Some(rest) => rest.starts_with('/') && rest.len() > 1 && !rest[1..].contains('/'),
        None => false,
    }
}
