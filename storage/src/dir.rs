//! Host-directory blob store.
//!
//! Maps store paths under a root directory on the host filesystem, so a
//! simulator can keep installed apps across runs.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use alloc::string::String;
use alloc::vec::Vec;

use crate::store::BlobStore;
use crate::{check_path, StoreError};

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirStore { root: root.into() }
    }

    fn host_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        check_path(path)?;
        Ok(self.root.join(path.trim_start_matches('/')))
    }
}

fn map_io(e: std::io::Error) -> StoreError {
    match e.kind() {
        ErrorKind::NotFound => StoreError::NotFound,
        _ => StoreError::Io,
    }
}

impl BlobStore for DirStore {
    fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        let host = self.host_path(path)?;
        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent).map_err(map_io)?;
        }
        // Write-then-rename keeps the old blob intact if power drops mid-write.
        let tmp = host.with_extension("tmp");
        fs::write(&tmp, data).map_err(map_io)?;
        fs::rename(&tmp, &host).map_err(map_io)
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.host_path(path)?).map_err(map_io)
    }

    fn delete(&self, path: &str) -> Result<(), StoreError> {
        fs::remove_file(self.host_path(path)?).map_err(map_io)
    }

    fn exists(&self, path: &str) -> bool {
        self.host_path(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn size(&self, path: &str) -> Result<usize, StoreError> {
        let meta = fs::metadata(self.host_path(path)?).map_err(map_io)?;
        Ok(meta.len() as usize)
    }

    fn list(&self, dir: &str) -> Vec<String> {
        let Ok(host) = self.host_path(dir) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(host) else {
            return Vec::new();
        };
        let prefix = dir.trim_end_matches('/');
        entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .map(|name| alloc::format!("{}/{}", prefix, name))
            .collect()
    }

    fn remove_dir(&self, dir: &str) -> Result<(), StoreError> {
        match fs::remove_dir_all(self.host_path(dir)?) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(StoreError::Io),
            _ => Ok(()),
        }
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(alloc::format!(
            "akira-dirstore-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_dir_store_roundtrip() {
        let root = scratch("roundtrip");
        let store = DirStore::new(&root);
        store.write("/lfs/apps/001_a.wasm", b"\0asm").unwrap();
        assert!(store.exists("/lfs/apps/001_a.wasm"));
        assert_eq!(store.size("/lfs/apps/001_a.wasm").unwrap(), 4);
        assert_eq!(store.list("/lfs/apps"), ["/lfs/apps/001_a.wasm"]);
        store.delete("/lfs/apps/001_a.wasm").unwrap();
        assert_eq!(store.read("/lfs/apps/001_a.wasm"), Err(StoreError::NotFound));
        let _ = fs::remove_dir_all(root);
    }
}
