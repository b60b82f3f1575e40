//! Path conventions for app artefacts.
//!
//! ```text
//! /lfs/apps/registry.bin           registry blob
//! /lfs/apps/001_demo.wasm          binary of app id 1
//! /lfs/apps/demo.manifest.json     manifest sidecar
//! /lfs/app_data/demo/...           per-app private data
//! ```

use alloc::format;
use alloc::string::String;

/// File extension of app binaries.
pub const WASM_EXT: &str = ".wasm";

/// Where each app artefact lives in the store.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    pub apps_dir: String,
    pub data_dir: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        StoreLayout {
            apps_dir: String::from("/lfs/apps"),
            data_dir: String::from("/lfs/app_data"),
        }
    }
}

impl StoreLayout {
    pub fn registry_path(&self) -> String {
        format!("{}/registry.bin", self.apps_dir)
    }

    pub fn binary_path(&self, id: u32, name: &str) -> String {
        format!("{}/{:03}_{}{}", self.apps_dir, id, name, WASM_EXT)
    }

    pub fn manifest_path(&self, name: &str) -> String {
        format!("{}/{}.manifest.json", self.apps_dir, name)
    }

    pub fn app_data_dir(&self, name: &str) -> String {
        format!("{}/{}", self.data_dir, name)
    }

    /// Key inside an app's private data directory.
    pub fn app_data_path(&self, name: &str, key: &str) -> String {
        format!("{}/{}/{}", self.data_dir, name, key)
    }
}

/// Final path component.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// File name with a trailing `.wasm` removed.
pub fn app_stem(path: &str) -> &str {
    let name = file_name(path);
    name.strip_suffix(WASM_EXT).unwrap_or(name)
}

/// Sidecar manifest next to a binary: `/sd/demo.wasm` → `/sd/demo.json`.
pub fn sidecar_manifest_path(path: &str) -> String {
    let base = path.strip_suffix(WASM_EXT).unwrap_or(path);
    format!("{}.json", base)
}
