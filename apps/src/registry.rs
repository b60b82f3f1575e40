//! App Registry
//!
//! The durable table of installed apps. Each app receives a stable
//! `AppId` (smallest free id ≥ 1) and is persisted through the Binary Store
//! as a single blob (see `persist`).

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

use akira_runtime::{Capability, RuntimeInstance};
use akira_storage::BlobStore;

use super::error::AppError;
use super::lifecycle::{AppState, RestartPolicy};
use super::persist;

// ── Types ───────────────────────────────────────────────────

/// Stable application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub u32);

impl core::fmt::Display for AppId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where an app binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppSource {
    Unknown,
    Http,
    Ble,
    Usb,
    Sd,
    /// Embedded in the firmware image.
    Firmware,
}

impl AppSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppSource::Unknown => "unknown",
            AppSource::Http => "http",
            AppSource::Ble => "ble",
            AppSource::Usb => "usb",
            AppSource::Sd => "sd",
            AppSource::Firmware => "firmware",
        }
    }

    /// Guess the source of a binary from its mount point.
    pub fn from_path(path: &str) -> AppSource {
        if path.starts_with("/sd/") || path.contains("/sd/") {
            AppSource::Sd
        } else if path.starts_with("/usb/") || path.contains("/usb/") {
            AppSource::Usb
        } else {
            AppSource::Unknown
        }
    }
}

/// Registry record of an installed app.
pub struct AppEntry {
    pub id: AppId,
    pub name: String,
    pub version: String,
    pub entry: String,
    pub state: AppState,
    pub source: AppSource,
    pub size: usize,
    pub heap_kb: u32,
    pub stack_kb: u32,
    pub memory_quota: usize,
    pub capabilities: Capability,
    pub restart: RestartPolicy,
    pub crash_count: u32,
    /// Live instance while RUNNING.
    pub instance: Option<RuntimeInstance>,
    /// Clock milliseconds at install commit.
    pub install_time: u64,
    pub last_start_time: u64,
    /// Firmware-embedded; never removable.
    pub preloaded: bool,
}

impl AppEntry {
    /// Snapshot for callers outside the platform.
    pub fn info(&self) -> AppInfo {
        AppInfo {
            id: self.id,
            name: self.name.clone(),
            version: self.version.clone(),
            state: self.state,
            size: self.size,
            heap_kb: self.heap_kb,
            stack_kb: self.stack_kb,
            crash_count: self.crash_count,
            auto_restart: self.restart.enabled,
            max_retries: self.restart.max_retries,
            capabilities: self.capabilities,
            source: self.source,
            preloaded: self.preloaded,
            memory_used: self.instance.as_ref().map_or(0, RuntimeInstance::memory_used),
            install_time: self.install_time,
            last_start_time: self.last_start_time,
        }
    }
}

/// Public view of an app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
    pub id: AppId,
    pub name: String,
    pub version: String,
    pub state: AppState,
    pub size: usize,
    pub heap_kb: u32,
    pub stack_kb: u32,
    pub crash_count: u32,
    pub auto_restart: bool,
    pub max_retries: u32,
    pub capabilities: Capability,
    pub source: AppSource,
    pub preloaded: bool,
    /// Bytes allocated through the sandbox while RUNNING.
    pub memory_used: usize,
    pub install_time: u64,
    pub last_start_time: u64,
}

// ── Registry ────────────────────────────────────────────────

/// In-memory table of installed apps.
pub struct AppRegistry {
    apps: BTreeMap<AppId, AppEntry>,
    capacity: usize,
}

impl AppRegistry {
    /// Create an empty registry holding at most `capacity` apps.
    pub const fn new(capacity: usize) -> Self {
        Self {
            apps: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.apps.len() >= self.capacity
    }

    /// Smallest id not in use.
    pub fn free_id(&self) -> AppId {
        let mut id = 1;
        for used in self.apps.keys() {
            if used.0 != id {
                break;
            }
            id += 1;
        }
        AppId(id)
    }

    /// Add a new entry. Names and ids must be unique.
    pub fn insert(&mut self, entry: AppEntry) -> Result<(), AppError> {
        if self.is_full() {
            return Err(AppError::NoMem);
        }
        if self.apps.contains_key(&entry.id) || self.id_of(&entry.name).is_some() {
            return Err(AppError::Invalid(alloc::format!(
                "duplicate app '{}' (id={})",
                entry.name,
                entry.id
            )));
        }
        self.apps.insert(entry.id, entry);
        Ok(())
    }

    pub fn remove(&mut self, id: AppId) -> Option<AppEntry> {
        self.apps.remove(&id)
    }

    pub fn get(&self, id: AppId) -> Option<&AppEntry> {
        self.apps.get(&id)
    }

    pub fn get_mut(&mut self, id: AppId) -> Option<&mut AppEntry> {
        self.apps.get_mut(&id)
    }

    pub fn id_of(&self, name: &str) -> Option<AppId> {
        self.apps.values().find(|e| e.name == name).map(|e| e.id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&AppEntry> {
        self.apps.values().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AppEntry> {
        self.apps.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AppEntry> {
        self.apps.values_mut()
    }

    pub fn list(&self) -> Vec<AppInfo> {
        self.apps.values().map(AppEntry::info).collect()
    }

    pub fn count(&self) -> usize {
        self.apps.len()
    }

    pub fn running_count(&self) -> usize {
        self.apps
            .values()
            .filter(|e| e.state == AppState::Running)
            .count()
    }

    // ── Persistence ─────────────────────────────────────────

    /// Write the whole table to `path`.
    pub fn save_to(&self, store: &dyn BlobStore, path: &str) -> Result<(), AppError> {
        let blob = persist::encode(self)?;
        store.write(path, &blob)?;
        log::debug!("[Akira/App] Registry saved ({} apps, {} bytes)", self.count(), blob.len());
        Ok(())
    }

    /// Replace the table with the blob at `path`.
    ///
    /// A missing or corrupt blob leaves an empty registry. Apps recorded
    /// RUNNING come back INSTALLED since their instances died with the
    /// previous boot.
    pub fn load_from(&mut self, store: &dyn BlobStore, path: &str) {
        self.apps.clear();

        let blob = match store.read(path) {
            Ok(blob) => blob,
            Err(e) => {
                log::info!("[Akira/App] No registry at {} ({}), starting empty", path, e);
                return;
            }
        };

        let entries = match persist::decode(&blob, self.capacity) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("[Akira/App] Registry blob corrupt ({}), starting empty", e);
                return;
            }
        };

        for mut entry in entries {
            if entry.state == AppState::Running {
                entry.state = AppState::Installed;
            }
            entry.instance = None;
            self.apps.insert(entry.id, entry);
        }
        log::info!("[Akira/App] Registry loaded: {} apps", self.count());
    }
}
