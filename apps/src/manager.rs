//! App Manager
//!
//! The platform service. Owns the registry, the install sessions and the
//! restart schedule behind one lock, drives every lifecycle transition and
//! reports each one to the observers once the lock is released.
//!
//! ```text
//!            install ┐
//!  (absent|NEW) ─────┴─> INSTALLED ──start──> RUNNING <──start── STOPPED
//!                                                │ │ ──stop──────────^
//!                                           crash│ └──── poll (retry) ──┐
//!                                                v                      │
//!                                              ERROR ───────────────────┘
//!                                                │ retries exhausted
//!                                                v
//!                                              FAILED  (restart / reinstall)
//! ```
//!
//! A start that cannot load, instantiate or find the entry point counts as
//! a crash, so it goes through the same retry budget:
//!
//! ```text
//!  INSTALLED ──start, load fails──┐
//!                                 v
//!  STOPPED ────start, load fails─> ERROR ── retries exhausted ──> FAILED
//! ```

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use akira_runtime::parser::validate_header;
use akira_runtime::{LaunchSpec, RuntimeError, SandboxBridge};
use akira_storage::layout::{app_stem, sidecar_manifest_path, WASM_EXT};
use akira_storage::{BlobStore, StoreError};

use super::clock::Clock;
use super::config::PlatformConfig;
use super::error::AppError;
use super::events::{ObserverId, Observers, StateChange};
use super::install::{SessionId, SessionTable};
use super::lifecycle::{crash_decision, AppState, CrashDecision, RestartPolicy, RestartSchedule};
use super::manifest::{validate_name, AppManifest};
use super::process::ProcessEntry;
use super::registry::{AppEntry, AppId, AppInfo, AppRegistry, AppSource};

/// Stored files of an app, kept while a reinstall overwrites them.
struct Artefacts {
    binary: Option<Vec<u8>>,
    sidecar: Option<Vec<u8>>,
}

/// State guarded by the platform lock.
struct Inner {
    registry: AppRegistry,
    sessions: SessionTable,
    restarts: RestartSchedule,
}

/// Transitions recorded inside a critical section.
type Changes = Vec<StateChange>;

/// WebAssembly app platform.
pub struct AppManager {
    inner: Mutex<Inner>,
    observers: Observers,
    sandbox: SandboxBridge,
    store: Arc<dyn BlobStore>,
    clock: Arc<dyn Clock>,
    config: PlatformConfig,
}

impl AppManager {
    pub fn new(
        config: PlatformConfig,
        store: Arc<dyn BlobStore>,
        sandbox: SandboxBridge,
        clock: Arc<dyn Clock>,
    ) -> Self {
        AppManager {
            inner: Mutex::new(Inner {
                registry: AppRegistry::new(config.max_installed),
                sessions: SessionTable::new(config.max_install_sessions),
                restarts: RestartSchedule::new(),
            }),
            observers: Observers::new(),
            sandbox,
            store,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Run `f` under the lock, then deliver the transitions it recorded.
    fn locked<R>(&self, f: impl FnOnce(&mut Inner, &mut Changes) -> R) -> R {
        let mut changes = Changes::new();
        let result = {
            let mut inner = self.inner.lock();
            f(&mut *inner, &mut changes)
        };
        self.observers.notify(&changes);
        result
    }

    // ── Boot / shutdown ─────────────────────────────────────

    /// Load the persisted registry. Returns the number of apps found.
    pub fn init(&self) -> usize {
        let path = self.config.layout.registry_path();
        let count = self.locked(|inner, _| {
            inner.registry.load_from(&*self.store, &path);
            inner.restarts.clear();
            inner.registry.count()
        });
        log::info!(
            "[Akira/App] Platform ready: {} apps, max {} running, store {}",
            count,
            self.config.max_running,
            if self.store.is_persistent() { "persistent" } else { "volatile" }
        );
        count
    }

    /// Stop every running app, drop open sessions and persist the registry.
    pub fn shutdown(&self) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            inner.restarts.clear();
            inner.sessions.clear();
            for entry in inner.registry.iter_mut() {
                teardown(entry, changes);
            }
            inner
                .registry
                .save_to(&*self.store, &self.config.layout.registry_path())
        })?;
        log::info!("[Akira/App] Platform shut down");
        Ok(())
    }

    // ── Install ─────────────────────────────────────────────

    /// Install (or replace) an app from a complete binary.
    ///
    /// An empty `name` takes the name from the manifest.
    pub fn install(
        &self,
        name: &str,
        binary: &[u8],
        manifest: Option<&[u8]>,
        source: AppSource,
    ) -> Result<AppId, AppError> {
        self.locked(|inner, changes| self.commit(inner, changes, name, binary, manifest, source))
    }

    /// Install a firmware-embedded app. It cannot be uninstalled.
    pub fn install_preloaded(
        &self,
        name: &str,
        binary: &[u8],
        manifest: Option<&[u8]>,
    ) -> Result<AppId, AppError> {
        self.install(name, binary, manifest, AppSource::Firmware)
    }

    /// Install a binary already sitting in the store, e.g. `/sd/demo.wasm`.
    ///
    /// A `demo.json` next to it is used as the manifest.
    pub fn install_from_path(&self, path: &str) -> Result<AppId, AppError> {
        if !path.ends_with(WASM_EXT) {
            return Err(AppError::invalid("not a .wasm file"));
        }
        let binary = self.store.read(path)?;
        let manifest = match self.store.read(&sidecar_manifest_path(path)) {
            Ok(doc) => Some(doc),
            Err(StoreError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };
        log::info!("[Akira/App] Installing from {}", path);
        self.install(app_stem(path), &binary, manifest.as_deref(), AppSource::from_path(path))
    }

    /// `.wasm` files directly inside `dir`.
    pub fn scan_dir(&self, dir: &str) -> Vec<String> {
        self.store
            .list(dir)
            .into_iter()
            .filter(|path| path.ends_with(WASM_EXT))
            .collect()
    }

    /// Open a chunked install. `total_size == 0` means unknown.
    pub fn install_begin(
        &self,
        name: &str,
        total_size: usize,
        source: AppSource,
    ) -> Result<SessionId, AppError> {
        if !name.is_empty() {
            validate_name(name)?;
        }
        self.locked(|inner, _| {
            inner
                .sessions
                .begin(name, total_size, source, self.config.max_app_size)
        })
    }

    /// Append a chunk. Returns the bytes received so far.
    pub fn install_chunk(&self, session: SessionId, data: &[u8]) -> Result<usize, AppError> {
        self.locked(|inner, _| {
            let s = inner.sessions.get_mut(session)?;
            s.append(data)?;
            log::debug!(
                "[Akira/App] Install session {}: {}/{} bytes",
                session,
                s.received(),
                s.total_expected()
            );
            Ok(s.received())
        })
    }

    /// Close the session and commit the assembled binary.
    ///
    /// The session is gone afterwards whatever the outcome. An incomplete
    /// transfer yields `Again` and installs nothing.
    pub fn install_end(
        &self,
        session: SessionId,
        manifest: Option<&[u8]>,
    ) -> Result<AppId, AppError> {
        self.locked(|inner, changes| {
            let s = inner.sessions.take(session)?;
            if !s.is_complete() {
                log::warn!(
                    "[Akira/App] Install session {} incomplete: {}/{} bytes, aborted",
                    session,
                    s.received(),
                    s.total_expected()
                );
                return Err(AppError::Again {
                    received: s.received(),
                    expected: s.total_expected(),
                });
            }
            let result = self.commit(inner, changes, &s.name, s.binary(), manifest, s.source);
            if let Err(e) = &result {
                log::error!("[Akira/App] Install session {} failed: {}", session, e);
            }
            result
        })
    }

    /// Drop a session and its buffer.
    pub fn install_abort(&self, session: SessionId) -> Result<(), AppError> {
        self.locked(|inner, _| inner.sessions.take(session))?;
        log::info!("[Akira/App] Install session {} aborted", session);
        Ok(())
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.lock().sessions.active()
    }

    /// Validate, store and register a binary.
    fn commit(
        &self,
        inner: &mut Inner,
        changes: &mut Changes,
        name: &str,
        binary: &[u8],
        manifest_doc: Option<&[u8]>,
        source: AppSource,
    ) -> Result<AppId, AppError> {
        if binary.len() > self.config.max_app_size {
            return Err(AppError::TooBig {
                size: binary.len(),
                max: self.config.max_app_size,
            });
        }
        validate_header(binary)?;

        let manifest = AppManifest::resolve(manifest_doc, binary, &self.config)?;
        let name = if name.is_empty() { manifest.name.as_str() } else { name };
        if name.is_empty() {
            return Err(AppError::invalid("app has no name"));
        }
        validate_name(name)?;
        if manifest.memory_quota > self.sandbox.config().max_quota {
            return Err(AppError::invalid("memory quota above platform limit"));
        }

        let preloaded = source == AppSource::Firmware;
        let existing = inner.registry.id_of(name);
        let id = match existing {
            Some(id) => {
                let current = inner.registry.get(id).ok_or(AppError::NotFound)?;
                if current.preloaded && !preloaded {
                    log::warn!("[Akira/App] Refusing to replace preloaded app '{}'", name);
                    return Err(AppError::Permission);
                }
                id
            }
            None if inner.registry.is_full() => {
                log::warn!("[Akira/App] Registry full, cannot install '{}'", name);
                return Err(AppError::NoMem);
            }
            None => inner.registry.free_id(),
        };

        // Artefacts first: the registry never points at a missing binary.
        // A reinstall keeps the old pair so a failed write can put it back;
        // the entry's capabilities must always describe the stored binary.
        let layout = &self.config.layout;
        let binary_path = layout.binary_path(id.0, name);
        let manifest_path = layout.manifest_path(name);
        let previous = existing.map(|_| Artefacts {
            binary: self.store.read(&binary_path).ok(),
            sidecar: self.store.read(&manifest_path).ok(),
        });

        let written = self
            .store
            .write(&binary_path, binary)
            .map_err(|e| (binary_path.as_str(), e))
            .and_then(|()| {
                let sidecar = match manifest_doc {
                    Some(doc) => self.store.write(&manifest_path, doc),
                    None => match self.store.delete(&manifest_path) {
                        Err(StoreError::NotFound) => Ok(()),
                        other => other,
                    },
                };
                sidecar.map_err(|e| (manifest_path.as_str(), e))
            });
        if let Err((path, e)) = written {
            log::error!("[Akira/App] Failed to store {}: {}", path, e);
            match previous {
                Some(previous) => self.restore(&binary_path, &manifest_path, previous),
                None => {
                    let _ = self.store.delete(&binary_path);
                }
            }
            return Err(AppError::Io(e));
        }

        let now = self.clock.now_ms();
        match existing {
            Some(id) => {
                inner.restarts.cancel(id);
                let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
                teardown(entry, changes);
                entry.version = manifest.version;
                entry.entry = manifest.entry;
                entry.source = source;
                entry.size = binary.len();
                entry.heap_kb = manifest.heap_kb;
                entry.stack_kb = manifest.stack_kb;
                entry.memory_quota = manifest.memory_quota;
                entry.capabilities = manifest.capabilities;
                entry.restart = manifest.restart;
                entry.crash_count = 0;
                entry.install_time = now;
                entry.preloaded |= preloaded;
                transition(entry, AppState::Installed, changes);
            }
            None => {
                let entry = AppEntry {
                    id,
                    name: String::from(name),
                    version: manifest.version,
                    entry: manifest.entry,
                    state: AppState::New,
                    source,
                    size: binary.len(),
                    heap_kb: manifest.heap_kb,
                    stack_kb: manifest.stack_kb,
                    memory_quota: manifest.memory_quota,
                    capabilities: manifest.capabilities,
                    restart: manifest.restart,
                    crash_count: 0,
                    instance: None,
                    install_time: now,
                    last_start_time: 0,
                    preloaded,
                };
                if let Err(e) = inner.registry.insert(entry) {
                    let _ = self.store.delete(&binary_path);
                    return Err(e);
                }
                let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
                transition(entry, AppState::Installed, changes);
            }
        }

        self.save(inner);
        if let Some(entry) = inner.registry.get(id) {
            log::info!(
                "[Akira/App] Installed '{}' v{} (id={}, {} bytes, caps={}, source={})",
                entry.name,
                entry.version,
                id,
                entry.size,
                entry.capabilities,
                entry.source.as_str()
            );
        }
        Ok(id)
    }

    /// Put back the files a failed reinstall overwrote.
    fn restore(&self, binary_path: &str, manifest_path: &str, previous: Artefacts) {
        let rolled_back = match previous.binary {
            Some(old) => self.store.write(binary_path, &old),
            None => self.store.delete(binary_path),
        }
        .and_then(|()| match previous.sidecar {
            Some(old) => self.store.write(manifest_path, &old),
            None => match self.store.delete(manifest_path) {
                Err(StoreError::NotFound) => Ok(()),
                other => other,
            },
        });
        match rolled_back {
            Ok(()) => log::warn!("[Akira/App] Reinstall rolled back to {}", binary_path),
            Err(e) => log::error!("[Akira/App] Rollback of {} failed: {}", binary_path, e),
        }
    }

    /// Persist the registry. A failure is logged, the in-memory table stays
    /// authoritative.
    fn save(&self, inner: &Inner) {
        let path = self.config.layout.registry_path();
        if let Err(e) = inner.registry.save_to(&*self.store, &path) {
            log::error!("[Akira/App] Failed to save registry: {}", e);
        }
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Start an installed, stopped or errored app.
    ///
    /// Starting from ERROR clears the crash history. FAILED apps need
    /// [`restart`](Self::restart).
    pub fn start(&self, name: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let state = inner.registry.get(id).map(|e| e.state).ok_or(AppError::NotFound)?;
            match state {
                AppState::Running => {
                    log::debug!("[Akira/App] '{}' already running", name);
                    return Ok(());
                }
                AppState::Failed => {
                    return Err(AppError::invalid("app failed, restart or reinstall it"));
                }
                AppState::Error => {
                    inner.restarts.cancel(id);
                    if let Some(entry) = inner.registry.get_mut(id) {
                        entry.crash_count = 0;
                    }
                }
                _ => {}
            }
            self.launch(inner, changes, id)
        })
    }

    /// Stop a running app. Stopping an app that is not running succeeds.
    pub fn stop(&self, name: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            if entry.state != AppState::Running {
                log::debug!("[Akira/App] '{}' not running ({})", name, entry.state);
                return Ok(());
            }
            teardown(entry, changes);
            Ok(())
        })
    }

    /// Clear the crash history, stop if running, and start again.
    pub fn restart(&self, name: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            inner.restarts.cancel(id);
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            entry.crash_count = 0;
            teardown(entry, changes);
            self.launch(inner, changes, id)
        })
    }

    /// Remove an app with its binary, manifest and private data.
    pub fn uninstall(&self, name: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            if entry.preloaded {
                log::warn!("[Akira/App] Refusing to uninstall preloaded app '{}'", name);
                return Err(AppError::Permission);
            }
            teardown(entry, changes);
            inner.restarts.cancel(id);

            let layout = &self.config.layout;
            match self.store.delete(&layout.binary_path(id.0, name)) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => {
                    log::error!("[Akira/App] Failed to delete binary of '{}': {}", name, e);
                    return Err(AppError::Io(e));
                }
            }
            match self.store.delete(&layout.manifest_path(name)) {
                Ok(()) | Err(StoreError::NotFound) => {}
                Err(e) => log::warn!("[Akira/App] Failed to delete manifest of '{}': {}", name, e),
            }
            if let Err(e) = self.store.remove_dir(&layout.app_data_dir(name)) {
                log::warn!("[Akira/App] Failed to clear data of '{}': {}", name, e);
            }

            let mut entry = inner.registry.remove(id).ok_or(AppError::NotFound)?;
            transition(&mut entry, AppState::New, changes);
            self.save(inner);
            log::info!("[Akira/App] Uninstalled '{}' (id={})", name, id);
            Ok(())
        })
    }

    /// Call an export of a running app. A trap counts as a crash.
    pub fn invoke(&self, name: &str, export: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            let instance = match (&entry.state, entry.instance.as_mut()) {
                (AppState::Running, Some(instance)) => instance,
                _ => return Err(AppError::invalid("app not running")),
            };
            match instance.invoke(export) {
                Err(RuntimeError::Trap(reason)) => {
                    self.abnormal_termination(inner, changes, id, &reason);
                    Err(AppError::Crashed(reason))
                }
                other => other.map_err(AppError::from),
            }
        })
    }

    /// Signal that a running app died outside the platform's view, e.g. a
    /// watchdog fired.
    pub fn report_crash(&self, name: &str) -> Result<(), AppError> {
        self.locked(|inner, changes| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let state = inner.registry.get(id).map(|e| e.state).ok_or(AppError::NotFound)?;
            if state != AppState::Running {
                log::debug!("[Akira/App] Crash report for '{}' ignored ({})", name, state);
                return Ok(());
            }
            self.abnormal_termination(inner, changes, id, "reported crash");
            Ok(())
        })
    }

    /// Fire every auto-restart whose deadline has passed. Returns how many
    /// restarts were attempted.
    pub fn poll(&self) -> usize {
        let now = self.clock.now_ms();
        self.locked(|inner, changes| {
            let mut attempted = 0;
            for id in inner.restarts.take_due(now) {
                let Some(entry) = inner.registry.get(id) else {
                    continue;
                };
                if entry.state != AppState::Error {
                    continue;
                }
                attempted += 1;
                log::info!(
                    "[Akira/App] Auto-restarting '{}' (attempt {}/{})",
                    entry.name,
                    entry.crash_count,
                    entry.restart.max_retries
                );
                let delay = u64::from(entry.restart.delay_ms);
                match self.launch(inner, changes, id) {
                    Ok(()) => {}
                    Err(AppError::Busy) => {
                        // Not the app's fault; try again later.
                        inner.restarts.schedule(id, now + delay);
                    }
                    Err(AppError::Io(e)) => {
                        self.abnormal_termination(inner, changes, id, &alloc::format!("{}", e));
                    }
                    Err(e) => log::warn!("[Akira/App] Auto-restart of app {} failed: {}", id, e),
                }
            }
            attempted
        })
    }

    /// Earliest pending auto-restart, in clock milliseconds.
    pub fn next_restart_deadline(&self) -> Option<u64> {
        self.inner.lock().restarts.next_deadline()
    }

    pub fn restart_pending(&self, name: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .registry
            .id_of(name)
            .is_some_and(|id| inner.restarts.is_pending(id))
    }

    /// Replace an app's restart policy and persist it.
    pub fn set_restart_policy(&self, name: &str, policy: RestartPolicy) -> Result<(), AppError> {
        self.locked(|inner, _| {
            let id = inner.registry.id_of(name).ok_or(AppError::NotFound)?;
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            entry.restart = policy;
            if !policy.enabled {
                inner.restarts.cancel(id);
            }
            self.save(inner);
            Ok(())
        })
    }

    /// Load, instantiate and enter an app.
    fn launch(&self, inner: &mut Inner, changes: &mut Changes, id: AppId) -> Result<(), AppError> {
        if inner.registry.running_count() >= self.config.max_running {
            log::warn!(
                "[Akira/App] Cannot start app {}: {} apps already running",
                id,
                self.config.max_running
            );
            return Err(AppError::Busy);
        }

        let (spec, entry_symbol, binary_path) = {
            let entry = inner.registry.get(id).ok_or(AppError::NotFound)?;
            let spec = LaunchSpec {
                app: entry.name.clone(),
                capabilities: entry.capabilities,
                memory_quota: entry.memory_quota,
            };
            let path = self.config.layout.binary_path(id.0, &entry.name);
            (spec, entry.entry.clone(), path)
        };

        let binary = self.store.read(&binary_path).map_err(|e| {
            log::error!("[Akira/App] Failed to read {}: {}", binary_path, e);
            AppError::Io(e)
        })?;

        let mut instance = match self.sandbox.launch(&spec, &binary) {
            Ok(instance) => instance,
            Err(e) => {
                log::error!("[Akira/App] Failed to launch '{}': {}", spec.app, e);
                self.abnormal_termination(inner, changes, id, &alloc::format!("{}", e));
                return Err(e.into());
            }
        };

        let result = {
            let entry = inner.registry.get_mut(id).ok_or(AppError::NotFound)?;
            entry.last_start_time = self.clock.now_ms();
            transition(entry, AppState::Running, changes);
            let result = instance.call_entry(&entry_symbol);
            entry.instance = Some(instance);
            result
        };

        match result {
            Ok(()) => {
                log::info!("[Akira/App] Started '{}' (id={})", spec.app, id);
                Ok(())
            }
            Err(e) => {
                self.abnormal_termination(inner, changes, id, &alloc::format!("{}", e));
                Err(match e {
                    RuntimeError::Trap(reason) => AppError::Crashed(reason),
                    other => other.into(),
                })
            }
        }
    }

    /// Tear the instance down and apply the crash policy.
    fn abnormal_termination(&self, inner: &mut Inner, changes: &mut Changes, id: AppId, reason: &str) {
        let now = self.clock.now_ms();
        let Some(entry) = inner.registry.get_mut(id) else {
            return;
        };
        entry.instance = None;
        transition(entry, AppState::Error, changes);

        match crash_decision(&entry.restart, entry.crash_count) {
            CrashDecision::Restart { attempt } => {
                entry.crash_count += 1;
                let deadline = now + u64::from(entry.restart.delay_ms);
                log::warn!(
                    "[Akira/App] '{}' crashed ({}), restart {}/{} in {} ms",
                    entry.name,
                    reason,
                    attempt,
                    entry.restart.max_retries,
                    entry.restart.delay_ms
                );
                inner.restarts.schedule(id, deadline);
            }
            CrashDecision::Fail => {
                entry.crash_count = entry.crash_count.saturating_add(1);
                log::error!(
                    "[Akira/App] '{}' crashed ({}), giving up after {} crashes",
                    entry.name,
                    reason,
                    entry.crash_count
                );
                transition(entry, AppState::Failed, changes);
                inner.restarts.cancel(id);
            }
        }
    }

    // ── Observers ───────────────────────────────────────────

    /// Register a state-change callback. Callbacks run outside the
    /// platform lock and may call back into the manager.
    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.observers.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    // ── Queries ─────────────────────────────────────────────

    pub fn list(&self) -> Vec<AppInfo> {
        self.inner.lock().registry.list()
    }

    pub fn get_info(&self, name: &str) -> Result<AppInfo, AppError> {
        self.inner
            .lock()
            .registry
            .find_by_name(name)
            .map(AppEntry::info)
            .ok_or(AppError::NotFound)
    }

    pub fn get_state(&self, name: &str) -> Result<AppState, AppError> {
        self.inner
            .lock()
            .registry
            .find_by_name(name)
            .map(|e| e.state)
            .ok_or(AppError::NotFound)
    }

    pub fn get_count(&self) -> usize {
        self.inner.lock().registry.count()
    }

    pub fn get_running_count(&self) -> usize {
        self.inner.lock().registry.running_count()
    }

    /// Scheduler view of a running app.
    pub fn process_entry(&self, name: &str) -> Result<ProcessEntry, AppError> {
        let inner = self.inner.lock();
        let entry = inner.registry.find_by_name(name).ok_or(AppError::NotFound)?;
        if entry.state != AppState::Running {
            return Err(AppError::invalid("app not running"));
        }
        Ok(ProcessEntry::Wasm(entry.id))
    }
}

/// Record a state change.
fn transition(entry: &mut AppEntry, new: AppState, changes: &mut Changes) {
    let old = entry.state;
    if old == new {
        return;
    }
    entry.state = new;
    log::info!("[Akira/App] '{}' {} -> {}", entry.name, old, new);
    changes.push(StateChange {
        app_id: entry.id,
        old,
        new,
    });
}

/// Destroy a running app's instance: RUNNING → STOPPED.
fn teardown(entry: &mut AppEntry, changes: &mut Changes) {
    entry.instance = None;
    if entry.state == AppState::Running {
        transition(entry, AppState::Stopped, changes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use akira_runtime::testing::{wasm_stub, ScriptedEngine, ScriptedProgram};
    use akira_runtime::{Capability, NullPeripherals};
    use akira_storage::{RamStore, RamStoreConfig};
    use std::sync::Mutex as StdMutex;

    struct Fixture {
        manager: AppManager,
        engine: Arc<ScriptedEngine>,
        store: Arc<RamStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        fixture_with(RamStore::new())
    }

    fn fixture_with(store: RamStore) -> Fixture {
        let engine = Arc::new(ScriptedEngine::new());
        let store = Arc::new(store);
        let clock = Arc::new(ManualClock::new(1_000));
        let config = PlatformConfig::default();
        let sandbox = SandboxBridge::new(engine.clone(), Arc::new(NullPeripherals))
            .with_store(store.clone(), config.layout.clone());
        let manager = AppManager::new(config, store.clone(), sandbox, clock.clone());
        Fixture {
            manager,
            engine,
            store,
            clock,
        }
    }

    fn crashing() -> ScriptedProgram {
        ScriptedProgram::new(|_, _| Err(RuntimeError::Trap(String::from("unreachable"))))
    }

    /// Store that refuses any blob over 60 bytes.
    fn small_store() -> RamStore {
        RamStore::with_config(RamStoreConfig {
            max_file_size: 60,
            ..RamStoreConfig::default()
        })
    }

    const WIDE: &[u8] =
        br#"{"version":"2.0.0","capabilities":["display.write","network","storage.write"]}"#;

    const RETRY: &[u8] = br#"{"version":"1.0.0","restart":{"max_retries":2,"delay_ms":500}}"#;

    #[test]
    fn test_install_writes_binary_and_registry() {
        let f = fixture();
        let id = f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        assert_eq!(id, AppId(1));
        assert!(f.store.exists("/lfs/apps/001_demo.wasm"));
        assert!(f.store.exists("/lfs/apps/registry.bin"));
        assert_eq!(f.manager.get_state("demo"), Ok(AppState::Installed));
    }

    #[test]
    fn test_install_rejects_bad_binary() {
        let f = fixture();
        let err = f.manager.install("demo", b"\x7fELF....", None, AppSource::Http);
        assert!(matches!(err, Err(AppError::Invalid(_))));
        assert_eq!(f.manager.get_count(), 0);
        assert!(f.store.all_paths().is_empty());
    }

    #[test]
    fn test_install_name_from_manifest() {
        let f = fixture();
        let doc = br#"{"name":"clock","version":"2.1.0"}"#;
        f.manager.install("", &wasm_stub(0), Some(doc), AppSource::Ble).unwrap();
        let info = f.manager.get_info("clock").unwrap();
        assert_eq!(info.version, "2.1.0");
        assert!(f.store.exists("/lfs/apps/clock.manifest.json"));
    }

    #[test]
    fn test_registry_full() {
        let f = fixture();
        for i in 0..f.manager.config().max_installed {
            f.manager
                .install(&alloc::format!("app{}", i), &wasm_stub(0), None, AppSource::Http)
                .unwrap();
        }
        assert_eq!(
            f.manager.install("extra", &wasm_stub(0), None, AppSource::Http),
            Err(AppError::NoMem)
        );
    }

    #[test]
    fn test_upsert_keeps_id_and_stops_instance() {
        let f = fixture();
        let id = f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        assert_eq!(f.engine.live_contexts(), 1);

        let again = f.manager.install("demo", &wasm_stub(1), None, AppSource::Usb).unwrap();
        assert_eq!(again, id);
        assert_eq!(f.engine.live_contexts(), 0);
        let info = f.manager.get_info("demo").unwrap();
        assert_eq!(info.state, AppState::Installed);
        assert_eq!(info.source, AppSource::Usb);
    }

    #[test]
    fn test_start_stop() {
        let f = fixture();
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        assert_eq!(f.manager.get_running_count(), 1);
        assert_eq!(f.manager.get_info("demo").unwrap().last_start_time, 1_000);
        assert!(matches!(f.manager.process_entry("demo"), Ok(ProcessEntry::Wasm(AppId(1)))));

        f.manager.stop("demo").unwrap();
        assert_eq!(f.manager.get_state("demo"), Ok(AppState::Stopped));
        assert_eq!(f.engine.live_modules(), 0);
        assert!(f.manager.stop("demo").is_ok());
    }

    #[test]
    fn test_unknown_app() {
        let f = fixture();
        assert_eq!(f.manager.start("ghost"), Err(AppError::NotFound));
        assert_eq!(f.manager.stop("ghost"), Err(AppError::NotFound));
        assert_eq!(f.manager.uninstall("ghost"), Err(AppError::NotFound));
    }

    #[test]
    fn test_entry_trap_crashes_app() {
        let f = fixture();
        f.engine.program(wasm_stub(9), crashing());
        f.manager.install("bad", &wasm_stub(9), None, AppSource::Http).unwrap();
        assert!(matches!(f.manager.start("bad"), Err(AppError::Crashed(_))));
        // Restart disabled by default.
        let info = f.manager.get_info("bad").unwrap();
        assert_eq!(info.state, AppState::Failed);
        assert_eq!(info.crash_count, 1);
        assert_eq!(f.engine.live_contexts(), 0);
        assert!(f.manager.start("bad").is_err());
    }

    #[test]
    fn test_auto_restart_after_delay() {
        let f = fixture();
        f.engine.program(wasm_stub(9), crashing());
        f.manager.install("bad", &wasm_stub(9), Some(RETRY), AppSource::Http).unwrap();

        assert!(f.manager.start("bad").is_err());
        assert_eq!(f.manager.get_state("bad"), Ok(AppState::Error));
        assert_eq!(f.manager.next_restart_deadline(), Some(1_500));

        f.clock.advance(499);
        assert_eq!(f.manager.poll(), 0);
        f.clock.advance(1);
        assert_eq!(f.manager.poll(), 1);

        // Both retries used; the next crash is final.
        assert_eq!(f.manager.get_info("bad").unwrap().crash_count, 2);
        f.clock.advance(500);
        f.manager.poll();
        let info = f.manager.get_info("bad").unwrap();
        assert_eq!(info.state, AppState::Failed);
        assert_eq!(f.manager.next_restart_deadline(), None);
    }

    #[test]
    fn test_restart_clears_failed() {
        let f = fixture();
        f.engine.program(wasm_stub(9), crashing());
        f.manager.install("bad", &wasm_stub(9), None, AppSource::Http).unwrap();
        let _ = f.manager.start("bad");
        assert_eq!(f.manager.get_state("bad"), Ok(AppState::Failed));

        // Fixed binary under the same name.
        f.manager.install("bad", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.restart("bad").unwrap();
        let info = f.manager.get_info("bad").unwrap();
        assert_eq!(info.state, AppState::Running);
        assert_eq!(info.crash_count, 0);
    }

    #[test]
    fn test_invoke_trap_goes_through_policy() {
        let f = fixture();
        f.engine.program(
            wasm_stub(5),
            ScriptedProgram::new(|export, _| match export {
                "boom" => Err(RuntimeError::Trap(String::from("oob"))),
                _ => Ok(()),
            })
            .exports(&["_start", "boom"]),
        );
        f.manager.install("app", &wasm_stub(5), Some(RETRY), AppSource::Http).unwrap();
        f.manager.start("app").unwrap();
        assert!(f.manager.invoke("app", "_start").is_ok());
        assert_eq!(
            f.manager.invoke("app", "boom"),
            Err(AppError::Crashed(String::from("oob")))
        );
        assert_eq!(f.manager.get_state("app"), Ok(AppState::Error));
        assert!(f.manager.restart_pending("app"));
    }

    #[test]
    fn test_report_crash() {
        let f = fixture();
        f.manager.install("app", &wasm_stub(0), Some(RETRY), AppSource::Http).unwrap();
        assert!(f.manager.report_crash("app").is_ok());
        assert_eq!(f.manager.get_state("app"), Ok(AppState::Installed));

        f.manager.start("app").unwrap();
        f.manager.report_crash("app").unwrap();
        assert_eq!(f.manager.get_state("app"), Ok(AppState::Error));
        assert_eq!(f.engine.live_contexts(), 0);
        f.clock.advance(500);
        assert_eq!(f.manager.poll(), 1);
        assert_eq!(f.manager.get_state("app"), Ok(AppState::Running));
    }

    #[test]
    fn test_busy_restart_is_rescheduled() {
        let f = fixture();
        f.manager.install("a", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.install("b", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.install("c", &wasm_stub(0), Some(RETRY), AppSource::Http).unwrap();
        f.manager.start("c").unwrap();
        f.manager.report_crash("c").unwrap();
        f.manager.start("a").unwrap();
        f.manager.start("b").unwrap();

        f.clock.advance(500);
        f.manager.poll();
        assert_eq!(f.manager.get_state("c"), Ok(AppState::Error));
        assert_eq!(f.manager.get_info("c").unwrap().crash_count, 1);
        assert_eq!(f.manager.next_restart_deadline(), Some(2_000));

        f.manager.stop("a").unwrap();
        f.clock.advance(500);
        f.manager.poll();
        assert_eq!(f.manager.get_state("c"), Ok(AppState::Running));
    }

    #[test]
    fn test_start_from_error_resets_crashes() {
        let f = fixture();
        f.manager.install("app", &wasm_stub(0), Some(RETRY), AppSource::Http).unwrap();
        f.manager.start("app").unwrap();
        f.manager.report_crash("app").unwrap();
        f.manager.start("app").unwrap();
        assert_eq!(f.manager.get_info("app").unwrap().crash_count, 0);
        assert!(!f.manager.restart_pending("app"));
    }

    #[test]
    fn test_uninstall_removes_artefacts() {
        let f = fixture();
        let doc = br#"{"version":"1.0.0","capabilities":["storage.write"]}"#;
        f.manager.install("demo", &wasm_stub(0), Some(doc), AppSource::Http).unwrap();
        f.store.write("/lfs/app_data/demo/score", b"42").unwrap();
        f.manager.start("demo").unwrap();

        f.manager.uninstall("demo").unwrap();
        assert_eq!(f.manager.get_info("demo"), Err(AppError::NotFound));
        assert!(!f.store.exists("/lfs/apps/001_demo.wasm"));
        assert!(!f.store.exists("/lfs/apps/demo.manifest.json"));
        assert!(!f.store.exists("/lfs/app_data/demo/score"));
        assert_eq!(f.engine.live_contexts(), 0);
    }

    #[test]
    fn test_uninstall_cancels_pending_restart() {
        let f = fixture();
        f.manager.install("app", &wasm_stub(0), Some(RETRY), AppSource::Http).unwrap();
        f.manager.start("app").unwrap();
        f.manager.report_crash("app").unwrap();
        f.manager.uninstall("app").unwrap();
        assert_eq!(f.manager.next_restart_deadline(), None);
    }

    #[test]
    fn test_preloaded_cannot_be_replaced() {
        let f = fixture();
        f.manager.install_preloaded("launcher", &wasm_stub(0), None).unwrap();
        assert_eq!(
            f.manager.install("launcher", &wasm_stub(1), None, AppSource::Http),
            Err(AppError::Permission)
        );
        // Firmware may update its own app.
        assert!(f.manager.install_preloaded("launcher", &wasm_stub(1), None).is_ok());
    }

    #[test]
    fn test_observers_see_every_transition() {
        let f = fixture();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let id = f.manager.subscribe(move |c| sink.lock().unwrap().push((c.old, c.new)));

        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        f.manager.stop("demo").unwrap();
        f.manager.uninstall("demo").unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            [
                (AppState::New, AppState::Installed),
                (AppState::Installed, AppState::Running),
                (AppState::Running, AppState::Stopped),
                (AppState::Stopped, AppState::New),
            ]
        );

        assert!(f.manager.unsubscribe(id));
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_observer_may_reenter() {
        let f = Arc::new(fixture());
        let weak = Arc::downgrade(&f);
        let counts = Arc::new(StdMutex::new(Vec::new()));
        let sink = counts.clone();
        f.manager.subscribe(move |_| {
            if let Some(f) = weak.upgrade() {
                sink.lock().unwrap().push(f.manager.get_count());
            }
        });
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        assert_eq!(*counts.lock().unwrap(), [1]);
    }

    #[test]
    fn test_init_demotes_running_apps() {
        let f = fixture();
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        f.manager.set_restart_policy("demo", RestartPolicy::default()).unwrap();

        // Registry saved with demo RUNNING; simulate a reboot.
        let config = PlatformConfig::default();
        let sandbox = SandboxBridge::new(f.engine.clone(), Arc::new(NullPeripherals));
        let rebooted = AppManager::new(config, f.store.clone(), sandbox, f.clock.clone());
        assert_eq!(rebooted.init(), 1);
        assert_eq!(rebooted.get_state("demo"), Ok(AppState::Installed));
        assert!(rebooted.start("demo").is_ok());
    }

    #[test]
    fn test_shutdown_stops_and_saves() {
        let f = fixture();
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        f.manager.shutdown().unwrap();
        assert_eq!(f.manager.get_running_count(), 0);
        assert_eq!(f.engine.live_contexts(), 0);
    }

    #[test]
    fn test_install_from_path_uses_sidecar() {
        let f = fixture();
        f.store.write("/sd/snake.wasm", &wasm_stub(0)).unwrap();
        f.store
            .write("/sd/snake.json", br#"{"version":"0.3.0","heap_kb":32}"#)
            .unwrap();
        f.store.write("/sd/readme.txt", b"hi").unwrap();

        assert_eq!(f.manager.scan_dir("/sd"), ["/sd/snake.wasm"]);
        f.manager.install_from_path("/sd/snake.wasm").unwrap();
        let info = f.manager.get_info("snake").unwrap();
        assert_eq!(info.version, "0.3.0");
        assert_eq!(info.heap_kb, 32);
        assert_eq!(info.source, AppSource::Sd);
        assert_eq!(
            f.manager.install_from_path("/sd/missing.wasm"),
            Err(AppError::Io(StoreError::NotFound))
        );
    }

    #[test]
    fn test_chunked_install_failure_frees_session() {
        let f = fixture();
        let session = f.manager.install_begin("demo", 8, AppSource::Http).unwrap();
        f.manager.install_chunk(session, b"garbage!").unwrap();
        assert!(f.manager.install_end(session, None).is_err());
        assert_eq!(f.manager.active_sessions(), 0);
        assert_eq!(f.manager.get_count(), 0);
        assert_eq!(f.manager.install_abort(session), Err(AppError::NotFound));
    }

    #[test]
    fn test_failed_reinstall_keeps_previous_artefacts() {
        let f = fixture_with(small_store());
        let doc = br#"{"capabilities":["display.write"]}"#;
        f.manager.install("demo", &wasm_stub(0), Some(doc), AppSource::Http).unwrap();
        f.manager.start("demo").unwrap();
        let before = f.manager.get_info("demo").unwrap();

        assert!(WIDE.len() > 60);
        assert_eq!(
            f.manager.install("demo", &wasm_stub(2), Some(WIDE), AppSource::Http),
            Err(AppError::Io(StoreError::TooLarge))
        );

        assert_eq!(f.store.read("/lfs/apps/001_demo.wasm").unwrap(), wasm_stub(0));
        assert_eq!(f.store.read("/lfs/apps/demo.manifest.json").unwrap(), doc.to_vec());
        let after = f.manager.get_info("demo").unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.size, before.size);
        assert_eq!(after.capabilities, Capability::DISPLAY_WRITE);
        assert_eq!(after.state, AppState::Running);
        assert_eq!(f.engine.live_contexts(), 1);
    }

    #[test]
    fn test_failed_reinstall_without_sidecar_removes_new_one() {
        let f = fixture_with(small_store());
        f.manager.install("demo", &wasm_stub(0), None, AppSource::Http).unwrap();
        let mut big = wasm_stub(3);
        big.resize(100, 0);
        assert_eq!(
            f.manager.install("demo", &big, Some(br#"{"version":"2.0.0"}"#), AppSource::Http),
            Err(AppError::Io(StoreError::TooLarge))
        );
        assert_eq!(f.store.read("/lfs/apps/001_demo.wasm").unwrap(), wasm_stub(0));
        assert!(!f.store.exists("/lfs/apps/demo.manifest.json"));
        assert_eq!(f.manager.get_info("demo").unwrap().size, wasm_stub(0).len());
    }

    #[test]
    fn test_chunked_install_store_failure_leaves_nothing() {
        let f = fixture_with(small_store());

        // Binary over the store limit.
        let mut binary = wasm_stub(0);
        binary.resize(100, 0);
        let session = f.manager.install_begin("big", binary.len(), AppSource::Http).unwrap();
        for chunk in binary.chunks(32) {
            f.manager.install_chunk(session, chunk).unwrap();
        }
        assert_eq!(
            f.manager.install_end(session, None),
            Err(AppError::Io(StoreError::TooLarge))
        );
        assert_eq!(f.manager.active_sessions(), 0);
        assert_eq!(f.manager.get_count(), 0);
        assert!(f.store.all_paths().is_empty());

        // Binary stored, sidecar over the limit.
        let stub = wasm_stub(0);
        let session = f.manager.install_begin("small", stub.len(), AppSource::Http).unwrap();
        f.manager.install_chunk(session, &stub).unwrap();
        assert_eq!(
            f.manager.install_end(session, Some(WIDE)),
            Err(AppError::Io(StoreError::TooLarge))
        );
        assert_eq!(f.manager.active_sessions(), 0);
        assert_eq!(f.manager.get_count(), 0);
        assert!(!f.store.all_paths().iter().any(|p| p.ends_with(WASM_EXT)));
        assert!(f.manager.get_info("small").is_err());
    }
}
