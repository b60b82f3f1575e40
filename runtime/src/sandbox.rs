//! Sandbox bridge.
//!
//! Turns a stored binary into a [`RuntimeInstance`]: header check, load,
//! instantiate with a fresh host context. The instance owns its module and
//! execution context; dropping it tears both down in order and zeroes the
//! memory ledger.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use akira_storage::{BlobStore, StoreLayout};

use crate::capability::Capability;
use crate::engine::{Engine, ExecContext, LoadedModule};
use crate::host::{HostContext, Peripherals};
use crate::parser::validate_header;
use crate::{RuntimeError, SandboxConfig};

/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub app: String,
    pub capabilities: Capability,
    /// Allocation ceiling in bytes.
    pub memory_quota: usize,
}

/// Loads apps into isolated execution contexts.
pub struct SandboxBridge {
    engine: Arc<dyn Engine>,
    peripherals: Arc<dyn Peripherals>,
    store: Option<Arc<dyn BlobStore>>,
    layout: StoreLayout,
    config: SandboxConfig,
}

impl SandboxBridge {
    pub fn new(engine: Arc<dyn Engine>, peripherals: Arc<dyn Peripherals>) -> Self {
        SandboxBridge {
            engine,
            peripherals,
            store: None,
            layout: StoreLayout::default(),
            config: SandboxConfig::default(),
        }
    }

    /// Back the storage natives with `store`, scoped per app by `layout`.
    pub fn with_store(mut self, store: Arc<dyn BlobStore>, layout: StoreLayout) -> Self {
        self.store = Some(store);
        self.layout = layout;
        self
    }

    pub fn with_config(mut self, config: SandboxConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Validate, load and instantiate `binary`.
    pub fn launch(&self, spec: &LaunchSpec, binary: &[u8]) -> Result<RuntimeInstance, RuntimeError> {
        // The stored copy may have been corrupted or replaced since install.
        validate_header(binary)?;

        if spec.memory_quota == 0 || spec.memory_quota > self.config.max_quota {
            return Err(RuntimeError::InstantiationFailed(alloc::format!(
                "memory quota {} outside 1..={}",
                spec.memory_quota,
                self.config.max_quota
            )));
        }

        let module = self.engine.load(binary)?;
        let host = Arc::new(HostContext::new(
            spec.app.clone(),
            spec.capabilities,
            spec.memory_quota,
            self.peripherals.clone(),
            self.store.clone(),
            self.layout.app_data_dir(&spec.app),
        ));
        // On failure `module` is dropped here, which unloads it.
        let context = module.instantiate(host.clone())?;

        log::info!(
            "[Akira/Sandbox] Instantiated '{}' on {} (caps={}, quota={} B)",
            spec.app,
            self.engine.name(),
            spec.capabilities,
            spec.memory_quota
        );

        Ok(RuntimeInstance {
            context: Some(context),
            module: Some(module),
            host,
            running: false,
            fallback_entry: self.config.fallback_entry.clone(),
            default_entry: self.config.default_entry.clone(),
        })
    }
}

/// A live app instance.
pub struct RuntimeInstance {
    // Declared before `module` so the context is destroyed first.
    context: Option<Box<dyn ExecContext>>,
    module: Option<Box<dyn LoadedModule>>,
    host: Arc<HostContext>,
    running: bool,
    default_entry: String,
    fallback_entry: String,
}

impl RuntimeInstance {
    /// Run the entry point.
    ///
    /// When `entry` is the default symbol and the module does not export it,
    /// the fallback symbol is tried. A trap leaves the instance stopped.
    pub fn call_entry(&mut self, entry: &str) -> Result<(), RuntimeError> {
        let symbol = {
            let context = self.context.as_ref().ok_or_else(torn_down)?;
            if context.has_export(entry) {
                String::from(entry)
            } else if entry == self.default_entry && context.has_export(&self.fallback_entry) {
                self.fallback_entry.clone()
            } else {
                return Err(RuntimeError::EntryNotFound(String::from(entry)));
            }
        };
        self.running = true;
        self.invoke(&symbol)
    }

    /// Call an export on a running instance.
    pub fn invoke(&mut self, export: &str) -> Result<(), RuntimeError> {
        let result = self.context.as_mut().ok_or_else(torn_down)?.call(export);
        if let Err(RuntimeError::Trap(msg)) = &result {
            log::error!("[Akira/Sandbox] '{}' trapped in {}: {}", self.host.app(), export, msg);
            self.running = false;
        }
        result
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn app(&self) -> &str {
        self.host.app()
    }

    pub fn capabilities(&self) -> Capability {
        self.host.capabilities()
    }

    pub fn memory_used(&self) -> usize {
        self.host.memory_used()
    }

    pub fn memory_quota(&self) -> usize {
        self.host.memory_quota()
    }

    pub fn host(&self) -> &Arc<HostContext> {
        &self.host
    }
}

fn torn_down() -> RuntimeError {
    RuntimeError::InstantiationFailed(String::from("instance torn down"))
}

impl Drop for RuntimeInstance {
    fn drop(&mut self) {
        self.running = false;
        drop(self.context.take());
        drop(self.module.take());
        self.host.reset_memory();
        log::info!("[Akira/Sandbox] Destroyed instance of '{}'", self.host.app());
    }
}
