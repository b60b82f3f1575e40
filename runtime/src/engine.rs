//! Engine abstraction.
//!
//! The interpreter is an opaque collaborator reached through three owning
//! handles. Dropping a handle destroys what it owns, so teardown runs on
//! every exit path, including early returns and unwinding.
//!
//! ```text
//! Engine ──load──▶ LoadedModule ──instantiate──▶ ExecContext ──call──▶ export
//!                  (unload on drop)              (deinstantiate on drop)
//! ```

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::host::HostContext;
use crate::RuntimeError;

/// A WASM execution engine.
pub trait Engine: Send + Sync {
    /// Short back-end name for logs.
    fn name(&self) -> &'static str;

    /// Compile or decode a module.
    fn load(&self, binary: &[u8]) -> Result<Box<dyn LoadedModule>, RuntimeError>;
}

/// A module held by an engine. Unloaded when dropped.
pub trait LoadedModule: Send {
    /// Create an execution context whose imports route to `host`.
    fn instantiate(&self, host: Arc<HostContext>) -> Result<Box<dyn ExecContext>, RuntimeError>;
}

/// An instantiated module. Deinstantiated when dropped.
pub trait ExecContext: Send {
    /// Call a nullary export. A trap comes back as [`RuntimeError::Trap`].
    fn call(&mut self, export: &str) -> Result<(), RuntimeError>;

    /// Whether `export` names an exported function.
    fn has_export(&self, export: &str) -> bool;
}
