//! AkiraOS Sandbox Bridge
//!
//! Loads untrusted WebAssembly apps into isolated execution contexts and
//! mediates every host-resource access they make.
//!
//! # Architecture
//!
//! - `capability`: closed table of capability names and their bits
//! - `parser`: module header validation + custom-section lookup
//! - `engine`: engine abstraction (load / instantiate / call / destroy)
//! - `host`: capability-gated native functions seen by guest code
//! - `memory`: per-instance allocation quota
//! - `sandbox`: [`SandboxBridge`] and owning [`RuntimeInstance`] handles
//! - `backend`: wasmi interpreter back-end (`wasmi` feature)
//! - `testing`: scripted engine for tests (`testing` feature)

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(feature = "wasmi")]
pub mod backend;
pub mod capability;
pub mod engine;
pub mod host;
pub mod memory;
pub mod parser;
pub mod sandbox;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

use alloc::string::String;
use core::fmt;

pub use capability::Capability;
pub use engine::{Engine, ExecContext, LoadedModule};
pub use host::{HostContext, NativeError, NullPeripherals, Peripherals};
pub use sandbox::{LaunchSpec, RuntimeInstance, SandboxBridge};

/// Runtime error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Binary failed structural validation.
    InvalidBinary(String),
    /// Engine rejected the module.
    LoadFailed(String),
    /// Failed to instantiate module.
    InstantiationFailed(String),
    /// Requested export does not exist.
    EntryNotFound(String),
    /// Guest code terminated abnormally.
    Trap(String),
    /// Instance lacks a capability.
    PermissionDenied(Capability),
    /// Allocation would exceed the instance quota.
    QuotaExceeded {
        requested: usize,
        used: usize,
        quota: usize,
    },
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::InvalidBinary(msg) => write!(f, "invalid binary: {}", msg),
            RuntimeError::LoadFailed(msg) => write!(f, "load failed: {}", msg),
            RuntimeError::InstantiationFailed(msg) => write!(f, "instantiation failed: {}", msg),
            RuntimeError::EntryNotFound(name) => write!(f, "export not found: {}", name),
            RuntimeError::Trap(msg) => write!(f, "trap: {}", msg),
            RuntimeError::PermissionDenied(cap) => write!(f, "capability not held: {}", cap),
            RuntimeError::QuotaExceeded {
                requested,
                used,
                quota,
            } => write!(
                f,
                "memory quota exceeded: requested={}, used={}, quota={}",
                requested, used, quota
            ),
        }
    }
}

/// Sandbox configuration.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Upper bound accepted for any single instance quota.
    pub max_quota: usize,
    /// Entry symbol used when a manifest names none.
    pub default_entry: String,
    /// Tried when the requested entry is the default and is not exported.
    pub fallback_entry: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            max_quota: 16 * 1024 * 1024, // 16 MB
            default_entry: String::from("_start"),
            fallback_entry: String::from("main"),
        }
    }
}
