//! Capability/Manifest Parser
//!
//! Turns a manifest document into resource limits and a capability mask.
//!
//! ```json
//! {
//!   "name": "snake",
//!   "version": "1.2.0",
//!   "heap_kb": 24,
//!   "capabilities": ["display.write", "input.read"],
//!   "restart": { "enabled": true, "max_retries": 3, "delay_ms": 500 }
//! }
//! ```
//!
//! Resolution order at install: explicit document, then the binary's
//! `.akira.manifest` custom section, then platform defaults.

use alloc::string::String;
use alloc::vec::Vec;
use serde::Deserialize;

use akira_runtime::parser::{find_custom_section, MANIFEST_SECTION};
use akira_runtime::Capability;

use super::config::{PlatformConfig, APP_NAME_MAX_LEN, VERSION_MAX_LEN};
use super::error::AppError;
use super::lifecycle::RestartPolicy;

/// Largest heap an app may request.
const MAX_HEAP_KB: u32 = 16 * 1024;
const MAX_STACK_KB: u32 = 256;
const DEFAULT_VERSION: &str = "0.0.0";
const DEFAULT_ENTRY: &str = "_start";

// ── Types ───────────────────────────────────────────────────

/// Parsed app manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppManifest {
    /// Empty when the document names no app.
    pub name: String,
    pub version: String,
    /// Exported function run at start.
    pub entry: String,
    pub heap_kb: u32,
    pub stack_kb: u32,
    /// Allocation ceiling in bytes.
    pub memory_quota: usize,
    pub capabilities: Capability,
    pub restart: RestartPolicy,
}

impl AppManifest {
    /// Manifest of an app that ships none.
    pub fn defaults(config: &PlatformConfig) -> Self {
        AppManifest {
            name: String::new(),
            version: String::from(DEFAULT_VERSION),
            entry: String::from(DEFAULT_ENTRY),
            heap_kb: config.default_heap_kb,
            stack_kb: config.default_stack_kb,
            memory_quota: config.default_heap_kb as usize * 1024,
            capabilities: Capability::empty(),
            restart: config.default_restart,
        }
    }

    /// Parse a JSON manifest document.
    pub fn parse(document: &[u8], config: &PlatformConfig) -> Result<Self, AppError> {
        let doc: ManifestDocument = serde_json::from_slice(document)
            .map_err(|e| AppError::Invalid(alloc::format!("manifest: {}", e)))?;

        let defaults = Self::defaults(config);
        let heap_kb = doc.heap_kb.unwrap_or(defaults.heap_kb);
        let stack_kb = doc.stack_kb.unwrap_or(defaults.stack_kb);
        if heap_kb == 0 || heap_kb > MAX_HEAP_KB {
            return Err(AppError::Invalid(alloc::format!("heap_kb {} out of range", heap_kb)));
        }
        if stack_kb == 0 || stack_kb > MAX_STACK_KB {
            return Err(AppError::Invalid(alloc::format!("stack_kb {} out of range", stack_kb)));
        }

        let memory_quota = match doc.memory_quota {
            Some(q) if q > 0 => q as usize,
            _ => heap_kb as usize * 1024,
        };

        let name = doc.name.unwrap_or_default();
        if !name.is_empty() {
            validate_name(&name)?;
        }
        let version = doc.version.unwrap_or(defaults.version);
        if version.is_empty() || version.len() > VERSION_MAX_LEN {
            return Err(AppError::invalid("version must be 1..=15 bytes"));
        }
        let entry = doc.entry.unwrap_or(defaults.entry);
        if entry.is_empty() || entry.len() > APP_NAME_MAX_LEN {
            return Err(AppError::invalid("entry symbol must be 1..=31 bytes"));
        }

        let capabilities = doc
            .capabilities
            .as_deref()
            .map(|names| Capability::from_names(names.iter().map(String::as_str)))
            .unwrap_or_default();

        let restart = match doc.restart {
            Some(r) => RestartPolicy {
                enabled: r.enabled.unwrap_or(true),
                max_retries: r.max_retries.unwrap_or(defaults.restart.max_retries),
                delay_ms: r.delay_ms.unwrap_or(defaults.restart.delay_ms),
            },
            None => defaults.restart,
        };

        Ok(AppManifest {
            name,
            version,
            entry,
            heap_kb,
            stack_kb,
            memory_quota,
            capabilities,
            restart,
        })
    }

    /// Pick the manifest for `binary`.
    ///
    /// An explicit document must parse. A broken embedded section only
    /// costs the app its requested capabilities.
    pub fn resolve(
        explicit: Option<&[u8]>,
        binary: &[u8],
        config: &PlatformConfig,
    ) -> Result<Self, AppError> {
        if let Some(document) = explicit {
            return Self::parse(document, config);
        }

        match find_custom_section(binary, MANIFEST_SECTION) {
            Ok(Some(section)) => match Self::parse(section, config) {
                Ok(manifest) => {
                    log::info!("[Akira/App] Manifest loaded from {} section", MANIFEST_SECTION);
                    Ok(manifest)
                }
                Err(e) => {
                    log::warn!("[Akira/App] Ignoring embedded manifest: {}", e);
                    Ok(Self::defaults(config))
                }
            },
            Ok(None) => Ok(Self::defaults(config)),
            Err(e) => {
                log::debug!("[Akira/App] No embedded manifest ({})", e);
                Ok(Self::defaults(config))
            }
        }
    }
}

/// Wire shape of the manifest document. Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
struct ManifestDocument {
    name: Option<String>,
    version: Option<String>,
    entry: Option<String>,
    heap_kb: Option<u32>,
    stack_kb: Option<u32>,
    memory_quota: Option<u32>,
    capabilities: Option<Vec<String>>,
    restart: Option<RestartDocument>,
}

#[derive(Debug, Deserialize)]
struct RestartDocument {
    enabled: Option<bool>,
    max_retries: Option<u32>,
    delay_ms: Option<u32>,
}

/// Check an app name: 1..=31 bytes of `[A-Za-z0-9_.-]`, no leading dot.
pub fn validate_name(name: &str) -> Result<(), AppError> {
    let ok = !name.is_empty()
        && name.len() <= APP_NAME_MAX_LEN
        && !name.starts_with('.')
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.');
    if ok {
        Ok(())
    } else {
        Err(AppError::Invalid(alloc::format!("bad app name '{}'", name)))
    }
}
