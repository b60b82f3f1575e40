//! Platform limits.

use akira_storage::StoreLayout;

use crate::lifecycle::RestartPolicy;

/// Maximum length of an app name, in bytes.
pub const APP_NAME_MAX_LEN: usize = 31;

/// Maximum length of a version string, in bytes.
pub const VERSION_MAX_LEN: usize = 15;

/// Tunables of the app platform.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Registry capacity.
    pub max_installed: usize,
    /// Ceiling on simultaneously RUNNING apps.
    pub max_running: usize,
    /// Largest accepted binary, in bytes.
    pub max_app_size: usize,
    pub default_heap_kb: u32,
    pub default_stack_kb: u32,
    /// Concurrent chunked install sessions.
    pub max_install_sessions: usize,
    /// Policy for apps whose manifest names none.
    pub default_restart: RestartPolicy,
    pub layout: StoreLayout,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig {
            max_installed: 8,
            max_running: 2,
            max_app_size: 64 * 1024,
            default_heap_kb: 16,
            default_stack_kb: 4,
            max_install_sessions: 2,
            default_restart: RestartPolicy::default(),
            layout: StoreLayout::default(),
        }
    }
}
