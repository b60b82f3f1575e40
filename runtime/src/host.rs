//! Native functions exposed to sandboxed code.
//!
//! Every gated native checks the instance capability mask before touching
//! a peripheral. A denial is logged and reported to the guest as `-EPERM`;
//! it never aborts the host.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

use akira_storage::BlobStore;

use crate::capability::Capability;
use crate::memory::QuotaAccount;

// ── Errors ──────────────────────────────────────────────────

pub const EPERM: i32 = 1;
pub const EIO: i32 = 5;
pub const ENOMEM: i32 = 12;
pub const EINVAL: i32 = 22;
pub const ENODEV: i32 = 19;

/// Failure of a native call, as seen by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeError {
    /// Instance lacks the capability guarding the call.
    Permission(Capability),
    /// Quota or host memory exhausted.
    NoMemory,
    /// Backing peripheral or store failed.
    Io,
    /// No device behind the call.
    NoDevice,
    /// Bad arguments.
    Invalid,
}

impl NativeError {
    /// Negative errno returned to guest code.
    pub fn code(self) -> i32 {
        match self {
            NativeError::Permission(_) => -EPERM,
            NativeError::NoMemory => -ENOMEM,
            NativeError::Io => -EIO,
            NativeError::NoDevice => -ENODEV,
            NativeError::Invalid => -EINVAL,
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::Permission(cap) => write!(f, "permission denied ({})", cap),
            NativeError::NoMemory => write!(f, "out of memory"),
            NativeError::Io => write!(f, "I/O error"),
            NativeError::NoDevice => write!(f, "no such device"),
            NativeError::Invalid => write!(f, "invalid argument"),
        }
    }
}

/// Collapse a native result into the guest status convention.
pub fn status(result: Result<(), NativeError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

// ── Peripherals ─────────────────────────────────────────────

/// Hardware reached by the natives.
///
/// Provided by the board layer. Every method has a no-op default so a
/// board only implements what it has.
pub trait Peripherals: Send + Sync {
    fn display_clear(&self, _color: u32) {}
    fn display_pixel(&self, _x: i32, _y: i32, _color: u32) {}
    fn display_rect(&self, _x: i32, _y: i32, _w: i32, _h: i32, _color: u32) {}
    fn display_text(&self, _x: i32, _y: i32, _text: &str, _color: u32) {}

    /// Bitmask of pressed buttons.
    fn input_buttons(&self) -> u32 {
        0
    }
    fn input_inject(&self, _mask: u32) {}

    fn sensor_read(&self, _channel: u32) -> Option<i32> {
        None
    }

    fn rf_send(&self, _data: &[u8]) -> bool {
        false
    }
    fn rf_rssi(&self) -> Option<i32> {
        None
    }

    fn bt_shell_print(&self, _text: &str) {}
}

/// Board without peripherals.
pub struct NullPeripherals;

impl Peripherals for NullPeripherals {}

// ── Host context ────────────────────────────────────────────

const MAX_KEY_LEN: usize = 32;

/// Per-instance host state handed to the engine at instantiation.
pub struct HostContext {
    app: String,
    capabilities: Capability,
    memory: Mutex<QuotaAccount>,
    peripherals: Arc<dyn Peripherals>,
    store: Option<Arc<dyn BlobStore>>,
    data_dir: String,
    denials: AtomicU32,
}

impl HostContext {
    pub fn new(
        app: String,
        capabilities: Capability,
        quota: usize,
        peripherals: Arc<dyn Peripherals>,
        store: Option<Arc<dyn BlobStore>>,
        data_dir: String,
    ) -> Self {
        HostContext {
            app,
            capabilities,
            memory: Mutex::new(QuotaAccount::new(quota)),
            peripherals,
            store,
            data_dir,
            denials: AtomicU32::new(0),
        }
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn capabilities(&self) -> Capability {
        self.capabilities
    }

    pub fn memory_used(&self) -> usize {
        self.memory.lock().used()
    }

    pub fn memory_quota(&self) -> usize {
        self.memory.lock().quota()
    }

    /// Number of capability denials so far.
    pub fn denials(&self) -> u32 {
        self.denials.load(Ordering::Relaxed)
    }

    fn require(&self, cap: Capability, call: &str) -> Result<(), NativeError> {
        if self.capabilities.contains(cap) {
            return Ok(());
        }
        self.denials.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "[Akira/Sandbox] '{}' denied {}(): missing {}",
            self.app,
            call,
            cap
        );
        Err(NativeError::Permission(cap))
    }

    /// Guest log line. Levels: 0 error, 1 warn, 2 info, 3 debug, other trace.
    pub fn log(&self, level: i32, message: &str) {
        let level = match level {
            0 => log::Level::Error,
            1 => log::Level::Warn,
            2 => log::Level::Info,
            3 => log::Level::Debug,
            _ => log::Level::Trace,
        };
        log::log!(level, "[Akira/App:{}] {}", self.app, message);
    }

    pub fn display_clear(&self, color: u32) -> Result<(), NativeError> {
        self.require(Capability::DISPLAY_WRITE, "display_clear")?;
        self.peripherals.display_clear(color);
        Ok(())
    }

    pub fn display_pixel(&self, x: i32, y: i32, color: u32) -> Result<(), NativeError> {
        self.require(Capability::DISPLAY_WRITE, "display_pixel")?;
        self.peripherals.display_pixel(x, y, color);
        Ok(())
    }

    pub fn display_rect(&self, x: i32, y: i32, w: i32, h: i32, color: u32) -> Result<(), NativeError> {
        self.require(Capability::DISPLAY_WRITE, "display_rect")?;
        if w < 0 || h < 0 {
            return Err(NativeError::Invalid);
        }
        self.peripherals.display_rect(x, y, w, h, color);
        Ok(())
    }

    pub fn display_text(&self, x: i32, y: i32, text: &str, color: u32) -> Result<(), NativeError> {
        self.require(Capability::DISPLAY_WRITE, "display_text")?;
        self.peripherals.display_text(x, y, text, color);
        Ok(())
    }

    pub fn input_read_buttons(&self) -> Result<u32, NativeError> {
        self.require(Capability::INPUT_READ, "input_read_buttons")?;
        Ok(self.peripherals.input_buttons())
    }

    pub fn input_inject(&self, mask: u32) -> Result<(), NativeError> {
        self.require(Capability::INPUT_WRITE, "input_inject")?;
        self.peripherals.input_inject(mask);
        Ok(())
    }

    pub fn sensor_read(&self, channel: u32) -> Result<i32, NativeError> {
        self.require(Capability::SENSOR_READ, "sensor_read")?;
        self.peripherals.sensor_read(channel).ok_or(NativeError::NoDevice)
    }

    pub fn rf_send(&self, data: &[u8]) -> Result<(), NativeError> {
        self.require(Capability::RF_TRANSCEIVE, "rf_send")?;
        if data.is_empty() {
            return Err(NativeError::Invalid);
        }
        if self.peripherals.rf_send(data) {
            Ok(())
        } else {
            Err(NativeError::Io)
        }
    }

    pub fn rf_get_rssi(&self) -> Result<i32, NativeError> {
        self.require(Capability::RF_TRANSCEIVE, "rf_get_rssi")?;
        self.peripherals.rf_rssi().ok_or(NativeError::NoDevice)
    }

    pub fn bt_shell_print(&self, text: &str) -> Result<(), NativeError> {
        self.require(Capability::BT_SHELL, "bt_shell_print")?;
        self.peripherals.bt_shell_print(text);
        Ok(())
    }

    /// Read a key from the app's private data directory.
    pub fn storage_read(&self, key: &str) -> Result<Vec<u8>, NativeError> {
        self.require(Capability::STORAGE_READ, "storage_read")?;
        let path = self.data_path(key)?;
        let store = self.store.as_ref().ok_or(NativeError::NoDevice)?;
        store.read(&path).map_err(|_| NativeError::Io)
    }

    /// Write a key into the app's private data directory.
    pub fn storage_write(&self, key: &str, data: &[u8]) -> Result<(), NativeError> {
        self.require(Capability::STORAGE_WRITE, "storage_write")?;
        let path = self.data_path(key)?;
        let store = self.store.as_ref().ok_or(NativeError::NoDevice)?;
        store.write(&path, data).map_err(|e| {
            log::error!("[Akira/Sandbox] '{}' storage write {} failed: {}", self.app, path, e);
            NativeError::Io
        })
    }

    /// Quota-accounted allocation. Returns 0 when refused.
    pub fn mem_alloc(&self, size: usize) -> u32 {
        match self.memory.lock().alloc(size) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("[Akira/Sandbox] '{}' mem_alloc refused: {}", self.app, e);
                0
            }
        }
    }

    pub fn mem_free(&self, handle: u32) -> Result<(), NativeError> {
        self.memory
            .lock()
            .free(handle)
            .map(|_| ())
            .ok_or(NativeError::Invalid)
    }

    /// Release every outstanding allocation.
    pub(crate) fn reset_memory(&self) {
        self.memory.lock().reset();
    }

    fn data_path(&self, key: &str) -> Result<String, NativeError> {
        let valid = !key.is_empty()
            && key.len() <= MAX_KEY_LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
            && key != "."
            && key != "..";
        if !valid {
            return Err(NativeError::Invalid);
        }
        Ok(alloc::format!("{}/{}", self.data_dir, key))
    }
}
