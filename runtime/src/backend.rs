//! wasmi interpreter back-end.
//!
//! Native functions are linked into the `env` import namespace. Pointer
//! arguments address guest linear memory; out-of-bounds pointers yield
//! `-EINVAL` rather than a trap.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use wasmi::{Caller, Extern, Linker, Module, Store};

use crate::engine::{Engine, ExecContext, LoadedModule};
use crate::host::{status, HostContext, NativeError};
use crate::RuntimeError;

/// Import namespace of the native surface.
pub const IMPORT_MODULE: &str = "env";

/// Store data of one instance.
struct GuestState {
    host: Arc<HostContext>,
}

/// wasmi-backed [`Engine`].
pub struct WasmiEngine {
    engine: wasmi::Engine,
}

impl WasmiEngine {
    pub fn new() -> Self {
        WasmiEngine {
            engine: wasmi::Engine::default(),
        }
    }
}

impl Default for WasmiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for WasmiEngine {
    fn name(&self) -> &'static str {
        "wasmi"
    }

    fn load(&self, binary: &[u8]) -> Result<Box<dyn LoadedModule>, RuntimeError> {
        let module = Module::new(&self.engine, binary)
            .map_err(|e| RuntimeError::LoadFailed(format!("{}", e)))?;
        Ok(Box::new(WasmiModule {
            engine: self.engine.clone(),
            module,
        }))
    }
}

struct WasmiModule {
    engine: wasmi::Engine,
    module: Module,
}

impl LoadedModule for WasmiModule {
    fn instantiate(&self, host: Arc<HostContext>) -> Result<Box<dyn ExecContext>, RuntimeError> {
        let mut store = Store::new(&self.engine, GuestState { host });
        let mut linker: Linker<GuestState> = Linker::new(&self.engine);
        link_natives(&mut linker)
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{}", e)))?;

        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{}", e)))?
            .start(&mut store)
            .map_err(|e| RuntimeError::Trap(format!("{}", e)))?;

        Ok(Box::new(WasmiContext { store, instance }))
    }
}

struct WasmiContext {
    store: Store<GuestState>,
    instance: wasmi::Instance,
}

impl ExecContext for WasmiContext {
    fn call(&mut self, export: &str) -> Result<(), RuntimeError> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&self.store, export)
            .map_err(|_| RuntimeError::EntryNotFound(String::from(export)))?;
        func.call(&mut self.store, ())
            .map_err(|e| RuntimeError::Trap(format!("{}", e)))
    }

    fn has_export(&self, export: &str) -> bool {
        self.instance.get_func(&self.store, export).is_some()
    }
}

// ── Guest memory helpers ────────────────────────────────────

fn read_guest(caller: &Caller<'_, GuestState>, ptr: i32, len: i32) -> Result<Vec<u8>, NativeError> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(NativeError::Invalid)?;
    let data = memory.data(caller);
    let start = usize::try_from(ptr).map_err(|_| NativeError::Invalid)?;
    let len = usize::try_from(len).map_err(|_| NativeError::Invalid)?;
    let end = start.checked_add(len).ok_or(NativeError::Invalid)?;
    data.get(start..end)
        .map(|s| s.to_vec())
        .ok_or(NativeError::Invalid)
}

fn read_guest_str(caller: &Caller<'_, GuestState>, ptr: i32, len: i32) -> Result<String, NativeError> {
    let bytes = read_guest(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| NativeError::Invalid)
}

fn write_guest(caller: &mut Caller<'_, GuestState>, ptr: i32, bytes: &[u8]) -> Result<(), NativeError> {
    let memory = caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(NativeError::Invalid)?;
    let start = usize::try_from(ptr).map_err(|_| NativeError::Invalid)?;
    let end = start.checked_add(bytes.len()).ok_or(NativeError::Invalid)?;
    let data = memory.data_mut(caller);
    let target = data.get_mut(start..end).ok_or(NativeError::Invalid)?;
    target.copy_from_slice(bytes);
    Ok(())
}

fn write_i32(caller: &mut Caller<'_, GuestState>, ptr: i32, value: Result<i32, NativeError>) -> i32 {
    status(value.and_then(|v| write_guest(caller, ptr, &v.to_le_bytes())))
}

// ── Native surface ──────────────────────────────────────────

fn link_natives(linker: &mut Linker<GuestState>) -> Result<(), wasmi::Error> {
    linker.func_wrap(
        IMPORT_MODULE,
        "log",
        |caller: Caller<'_, GuestState>, level: i32, ptr: i32, len: i32| -> i32 {
            let host = caller.data().host.clone();
            status(read_guest_str(&caller, ptr, len).map(|msg| host.log(level, &msg)))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "display_clear",
        |caller: Caller<'_, GuestState>, color: i32| -> i32 {
            status(caller.data().host.display_clear(color as u32))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "display_pixel",
        |caller: Caller<'_, GuestState>, x: i32, y: i32, color: i32| -> i32 {
            status(caller.data().host.display_pixel(x, y, color as u32))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "display_rect",
        |caller: Caller<'_, GuestState>, x: i32, y: i32, w: i32, h: i32, color: i32| -> i32 {
            status(caller.data().host.display_rect(x, y, w, h, color as u32))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "display_text",
        |caller: Caller<'_, GuestState>, x: i32, y: i32, ptr: i32, len: i32, color: i32| -> i32 {
            let host = caller.data().host.clone();
            status(
                read_guest_str(&caller, ptr, len)
                    .and_then(|text| host.display_text(x, y, &text, color as u32)),
            )
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "input_read_buttons",
        |caller: Caller<'_, GuestState>| -> i32 {
            match caller.data().host.input_read_buttons() {
                Ok(mask) => (mask & 0x7FFF_FFFF) as i32,
                Err(e) => e.code(),
            }
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "input_inject",
        |caller: Caller<'_, GuestState>, mask: i32| -> i32 {
            status(caller.data().host.input_inject(mask as u32))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "sensor_read",
        |mut caller: Caller<'_, GuestState>, channel: i32, out: i32| -> i32 {
            let value = caller.data().host.sensor_read(channel as u32);
            write_i32(&mut caller, out, value)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "rf_send",
        |caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> i32 {
            let host = caller.data().host.clone();
            status(read_guest(&caller, ptr, len).and_then(|data| host.rf_send(&data)))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "rf_get_rssi",
        |mut caller: Caller<'_, GuestState>, out: i32| -> i32 {
            let value = caller.data().host.rf_get_rssi();
            write_i32(&mut caller, out, value)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "bt_shell_print",
        |caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> i32 {
            let host = caller.data().host.clone();
            status(read_guest_str(&caller, ptr, len).and_then(|text| host.bt_shell_print(&text)))
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "storage_read",
        |mut caller: Caller<'_, GuestState>, key_ptr: i32, key_len: i32, buf_ptr: i32, buf_len: i32| -> i32 {
            let host = caller.data().host.clone();
            let result = read_guest_str(&caller, key_ptr, key_len)
                .and_then(|key| host.storage_read(&key))
                .and_then(|data| {
                    let cap = usize::try_from(buf_len).map_err(|_| NativeError::Invalid)?;
                    let n = data.len().min(cap);
                    write_guest(&mut caller, buf_ptr, &data[..n])?;
                    Ok(n as i32)
                });
            match result {
                Ok(n) => n,
                Err(e) => e.code(),
            }
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "storage_write",
        |caller: Caller<'_, GuestState>, key_ptr: i32, key_len: i32, data_ptr: i32, data_len: i32| -> i32 {
            let host = caller.data().host.clone();
            let result = read_guest_str(&caller, key_ptr, key_len).and_then(|key| {
                let data = read_guest(&caller, data_ptr, data_len)?;
                host.storage_write(&key, &data)
            });
            status(result)
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "mem_alloc",
        |caller: Caller<'_, GuestState>, size: i32| -> i32 {
            match usize::try_from(size) {
                Ok(size) => caller.data().host.mem_alloc(size) as i32,
                Err(_) => 0,
            }
        },
    )?;
    linker.func_wrap(
        IMPORT_MODULE,
        "mem_free",
        |caller: Caller<'_, GuestState>, handle: i32| -> i32 {
            status(caller.data().host.mem_free(handle as u32))
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::host::NullPeripherals;

    // (module (func (export "_start")))
    const START_MODULE: &[u8] = &[
        0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00, // header
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type: () -> ()
        0x03, 0x02, 0x01, 0x00, // func 0 : type 0
        0x07, 0x0A, 0x01, 0x06, b'_', b's', b't', b'a', b'r', b't', 0x00, 0x00, // export
        0x0A, 0x04, 0x01, 0x02, 0x00, 0x0B, // code: empty body
    ];

    // (module (func (export "_start") unreachable))
    const TRAP_MODULE: &[u8] = &[
        0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00,
        0x03, 0x02, 0x01, 0x00,
        0x07, 0x0A, 0x01, 0x06, b'_', b's', b't', b'a', b'r', b't', 0x00, 0x00,
        0x0A, 0x05, 0x01, 0x03, 0x00, 0x00, 0x0B,
    ];

    fn host() -> Arc<HostContext> {
        Arc::new(HostContext::new(
            String::from("wasmi-test"),
            Capability::empty(),
            1024,
            Arc::new(NullPeripherals),
            None,
            String::from("/lfs/app_data/wasmi-test"),
        ))
    }

    #[test]
    fn test_wasmi_runs_start() {
        let engine = WasmiEngine::new();
        let module = engine.load(START_MODULE).unwrap();
        let mut ctx = module.instantiate(host()).unwrap();
        assert!(ctx.has_export("_start"));
        assert!(!ctx.has_export("main"));
        assert!(ctx.call("_start").is_ok());
    }

    #[test]
    fn test_wasmi_trap_is_reported() {
        let engine = WasmiEngine::new();
        let module = engine.load(TRAP_MODULE).unwrap();
        let mut ctx = module.instantiate(host()).unwrap();
        assert!(matches!(ctx.call("_start"), Err(RuntimeError::Trap(_))));
    }

    #[test]
    fn test_wasmi_rejects_garbage() {
        let engine = WasmiEngine::new();
        assert!(matches!(
            engine.load(b"\0asm\x01\0\0\0\xFF"),
            Err(RuntimeError::LoadFailed(_))
        ));
    }
}
