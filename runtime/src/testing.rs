//! Scripted engine for tests.
//!
//! Stands in for an interpreter: each registered binary maps to a Rust
//! closure run whenever one of its exports is called. Handle counters make
//! leaked modules or contexts visible to assertions.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::engine::{Engine, ExecContext, LoadedModule};
use crate::host::{HostContext, Peripherals};
use crate::parser::WASM_MAGIC;
use crate::RuntimeError;

type Script = dyn Fn(&str, &HostContext) -> Result<(), RuntimeError> + Send + Sync;

/// Minimal module bytes distinguished by `tag`.
pub fn wasm_stub(tag: u8) -> Vec<u8> {
    let mut out = Vec::from(WASM_MAGIC);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.push(tag);
    out
}

/// Behaviour of one scripted module.
#[derive(Clone)]
pub struct ScriptedProgram {
    exports: Vec<String>,
    run: Arc<Script>,
    refuse_instantiation: bool,
}

impl ScriptedProgram {
    /// Program exporting `_start` whose calls run `f(export, host)`.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str, &HostContext) -> Result<(), RuntimeError> + Send + Sync + 'static,
    {
        ScriptedProgram {
            exports: alloc::vec![String::from("_start")],
            run: Arc::new(f),
            refuse_instantiation: false,
        }
    }

    pub fn exports(mut self, names: &[&str]) -> Self {
        self.exports = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn refuse_instantiation(mut self) -> Self {
        self.refuse_instantiation = true;
        self
    }
}

#[derive(Default)]
struct Counters {
    loads: AtomicUsize,
    live_modules: AtomicUsize,
    live_contexts: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

/// [`Engine`] driven by registered closures.
pub struct ScriptedEngine {
    programs: Mutex<Vec<(Vec<u8>, ScriptedProgram)>>,
    counters: Arc<Counters>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        ScriptedEngine {
            programs: Mutex::new(Vec::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Attach `program` to the exact bytes `binary`.
    pub fn program(&self, binary: Vec<u8>, program: ScriptedProgram) {
        let mut programs = self.programs.lock();
        programs.retain(|(b, _)| *b != binary);
        programs.push((binary, program));
    }

    pub fn loads(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }

    pub fn live_modules(&self) -> usize {
        self.counters.live_modules.load(Ordering::SeqCst)
    }

    pub fn live_contexts(&self) -> usize {
        self.counters.live_contexts.load(Ordering::SeqCst)
    }

    /// Exports called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.counters.calls.lock().clone()
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn load(&self, binary: &[u8]) -> Result<Box<dyn LoadedModule>, RuntimeError> {
        let program = self
            .programs
            .lock()
            .iter()
            .find(|(b, _)| b.as_slice() == binary)
            .map(|(_, p)| p.clone())
            .unwrap_or_else(|| ScriptedProgram::new(|_, _| Ok(())));
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.counters.live_modules.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModule {
            program,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedModule {
    program: ScriptedProgram,
    counters: Arc<Counters>,
}

impl LoadedModule for ScriptedModule {
    fn instantiate(&self, host: Arc<HostContext>) -> Result<Box<dyn ExecContext>, RuntimeError> {
        if self.program.refuse_instantiation {
            return Err(RuntimeError::InstantiationFailed(String::from("scripted refusal")));
        }
        self.counters.live_contexts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            program: self.program.clone(),
            host,
            counters: self.counters.clone(),
        }))
    }
}

impl Drop for ScriptedModule {
    fn drop(&mut self) {
        self.counters.live_modules.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedContext {
    program: ScriptedProgram,
    host: Arc<HostContext>,
    counters: Arc<Counters>,
}

impl ExecContext for ScriptedContext {
    fn call(&mut self, export: &str) -> Result<(), RuntimeError> {
        if !self.has_export(export) {
            return Err(RuntimeError::EntryNotFound(export.to_string()));
        }
        self.counters.calls.lock().push(export.to_string());
        (self.program.run)(export, &self.host)
    }

    fn has_export(&self, export: &str) -> bool {
        self.program.exports.iter().any(|e| e == export)
    }
}

impl Drop for ScriptedContext {
    fn drop(&mut self) {
        self.counters.live_contexts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Board that records every peripheral access.
#[derive(Default)]
pub struct RecordingPeripherals {
    events: Mutex<Vec<String>>,
}

impl RecordingPeripherals {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl Peripherals for RecordingPeripherals {
    fn display_clear(&self, color: u32) {
        self.record(alloc::format!("clear {:#06x}", color));
    }

    fn display_pixel(&self, x: i32, y: i32, color: u32) {
        self.record(alloc::format!("pixel {},{} {:#06x}", x, y, color));
    }

    fn display_rect(&self, x: i32, y: i32, w: i32, h: i32, color: u32) {
        self.record(alloc::format!("rect {},{} {}x{} {:#06x}", x, y, w, h, color));
    }

    fn display_text(&self, x: i32, y: i32, text: &str, _color: u32) {
        self.record(alloc::format!("text {},{} {}", x, y, text));
    }

    fn sensor_read(&self, channel: u32) -> Option<i32> {
        (channel < 8).then(|| channel as i32 * 10)
    }

    fn rf_send(&self, data: &[u8]) -> bool {
        self.record(alloc::format!("rf {} bytes", data.len()));
        true
    }

    fn bt_shell_print(&self, text: &str) {
        self.record(alloc::format!("bt {}", text));
    }
}
