//! What a scheduler slot runs.

use core::fmt;

use super::registry::AppId;

/// Body of a schedulable process.
#[derive(Clone, Copy)]
pub enum ProcessEntry {
    /// Kernel-side function called with an opaque argument.
    Native { func: fn(usize), arg: usize },
    /// Sandboxed app, driven through the platform.
    Wasm(AppId),
}

impl ProcessEntry {
    pub fn is_sandboxed(&self) -> bool {
        matches!(self, ProcessEntry::Wasm(_))
    }

    /// Run a native entry. Returns `false` for sandboxed entries, which
    /// only the platform may drive.
    pub fn run_native(&self) -> bool {
        match *self {
            ProcessEntry::Native { func, arg } => {
                func(arg);
                true
            }
            ProcessEntry::Wasm(_) => false,
        }
    }
}

impl fmt::Debug for ProcessEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessEntry::Native { func, arg } => {
                write!(f, "Native({:p}, {:#x})", *func as *const (), arg)
            }
            ProcessEntry::Wasm(id) => write!(f, "Wasm(app {})", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static LAST_ARG: AtomicUsize = AtomicUsize::new(0);

    fn record(arg: usize) {
        LAST_ARG.store(arg, Ordering::SeqCst);
    }

    #[test]
    fn test_native_runs() {
        let entry = ProcessEntry::Native { func: record, arg: 0xBEEF };
        assert!(!entry.is_sandboxed());
        assert!(entry.run_native());
        assert_eq!(LAST_ARG.load(Ordering::SeqCst), 0xBEEF);
    }

    #[test]
    fn test_wasm_not_run_natively() {
        let entry = ProcessEntry::Wasm(AppId(3));
        assert!(entry.is_sandboxed());
        assert!(!entry.run_native());
        assert_eq!(alloc::format!("{:?}", entry), "Wasm(app 3)");
    }
}
