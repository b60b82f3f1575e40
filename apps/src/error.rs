//! App Platform Error Types
//!
//! One variant per failure class reported to shell, cloud and UI layers.

use alloc::string::String;
use core::fmt;

use akira_runtime::RuntimeError;
use akira_storage::StoreError;

/// App platform error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Bad arguments, malformed binary or manifest.
    Invalid(String),
    /// Allocation failed or the registry is full.
    NoMem,
    /// Binary larger than the configured maximum app size.
    TooBig { size: usize, max: usize },
    /// No app with this name, or no such install session.
    NotFound,
    /// Concurrency ceiling reached or no free install session.
    Busy,
    /// Operation not allowed (preloaded app, missing capability).
    Permission,
    /// Chunked transfer ended before all bytes arrived.
    Again { received: usize, expected: usize },
    /// Binary Store failure.
    Io(StoreError),
    /// Chunk would run past the declared size.
    Overflow { offset: usize, len: usize, total: usize },
    /// Guest code terminated abnormally.
    Crashed(String),
}

impl AppError {
    /// Negative errno for C-style callers.
    pub fn errno(&self) -> i32 {
        match self {
            AppError::Invalid(_) => -22,
            AppError::NoMem => -12,
            AppError::TooBig { .. } => -27,
            AppError::NotFound => -2,
            AppError::Busy => -16,
            AppError::Permission => -1,
            AppError::Again { .. } => -11,
            AppError::Io(_) => -5,
            AppError::Overflow { .. } => -75,
            AppError::Crashed(_) => -125,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        AppError::Invalid(msg.into())
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Invalid(msg) => write!(f, "invalid: {}", msg),
            AppError::NoMem => write!(f, "out of memory"),
            AppError::TooBig { size, max } => write!(f, "app too big: {} > {} bytes", size, max),
            AppError::NotFound => write!(f, "app not found"),
            AppError::Busy => write!(f, "busy"),
            AppError::Permission => write!(f, "permission denied"),
            AppError::Again { received, expected } => {
                write!(f, "incomplete transfer: {}/{} bytes", received, expected)
            }
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Overflow { offset, len, total } => write!(
                f,
                "chunk overflow: offset={}, len={}, total={}",
                offset, len, total
            ),
            AppError::Crashed(msg) => write!(f, "app crashed: {}", msg),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Io(e)
    }
}

impl From<RuntimeError> for AppError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::InvalidBinary(msg)
            | RuntimeError::LoadFailed(msg)
            | RuntimeError::InstantiationFailed(msg) => AppError::Invalid(msg),
            RuntimeError::EntryNotFound(name) => {
                AppError::Invalid(alloc::format!("entry '{}' not exported", name))
            }
            RuntimeError::Trap(msg) => AppError::Crashed(msg),
            RuntimeError::PermissionDenied(_) => AppError::Permission,
            RuntimeError::QuotaExceeded { .. } => AppError::NoMem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(AppError::Permission.errno(), -1);
        assert_eq!(AppError::NotFound.errno(), -2);
        assert_eq!(AppError::Again { received: 60, expected: 100 }.errno(), -11);
        assert_eq!(AppError::Busy.errno(), -16);
        assert_eq!(AppError::TooBig { size: 1, max: 0 }.errno(), -27);
        assert_eq!(AppError::Io(StoreError::Io).errno(), -5);
    }

    #[test]
    fn test_runtime_error_conversion() {
        let e: AppError = RuntimeError::Trap(String::from("unreachable")).into();
        assert_eq!(e, AppError::Crashed(String::from("unreachable")));
        let e: AppError = RuntimeError::InvalidBinary(String::from("bad magic")).into();
        assert!(matches!(e, AppError::Invalid(_)));
    }
}
