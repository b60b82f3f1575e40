//! Binary Store for AkiraOS.
//!
//! Name-addressed persistence for app binaries, manifest sidecars and the
//! registry blob:
//! - `store`: the [`BlobStore`] trait every backend implements
//! - `ram`: bounded in-memory store used when no durable medium exists
//! - `fallback`: durable store with transparent RAM fallback
//! - `layout`: path conventions shared by the installer and the sandbox
//! - `dir`: host-directory backend (`std` feature)

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
pub mod dir;
pub mod fallback;
pub mod layout;
pub mod ram;
pub mod store;

use core::fmt;

pub use fallback::FallbackStore;
pub use layout::StoreLayout;
pub use ram::{RamStore, RamStoreConfig};
pub use store::BlobStore;

/// Binary Store error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// No blob at this path.
    NotFound,
    /// Underlying medium failed.
    Io,
    /// File table is full.
    NoSpace,
    /// Blob exceeds the per-file size limit.
    TooLarge,
    /// Path is empty or not absolute.
    InvalidPath,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "blob not found"),
            StoreError::Io => write!(f, "storage I/O error"),
            StoreError::NoSpace => write!(f, "no space left in store"),
            StoreError::TooLarge => write!(f, "blob too large"),
            StoreError::InvalidPath => write!(f, "invalid path"),
        }
    }
}

/// Reject paths the store cannot address.
pub(crate) fn check_path(path: &str) -> Result<(), StoreError> {
    if path.len() < 2 || !path.starts_with('/') || path.ends_with('/') || path.contains("..") {
        return Err(StoreError::InvalidPath);
    }
    Ok(())
}
