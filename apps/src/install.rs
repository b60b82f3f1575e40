//! Install Session Manager
//!
//! Assembles a binary delivered in chunks (cloud, BLE, USB transports)
//! before the atomic commit. A session owns its buffer outright; ending or
//! aborting the session drops it, on every path.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::error::AppError;
use super::registry::AppSource;

/// Starting capacity when the sender did not announce a size.
const UNKNOWN_SIZE_INITIAL: usize = 4 * 1024;

// ── Types ───────────────────────────────────────────────────

/// Opaque handle of an install session. Never reused while the table lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionId(u32);

impl core::fmt::Display for SessionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An in-flight chunked install.
#[derive(Debug)]
pub struct InstallSession {
    /// Target app name; empty means "take it from the manifest".
    pub name: String,
    pub source: AppSource,
    /// Announced size, `None` when unknown.
    total: Option<usize>,
    /// Hard ceiling for unknown-size transfers.
    max_size: usize,
    buffer: Vec<u8>,
}

impl InstallSession {
    fn new(name: &str, total_size: usize, source: AppSource, max_size: usize) -> Result<Self, AppError> {
        if total_size > max_size {
            return Err(AppError::TooBig {
                size: total_size,
                max: max_size,
            });
        }

        let total = (total_size > 0).then_some(total_size);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(total.unwrap_or(UNKNOWN_SIZE_INITIAL.min(max_size)))
            .map_err(|_| AppError::NoMem)?;

        Ok(InstallSession {
            name: String::from(name),
            source,
            total,
            max_size,
            buffer,
        })
    }

    /// Append at the current offset.
    pub fn append(&mut self, data: &[u8]) -> Result<(), AppError> {
        if data.is_empty() {
            return Err(AppError::invalid("empty chunk"));
        }

        let limit = self.total.unwrap_or(self.max_size);
        let received = self.buffer.len();
        if received + data.len() > limit {
            return Err(AppError::Overflow {
                offset: received,
                len: data.len(),
                total: limit,
            });
        }

        let needed = received + data.len();
        if needed > self.buffer.capacity() {
            // Unknown size: double, capped at the ceiling.
            let target = (self.buffer.capacity() * 2).max(needed).min(self.max_size);
            self.buffer
                .try_reserve_exact(target - received)
                .map_err(|_| AppError::NoMem)?;
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Announced size, or 0 when unknown.
    pub fn total_expected(&self) -> usize {
        self.total.unwrap_or(0)
    }

    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.buffer.len() == total,
            None => !self.buffer.is_empty(),
        }
    }

    pub fn binary(&self) -> &[u8] {
        &self.buffer
    }
}

// ── Session table ───────────────────────────────────────────

/// Fixed pool of install sessions.
pub struct SessionTable {
    sessions: BTreeMap<SessionId, InstallSession>,
    next_id: u32,
    slots: usize,
}

impl SessionTable {
    pub const fn new(slots: usize) -> Self {
        SessionTable {
            sessions: BTreeMap::new(),
            next_id: 1,
            slots,
        }
    }

    /// Open a session. `total_size == 0` means the size is unknown.
    pub fn begin(
        &mut self,
        name: &str,
        total_size: usize,
        source: AppSource,
        max_size: usize,
    ) -> Result<SessionId, AppError> {
        if self.sessions.len() >= self.slots {
            log::warn!("[Akira/App] No free install session for '{}'", name);
            return Err(AppError::Busy);
        }
        let session = InstallSession::new(name, total_size, source, max_size)?;

        let id = SessionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.sessions.insert(id, session);
        log::info!(
            "[Akira/App] Install session {} started: '{}' ({} bytes)",
            id,
            name,
            total_size
        );
        Ok(id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Result<&mut InstallSession, AppError> {
        self.sessions.get_mut(&id).ok_or(AppError::NotFound)
    }

    /// Detach a session from the table; its buffer goes with it.
    pub fn take(&mut self, id: SessionId) -> Result<InstallSession, AppError> {
        self.sessions.remove(&id).ok_or(AppError::NotFound)
    }

    pub fn active(&self) -> usize {
        self.sessions.len()
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
    }
}
