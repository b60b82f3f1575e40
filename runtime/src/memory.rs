//! Per-instance allocation quota.
//!
//! Guest allocations made through `mem_alloc` are charged against the
//! instance quota at allocation time. The ledger keeps one entry per live
//! handle so `mem_free` can only release what was actually granted.

use alloc::collections::BTreeMap;

use crate::RuntimeError;

/// Allocation ledger of one instance.
#[derive(Debug)]
pub struct QuotaAccount {
    quota: usize,
    used: usize,
    peak: usize,
    live: BTreeMap<u32, usize>,
    next_handle: u32,
}

impl QuotaAccount {
    pub fn new(quota: usize) -> Self {
        QuotaAccount {
            quota,
            used: 0,
            peak: 0,
            live: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Charge `size` bytes and return a non-zero handle for them.
    pub fn alloc(&mut self, size: usize) -> Result<u32, RuntimeError> {
        let new_usage = self.used.saturating_add(size);

        if size == 0 || new_usage > self.quota {
            return Err(RuntimeError::QuotaExceeded {
                requested: size,
                used: self.used,
                quota: self.quota,
            });
        }

        let handle = self.fresh_handle();
        self.live.insert(handle, size);
        self.used = new_usage;
        self.peak = self.peak.max(new_usage);
        Ok(handle)
    }

    /// Release a handle. Returns the bytes credited back.
    pub fn free(&mut self, handle: u32) -> Option<usize> {
        let size = self.live.remove(&handle)?;
        self.used = self.used.saturating_sub(size);
        Some(size)
    }

    /// Drop every allocation. Only called when the instance goes away.
    pub fn reset(&mut self) {
        self.live.clear();
        self.used = 0;
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn quota(&self) -> usize {
        self.quota
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    fn fresh_handle(&mut self) -> u32 {
        loop {
            let handle = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.live.contains_key(&handle) {
                return handle;
            }
        }
    }
}
