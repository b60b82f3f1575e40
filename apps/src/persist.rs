//! Registry blob format.
//!
//! ```text
//! offset 0   "AKAP"      magic
//!        4   u16 LE      format version
//!        6   u16 LE      entry count
//!        8   count × 192-byte records (postcard, zero padded)
//! ```
//!
//! Fixed-size records keep the blob length a pure function of the count,
//! so truncation is detected before any record is decoded.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;
use serde::{Deserialize, Serialize};

use akira_runtime::Capability;

use super::error::AppError;
use super::lifecycle::{AppState, RestartPolicy};
use super::registry::{AppEntry, AppId, AppRegistry, AppSource};

pub const MAGIC: [u8; 4] = *b"AKAP";
pub const FORMAT_VERSION: u16 = 1;
pub const HEADER_SIZE: usize = 8;
pub const RECORD_SIZE: usize = 192;

/// Why a blob was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptBlob {
    BadMagic,
    BadVersion(u16),
    TooManyEntries(usize),
    Truncated { expected: usize, actual: usize },
    BadRecord(usize),
    Duplicate(usize),
}

impl fmt::Display for CorruptBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorruptBlob::BadMagic => write!(f, "bad magic"),
            CorruptBlob::BadVersion(v) => write!(f, "unsupported version {}", v),
            CorruptBlob::TooManyEntries(n) => write!(f, "{} entries exceeds capacity", n),
            CorruptBlob::Truncated { expected, actual } => {
                write!(f, "truncated: expected {} bytes, got {}", expected, actual)
            }
            CorruptBlob::BadRecord(i) => write!(f, "record {} undecodable", i),
            CorruptBlob::Duplicate(i) => write!(f, "record {} duplicates an id or name", i),
        }
    }
}

/// On-media shape of one registry entry.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    id: AppId,
    name: String,
    version: String,
    entry: String,
    state: AppState,
    source: AppSource,
    size: u32,
    heap_kb: u32,
    stack_kb: u32,
    memory_quota: u32,
    capabilities: u32,
    restart_enabled: bool,
    max_retries: u32,
    restart_delay_ms: u32,
    crash_count: u32,
    install_time: u64,
    last_start_time: u64,
    preloaded: bool,
}

impl PersistedEntry {
    fn from_entry(e: &AppEntry) -> Self {
        PersistedEntry {
            id: e.id,
            name: e.name.clone(),
            version: e.version.clone(),
            entry: e.entry.clone(),
            state: e.state,
            source: e.source,
            size: e.size as u32,
            heap_kb: e.heap_kb,
            stack_kb: e.stack_kb,
            memory_quota: e.memory_quota as u32,
            capabilities: e.capabilities.bits(),
            restart_enabled: e.restart.enabled,
            max_retries: e.restart.max_retries,
            restart_delay_ms: e.restart.delay_ms,
            crash_count: e.crash_count,
            install_time: e.install_time,
            last_start_time: e.last_start_time,
            preloaded: e.preloaded,
        }
    }

    fn into_entry(self) -> AppEntry {
        AppEntry {
            id: self.id,
            name: self.name,
            version: self.version,
            entry: self.entry,
            state: self.state,
            source: self.source,
            size: self.size as usize,
            heap_kb: self.heap_kb,
            stack_kb: self.stack_kb,
            memory_quota: self.memory_quota as usize,
            // Bits outside the table are dropped, never widened.
            capabilities: Capability::from_bits_truncate(self.capabilities),
            restart: RestartPolicy {
                enabled: self.restart_enabled,
                max_retries: self.max_retries,
                delay_ms: self.restart_delay_ms,
            },
            crash_count: self.crash_count,
            instance: None,
            install_time: self.install_time,
            last_start_time: self.last_start_time,
            preloaded: self.preloaded,
        }
    }
}

/// Serialize the whole registry.
pub fn encode(registry: &AppRegistry) -> Result<Vec<u8>, AppError> {
    let count = registry.count();
    let mut blob = vec![0u8; HEADER_SIZE + count * RECORD_SIZE];
    blob[0..4].copy_from_slice(&MAGIC);
    blob[4..6].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    blob[6..8].copy_from_slice(&(count as u16).to_le_bytes());

    for (i, entry) in registry.iter().enumerate() {
        let start = HEADER_SIZE + i * RECORD_SIZE;
        let record = &mut blob[start..start + RECORD_SIZE];
        postcard::to_slice(&PersistedEntry::from_entry(entry), record).map_err(|e| {
            AppError::Invalid(alloc::format!("registry record for '{}': {}", entry.name, e))
        })?;
    }
    Ok(blob)
}

/// Parse a registry blob into entries (instances cleared).
pub fn decode(blob: &[u8], capacity: usize) -> Result<Vec<AppEntry>, CorruptBlob> {
    if blob.len() < HEADER_SIZE || blob[0..4] != MAGIC {
        return Err(CorruptBlob::BadMagic);
    }
    let version = u16::from_le_bytes([blob[4], blob[5]]);
    if version != FORMAT_VERSION {
        return Err(CorruptBlob::BadVersion(version));
    }
    let count = u16::from_le_bytes([blob[6], blob[7]]) as usize;
    if count > capacity {
        return Err(CorruptBlob::TooManyEntries(count));
    }
    let expected = HEADER_SIZE + count * RECORD_SIZE;
    if blob.len() != expected {
        return Err(CorruptBlob::Truncated {
            expected,
            actual: blob.len(),
        });
    }

    let mut entries: Vec<AppEntry> = Vec::with_capacity(count);
    for i in 0..count {
        let start = HEADER_SIZE + i * RECORD_SIZE;
        let (record, _) =
            postcard::take_from_bytes::<PersistedEntry>(&blob[start..start + RECORD_SIZE])
                .map_err(|_| CorruptBlob::BadRecord(i))?;
        if record.id.0 == 0 || record.name.is_empty() {
            return Err(CorruptBlob::BadRecord(i));
        }
        if entries.iter().any(|e| e.id == record.id || e.name == record.name) {
            return Err(CorruptBlob::Duplicate(i));
        }
        entries.push(record.into_entry());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::make_entry;

    fn registry_with(entries: &[(u32, &str)]) -> AppRegistry {
        let mut reg = AppRegistry::new(8);
        for (id, name) in entries {
            reg.insert(make_entry(*id, name)).unwrap();
        }
        reg
    }

    #[test]
    fn test_layout() {
        let blob = encode(&registry_with(&[(1, "a"), (2, "b")])).unwrap();
        assert_eq!(&blob[0..4], b"AKAP");
        assert_eq!(u16::from_le_bytes([blob[4], blob[5]]), 1);
        assert_eq!(u16::from_le_bytes([blob[6], blob[7]]), 2);
        assert_eq!(blob.len(), HEADER_SIZE + 2 * RECORD_SIZE);
    }

    #[test]
    fn test_empty_registry() {
        let blob = encode(&AppRegistry::new(8)).unwrap();
        assert_eq!(blob.len(), HEADER_SIZE);
        assert!(decode(&blob, 8).unwrap().is_empty());
    }

    #[test]
    fn test_longest_fields_fit_record() {
        let mut reg = AppRegistry::new(8);
        let mut e = make_entry(u32::MAX, &"n".repeat(31));
        e.version = "v".repeat(15);
        e.entry = "e".repeat(31);
        e.size = u32::MAX as usize;
        e.memory_quota = u32::MAX as usize;
        e.capabilities = Capability::all();
        e.restart.max_retries = u32::MAX;
        e.restart.delay_ms = u32::MAX;
        e.crash_count = u32::MAX;
        e.install_time = u64::MAX;
        e.last_start_time = u64::MAX;
        reg.insert(e).unwrap();
        let blob = encode(&reg).unwrap();
        let back = decode(&blob, 8).unwrap();
        assert_eq!(back[0].name.len(), 31);
        assert_eq!(back[0].install_time, u64::MAX);
    }

    #[test]
    fn test_corruption_detected() {
        let good = encode(&registry_with(&[(1, "a")])).unwrap();

        let mut bad = good.clone();
        bad[0] = b'X';
        assert_eq!(decode(&bad, 8).err(), Some(CorruptBlob::BadMagic));

        let mut bad = good.clone();
        bad[4] = 9;
        assert_eq!(decode(&bad, 8).err(), Some(CorruptBlob::BadVersion(9)));

        let bad = &good[..good.len() - 1];
        assert!(matches!(decode(bad, 8), Err(CorruptBlob::Truncated { .. })));

        let mut bad = good.clone();
        bad[6] = 20;
        assert_eq!(decode(&bad, 8).err(), Some(CorruptBlob::TooManyEntries(20)));

        let mut bad = good.clone();
        for b in &mut bad[HEADER_SIZE..] {
            *b = 0xFF;
        }
        assert_eq!(decode(&bad, 8).err(), Some(CorruptBlob::BadRecord(0)));
    }

    #[test]
    fn test_duplicate_records_rejected() {
        let one = encode(&registry_with(&[(1, "a")])).unwrap();
        let mut blob = one.clone();
        blob.extend_from_slice(&one[HEADER_SIZE..]);
        blob[6] = 2;
        assert_eq!(decode(&blob, 8).err(), Some(CorruptBlob::Duplicate(1)));
    }

    #[test]
    fn test_unknown_capability_bits_dropped() {
        let mut blob = encode(&registry_with(&[(1, "a")])).unwrap();
        // Re-encode with a widened mask.
        let mut e = PersistedEntry::from_entry(&make_entry(1, "a"));
        e.capabilities = u32::MAX;
        let start = HEADER_SIZE;
        for b in &mut blob[start..start + RECORD_SIZE] {
            *b = 0;
        }
        postcard::to_slice(&e, &mut blob[start..start + RECORD_SIZE]).unwrap();
        let back = decode(&blob, 8).unwrap();
        assert_eq!(back[0].capabilities, Capability::all());
    }
}
