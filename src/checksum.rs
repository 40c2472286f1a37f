//! CRC32 (IEEE, zlib-compatible) over segment payloads.
//!
//! [`stream_crc`] walks every entry in manifest order and reports the
//! computed checksum of each payload next to the recorded one, plus a running
//! CRC over all payloads concatenated.  The running value fingerprints a whole
//! pack independent of padding.

use crc32fast::Hasher;

use crate::manifest::Manifest;
use crate::validate::{check_bounds, ValidationError};

#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcStatus {
    Verified,
    Mismatch { expected: u32 },
    /// Version-1 manifest: nothing to compare against.
    Unrecorded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCrc {
    pub index:    usize,
    pub name:     String,
    pub computed: u32,
    pub status:   CrcStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCrc {
    pub entries:  Vec<EntryCrc>,
    /// CRC32 of every payload in manifest order, padding excluded.
    pub combined: u32,
}

impl StreamCrc {
    pub fn mismatches(&self) -> impl Iterator<Item = &EntryCrc> {
        self.entries
            .iter()
            .filter(|e| matches!(e.status, CrcStatus::Mismatch { .. }))
    }
}

/// Checksum every entry of `manifest` against `blob`.
///
/// Fails only if an entry lies outside the blob; checksum mismatches are
/// reported per entry, not as an error.
pub fn stream_crc(blob: &[u8], manifest: &Manifest) -> Result<StreamCrc, ValidationError> {
    let mut combined = Hasher::new();
    let mut entries = Vec::with_capacity(manifest.len());
    for e in manifest.entries() {
        let payload = check_bounds(blob, e)?;
        combined.update(payload);
        let computed = crc32(payload);
        let status = match e.crc32 {
            Some(expected) if expected == computed => CrcStatus::Verified,
            Some(expected) => CrcStatus::Mismatch { expected },
            None => CrcStatus::Unrecorded,
        };
        entries.push(EntryCrc {
            index: e.index,
            name: e.entry.name.clone(),
            computed,
            status,
        });
    }
    Ok(StreamCrc { entries, combined: combined.finalize() })
}
