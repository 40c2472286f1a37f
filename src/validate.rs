//! Pre-flight validator for a blob/manifest pair.
//!
//! Checks, in order:
//! 1. Manifest header and entry decoding (magic, version, truncation).
//! 2. Per entry: offset alignment, bounds against the blob, and, when asked
//!    and the manifest is version 2, the CRC32 of the payload.
//! 3. Globally: no two entries' byte ranges intersect.
//!
//! Step 2 has no cross-entry dependency.  With the `parallel` feature the
//! entries are checked on the Rayon pool; the reported failure is still the
//! first one in entry order, so both paths give identical results.
//!
//! Validation never mutates either artifact and can run concurrently on the
//! same pair.

use std::fs;
use std::io;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checksum::crc32;
use crate::format::is_valid_align;
use crate::manifest::{EntryRef, Manifest, ManifestError};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("Entry {index} `{name}`: offset {offset} is not a multiple of {align}")]
    MisalignedOffset { index: usize, name: String, offset: u32, align: u16 },
    #[error("Entry {index} `{name}`: range {offset}..{end} exceeds blob length {blob_len}")]
    OutOfBounds { index: usize, name: String, offset: u32, end: u64, blob_len: u64 },
    #[error("Entry {index} `{name}`: CRC32 {actual:08x} does not match recorded {expected:08x}")]
    ChecksumMismatch { index: usize, name: String, expected: u32, actual: u32 },
    #[error("Entry {index} `{name}` starts at {offset}, before entry {previous_index} `{previous}` ends at {previous_end}")]
    OverlapDetected {
        index:          usize,
        name:           String,
        offset:         u32,
        previous_index: usize,
        previous:       String,
        previous_end:   u64,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration for [`validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Recompute and compare CRC32s.  Ignored for version-1 manifests.
    pub verify_checksum: bool,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self { verify_checksum: true }
    }
}

/// Decode `manifest_bytes` and validate it against `blob`.
/// Returns the number of validated entries.
pub fn validate(
    blob:           &[u8],
    manifest_bytes: &[u8],
    opts:           &ValidateOptions,
) -> Result<usize, ValidationError> {
    let manifest = Manifest::from_bytes(manifest_bytes).map_err(|e| {
        warn!(error = %e, "manifest rejected");
        e
    })?;
    validate_manifest(blob, &manifest, opts)
}

/// Read both files and validate them.
pub fn validate_files(
    blob_path:     &Path,
    manifest_path: &Path,
    opts:          &ValidateOptions,
) -> Result<usize, ValidationError> {
    let blob = fs::read(blob_path)?;
    let manifest_bytes = fs::read(manifest_path)?;
    debug!(
        blob = %blob_path.display(),
        blob_len = blob.len(),
        manifest_len = manifest_bytes.len(),
        "validating files"
    );
    validate(&blob, &manifest_bytes, opts)
}

/// Validate an already decoded manifest against `blob`.
pub fn validate_manifest(
    blob:     &[u8],
    manifest: &Manifest,
    opts:     &ValidateOptions,
) -> Result<usize, ValidationError> {
    // Decoded manifests are already checked; hand-built ones may not be.
    if !is_valid_align(manifest.align) {
        return Err(ManifestError::InvalidAlignment(manifest.align).into());
    }
    let verify = opts.verify_checksum && manifest.version().has_checksums();
    let entries: Vec<EntryRef<'_>> = manifest.entries().collect();

    check_entries(blob, manifest.align, &entries, verify)
        .and_then(|()| check_overlap(&entries))
        .map_err(|e| {
            warn!(error = %e, "validation failed");
            e
        })?;

    info!(
        count = entries.len(),
        version = %manifest.version(),
        checksums = verify,
        "manifest validated"
    );
    Ok(entries.len())
}

// ── Per-entry checks ─────────────────────────────────────────────────────────

#[cfg(feature = "parallel")]
fn check_entries(blob: &[u8], align: u16, entries: &[EntryRef<'_>], verify: bool) -> Result<(), ValidationError> {
    use rayon::prelude::*;

    let results: Vec<Result<(), ValidationError>> = entries
        .par_iter()
        .map(|e| check_entry(blob, align, *e, verify))
        .collect();
    // Surface the first error in entry order.
    for r in results {
        r?;
    }
    Ok(())
}

#[cfg(not(feature = "parallel"))]
fn check_entries(blob: &[u8], align: u16, entries: &[EntryRef<'_>], verify: bool) -> Result<(), ValidationError> {
    entries
        .iter()
        .try_for_each(|e| check_entry(blob, align, *e, verify))
}

fn check_entry(blob: &[u8], align: u16, e: EntryRef<'_>, verify: bool) -> Result<(), ValidationError> {
    let entry = e.entry;
    if entry.offset % align as u32 != 0 {
        return Err(ValidationError::MisalignedOffset {
            index:  e.index,
            name:   entry.name.clone(),
            offset: entry.offset,
            align,
        });
    }
    let payload = check_bounds(blob, e)?;
    if verify {
        if let Some(expected) = e.crc32 {
            let actual = crc32(payload);
            if actual != expected {
                return Err(ValidationError::ChecksumMismatch {
                    index: e.index,
                    name: entry.name.clone(),
                    expected,
                    actual,
                });
            }
        }
    }
    debug!(index = e.index, segment = %entry.name, offset = entry.offset, size = entry.size, "entry ok");
    Ok(())
}

/// The payload slice of `e`, or `OutOfBounds` if it runs past `blob`.
pub(crate) fn check_bounds<'b>(blob: &'b [u8], e: EntryRef<'_>) -> Result<&'b [u8], ValidationError> {
    e.entry.slice(blob).ok_or_else(|| ValidationError::OutOfBounds {
        index:    e.index,
        name:     e.entry.name.clone(),
        offset:   e.entry.offset,
        end:      e.entry.end(),
        blob_len: blob.len() as u64,
    })
}

// ── Overlap ──────────────────────────────────────────────────────────────────

/// Sort by offset (stable, so ties keep write order) and compare neighbours.
/// Every entry takes part, empty ones included: a start inside the previous
/// range is an overlap whatever its size.
fn check_overlap(entries: &[EntryRef<'_>]) -> Result<(), ValidationError> {
    let mut ordered: Vec<&EntryRef<'_>> = entries.iter().collect();
    ordered.sort_by_key(|e| e.entry.offset);

    for pair in ordered.windows(2) {
        let (prev, cur) = (pair[0], pair[1]);
        if (cur.entry.offset as u64) < prev.entry.end() {
            return Err(ValidationError::OverlapDetected {
                index:          cur.index,
                name:           cur.entry.name.clone(),
                offset:         cur.entry.offset,
                previous_index: prev.index,
                previous:       prev.entry.name.clone(),
                previous_end:   prev.entry.end(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ManifestVersion;
    use crate::manifest::{CheckedEntry, EntryTable, ManifestEntry};
    use crate::pack::{pack, PackOptions, Segment};

    fn v1(align: u16, entries: &[(&str, u32, u32)]) -> Manifest {
        Manifest {
            align,
            table: EntryTable::V1(
                entries.iter().map(|(n, o, s)| ManifestEntry::new(*n, *o, *s)).collect(),
            ),
        }
    }

    fn sample() -> (Vec<u8>, Vec<u8>) {
        let segs = vec![Segment::new("a", vec![0xA5u8; 10]), Segment::new("b", vec![0x5Au8; 70])];
        pack(&segs, &PackOptions::default()).unwrap().into_bytes().unwrap()
    }

    #[test]
    fn packed_pair_validates() {
        let (blob, man) = sample();
        assert_eq!(validate(&blob, &man, &ValidateOptions::default()).unwrap(), 2);
        let bounds_only = ValidateOptions { verify_checksum: false };
        assert_eq!(validate(&blob, &man, &bounds_only).unwrap(), 2);
    }

    #[test]
    fn out_of_bounds_entry() {
        let m = v1(2, &[("w", 100, 50)]);
        let err = validate_manifest(&[0u8; 120], &m, &ValidateOptions::default()).unwrap_err();
        match err {
            ValidationError::OutOfBounds { index, name, end, blob_len, .. } => {
                assert_eq!((index, name.as_str(), end, blob_len), (0, "w", 150, 120));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn end_exactly_at_blob_len_is_in_bounds() {
        let m = v1(4, &[("w", 100, 20)]);
        assert_eq!(validate_manifest(&[0u8; 120], &m, &ValidateOptions::default()).unwrap(), 1);
    }

    #[test]
    fn bounds_do_not_wrap() {
        let m = v1(64, &[("w", 0xFFFF_FFC0, u32::MAX)]);
        let err = validate_manifest(&[0u8; 64], &m, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { end, .. } if end == 0xFFFF_FFC0u64 + u32::MAX as u64));
    }

    #[test]
    fn overlapping_entries() {
        let m = v1(32, &[("first", 0, 64), ("second", 32, 64)]);
        let err = validate_manifest(&[0u8; 96], &m, &ValidateOptions::default()).unwrap_err();
        match err {
            ValidationError::OverlapDetected { name, previous, previous_end, .. } => {
                assert_eq!((name.as_str(), previous.as_str(), previous_end), ("second", "first", 64));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn overlap_found_regardless_of_write_order() {
        let m = v1(16, &[("late", 64, 16), ("early", 0, 80)]);
        let err = validate_manifest(&[0u8; 128], &m, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::OverlapDetected { index: 0, previous_index: 1, .. }));
    }

    #[test]
    fn empty_entry_inside_another_range_overlaps() {
        let m = v1(16, &[("a", 0, 64), ("hole", 32, 0)]);
        let err = validate_manifest(&[0u8; 64], &m, &ValidateOptions::default()).unwrap_err();
        match err {
            ValidationError::OverlapDetected { index, name, offset, previous_index, previous_end, .. } => {
                assert_eq!((index, name.as_str(), offset), (1, "hole", 32));
                assert_eq!((previous_index, previous_end), (0, 64));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn empty_entry_at_boundary_is_not_an_overlap() {
        // Layout the packer produces for an empty segment between two others.
        let m = v1(16, &[("a", 0, 64), ("b", 64, 0), ("c", 64, 16)]);
        assert_eq!(validate_manifest(&[0u8; 80], &m, &ValidateOptions::default()).unwrap(), 3);
    }

    #[test]
    fn zero_alignment_is_an_error_not_a_panic() {
        let m = v1(0, &[("a", 0, 1)]);
        let err = validate_manifest(&[0u8; 4], &m, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Manifest(ManifestError::InvalidAlignment(0))));
    }

    #[test]
    fn misaligned_offset() {
        let m = v1(64, &[("a", 0, 10), ("b", 10, 10)]);
        let err = validate_manifest(&[0u8; 128], &m, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::MisalignedOffset { index: 1, offset: 10, align: 64, .. }
        ));
    }

    #[test]
    fn checksum_flip_detected_only_when_requested() {
        let (mut blob, man) = sample();
        blob[70] ^= 0x10;
        let err = validate(&blob, &man, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::ChecksumMismatch { index: 1, .. }));
        let bounds_only = ValidateOptions { verify_checksum: false };
        assert_eq!(validate(&blob, &man, &bounds_only).unwrap(), 2);
    }

    #[test]
    fn padding_changes_are_ignored() {
        let (mut blob, man) = sample();
        for b in &mut blob[10..64] {
            *b = 0xEE;
        }
        assert_eq!(validate(&blob, &man, &ValidateOptions::default()).unwrap(), 2);
    }

    #[test]
    fn v1_skips_checksums() {
        let opts = PackOptions { version: ManifestVersion::V1, ..PackOptions::default() };
        let packed = pack(&[Segment::new("a", vec![1u8; 8])], &opts).unwrap();
        let mut blob = packed.blob.clone();
        blob[0] = 9;
        assert_eq!(validate_manifest(&blob, &packed.manifest, &ValidateOptions::default()).unwrap(), 1);
    }

    #[test]
    fn version_three_is_rejected() {
        let (blob, mut man) = sample();
        man[4..6].copy_from_slice(&3u16.to_le_bytes());
        let err = validate(&blob, &man, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::Manifest(ManifestError::UnsupportedVersion(3))));
    }

    #[test]
    fn first_failure_in_entry_order_wins() {
        let m = Manifest {
            align: 64,
            table: EntryTable::V2(vec![
                CheckedEntry { entry: ManifestEntry::new("ok", 0, 4), crc32: crc32(&[0u8; 4]) },
                CheckedEntry { entry: ManifestEntry::new("oob", 64, 1000), crc32: 0 },
                CheckedEntry { entry: ManifestEntry::new("skew", 65, 1), crc32: 0 },
            ]),
        };
        let err = validate_manifest(&[0u8; 128], &m, &ValidateOptions::default()).unwrap_err();
        assert!(matches!(err, ValidationError::OutOfBounds { index: 1, .. }));
    }
}
