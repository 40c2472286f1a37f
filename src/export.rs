use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::format::padding_for;
use crate::manifest::Manifest;

/// JSON sidecar describing one export, kept for reproducibility.
///
/// The record is informational: loaders never read it, and validation never
/// depends on it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ExportRecord {
    pub export_id:     Uuid,
    /// RFC 3339, UTC.
    pub created_at:    String,
    pub blob:          String,
    pub manifest:      String,
    pub version:       u16,
    pub align:         u16,
    pub count:         usize,
    /// Sum of entry sizes, padding excluded.
    pub payload_bytes: u64,
    pub blob_len:      u64,
    pub padding_bytes: u64,
    /// BLAKE3 of the whole blob, hex.
    pub blob_blake3:   String,
}

impl ExportRecord {
    pub fn describe(blob_path: &Path, manifest_path: &Path, manifest: &Manifest, blob: &[u8]) -> Self {
        let payload_bytes = manifest.payload_bytes();
        let blob_len = blob.len() as u64;
        Self {
            export_id:     Uuid::new_v4(),
            created_at:    chrono::Utc::now().to_rfc3339(),
            blob:          blob_path.display().to_string(),
            manifest:      manifest_path.display().to_string(),
            version:       manifest.version().as_u16(),
            align:         manifest.align,
            count:         manifest.len(),
            payload_bytes,
            blob_len,
            padding_bytes: blob_len.saturating_sub(payload_bytes),
            blob_blake3:   hex::encode(blake3::hash(blob).as_bytes()),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Whether `blob` is byte-identical to the one this record describes.
    pub fn matches_blob(&self, blob: &[u8]) -> bool {
        blob.len() as u64 == self.blob_len && hex::encode(blake3::hash(blob).as_bytes()) == self.blob_blake3
    }
}

/// Padding the packer inserts for a manifest laid out in write order.
/// Equals `blob_len - payload_bytes` for packer output.
pub fn expected_padding(manifest: &Manifest) -> u64 {
    let mut pos = 0u64;
    let mut pad = 0u64;
    for e in manifest.entries() {
        let p = padding_for(pos, manifest.align);
        pad += p;
        pos += p + e.entry.size as u64;
    }
    pad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{pack, PackOptions, Segment};

    #[test]
    fn record_roundtrips_through_json() {
        let segs = vec![Segment::new("a", vec![1u8; 10]), Segment::new("b", vec![2u8; 70])];
        let packed = pack(&segs, &PackOptions::default()).unwrap();
        let rec = ExportRecord::describe(
            Path::new("weights.bin"),
            Path::new("weights.manifest.bin"),
            &packed.manifest,
            &packed.blob,
        );
        assert_eq!(rec.count, 2);
        assert_eq!(rec.payload_bytes, 80);
        assert_eq!(rec.blob_len, 134);
        assert_eq!(rec.padding_bytes, 54);
        assert_eq!(rec.padding_bytes, expected_padding(&packed.manifest));
        assert_eq!(rec.version, 2);
        assert!(chrono::DateTime::parse_from_rfc3339(&rec.created_at).is_ok());

        let back = ExportRecord::from_bytes(&rec.to_bytes().unwrap()).unwrap();
        assert_eq!(back, rec);
        assert!(back.matches_blob(&packed.blob));

        let mut tampered = packed.blob.clone();
        tampered[0] ^= 1;
        assert!(!back.matches_blob(&tampered));
    }
}
