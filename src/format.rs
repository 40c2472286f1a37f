//! Wire-level constants shared by the packer and the validator.
//!
//! # Manifest layout
//! All integers are little-endian.  There is no runtime negotiation.
//!
//! ```text
//! offset 0:  magic     [u8; 4]   "N64W"
//! offset 4:  version   u16       1 = no checksums, 2 = CRC32 per entry
//! offset 6:  align     u16       power of two, 64 in practice
//! offset 8:  count     u32
//! offset 12: entries[count]
//!     name_len  u16
//!     name      name_len bytes, UTF-8
//!     offset    u32
//!     size      u32
//!     crc32     u32   (version 2 only)
//! ```
//!
//! The blob has no header of its own; every byte of structure lives in the
//! manifest.

/// Manifest magic tag.
pub const MAGIC: &[u8; 4] = b"N64W";
/// Byte length of the fixed manifest header.
pub const HEADER_SIZE: usize = 12;
/// Alignment used by every exporter in practice.
pub const DEFAULT_ALIGN: u16 = 64;
/// Longest name the u16 length prefix can describe.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

// ── Version ──────────────────────────────────────────────────────────────────

/// Manifest format version.  The version is a strict contract for the entry
/// width: a decoder never guesses at fields for a version it does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum ManifestVersion {
    /// Entries carry `name`, `offset`, `size`.
    V1 = 1,
    /// Entries additionally carry a CRC32 of the payload.
    V2 = 2,
}

impl ManifestVersion {
    pub const LATEST: ManifestVersion = ManifestVersion::V2;

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(ManifestVersion::V1),
            2 => Some(ManifestVersion::V2),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    #[inline]
    pub fn has_checksums(self) -> bool {
        matches!(self, ManifestVersion::V2)
    }

    /// Bytes per entry excluding the variable-length name.
    #[inline]
    pub fn entry_fixed_len(self) -> usize {
        match self {
            ManifestVersion::V1 => 2 + 4 + 4,
            ManifestVersion::V2 => 2 + 4 + 4 + 4,
        }
    }
}

impl Default for ManifestVersion {
    fn default() -> Self {
        ManifestVersion::LATEST
    }
}

impl std::fmt::Display for ManifestVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.as_u16())
    }
}

// ── Alignment ────────────────────────────────────────────────────────────────

#[inline]
pub fn is_valid_align(align: u16) -> bool {
    align != 0 && align.is_power_of_two()
}

/// Zero bytes needed after `len` bytes so the next write lands on `align`.
/// `align` must be a non-zero power of two.
#[inline]
pub fn padding_for(len: u64, align: u16) -> u64 {
    len.wrapping_neg() & (align as u64 - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_reaches_next_boundary() {
        assert_eq!(padding_for(0, 64), 0);
        assert_eq!(padding_for(10, 64), 54);
        assert_eq!(padding_for(64, 64), 0);
        assert_eq!(padding_for(65, 64), 63);
        assert_eq!(padding_for(7, 1), 0);
        assert_eq!(padding_for(3, 4), 1);
    }

    #[test]
    fn align_must_be_power_of_two() {
        assert!(is_valid_align(1));
        assert!(is_valid_align(64));
        assert!(is_valid_align(32768));
        assert!(!is_valid_align(0));
        assert!(!is_valid_align(48));
    }

    #[test]
    fn version_gates_entry_width() {
        assert_eq!(ManifestVersion::from_u16(1), Some(ManifestVersion::V1));
        assert_eq!(ManifestVersion::from_u16(2), Some(ManifestVersion::V2));
        assert_eq!(ManifestVersion::from_u16(0), None);
        assert_eq!(ManifestVersion::from_u16(3), None);
        assert_eq!(ManifestVersion::V1.entry_fixed_len(), 10);
        assert_eq!(ManifestVersion::V2.entry_fixed_len(), 14);
        assert!(!ManifestVersion::V1.has_checksums());
        assert!(ManifestVersion::V2.has_checksums());
    }
}
