//! In-memory manifest model and its byte encoding.
//!
//! The per-entry checksum is not an optional field on one record type: the
//! entry table itself is tagged by version.  A [`EntryTable::V1`] holds plain
//! [`ManifestEntry`] values and its decoder never touches checksum bytes; a
//! [`EntryTable::V2`] holds [`CheckedEntry`] values.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::io::{self, Write};
use std::ops::Range;
use thiserror::Error;

use crate::format::{is_valid_align, ManifestVersion, HEADER_SIZE, MAGIC, MAX_NAME_LEN};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid magic: expected \"N64W\", found {found:02x?}")]
    BadMagic { found: [u8; 4] },
    #[error("Unsupported manifest version: {0}")]
    UnsupportedVersion(u16),
    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(u16),
    #[error("Manifest truncated in header: need {needed} bytes, {available} available")]
    TruncatedHeader { needed: usize, available: usize },
    #[error("Manifest truncated at entry {index} ({field}): need {needed} bytes at offset {offset}, {available} available")]
    TruncatedEntry {
        index:     u32,
        field:     &'static str,
        offset:    usize,
        needed:    usize,
        available: usize,
    },
    #[error("Entry {index} name is not valid UTF-8")]
    InvalidName { index: u32 },
    #[error("Entry name `{name}` is {len} bytes; the limit is 65535")]
    NameTooLong { name: String, len: usize },
    #[error("Manifest has {0} entries; the limit is u32::MAX")]
    TooManyEntries(usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Entries ──────────────────────────────────────────────────────────────────

/// Placement of one segment inside the blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManifestEntry {
    pub name:   String,
    pub offset: u32,
    pub size:   u32,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>, offset: u32, size: u32) -> Self {
        Self { name: name.into(), offset, size }
    }

    /// One past the last payload byte.  Computed in u64 so it never wraps.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    #[inline]
    pub fn byte_range(&self) -> Range<u64> {
        self.offset as u64..self.end()
    }

    /// Payload bytes of this entry, or `None` if the range runs past `blob`.
    pub fn slice<'b>(&self, blob: &'b [u8]) -> Option<&'b [u8]> {
        if self.end() > blob.len() as u64 {
            return None;
        }
        Some(&blob[self.offset as usize..self.end() as usize])
    }

    fn write<W: Write>(&self, mut writer: W) -> Result<(), ManifestError> {
        let name = self.name.as_bytes();
        if name.len() > MAX_NAME_LEN {
            return Err(ManifestError::NameTooLong { name: self.name.clone(), len: name.len() });
        }
        writer.write_u16::<LittleEndian>(name.len() as u16)?;
        writer.write_all(name)?;
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, index: u32) -> Result<Self, ManifestError> {
        let name_len = dec.u16(index, "name_len")? as usize;
        let name_bytes = dec.take(index, "name", name_len)?;
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| ManifestError::InvalidName { index })?
            .to_owned();
        let offset = dec.u32(index, "offset")?;
        let size = dec.u32(index, "size")?;
        Ok(Self { name, offset, size })
    }
}

/// A version-2 entry: placement plus the CRC32 of exactly `size` payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckedEntry {
    pub entry: ManifestEntry,
    pub crc32: u32,
}

impl CheckedEntry {
    fn write<W: Write>(&self, mut writer: W) -> Result<(), ManifestError> {
        self.entry.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.crc32)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>, index: u32) -> Result<Self, ManifestError> {
        let entry = ManifestEntry::decode(dec, index)?;
        let crc32 = dec.u32(index, "crc32")?;
        Ok(Self { entry, crc32 })
    }
}

/// Entry table tagged by manifest version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTable {
    V1(Vec<ManifestEntry>),
    V2(Vec<CheckedEntry>),
}

impl EntryTable {
    pub fn empty(version: ManifestVersion) -> Self {
        match version {
            ManifestVersion::V1 => EntryTable::V1(Vec::new()),
            ManifestVersion::V2 => EntryTable::V2(Vec::new()),
        }
    }

    pub fn version(&self) -> ManifestVersion {
        match self {
            EntryTable::V1(_) => ManifestVersion::V1,
            EntryTable::V2(_) => ManifestVersion::V2,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            EntryTable::V1(v) => v.len(),
            EntryTable::V2(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<EntryRef<'_>> {
        match self {
            EntryTable::V1(v) => v.get(index).map(|entry| EntryRef { index, entry, crc32: None }),
            EntryTable::V2(v) => v.get(index).map(|c| EntryRef {
                index,
                entry: &c.entry,
                crc32: Some(c.crc32),
            }),
        }
    }
}

/// Borrowed, version-agnostic view of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef<'a> {
    /// Position in write order.
    pub index: usize,
    pub entry: &'a ManifestEntry,
    /// Recorded checksum; `None` for version-1 manifests.
    pub crc32: Option<u32>,
}

impl<'a> EntryRef<'a> {
    #[inline]
    pub fn name(&self) -> &'a str {
        &self.entry.name
    }
}

/// Iterator over a manifest's entries in write order.
pub struct Entries<'a> {
    table: &'a EntryTable,
    next:  usize,
}

impl<'a> Iterator for Entries<'a> {
    type Item = EntryRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.table.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.table.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Entries<'_> {}

// ── Manifest ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub align: u16,
    pub table: EntryTable,
}

impl Manifest {
    pub fn new(version: ManifestVersion, align: u16) -> Self {
        Self { align, table: EntryTable::empty(version) }
    }

    pub fn version(&self) -> ManifestVersion {
        self.table.version()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn entries(&self) -> Entries<'_> {
        Entries { table: &self.table, next: 0 }
    }

    /// First entry named `name`, in write order.  Names are unique by
    /// convention only, so later duplicates are shadowed.
    pub fn find(&self, name: &str) -> Option<EntryRef<'_>> {
        self.entries().find(|e| e.entry.name == name)
    }

    /// Locate a named segment's payload inside `blob`.
    pub fn segment<'b>(&self, blob: &'b [u8], name: &str) -> Option<&'b [u8]> {
        self.find(name)?.entry.slice(blob)
    }

    /// Sum of all entry sizes (padding excluded).
    pub fn payload_bytes(&self) -> u64 {
        self.entries().map(|e| e.entry.size as u64).sum()
    }

    /// Exact number of bytes [`Manifest::write`] produces.
    pub fn encoded_len(&self) -> usize {
        let fixed = self.version().entry_fixed_len();
        HEADER_SIZE + self.entries().map(|e| fixed + e.entry.name.len()).sum::<usize>()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), ManifestError> {
        let count = u32::try_from(self.len())
            .map_err(|_| ManifestError::TooManyEntries(self.len()))?;
        writer.write_all(MAGIC)?;
        writer.write_u16::<LittleEndian>(self.version().as_u16())?;
        writer.write_u16::<LittleEndian>(self.align)?;
        writer.write_u32::<LittleEndian>(count)?;
        match &self.table {
            EntryTable::V1(entries) => {
                for e in entries {
                    e.write(&mut writer)?;
                }
            }
            EntryTable::V2(entries) => {
                for e in entries {
                    e.write(&mut writer)?;
                }
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.write(&mut out)?;
        Ok(out)
    }

    /// Decode a manifest.  Bytes past the last declared entry are ignored;
    /// `count` is authoritative.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ManifestError::TruncatedHeader {
                needed:    HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let mut found = [0u8; 4];
        found.copy_from_slice(&bytes[0..4]);
        if &found != MAGIC {
            return Err(ManifestError::BadMagic { found });
        }
        let raw_version = LittleEndian::read_u16(&bytes[4..6]);
        let version = ManifestVersion::from_u16(raw_version)
            .ok_or(ManifestError::UnsupportedVersion(raw_version))?;
        let align = LittleEndian::read_u16(&bytes[6..8]);
        if !is_valid_align(align) {
            return Err(ManifestError::InvalidAlignment(align));
        }
        let count = LittleEndian::read_u32(&bytes[8..12]);

        let mut dec = Decoder { bytes, pos: HEADER_SIZE };
        // A hostile count must not drive the allocation.
        let cap = (count as usize).min(dec.remaining() / version.entry_fixed_len());
        let table = match version {
            ManifestVersion::V1 => {
                let mut entries = Vec::with_capacity(cap);
                for index in 0..count {
                    entries.push(ManifestEntry::decode(&mut dec, index)?);
                }
                EntryTable::V1(entries)
            }
            ManifestVersion::V2 => {
                let mut entries = Vec::with_capacity(cap);
                for index in 0..count {
                    entries.push(CheckedEntry::decode(&mut dec, index)?);
                }
                EntryTable::V2(entries)
            }
        };
        Ok(Self { align, table })
    }
}

// ── Decoder ──────────────────────────────────────────────────────────────────

struct Decoder<'a> {
    bytes: &'a [u8],
    pos:   usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, index: u32, field: &'static str, len: usize) -> Result<&'a [u8], ManifestError> {
        let available = self.remaining();
        if available < len {
            return Err(ManifestError::TruncatedEntry {
                index,
                field,
                offset: self.pos,
                needed: len,
                available,
            });
        }
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn u16(&mut self, index: u32, field: &'static str) -> Result<u16, ManifestError> {
        Ok(LittleEndian::read_u16(self.take(index, field, 2)?))
    }

    fn u32(&mut self, index: u32, field: &'static str) -> Result<u32, ManifestError> {
        Ok(LittleEndian::read_u32(self.take(index, field, 4)?))
    }
}
