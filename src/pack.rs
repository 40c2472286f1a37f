//! Packer: named byte segments in, aligned blob plus manifest out.
//!
//! ```
//! use n64w::pack::{pack, PackOptions, Segment};
//!
//! let segments = vec![
//!     Segment::new("a", vec![1u8; 10]),
//!     Segment::new("b", vec![2u8; 70]),
//! ];
//! let packed = pack(&segments, &PackOptions::default())?;
//! assert_eq!(packed.blob.len(), 134);
//! assert_eq!(packed.manifest.find("b").unwrap().entry.offset, 64);
//! # Ok::<(), n64w::pack::PackError>(())
//! ```
//!
//! Packing is one sequential pass: every offset depends on the total length
//! of everything written before it.  [`Packer`] streams to any writer;
//! [`pack`] collects into memory; [`write_pair`] writes both artifacts to
//! disk through temporary files that are renamed into place only once
//! complete.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checksum::crc32;
use crate::format::{is_valid_align, padding_for, ManifestVersion, DEFAULT_ALIGN, MAX_NAME_LEN};
use crate::manifest::{CheckedEntry, EntryTable, Manifest, ManifestEntry, ManifestError};

#[derive(Error, Debug)]
pub enum PackError {
    #[error("Invalid alignment {0}: must be a non-zero power of two")]
    InvalidAlignment(u16),
    #[error("Segment {index} name is {len} bytes; the manifest limit is 65535")]
    NameTooLong { index: usize, len: usize },
    #[error("Segment `{name}` would end at byte {end}, past the 32-bit offset range")]
    BlobTooLarge { name: String, end: u64 },
    #[error("Packer stopped after an earlier write failure")]
    Aborted,
    #[error("Manifest could not be moved to {manifest}: {error} (new blob removed: {blob_removed})")]
    ManifestNotPersisted {
        manifest:     String,
        #[source]
        error:        io::Error,
        blob_removed: bool,
    },
    #[error("Manifest encoding failed: {0}")]
    Manifest(#[from] ManifestError),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PackError {
    /// The arguments were unusable, as opposed to the output failing.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            PackError::InvalidAlignment(_) | PackError::NameTooLong { .. } | PackError::BlobTooLarge { .. }
        )
    }
}

// ── Inputs ───────────────────────────────────────────────────────────────────

/// One named payload handed over by an exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub name:  String,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), bytes: bytes.into() }
    }
}

/// Configuration for [`pack`], [`Packer`] and [`write_pair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    pub align:   u16,
    /// `V2` records a CRC32 per entry; `V1` does not.
    pub version: ManifestVersion,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            align:   DEFAULT_ALIGN,
            version: ManifestVersion::LATEST,
        }
    }
}

// ── Packer ───────────────────────────────────────────────────────────────────

pub struct Packer<W: Write> {
    writer:   W,
    manifest: Manifest,
    /// Bytes written to `writer` so far; the blob has no other length source.
    position: u64,
    /// Set once a write fails.  The writer may hold a partial segment, so
    /// `position` no longer describes it.
    failed:   bool,
}

impl<W: Write> Packer<W> {
    pub fn new(writer: W, opts: &PackOptions) -> Result<Self, PackError> {
        if !is_valid_align(opts.align) {
            return Err(PackError::InvalidAlignment(opts.align));
        }
        Ok(Self {
            writer,
            manifest: Manifest::new(opts.version, opts.align),
            position: 0,
            failed:   false,
        })
    }

    /// Append one segment: pad to the alignment boundary, write the payload,
    /// record the entry.  Arguments are checked before anything is written.
    /// Returns the segment's offset.
    ///
    /// After an I/O error every later call fails with [`PackError::Aborted`].
    pub fn add_segment(&mut self, name: &str, data: &[u8]) -> Result<u32, PackError> {
        if self.failed {
            return Err(PackError::Aborted);
        }
        let index = self.manifest.len();
        if name.len() > MAX_NAME_LEN {
            return Err(PackError::NameTooLong { index, len: name.len() });
        }

        let pad = padding_for(self.position, self.manifest.align);
        let start = self.position + pad;
        let end = start + data.len() as u64;
        if end > u32::MAX as u64 {
            return Err(PackError::BlobTooLarge { name: name.to_owned(), end });
        }
        let offset = start as u32;
        let size = data.len() as u32;

        if let Err(e) = self.write_padded(pad, data) {
            self.failed = true;
            return Err(e.into());
        }
        self.position = end;

        let entry = ManifestEntry::new(name, offset, size);
        match &mut self.manifest.table {
            EntryTable::V1(entries) => entries.push(entry),
            EntryTable::V2(entries) => entries.push(CheckedEntry { entry, crc32: crc32(data) }),
        }
        debug!(index, segment = name, offset, size, pad, "packed segment");
        Ok(offset)
    }

    fn write_padded(&mut self, pad: u64, data: &[u8]) -> io::Result<()> {
        io::copy(&mut io::repeat(0).take(pad), &mut self.writer)?;
        self.writer.write_all(data)
    }

    /// Blob length so far.  No trailing padding is ever added.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Flush the writer and hand back it and the finished manifest.
    pub fn finish(mut self) -> Result<(W, Manifest), PackError> {
        if self.failed {
            return Err(PackError::Aborted);
        }
        self.writer.flush()?;
        info!(
            count = self.manifest.len(),
            blob_len = self.position,
            version = %self.manifest.version(),
            align = self.manifest.align,
            "pack complete"
        );
        Ok((self.writer, self.manifest))
    }
}

// ── In-memory ────────────────────────────────────────────────────────────────

/// Result of [`pack`]: the blob and the manifest describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub blob:     Vec<u8>,
    pub manifest: Manifest,
}

impl Packed {
    pub fn manifest_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        self.manifest.to_bytes()
    }

    /// `(blob_bytes, manifest_bytes)`.
    pub fn into_bytes(self) -> Result<(Vec<u8>, Vec<u8>), PackError> {
        let manifest = self.manifest.to_bytes()?;
        Ok((self.blob, manifest))
    }
}

pub fn pack(segments: &[Segment], opts: &PackOptions) -> Result<Packed, PackError> {
    let mut packer = Packer::new(Vec::new(), opts)?;
    for seg in segments {
        packer.add_segment(&seg.name, &seg.bytes)?;
    }
    let (blob, manifest) = packer.finish()?;
    Ok(Packed { blob, manifest })
}

// ── On disk ──────────────────────────────────────────────────────────────────

/// Pack `segments` straight to `blob_path` and `manifest_path`.
///
/// Both artifacts are first written in full to temporary files next to their
/// destinations and synced.  Only then is the blob renamed into place,
/// followed by the manifest.  Any failure before the renames drops the
/// temporaries and leaves the destinations untouched.  If the manifest
/// rename fails, the freshly renamed blob is removed so it never sits beside
/// a manifest that does not describe it.
pub fn write_pair(
    blob_path:     &Path,
    manifest_path: &Path,
    segments:      &[Segment],
    opts:          &PackOptions,
) -> Result<Manifest, PackError> {
    let blob_tmp = NamedTempFile::new_in(parent_dir(blob_path))?;
    let mut packer = Packer::new(BufWriter::new(blob_tmp), opts)?;
    for seg in segments {
        packer.add_segment(&seg.name, &seg.bytes)?;
    }
    let (writer, manifest) = packer.finish()?;
    let blob_tmp = writer.into_inner().map_err(|e| e.into_error())?;
    blob_tmp.as_file().sync_all()?;

    let mut man_tmp = NamedTempFile::new_in(parent_dir(manifest_path))?;
    {
        let mut w = BufWriter::new(man_tmp.as_file_mut());
        manifest.write(&mut w)?;
        w.flush()?;
    }
    man_tmp.as_file().sync_all()?;

    blob_tmp.persist(blob_path).map_err(|e| e.error)?;
    if let Err(e) = man_tmp.persist(manifest_path) {
        let blob_removed = match fs::remove_file(blob_path) {
            Ok(()) => true,
            Err(rm) => {
                warn!(blob = %blob_path.display(), error = %rm, "could not remove orphaned blob");
                false
            }
        };
        return Err(PackError::ManifestNotPersisted {
            manifest: manifest_path.display().to_string(),
            error:    e.error,
            blob_removed,
        });
    }
    sync_dir(parent_dir(blob_path));
    sync_dir(parent_dir(manifest_path));

    info!(blob = %blob_path.display(), manifest = %manifest_path.display(), "artifacts written");
    Ok(manifest)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

// Directory fsync makes the rename durable on POSIX.  Some platforms cannot
// open a directory as a file, so failure here is only logged.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory sync skipped");
    }
}
