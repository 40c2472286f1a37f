pub mod format;
pub mod manifest;
pub mod checksum;
pub mod pack;
pub mod validate;
pub mod export;
pub mod debug;

pub use format::{ManifestVersion, DEFAULT_ALIGN, MAGIC};
pub use manifest::{CheckedEntry, EntryRef, EntryTable, Manifest, ManifestEntry, ManifestError};
pub use pack::{pack, write_pair, PackError, PackOptions, Packed, Packer, Segment};
pub use validate::{validate, validate_files, validate_manifest, ValidateOptions, ValidationError};
