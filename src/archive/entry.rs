//! In-archive entries (§3.1).

use crate::archive::format::{ArcPermissions, Mode, MsdosTimestamp};

/// One record inside an archive: a file, folder, or symlink, plus its
/// byte offset into the backing stream (§3.1).
///
/// Entries live in insertion order inside [`super::Archive`]'s index; that
/// order is the order they were written (or, for a loaded archive, the
/// order the central directory lists them in).
#[derive(Debug, Clone)]
pub struct Entry {
    /// UTF-8 path, `/`-separated. A trailing `/` denotes a folder. Any
    /// leading `./` is stripped on ingest.
    pub name: String,
    /// Optional per-entry comment.
    pub comment: Option<String>,
    /// What kind of entry this is.
    pub mode: Mode,
    /// Raw on-disk compression method (0 = store, 8 = deflate).
    pub method: u16,
    /// Last-modified timestamp, DOS-packed.
    pub modified: MsdosTimestamp,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size in bytes.
    pub compressed_size: u64,
    /// Uncompressed ("original") size in bytes.
    pub uncompressed_size: u64,
    /// Permission bits, when this archive's custom encoding was present
    /// (§4.2); `None` means "use the archive's default mask".
    pub permissions: Option<ArcPermissions>,
    /// Byte offset of this entry's local file header from the start of
    /// the backing stream.
    pub offset: u64,
}

impl Entry {
    /// Strip a leading `./` from a raw entry name, per §3.1's ingest rule.
    pub fn normalize_name(name: &str) -> String {
        name.strip_prefix("./").unwrap_or(name).to_string()
    }

    /// Whether `name` denotes a folder under the `/`-is-a-folder-suffix
    /// convention.
    pub fn is_folder_name(name: &str) -> bool {
        name.ends_with('/')
    }

    /// `offset + LOCAL_HEADER_LEN + name_len + extra_len +
    /// compressed_size`: the byte position immediately after this
    /// entry's payload, i.e. where the next entry (or the central
    /// directory) begins.
    pub fn end_offset(&self) -> u64 {
        self.offset
            + crate::archive::format::LOCAL_HEADER_LEN
            + self.name.len() as u64
            + self.compressed_size
    }

    /// `(year, month, day, hour, minute, second)` derived from the DOS
    /// timestamp, used by feedback records (§4.5).
    pub fn modified_parts(&self) -> (i32, u32, u32, u32, u32, u32) {
        self.modified.to_parts()
    }
}

/// A flattened, read-only view of an [`Entry`] surfaced to callers that
/// just want to enumerate an archive's contents (§3.1).
#[derive(Debug, Clone)]
pub struct CompressedItem {
    /// Entry path.
    pub path: String,
    /// Last-modified timestamp.
    pub modified: chrono::NaiveDateTime,
    /// Uncompressed size.
    pub original_size: u64,
    /// Compressed size.
    pub compressed_size: u64,
    /// Entry kind flags.
    pub flags: CompressedItemFlags,
    /// Effective permission bits (custom layout if present, else the
    /// archive's default).
    pub permissions: ArcPermissions,
}

/// Kind flags surfaced on a [`CompressedItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedItemFlags {
    /// Entry is a regular file.
    pub file: bool,
    /// Entry is a folder.
    pub folder: bool,
    /// Entry is a symlink.
    pub link: bool,
}

impl From<&Entry> for CompressedItem {
    fn from(e: &Entry) -> Self {
        CompressedItem {
            path: e.name.clone(),
            modified: e.modified.to_datetime(),
            original_size: e.uncompressed_size,
            compressed_size: e.compressed_size,
            flags: CompressedItemFlags {
                file: e.mode.is_file,
                folder: e.mode.is_folder,
                link: e.mode.is_link,
            },
            permissions: e.permissions.unwrap_or_default(),
        }
    }
}
