//! Local file header and central directory file header (§4.2).

use winnow::{
    binary::{le_u16, le_u32},
    seq,
    token::take,
    PResult, Parser,
};

use super::{raw::read_u32, MsdosTimestamp, Version, LOCAL_FILE_HEADER_SIG};

/// The 30-byte-fixed local file header that precedes each entry's payload
/// (§4.2). Name and extra-field bytes follow the fixed part; this struct
/// holds their *lengths*, since the bytes themselves are read separately
/// (the name may need charset detection across the whole archive first).
#[derive(Debug, Clone)]
pub struct LocalFileHeaderRecord {
    /// `version needed to extract`.
    pub reader_version: Version,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method (raw on-disk value; see [`super::Method`]).
    pub method: u16,
    /// Last-modified timestamp, DOS-packed.
    pub modified: MsdosTimestamp,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size in bytes.
    pub compressed_size: u32,
    /// Uncompressed ("original") size in bytes.
    pub uncompressed_size: u32,
    /// Length of the name field that follows.
    pub name_len: u16,
    /// Length of the extra field that follows.
    pub extra_len: u16,
}

impl LocalFileHeaderRecord {
    /// Parse the fixed 30-byte portion; caller reads `name_len` +
    /// `extra_len` bytes afterwards.
    pub fn parser(i: &mut &[u8]) -> PResult<Self> {
        let _sig = winnow::binary::le_u32
            .verify(|v| *v == LOCAL_FILE_HEADER_SIG)
            .parse_next(i)?;
        seq! {Self {
            reader_version: Version::parser,
            flags: le_u16,
            method: le_u16,
            modified: MsdosTimestamp::parser,
            crc32: le_u32,
            compressed_size: le_u32,
            uncompressed_size: le_u32,
            name_len: le_u16,
            extra_len: le_u16,
        }}
        .parse_next(i)
    }

    /// Whether bit 3 of the general-purpose flag is set, meaning sizes and
    /// CRC live in a trailing data descriptor rather than this header.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & 0b1000 != 0
    }

    /// Whether bit 11 is set, meaning name/comment are UTF-8.
    pub fn is_utf8(&self) -> bool {
        self.flags & 0x800 != 0
    }

    /// Serialize the fixed portion (without name/extra) to `out`.
    #[allow(clippy::too_many_arguments)]
    pub fn write(
        out: &mut Vec<u8>,
        reader_version: Version,
        flags: u16,
        method: u16,
        modified: MsdosTimestamp,
        crc32: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        name_len: u16,
        extra_len: u16,
    ) {
        out.extend_from_slice(&super::LOCAL_FILE_HEADER_SIG.to_le_bytes());
        reader_version.write(out);
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&method.to_le_bytes());
        modified.write(out);
        out.extend_from_slice(&crc32.to_le_bytes());
        out.extend_from_slice(&compressed_size.to_le_bytes());
        out.extend_from_slice(&uncompressed_size.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&extra_len.to_le_bytes());
    }
}

/// The 46-byte-fixed central directory file header (§4.2). Appears once
/// per entry inside the central directory; carries everything the local
/// header does plus the entry's offset, comment, and external attributes.
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    /// `version made by`.
    pub made_by: Version,
    /// `version needed to extract`.
    pub reader_version: Version,
    /// General purpose bit flag.
    pub flags: u16,
    /// Compression method.
    pub method: u16,
    /// Last-modified timestamp, DOS-packed.
    pub modified: MsdosTimestamp,
    /// CRC-32 of the uncompressed data.
    pub crc32: u32,
    /// Compressed size.
    pub compressed_size: u32,
    /// Uncompressed size.
    pub uncompressed_size: u32,
    /// Length of the name field.
    pub name_len: u16,
    /// Length of the extra field.
    pub extra_len: u16,
    /// Length of the comment field.
    pub comment_len: u16,
    /// Disk number this entry starts on (always 0; no multi-disk support).
    pub disk_number: u16,
    /// Internal file attributes.
    pub internal_attrs: u16,
    /// External file attributes (permission bits, per §4.2).
    pub external_attrs: u32,
    /// Offset of the local file header from the start of the archive.
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader {
    /// Parse the fixed 46-byte portion (after the 4-byte signature has
    /// already been consumed by the caller).
    pub fn parser(i: &mut &[u8]) -> PResult<Self> {
        seq! {Self {
            made_by: Version::parser,
            reader_version: Version::parser,
            flags: le_u16,
            method: le_u16,
            modified: MsdosTimestamp::parser,
            crc32: le_u32,
            compressed_size: le_u32,
            uncompressed_size: le_u32,
            name_len: le_u16,
            extra_len: le_u16,
            comment_len: le_u16,
            disk_number: le_u16,
            internal_attrs: le_u16,
            external_attrs: read_u32,
            local_header_offset: read_u32,
        }}
        .parse_next(i)
    }

    /// Skip `n` bytes, for callers that only want the fixed header.
    pub fn skip(i: &mut &[u8], n: usize) -> PResult<()> {
        take(n).void().parse_next(i)
    }

    /// Serialize the fixed portion (without name/extra/comment) to `out`.
    #[allow(clippy::too_many_arguments)]
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&super::CENTRAL_DIRECTORY_SIG.to_le_bytes());
        self.made_by.write(out);
        self.reader_version.write(out);
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        self.modified.write(out);
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&self.name_len.to_le_bytes());
        out.extend_from_slice(&self.extra_len.to_le_bytes());
        out.extend_from_slice(&self.comment_len.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.internal_attrs.to_le_bytes());
        out.extend_from_slice(&self.external_attrs.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
    }
}
