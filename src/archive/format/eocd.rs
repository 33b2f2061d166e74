//! End of central directory record (§4.2, §4.3).

use winnow::{
    binary::{le_u16, le_u32},
    seq, PResult, Parser,
};

use super::END_OF_CENTRAL_DIRECTORY_SIG;

/// The 22-byte-fixed trailer that locates the central directory. Always
/// the last thing in a well-formed archive (modulo a trailing comment).
#[derive(Debug, Clone, Copy)]
pub struct EndOfCentralDirectoryRecord {
    /// Number of this disk (always 0; no multi-disk support).
    pub this_disk: u16,
    /// Disk where the central directory starts (always 0).
    pub cd_disk: u16,
    /// Number of central directory entries on this disk.
    pub disk_entries: u16,
    /// Total number of central directory entries.
    pub total_entries: u16,
    /// Size in bytes of the central directory.
    pub cd_size: u32,
    /// Offset of the central directory from the start of the archive.
    pub cd_offset: u32,
    /// Length of the trailing comment.
    pub comment_len: u16,
}

impl EndOfCentralDirectoryRecord {
    /// Fixed length of this record, not counting the comment.
    pub const LEN: u64 = super::EOCD_LEN;

    /// Parse, including and validating the leading signature.
    pub fn parser(i: &mut &[u8]) -> PResult<Self> {
        let _sig = winnow::binary::le_u32
            .verify(|v| *v == END_OF_CENTRAL_DIRECTORY_SIG)
            .parse_next(i)?;
        seq! {Self {
            this_disk: le_u16,
            cd_disk: le_u16,
            disk_entries: le_u16,
            total_entries: le_u16,
            cd_size: le_u32,
            cd_offset: le_u32,
            comment_len: le_u16,
        }}
        .parse_next(i)
    }

    /// Serialize, including the leading signature, to `out`. The trailing
    /// comment (if any) must be appended by the caller.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&END_OF_CENTRAL_DIRECTORY_SIG.to_le_bytes());
        out.extend_from_slice(&self.this_disk.to_le_bytes());
        out.extend_from_slice(&self.cd_disk.to_le_bytes());
        out.extend_from_slice(&self.disk_entries.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&self.comment_len.to_le_bytes());
    }
}
