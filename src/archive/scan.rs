//! Central-directory scanner: fast-path EOCD read, fallback linear scan
//! (§2.1 "Central-directory scanner", §4.3).

use std::io::{Read, Seek, SeekFrom};

use crate::archive::encoding::Encoding;
use crate::archive::entry::Entry;
use crate::archive::error::Error;
use crate::archive::format::{
    ArcPermissions, CentralDirectoryHeader, EndOfCentralDirectoryRecord, LocalFileHeaderRecord,
    Mode, Version, CENTRAL_DIRECTORY_SIG, END_OF_CENTRAL_DIRECTORY_SIG, LOCAL_FILE_HEADER_SIG,
};

/// Result of scanning an archive: its entries in on-disk order, plus the
/// detected text encoding for names/comments.
pub struct ScanResult {
    /// Entries in the order the central directory (or fallback scan)
    /// produced them.
    pub entries: Vec<Entry>,
    /// Detected encoding for entry names/comments.
    pub encoding: Encoding,
}

/// Scan a backing stream for its central directory (§4.3).
///
/// Step 1 (empty-archive / signature check) is the caller's
/// responsibility, matching the teacher's `ArchiveReader`, which inspects
/// the first bytes before deciding how to proceed.
pub fn scan<S: Read + Seek>(stream: &mut S) -> Result<ScanResult, Error> {
    match scan_fast(stream) {
        Ok(entries) => Ok(finish_scan(entries)),
        Err(_) => {
            let entries = scan_fallback(stream)?;
            Ok(finish_scan(entries))
        }
    }
}

fn finish_scan(raw: Vec<RawEntry>) -> ScanResult {
    let encoding = Encoding::detect(
        raw.iter()
            .map(|e| (e.name_bytes.clone(), e.flags)),
    );
    let entries = raw
        .into_iter()
        .map(|r| r.into_entry(encoding))
        .collect();
    ScanResult { entries, encoding }
}

/// A central-directory record before name-decoding, kept byte-accurate so
/// the detector can see every entry's raw name bytes before any entry is
/// finalized.
struct RawEntry {
    name_bytes: Vec<u8>,
    comment_bytes: Vec<u8>,
    flags: u16,
    method: u16,
    modified: crate::archive::format::MsdosTimestamp,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    external_attrs: u32,
    made_by: Version,
    local_header_offset: u64,
}

impl RawEntry {
    fn into_entry(self, encoding: Encoding) -> Entry {
        let name = Entry::normalize_name(
            &encoding
                .decode(&self.name_bytes)
                .unwrap_or_else(|_| String::from_utf8_lossy(&self.name_bytes).into_owned()),
        );
        let comment = if self.comment_bytes.is_empty() {
            None
        } else {
            Some(
                encoding
                    .decode(&self.comment_bytes)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&self.comment_bytes).into_owned()),
            )
        };
        let permissions = if self.made_by.host_system == Version::HOST_OS_MARKER {
            Some(ArcPermissions(self.external_attrs))
        } else {
            None
        };
        let is_link = permissions.map(|p| p.is_link()).unwrap_or(false);
        let is_folder = !is_link && Entry::is_folder_name(&name) && self.uncompressed_size == 0;
        let mode = if is_link {
            Mode::LINK
        } else if is_folder {
            Mode::FOLDER
        } else {
            Mode::FILE
        };
        Entry {
            name,
            comment,
            mode,
            method: self.method,
            modified: self.modified,
            crc32: self.crc32,
            compressed_size: self.compressed_size,
            uncompressed_size: self.uncompressed_size,
            permissions,
            offset: self.local_header_offset,
        }
    }
}

/// Fast path: seek `-22` from the end, read the EOCD, then read exactly
/// `cd_size` bytes at `cd_offset` and parse `total_entries` central
/// directory records sequentially (§4.3 step 2).
fn scan_fast<S: Read + Seek>(stream: &mut S) -> Result<Vec<RawEntry>, Error> {
    let len = stream.seek(SeekFrom::End(0)).map_err(Error::Seek)?;
    if len < EndOfCentralDirectoryRecord::LEN {
        return Err(Error::InvalidData("archive too small for EOCD"));
    }
    let eocd = find_eocd(stream, len)?;

    stream
        .seek(SeekFrom::Start(eocd.cd_offset as u64))
        .map_err(Error::Seek)?;
    let mut cd_bytes = vec![0u8; eocd.cd_size as usize];
    stream.read_exact(&mut cd_bytes).map_err(Error::Read)?;

    let mut rest: &[u8] = &cd_bytes;
    let mut entries = Vec::with_capacity(eocd.total_entries as usize);
    for _ in 0..eocd.total_entries {
        if rest.len() < 4 {
            return Err(Error::InvalidData("truncated central directory"));
        }
        let sig = u32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
        rest = &rest[4..];
        if sig != CENTRAL_DIRECTORY_SIG {
            return Err(Error::InvalidData("central directory signature mismatch"));
        }
        entries.push(parse_central_record(&mut rest)?);
    }
    Ok(entries)
}

/// The EOCD record plus its comment, scanned backward from the end of the
/// stream to tolerate a trailing comment of unknown length.
fn find_eocd<S: Read + Seek>(
    stream: &mut S,
    len: u64,
) -> Result<EndOfCentralDirectoryRecord, Error> {
    // Search the last 64 KiB (max comment length) + fixed record size for
    // the signature, starting from the tail, since a trailing comment can
    // push the record back arbitrarily far (up to 65535 bytes).
    const MAX_COMMENT: u64 = 0xffff;
    let search_len = (EndOfCentralDirectoryRecord::LEN + MAX_COMMENT).min(len);
    stream
        .seek(SeekFrom::End(-(search_len as i64)))
        .map_err(Error::Seek)?;
    let mut buf = vec![0u8; search_len as usize];
    stream.read_exact(&mut buf).map_err(Error::Read)?;

    let sig_bytes = END_OF_CENTRAL_DIRECTORY_SIG.to_le_bytes();
    for start in (0..=buf.len().saturating_sub(4)).rev() {
        if buf[start..start + 4] == sig_bytes {
            let mut slice = &buf[start..];
            if let Ok(rec) = EndOfCentralDirectoryRecord::parser(&mut slice) {
                return Ok(rec);
            }
        }
    }
    Err(Error::InvalidData("no end-of-central-directory record found"))
}

fn parse_central_record(rest: &mut &[u8]) -> Result<RawEntry, Error> {
    let hdr = CentralDirectoryHeader::parser(rest)
        .map_err(|_| Error::InvalidData("malformed central directory record"))?;
    let name_bytes = take_bytes(rest, hdr.name_len as usize)?;
    let _extra = take_bytes(rest, hdr.extra_len as usize)?;
    let comment_bytes = take_bytes(rest, hdr.comment_len as usize)?;
    Ok(RawEntry {
        name_bytes,
        comment_bytes,
        flags: hdr.flags,
        method: hdr.method,
        modified: hdr.modified,
        crc32: hdr.crc32,
        compressed_size: hdr.compressed_size as u64,
        uncompressed_size: hdr.uncompressed_size as u64,
        external_attrs: hdr.external_attrs,
        made_by: hdr.made_by,
        local_header_offset: hdr.local_header_offset as u64,
    })
}

fn take_bytes(rest: &mut &[u8], n: usize) -> Result<Vec<u8>, Error> {
    if rest.len() < n {
        return Err(Error::InvalidData("truncated central directory field"));
    }
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    Ok(head.to_vec())
}

/// Fallback: linear scan from byte 0, reading 4-byte signatures in a loop
/// (§4.3 step 3). Used when the fast path's EOCD is missing, truncated, or
/// internally inconsistent.
fn scan_fallback<S: Read + Seek>(stream: &mut S) -> Result<Vec<RawEntry>, Error> {
    stream.seek(SeekFrom::Start(0)).map_err(Error::Seek)?;
    let mut entries = Vec::new();
    loop {
        let mut sig_buf = [0u8; 4];
        match stream.read_exact(&mut sig_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Read(e)),
        }
        let sig = u32::from_le_bytes(sig_buf);
        match sig {
            LOCAL_FILE_HEADER_SIG => {
                skip_local_entry(stream)?;
            }
            CENTRAL_DIRECTORY_SIG => {
                let mut fixed = [0u8; 42];
                stream.read_exact(&mut fixed).map_err(Error::Read)?;
                let mut slice: &[u8] = &fixed;
                let hdr = CentralDirectoryHeader::parser(&mut slice)
                    .map_err(|_| Error::InvalidData("malformed central directory record"))?;
                let mut name = vec![0u8; hdr.name_len as usize];
                stream.read_exact(&mut name).map_err(Error::Read)?;
                let mut extra = vec![0u8; hdr.extra_len as usize];
                stream.read_exact(&mut extra).map_err(Error::Read)?;
                let mut comment = vec![0u8; hdr.comment_len as usize];
                stream.read_exact(&mut comment).map_err(Error::Read)?;
                entries.push(RawEntry {
                    name_bytes: name,
                    comment_bytes: comment,
                    flags: hdr.flags,
                    method: hdr.method,
                    modified: hdr.modified,
                    crc32: hdr.crc32,
                    compressed_size: hdr.compressed_size as u64,
                    uncompressed_size: hdr.uncompressed_size as u64,
                    external_attrs: hdr.external_attrs,
                    made_by: hdr.made_by,
                    local_header_offset: hdr.local_header_offset as u64,
                });
            }
            END_OF_CENTRAL_DIRECTORY_SIG => {
                break;
            }
            _ => {
                return Err(Error::InvalidData(
                    "unrecognized signature during fallback scan",
                ));
            }
        }
    }
    Ok(entries)
}

fn skip_local_entry<S: Read + Seek>(stream: &mut S) -> Result<(), Error> {
    let mut fixed = [0u8; 26];
    stream.read_exact(&mut fixed).map_err(Error::Read)?;
    let mut full = Vec::with_capacity(30);
    full.extend_from_slice(&LOCAL_FILE_HEADER_SIG.to_le_bytes());
    full.extend_from_slice(&fixed);
    let mut slice: &[u8] = &full;
    let hdr = LocalFileHeaderRecord::parser(&mut slice)
        .map_err(|_| Error::InvalidData("malformed local file header"))?;
    let skip = hdr.name_len as i64 + hdr.extra_len as i64 + hdr.compressed_size as i64;
    stream.seek(SeekFrom::Current(skip)).map_err(Error::Seek)?;
    Ok(())
}
