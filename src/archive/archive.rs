//! The archive reader/writer (§2.1 "Archive writer"/"Archive reader", §4.4, §4.5).

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, trace};

use crate::archive::deflate::{CrcAccumulator, Deflator, Inflator, RAW_WINDOW_BITS};
use crate::archive::encoding::Encoding;
use crate::archive::entry::{CompressedItem, Entry};
use crate::archive::error::{Error, FeedbackAction};
use crate::archive::feedback::{Feedback, FeedbackKind};
use crate::archive::format::{
    ArcPermissions, CentralDirectoryHeader, EndOfCentralDirectoryRecord, LocalFileHeaderRecord,
    Method, Mode, MsdosTimestamp, Version, LOCAL_HEADER_LEN,
};
use crate::archive::io::ByteIo;
use crate::archive::scan;

/// Options controlling how a single `add_file` call writes its entry.
#[derive(Debug, Clone)]
pub struct AddFileOptions {
    /// Timestamp to record for this entry; defaults to "now" if omitted by
    /// callers that don't care.
    pub modified: MsdosTimestamp,
    /// Permission bits to store using this crate's custom encoding. `None`
    /// means "inherit the archive's default".
    pub permissions: Option<ArcPermissions>,
    /// Optional comment.
    pub comment: Option<String>,
    /// If set, the data is a symlink target string rather than file bytes
    /// (§4.4 step 4).
    pub symlink_target: Option<String>,
}

impl Default for AddFileOptions {
    fn default() -> Self {
        Self {
            modified: MsdosTimestamp::from_datetime(chrono::Local::now().naive_local()),
            permissions: None,
            comment: None,
            symlink_target: None,
        }
    }
}

/// A PKZIP archive bound to a seekable backing stream (§3.1).
///
/// Owns the in-memory entry index; entries appear in the order they were
/// written (or, for a loaded archive, the order the central directory
/// lists them in). At most one compression or decompression stream may be
/// active at a time (§5) — this type enforces that by taking `&mut self`
/// for every operation that touches the backing stream.
pub struct Archive<S> {
    stream: S,
    entries: Vec<Entry>,
    /// 0..100, scaled internally to flate2's 0..9.
    compression_level: u8,
    window_bits: i8,
    password: Option<String>,
    default_permissions: ArcPermissions,
    encoding: Encoding,
    /// Whether any compression has actually occurred since open/create;
    /// gates whether `finalize` rewrites the central directory (§4.4).
    dirty: bool,
}

impl<S: ByteIo> Archive<S> {
    /// Create a brand-new, empty archive backed by `stream` (which should
    /// itself be empty; this does not truncate).
    pub fn create(stream: S) -> Self {
        Self {
            stream,
            entries: Vec::new(),
            compression_level: 60,
            window_bits: RAW_WINDOW_BITS,
            password: None,
            default_permissions: ArcPermissions::DEFAULT,
            encoding: Encoding::Utf8,
            dirty: false,
        }
    }

    /// Open an existing archive, scanning its central directory (§4.3).
    pub fn open(mut stream: S) -> Result<Self, Error> {
        let len = stream.size().map_err(Error::Seek)?;
        if len == 0 {
            return Ok(Self::create(stream));
        }
        stream.seek(SeekFrom::Start(0)).map_err(Error::Seek)?;
        let mut sig = [0u8; 4];
        stream.read_exact(&mut sig).map_err(Error::Read)?;
        if sig != crate::archive::format::LOCAL_FILE_HEADER_SIG.to_le_bytes() {
            return Err(Error::NoSupport("not a recognized ZIP archive"));
        }
        let scan::ScanResult { entries, encoding } = scan::scan(&mut stream)?;
        debug!(count = entries.len(), "scanned archive");
        Ok(Self {
            stream,
            entries,
            compression_level: 60,
            window_bits: RAW_WINDOW_BITS,
            password: None,
            default_permissions: ArcPermissions::DEFAULT,
            encoding,
            dirty: false,
        })
    }

    /// Entries currently in the archive, in index order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Flattened, read-only views of the current entries.
    pub fn list(&self) -> Vec<CompressedItem> {
        self.entries.iter().map(CompressedItem::from).collect()
    }

    /// Set the compression level (0..100) used for subsequent `add_file`
    /// calls; clamped to that range.
    pub fn set_compression_level(&mut self, level: u8) {
        self.compression_level = level.min(100);
    }

    /// Set the window-bits parameter (negative = raw, 15 = zlib, 31 =
    /// gzip) used for subsequent `add_file` calls.
    pub fn set_window_bits(&mut self, bits: i8) {
        self.window_bits = bits;
    }

    /// Set an archive-wide password (stored but not yet applied to
    /// encryption in this implementation — no ZIP encryption scheme is in
    /// scope per this crate's reproduced format constants).
    pub fn set_password(&mut self, password: Option<String>) {
        self.password = password;
    }

    /// Set the default permission mask applied to entries that don't
    /// carry the custom permission encoding.
    pub fn set_default_permissions(&mut self, perms: ArcPermissions) {
        self.default_permissions = perms;
    }

    fn find_entry_index(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Write a zero-length, `/`-terminated folder entry (§4.4 "Add
    /// folder"). A prior entry at the same path is replaced.
    pub fn add_folder(&mut self, name: &str) -> Result<(), Error> {
        let name = Entry::normalize_name(name);
        let name = if name.ends_with('/') {
            name
        } else {
            format!("{name}/")
        };
        let offset = self.data_offset()?;
        self.stream.seek(SeekFrom::Start(offset)).map_err(Error::Seek)?;
        let modified = MsdosTimestamp::from_datetime(chrono::Local::now().naive_local());
        let mut header = Vec::new();
        LocalFileHeaderRecord::write(
            &mut header,
            Version::writer_default(),
            0,
            Method::Store.into(),
            modified,
            0,
            0,
            0,
            name.len() as u16,
            0,
        );
        header.extend_from_slice(name.as_bytes());
        self.stream.write_all(&header).map_err(Error::Write)?;

        let entry = Entry {
            name: name.clone(),
            comment: None,
            mode: Mode::FOLDER,
            method: Method::Store.into(),
            modified,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            permissions: None,
            offset,
        };
        self.replace_or_push(entry);
        self.dirty = true;
        Ok(())
    }

    /// Stream `source`'s bytes into a new entry named `name` (§4.4 "Add
    /// file"). If `options.symlink_target` is set, the target string is
    /// compressed instead of reading `source`.
    pub fn add_file(
        &mut self,
        name: &str,
        source: &mut dyn Read,
        options: AddFileOptions,
    ) -> Result<(), Error> {
        self.add_file_with_feedback(name, source, options, &mut |_| FeedbackAction::Continue)
    }

    /// Like [`Self::add_file`] but reports progress through `feedback`
    /// (§4.4 step 5).
    pub fn add_file_with_feedback(
        &mut self,
        name: &str,
        source: &mut dyn Read,
        options: AddFileOptions,
        feedback: &mut dyn FnMut(&Feedback) -> FeedbackAction,
    ) -> Result<(), Error> {
        let name = Entry::normalize_name(name);
        let dataoffset = self.data_offset()?;
        self.stream
            .seek(SeekFrom::Start(dataoffset))
            .map_err(Error::Seek)?;

        // Provisional local header: CRC and sizes are zero, rewritten
        // once the payload has been streamed (§4.4 steps 2, 7).
        let mut provisional = Vec::new();
        LocalFileHeaderRecord::write(
            &mut provisional,
            Version::writer_default(),
            0,
            Method::Store.into(),
            MsdosTimestamp(MsdosTimestamp::EPOCH),
            0,
            0,
            0,
            name.len() as u16,
            0,
        );
        provisional.extend_from_slice(name.as_bytes());
        self.stream.write_all(&provisional).map_err(Error::Write)?;

        let is_link = options.symlink_target.is_some();
        let mut crc = CrcAccumulator::new();
        let mut deflator = Deflator::new(self.compression_level, RAW_WINDOW_BITS);
        let mut compressed = Vec::new();
        let mut original_size: u64 = 0;

        if let Some(target) = &options.symlink_target {
            let bytes = target.as_bytes();
            crc.update(bytes);
            deflator.feed(bytes, &mut compressed)?;
            original_size = bytes.len() as u64;
        } else {
            let mut buf = [0u8; 64 * 1024];
            let mut progress = 0u64;
            loop {
                let n = source.read(&mut buf).map_err(Error::Read)?;
                if n == 0 {
                    break;
                }
                crc.update(&buf[..n]);
                deflator.feed(&buf[..n], &mut compressed)?;
                original_size += n as u64;
                progress += n as u64;
                self.stream.write_all(&compressed).map_err(Error::Write)?;
                compressed.clear();

                let fb = Feedback {
                    kind: FeedbackKind::Compress,
                    index: 0,
                    year: 0,
                    month: 0,
                    day: 0,
                    hour: 0,
                    minute: 0,
                    second: 0,
                    path: name.clone(),
                    dest: None,
                    original_size,
                    compressed_size: deflator.total_out(),
                    progress,
                };
                match feedback(&fb) {
                    FeedbackAction::Cancel => return Err(Error::Cancelled),
                    _ => {}
                }
            }
        }
        deflator.finish(&mut compressed)?;
        self.stream.write_all(&compressed).map_err(Error::Write)?;

        let crc32 = crc.finalize();
        let compressed_size = deflator.total_out();
        let method = if original_size == 0 {
            Method::Store
        } else {
            Method::Deflate
        };
        let final_compressed_size = if original_size == 0 { 0 } else { compressed_size };

        let modified = options.modified;
        // Step 7: seek back and overwrite the local header fields.
        self.stream
            .seek(SeekFrom::Start(dataoffset))
            .map_err(Error::Seek)?;
        let mut final_header = Vec::new();
        LocalFileHeaderRecord::write(
            &mut final_header,
            Version::writer_default(),
            if is_link { 0 } else { 0 },
            method.into(),
            modified,
            crc32,
            final_compressed_size as u32,
            original_size as u32,
            name.len() as u16,
            0,
        );
        self.stream.write_all(&final_header).map_err(Error::Write)?;
        self.stream.write_all(name.as_bytes()).map_err(Error::Write)?;

        let permissions = options.permissions.or_else(|| {
            if is_link {
                Some(ArcPermissions::from_bits(
                    (true, true, false),
                    (true, false, false),
                    (true, false, false),
                    true,
                    false,
                ))
            } else {
                None
            }
        });

        let entry = Entry {
            name: name.clone(),
            comment: options.comment,
            mode: if is_link { Mode::LINK } else { Mode::FILE },
            method: method.into(),
            modified,
            crc32,
            compressed_size: final_compressed_size,
            uncompressed_size: original_size,
            permissions,
            offset: dataoffset,
        };
        trace!(name = %entry.name, size = original_size, "wrote entry");
        self.replace_or_push(entry);
        self.dirty = true;
        Ok(())
    }

    fn replace_or_push(&mut self, entry: Entry) {
        if let Some(i) = self.find_entry_index(&entry.name) {
            self.entries[i] = entry;
        } else {
            self.entries.push(entry);
        }
    }

    /// Offset of the next entry's local file header: the byte position
    /// right after the last entry's payload, or 0 for an empty archive.
    fn data_offset(&self) -> Result<u64, Error> {
        Ok(self.entries.last().map(Entry::end_offset).unwrap_or(0))
    }

    /// Remove an entry by exact path, shifting all following bytes
    /// leftward to compact the backing stream (§4.4 "Remove entry").
    pub fn remove_entry(&mut self, name: &str) -> Result<(), Error> {
        let idx = self.find_entry_index(name).ok_or(Error::Search)?;
        let entry = self.entries[idx].clone();
        let chunksize =
            LOCAL_HEADER_LEN + entry.name.len() as u64 + entry.compressed_size;
        let total_len = self.stream.size().map_err(Error::Seek)?;
        let shift_start = entry.offset + chunksize;

        // memmove all bytes after the removed entry leftward by
        // `chunksize`, in fixed-size chunks.
        let mut buf = vec![0u8; 64 * 1024];
        let mut read_pos = shift_start;
        let mut write_pos = entry.offset;
        while read_pos < total_len {
            let n = ((total_len - read_pos).min(buf.len() as u64)) as usize;
            self.stream.seek(SeekFrom::Start(read_pos)).map_err(Error::Seek)?;
            self.stream.read_exact(&mut buf[..n]).map_err(Error::Read)?;
            self.stream.seek(SeekFrom::Start(write_pos)).map_err(Error::Seek)?;
            self.stream.write_all(&buf[..n]).map_err(Error::Write)?;
            read_pos += n as u64;
            write_pos += n as u64;
        }
        self.stream
            .set_size(total_len - chunksize)
            .map_err(Error::Seek)?;

        self.entries.remove(idx);
        for e in self.entries.iter_mut() {
            if e.offset > entry.offset {
                e.offset -= chunksize;
            }
        }
        self.dirty = true;
        Ok(())
    }

    /// Write the central directory and EOCD immediately after the last
    /// entry's payload (§4.4 "Finalize / flush").
    ///
    /// A no-op if no compression has occurred since the archive was
    /// opened/created and it already has entries; truncates the backing
    /// stream to zero length if the archive has no entries at all.
    pub fn finalize(&mut self) -> Result<(), Error> {
        if self.entries.is_empty() {
            self.stream.set_size(0).map_err(Error::Seek)?;
            return Ok(());
        }
        if !self.dirty {
            return Ok(());
        }
        let cd_offset = self.data_offset()?;
        self.stream.seek(SeekFrom::Start(cd_offset)).map_err(Error::Seek)?;

        let mut cd_bytes = Vec::new();
        for entry in &self.entries {
            let made_by = if entry.permissions.is_some() {
                Version::writer_default()
            } else {
                Version {
                    host_system: crate::archive::format::HostSystem::MsDos,
                    version: Version::WRITER_VERSION,
                }
            };
            let external_attrs = entry
                .permissions
                .map(|p| p.0)
                .unwrap_or(self.default_permissions.0);
            let hdr = CentralDirectoryHeader {
                made_by,
                reader_version: Version::writer_default(),
                flags: 0,
                method: entry.method,
                modified: entry.modified,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size as u32,
                uncompressed_size: entry.uncompressed_size as u32,
                name_len: entry.name.len() as u16,
                extra_len: 0,
                comment_len: entry.comment.as_ref().map(|c| c.len()).unwrap_or(0) as u16,
                disk_number: 0,
                internal_attrs: 0,
                external_attrs,
                local_header_offset: entry.offset as u32,
            };
            hdr.write(&mut cd_bytes);
            cd_bytes.extend_from_slice(entry.name.as_bytes());
            if let Some(c) = &entry.comment {
                cd_bytes.extend_from_slice(c.as_bytes());
            }
        }
        self.stream.write_all(&cd_bytes).map_err(Error::Write)?;

        let eocd = EndOfCentralDirectoryRecord {
            this_disk: 0,
            cd_disk: 0,
            disk_entries: self.entries.len() as u16,
            total_entries: self.entries.len() as u16,
            cd_size: cd_bytes.len() as u32,
            cd_offset: cd_offset as u32,
            comment_len: 0,
        };
        let mut eocd_bytes = Vec::new();
        eocd.write(&mut eocd_bytes);
        self.stream.write_all(&eocd_bytes).map_err(Error::Write)?;
        let end = cd_offset + cd_bytes.len() as u64 + eocd_bytes.len() as u64;
        self.stream.set_size(end).map_err(Error::Seek)?;
        self.dirty = false;
        Ok(())
    }

    /// Alias for [`Self::finalize`]; both names appear in §4.4.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.finalize()
    }

    /// Decompress every entry matching `pattern` (a `*`/`?` glob,
    /// case-insensitive) into `sink_for`, a callback that returns a
    /// `Write` destination for a given matched path (§4.5).
    pub fn decompress_matching(
        &mut self,
        pattern: &str,
        mut sink_for: impl FnMut(&str) -> Option<Box<dyn Write>>,
        mut feedback: impl FnMut(&Feedback) -> FeedbackAction,
    ) -> Result<(), Error> {
        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| glob_match(pattern, &e.name))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return Err(Error::Search);
        }
        for (index, &i) in matches.iter().enumerate() {
            let entry = self.entries[i].clone();
            let (year, month, day, hour, minute, second) = entry.modified_parts();
            let fb = Feedback {
                kind: FeedbackKind::Decompress,
                index,
                year,
                month,
                day,
                hour,
                minute,
                second,
                path: entry.name.clone(),
                dest: None,
                original_size: entry.uncompressed_size,
                compressed_size: entry.compressed_size,
                progress: 0,
            };
            match feedback(&fb) {
                FeedbackAction::Cancel => return Err(Error::Cancelled),
                FeedbackAction::Skip => continue,
                FeedbackAction::Continue => {}
            }
            let Some(mut sink) = sink_for(&entry.name) else {
                continue;
            };
            self.decompress_entry(&entry, &mut *sink)?;
        }
        Ok(())
    }

    /// Stream one entry's decompressed bytes to `sink` (§4.5 steps 3-5).
    pub fn decompress_entry(&mut self, entry: &Entry, sink: &mut dyn Write) -> Result<(), Error> {
        self.stream
            .seek(SeekFrom::Start(entry.offset + 26))
            .map_err(Error::Seek)?;
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).map_err(Error::Read)?;
        let name_len = u16::from_le_bytes([len_buf[0], len_buf[1]]);
        let extra_len = u16::from_le_bytes([len_buf[2], len_buf[3]]);
        self.stream
            .seek(SeekFrom::Current(name_len as i64 + extra_len as i64))
            .map_err(Error::Seek)?;

        let method = Method::from(entry.method);
        match method {
            Method::Store => {
                let mut remaining = entry.compressed_size;
                let mut buf = [0u8; 64 * 1024];
                while remaining > 0 {
                    let n = (remaining.min(buf.len() as u64)) as usize;
                    self.stream.read_exact(&mut buf[..n]).map_err(Error::Read)?;
                    sink.write_all(&buf[..n]).map_err(Error::Write)?;
                    remaining -= n as u64;
                }
                Ok(())
            }
            Method::Deflate => {
                let mut inflator = Inflator::new(RAW_WINDOW_BITS);
                let mut in_buf = [0u8; 32 * 1024];
                let mut remaining_in = entry.compressed_size;
                let mut out = Vec::new();
                loop {
                    if inflator.total_out() >= entry.uncompressed_size {
                        break;
                    }
                    let to_read = (remaining_in.min(in_buf.len() as u64)) as usize;
                    if to_read == 0 {
                        break;
                    }
                    self.stream
                        .read_exact(&mut in_buf[..to_read])
                        .map_err(Error::Read)?;
                    remaining_in -= to_read as u64;
                    out.clear();
                    let (_, stream_end) = inflator.feed(&in_buf[..to_read], &mut out)?;
                    sink.write_all(&out).map_err(Error::Write)?;
                    if stream_end {
                        break;
                    }
                }
                Ok(())
            }
            Method::Unrecognized(m) => {
                trace!(method = m, "unsupported method");
                Err(Error::NoSupport("unsupported compression method"))
            }
        }
    }

    /// Read one entry's decompressed bytes into a fresh `Vec<u8>`.
    pub fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, Error> {
        let idx = self.find_entry_index(name).ok_or(Error::Search)?;
        let entry = self.entries[idx].clone();
        let mut out = Vec::with_capacity(entry.uncompressed_size as usize);
        self.decompress_entry(&entry, &mut out)?;
        Ok(out)
    }

    /// Consume the archive, returning the backing stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Extract every entry matching `pattern` onto the real filesystem
    /// under `dest_dir` (§4.5 steps 6-7): folders are created, symlinks
    /// are recreated from their decompressed target string, and regular
    /// files are decompressed to disk. When `apply_security` is set, an
    /// entry carrying this implementation's custom permission bits
    /// (`has_security`) gets those bits applied; otherwise (or when the
    /// entry has no custom bits) the archive's default mask is used.
    #[cfg(unix)]
    pub fn extract_matching(
        &mut self,
        pattern: &str,
        dest_dir: &std::path::Path,
        apply_security: bool,
        mut feedback: impl FnMut(&Feedback) -> FeedbackAction,
    ) -> Result<(), Error> {
        use std::os::unix::fs::PermissionsExt;

        let matches: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| glob_match(pattern, &e.name))
            .map(|(i, _)| i)
            .collect();
        if matches.is_empty() {
            return Err(Error::Search);
        }
        for (index, &i) in matches.iter().enumerate() {
            let entry = self.entries[i].clone();
            let (year, month, day, hour, minute, second) = entry.modified_parts();
            let dest_path = dest_dir.join(&entry.name);
            let fb = Feedback {
                kind: FeedbackKind::Decompress,
                index,
                year,
                month,
                day,
                hour,
                minute,
                second,
                path: entry.name.clone(),
                dest: Some(dest_path.display().to_string()),
                original_size: entry.uncompressed_size,
                compressed_size: entry.compressed_size,
                progress: 0,
            };
            match feedback(&fb) {
                FeedbackAction::Cancel => return Err(Error::Cancelled),
                FeedbackAction::Skip => continue,
                FeedbackAction::Continue => {}
            }

            if entry.mode.is_folder {
                std::fs::create_dir_all(&dest_path).map_err(Error::File)?;
                continue;
            }
            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent).map_err(Error::File)?;
            }

            let permissions = entry.permissions.unwrap_or(self.default_permissions);
            let effective = if apply_security && permissions.has_security() {
                permissions
            } else {
                self.default_permissions
            };

            if entry.mode.is_link {
                let mut target = Vec::new();
                self.decompress_entry(&entry, &mut target)?;
                let target = String::from_utf8(target).map_err(|_| Error::InvalidData("symlink target is not valid UTF-8"))?;
                let _ = std::fs::remove_file(&dest_path);
                std::os::unix::fs::symlink(target, &dest_path).map_err(Error::File)?;
                continue;
            }

            let mut file = std::fs::File::create(&dest_path).map_err(Error::File)?;
            self.decompress_entry(&entry, &mut file)?;
            let perms = std::fs::Permissions::from_mode(effective.to_posix_mode());
            std::fs::set_permissions(&dest_path, perms).map_err(Error::File)?;
        }
        Ok(())
    }
}

/// Case-insensitive glob match supporting `*` and `?` (§4.5 step 1).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    fn do_match(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => do_match(&p[1..], t) || (!t.is_empty() && do_match(p, &t[1..])),
            (Some(b'?'), Some(_)) => do_match(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc.eq_ignore_ascii_case(tc) => do_match(&p[1..], &t[1..]),
            _ => false,
        }
    }
    do_match(pattern.as_bytes(), text.as_bytes())
}
