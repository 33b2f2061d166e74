//! Archive VFS view (§2.1 "Archive VFS view", §4.6, §6 "Archive path grammar").
//!
//! A read-only namespaced mount `archive:<name>/<path>` that dispatches
//! opens to a named, process-wide registered archive. Registration is the
//! only explicit process-wide state this crate has (§5).

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

use crate::archive::deflate::Inflator;
use crate::archive::entry::Entry;
use crate::archive::error::Error;
use crate::archive::format::Method;
use crate::archive::io::ByteIo;

/// Prefix every archive-VFS path starts with.
pub const SCHEME: &str = "archive:";

/// Parse an `archive:<name>/<rest>` path into `(name, rest)`. Either `/`
/// or `\` is accepted as the separator inside the body (§6); the name
/// itself is matched case-insensitively at lookup time.
pub fn parse_path(path: &str) -> Option<(&str, &str)> {
    let body = path.strip_prefix(SCHEME)?;
    let sep = body.find(['/', '\\'])?;
    Some((&body[..sep], &body[sep + 1..]))
}

/// Any archive that can be mounted into the VFS: seek to an entry, then
/// read its decompressed bytes through a private inflate state.
pub trait MountedArchive: Send {
    /// All entries currently in the archive.
    fn entries(&self) -> Vec<Entry>;
    /// Open a private reader for decompressing `entry`.
    fn open_reader(&self, entry: &Entry) -> Result<Box<dyn ReadSeek>, Error>;
}

/// A `Read + Seek` trait object, for virtual file handles.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Process-wide `ArchiveName → Archive` registry (§4.6, §5). Guarded by a
/// mutex on registration/deregistration; lookups clone the `Arc` so
/// readers never hold the registry lock while streaming.
#[derive(Default, Clone)]
pub struct ArchiveRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<dyn MountedArchive>>>>,
}

impl ArchiveRegistry {
    /// A fresh, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an archive under `name`. Lookup by name is
    /// case-insensitive (§4.6).
    pub fn register(&self, name: &str, archive: Arc<dyn MountedArchive>) {
        self.inner
            .lock()
            .expect("archive registry mutex poisoned")
            .insert(name.to_ascii_lowercase(), archive);
    }

    /// Unregister an archive by name.
    pub fn unregister(&self, name: &str) {
        self.inner
            .lock()
            .expect("archive registry mutex poisoned")
            .remove(&name.to_ascii_lowercase());
    }

    /// Look up an archive by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MountedArchive>> {
        self.inner
            .lock()
            .expect("archive registry mutex poisoned")
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    /// Enumerate a folder under `archive:<name>/<folder>`, filtering
    /// entries by prefix and hiding entries in sub-folders unless
    /// `recursive` is set (§4.6).
    pub fn list_folder(
        &self,
        name: &str,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Entry>, Error> {
        let archive = self.get(name).ok_or(Error::MissingPath)?;
        let prefix = if folder.is_empty() || folder.ends_with('/') {
            folder.to_string()
        } else {
            format!("{folder}/")
        };
        Ok(archive
            .entries()
            .into_iter()
            .filter(|e| e.name.starts_with(&prefix) && e.name != prefix)
            .filter(|e| {
                if recursive {
                    return true;
                }
                let rest = &e.name[prefix.len()..];
                match rest.find('/') {
                    None => true,
                    Some(i) => i == rest.len() - 1, // a direct folder child
                }
            })
            .collect())
    }

    /// Open a virtual file for reading `archive:<name>/<path>`.
    pub fn open(&self, path: &str) -> Result<VirtualFile, Error> {
        let (name, rest) = parse_path(path).ok_or(Error::MissingPath)?;
        let archive = self.get(name).ok_or(Error::MissingPath)?;
        let entry = archive
            .entries()
            .into_iter()
            .find(|e| e.name == rest)
            .ok_or(Error::Search)?;
        Ok(VirtualFile {
            archive,
            entry,
            reader: None,
            pos: 0,
        })
    }
}

/// An open read-only handle onto one entry inside a mounted archive
/// (§4.6). Caches the entry descriptor and a lazily initialized inflate
/// reader; opening the same path on two virtual files is independent —
/// each gets its own private reader and position.
pub struct VirtualFile {
    archive: Arc<dyn MountedArchive>,
    entry: Entry,
    reader: Option<Box<dyn ReadSeek>>,
    pos: u64,
}

impl VirtualFile {
    /// `original_size` of the underlying entry.
    pub fn size(&self) -> u64 {
        self.entry.uncompressed_size
    }

    /// Entry modified time, derived from its DOS stamp.
    pub fn modified(&self) -> chrono::NaiveDateTime {
        self.entry.modified.to_datetime()
    }

    fn ensure_reader(&mut self) -> Result<(), Error> {
        if self.reader.is_none() {
            self.reader = Some(self.archive.open_reader(&self.entry)?);
        }
        Ok(())
    }

    /// Read at the current position, advancing it.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.ensure_reader()?;
        let n = self
            .reader
            .as_mut()
            .unwrap()
            .read(buf)
            .map_err(Error::Read)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Seek within the decompressed stream. Seeking backward resets the
    /// inflate state and replays from the start (§4.6); seeking forward
    /// just discards output until the target position.
    pub fn seek(&mut self, pos: u64) -> Result<(), Error> {
        if pos < self.pos {
            self.reader = None;
            self.pos = 0;
        }
        self.ensure_reader()?;
        let mut discard = vec![0u8; 64 * 1024];
        while self.pos < pos {
            let want = ((pos - self.pos).min(discard.len() as u64)) as usize;
            let n = self
                .reader
                .as_mut()
                .unwrap()
                .read(&mut discard[..want])
                .map_err(Error::Read)?;
            if n == 0 {
                break;
            }
            self.pos += n as u64;
        }
        Ok(())
    }

    /// Write is unconditionally rejected (§4.6: "Writing is rejected").
    pub fn write(&mut self, _buf: &[u8]) -> Result<usize, Error> {
        Err(Error::NoPermission)
    }
}

/// A `Read + Seek` reader over one archive entry, built from a shared
/// backing stream reference plus the entry's offset and compression
/// method — the concrete [`MountedArchive::open_reader`] implementation
/// used by [`crate::archive::Archive`] once registered into the VFS.
pub struct EntryReader<S> {
    stream: S,
    method: Method,
    data_start: u64,
    compressed_size: u64,
    uncompressed_size: u64,
    inflator: Option<Inflator>,
    out_buf: Vec<u8>,
    out_pos: usize,
    in_pos: u64,
}

impl<S: ByteIo> EntryReader<S> {
    /// Build a reader positioned at `entry`'s payload.
    pub fn new(mut stream: S, entry: &Entry) -> Result<Self, Error> {
        stream
            .seek(SeekFrom::Start(entry.offset + 26))
            .map_err(Error::Seek)?;
        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).map_err(Error::Read)?;
        let name_len = u16::from_le_bytes([len_buf[0], len_buf[1]]);
        let extra_len = u16::from_le_bytes([len_buf[2], len_buf[3]]);
        let data_start = entry.offset + 30 + name_len as u64 + extra_len as u64;
        stream
            .seek(SeekFrom::Start(data_start))
            .map_err(Error::Seek)?;
        Ok(Self {
            stream,
            method: Method::from(entry.method),
            data_start,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            inflator: None,
            out_buf: Vec::new(),
            out_pos: 0,
            in_pos: 0,
        })
    }
}

impl<S: ByteIo> Read for EntryReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.method {
            Method::Store => {
                let remaining = self.compressed_size - self.in_pos;
                let want = (remaining.min(buf.len() as u64)) as usize;
                if want == 0 {
                    return Ok(0);
                }
                let n = self.stream.read(&mut buf[..want])?;
                self.in_pos += n as u64;
                Ok(n)
            }
            Method::Deflate => {
                if self.out_pos < self.out_buf.len() {
                    let n = (self.out_buf.len() - self.out_pos).min(buf.len());
                    buf[..n].copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + n]);
                    self.out_pos += n;
                    return Ok(n);
                }
                let inflator = self
                    .inflator
                    .get_or_insert_with(|| Inflator::new(super::deflate::RAW_WINDOW_BITS));
                if inflator.total_out() >= self.uncompressed_size {
                    return Ok(0);
                }
                let mut in_buf = [0u8; 32 * 1024];
                let remaining = self.compressed_size - self.in_pos;
                let to_read = (remaining.min(in_buf.len() as u64)) as usize;
                if to_read == 0 {
                    return Ok(0);
                }
                self.stream.read_exact(&mut in_buf[..to_read])?;
                self.in_pos += to_read as u64;
                self.out_buf.clear();
                self.out_pos = 0;
                inflator
                    .feed(&in_buf[..to_read], &mut self.out_buf)
                    .map_err(std::io::Error::from)?;
                let n = self.out_buf.len().min(buf.len());
                buf[..n].copy_from_slice(&self.out_buf[..n]);
                self.out_pos = n;
                Ok(n)
            }
            Method::Unrecognized(_) => Err(std::io::Error::other(
                Error::NoSupport("unsupported compression method"),
            )),
        }
    }
}

impl<S: ByteIo> Seek for EntryReader<S> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        // Only rewinding to the start is meaningful here; forward seeks
        // are handled by the `VirtualFile` layer discarding output.
        if let SeekFrom::Start(0) = pos {
            self.stream.seek(SeekFrom::Start(self.data_start))?;
            self.inflator = None;
            self.out_buf.clear();
            self.out_pos = 0;
            self.in_pos = 0;
            return Ok(0);
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "EntryReader only supports rewinding to 0",
        ))
    }
}
