//! The backing-stream contract archives read from and write to (§6).
//!
//! A real host might back an archive with a file, an in-memory buffer, or
//! a network stream; all this crate requires is that it can seek. This
//! mirrors the teacher's own split between format parsing (which never
//! touches I/O) and the reader/writer layers (which do).

use std::io::{self, Read, Seek, SeekFrom, Write};

/// A seekable backing stream for an [`super::Archive`] (§4.1, §6).
///
/// Blanket-implemented for anything that is `Read + Write + Seek`, which
/// covers `std::fs::File` and `std::io::Cursor<Vec<u8>>` — the two
/// backings this crate's own tests use.
pub trait ByteIo: Read + Write + Seek {
    /// Current length of the stream in bytes.
    fn size(&mut self) -> io::Result<u64> {
        let cur = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(cur))?;
        Ok(end)
    }

    /// Truncate (or, in principle, extend) the stream to exactly `n`
    /// bytes.
    fn set_size(&mut self, n: u64) -> io::Result<()>;
}

impl ByteIo for std::fs::File {
    fn set_size(&mut self, n: u64) -> io::Result<()> {
        self.set_len(n)
    }
}

impl ByteIo for io::Cursor<Vec<u8>> {
    fn set_size(&mut self, n: u64) -> io::Result<()> {
        let n = n as usize;
        let pos = self.position().min(n as u64);
        self.get_mut().resize(n, 0);
        self.set_position(pos);
        Ok(())
    }
}

/// Seek whence values, mirroring §4.1's `seek(start|cur|end, offset)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Relative to the start of the stream.
    Start,
    /// Relative to the current position.
    Current,
    /// Relative to the end of the stream.
    End,
}

impl From<(Whence, i64)> for SeekFrom {
    fn from((whence, offset): (Whence, i64)) -> Self {
        match whence {
            Whence::Start => SeekFrom::Start(offset as u64),
            Whence::Current => SeekFrom::Current(offset),
            Whence::End => SeekFrom::End(offset),
        }
    }
}
