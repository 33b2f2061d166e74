//! Streaming DEFLATE codec (§2.1 "Deflate codec", §4.4, §4.5).
//!
//! Wraps `flate2`'s raw `Compress`/`Decompress` state machines (not its
//! `Read`/`Write` adapters) so callers control buffering and flush points
//! themselves — the archive writer needs to know exactly how many bytes
//! were produced per `feed` call to track the local header's sizes as it
//! goes, and the reader needs `SYNC_FLUSH` semantics to stop exactly at
//! `original_size` (§4.5).

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::archive::error::Error;
use crate::archive::format::Method;

/// Raw-DEFLATE window bits this crate writes entries with (§4.4 step 3).
pub const RAW_WINDOW_BITS: i8 = -15;
/// Window bits that select a zlib-wrapped stream.
pub const ZLIB_WINDOW_BITS: i8 = 15;
/// Window bits that select a gzip-wrapped stream (conventionally `31`,
/// i.e. 15 + 16; some APIs spell it `47` = 15 + 32 for "detect either").
pub const GZIP_WINDOW_BITS: i8 = 31;

fn zlib_header_for(window_bits: i8) -> bool {
    window_bits >= 0
}

/// A single-use streaming compressor bound to one archive entry or proxy
/// session (§3.1 "Stream": at most one active per archive).
pub struct Deflator {
    inner: Compress,
}

impl Deflator {
    /// Construct with the archive's compression level (0..100, scaled to
    /// flate2's 0..9) and window-bits setting (negative = raw, matching
    /// §4.4 step 3's `window_bits = -15`).
    pub fn new(level_0_100: u8, window_bits: i8) -> Self {
        let level = (level_0_100 as u32 * 9 / 100).min(9);
        let zlib_header = zlib_header_for(window_bits);
        Self {
            inner: Compress::new(Compression::new(level), zlib_header),
        }
    }

    /// Feed `input` through the compressor, appending any produced bytes
    /// to `out`. Returns the number of input bytes consumed.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<usize, Error> {
        self.run(input, out, FlushCompress::None)
    }

    /// Finish the stream, flushing any buffered output to `out`.
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), Error> {
        loop {
            let before = out.len();
            let status = self.step(&[], out, FlushCompress::Finish)?;
            let produced = out.len() - before;
            if status == Status::StreamEnd || (produced == 0 && status != Status::Ok) {
                break;
            }
            if produced == 0 {
                break;
            }
        }
        Ok(())
    }

    fn run(&mut self, input: &[u8], out: &mut Vec<u8>, flush: FlushCompress) -> Result<usize, Error> {
        let before_in = self.inner.total_in();
        loop {
            let before_out_len = out.len();
            out.resize(before_out_len + 8192, 0);
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .compress(input, &mut out[before_out_len..], flush)
                .map_err(|e| Error::Decompression {
                    method: Method::Deflate,
                    msg: e.to_string(),
                })?;
            let produced = (self.inner.total_out() - before_out) as usize;
            out.truncate(before_out_len + produced);
            let consumed = self.inner.total_in() - before_in;
            if status != Status::Ok || consumed as usize >= input.len() {
                return Ok(consumed as usize);
            }
        }
    }

    fn step(&mut self, input: &[u8], out: &mut Vec<u8>, flush: FlushCompress) -> Result<Status, Error> {
        let before_out_len = out.len();
        out.resize(before_out_len + 8192, 0);
        let before_out = self.inner.total_out();
        let status = self
            .inner
            .compress(input, &mut out[before_out_len..], flush)
            .map_err(|e| Error::Decompression {
                method: Method::Deflate,
                msg: e.to_string(),
            })?;
        let produced = (self.inner.total_out() - before_out) as usize;
        out.truncate(before_out_len + produced);
        Ok(status)
    }

    /// Total compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.inner.total_out()
    }
}

/// A single-use streaming decompressor (§4.5 step 5, §4.7).
pub struct Inflator {
    inner: Decompress,
}

impl Inflator {
    /// Construct with the given window-bits setting.
    pub fn new(window_bits: i8) -> Self {
        let zlib_header = zlib_header_for(window_bits);
        Self {
            inner: Decompress::new(zlib_header),
        }
    }

    /// Feed `input` through the inflater in `SYNC_FLUSH` mode, appending
    /// decompressed bytes to `out`. Returns `(consumed, stream_end)`.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(usize, bool), Error> {
        let before_in = self.inner.total_in();
        let before_out_len = out.len();
        out.resize(before_out_len + 32 * 1024, 0);
        let before_out = self.inner.total_out();
        let status = self
            .inner
            .decompress(input, &mut out[before_out_len..], FlushDecompress::Sync)
            .map_err(|e| map_inflate_error(e))?;
        let produced = (self.inner.total_out() - before_out) as usize;
        out.truncate(before_out_len + produced);
        let consumed = (self.inner.total_in() - before_in) as usize;
        Ok((consumed, status == Status::StreamEnd))
    }

    /// Total decompressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.inner.total_out()
    }
}

/// Map `flate2::DecompressError` onto §4.5's terminal condition table.
fn map_inflate_error(e: flate2::DecompressError) -> Error {
    let msg = e.to_string();
    if msg.contains("buf") {
        Error::BufferOverflow
    } else {
        Error::InvalidData("deflate stream error")
    }
}

/// CRC-32 accumulator used while streaming entry payloads (§4.4 step 5).
#[derive(Debug, Default)]
pub struct CrcAccumulator {
    hasher: crc32fast::Hasher,
}

impl CrcAccumulator {
    /// A fresh accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `bytes` into the running CRC.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finalize into a CRC-32 value.
    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}
