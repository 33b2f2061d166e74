//! Little-endian scalar helpers shared by the three format modules.
//!
//! Reads go through `winnow`, following the teacher's parser style; writes
//! use `byteorder`, since this crate (unlike the teacher) also produces
//! archives.

use byteorder::{WriteBytesExt, LE};
use winnow::{
    binary::{le_u16, le_u32},
    PResult, Parser,
};

/// Parse a little-endian `u16`.
pub fn read_u16(i: &mut &[u8]) -> PResult<u16> {
    le_u16.parse_next(i)
}

/// Parse a little-endian `u32`.
pub fn read_u32(i: &mut &[u8]) -> PResult<u32> {
    le_u32.parse_next(i)
}

/// Append a little-endian `u16` to `out`.
pub fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.write_u16::<LE>(v).expect("Vec<u8> writes never fail");
}

/// Append a little-endian `u32` to `out`.
pub fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.write_u32::<LE>(v).expect("Vec<u8> writes never fail");
}
