//! ZIP version fields (`version made by` / `version needed to extract`).

use num_enum::{FromPrimitive, IntoPrimitive};
use winnow::{binary::le_u8, seq, PResult, Parser};

/// A ZIP version: the host system that produced (or is required to read)
/// the archive, plus the numeric version (e.g. `45` for 4.5).
///
/// Per §4.2, the high byte of "version made by" doubles as a marker: when
/// it names this implementation's host system, the external-attributes
/// field carries our non-standard permission bit layout instead of plain
/// POSIX mode bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    /// Host system the archive was created on (or claims to be).
    pub host_system: HostSystem,
    /// Numeric version, e.g. `45` for 4.5.
    pub version: u8,
}

impl Version {
    /// The host-OS byte this crate writes and recognizes, signalling that
    /// external attributes carry [`super::ArcPermissions`] rather than a
    /// plain POSIX `st_mode`.
    pub const HOST_OS_MARKER: HostSystem = HostSystem::Unix;

    /// Version this crate writes for archives it produces (4.5: zip64-aware).
    pub const WRITER_VERSION: u8 = 45;

    /// Parser for a `(host_system, version)` pair.
    pub fn parser(i: &mut &[u8]) -> PResult<Self> {
        seq! {Self {
            version: le_u8,
            host_system: le_u8.map(HostSystem::from),
        }}
        .parse_next(i)
    }

    /// Serialize as `(version, host_system)`, matching the on-disk order.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.version);
        out.push(self.host_system.into());
    }

    /// The version this crate writes when producing new entries.
    pub fn writer_default() -> Self {
        Self {
            host_system: Self::HOST_OS_MARKER,
            version: Self::WRITER_VERSION,
        }
    }
}

/// The host system a ZIP entry claims to have been written on (APPNOTE
/// §4.4.2.2). Only the values this crate distinguishes behavior on are
/// named; everything else round-trips through [`HostSystem::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HostSystem {
    /// MS-DOS, OS/2 (FAT/VFAT/FAT32).
    MsDos = 0,
    /// UNIX.
    Unix = 3,
    /// Windows NTFS.
    WindowsNtfs = 10,
    /// VFAT.
    Vfat = 14,
    /// OS X / Darwin.
    Osx = 19,
    /// Any other (or unused) host system byte.
    #[num_enum(catch_all)]
    Other(u8),
}
