//! Entry flags and the custom permission-bit layout (§4.2).

/// Flags describing what kind of entry this is and how its payload was
/// written, flattened out of the local/central header's method and
/// external-attributes fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode {
    /// Entry is a regular file.
    pub is_file: bool,
    /// Entry is a folder (name ends in `/`, zero size, not a link).
    pub is_folder: bool,
    /// Entry's payload is a symlink target string rather than file data.
    pub is_link: bool,
}

impl Mode {
    /// Mode for a regular file.
    pub const FILE: Mode = Mode {
        is_file: true,
        is_folder: false,
        is_link: false,
    };

    /// Mode for a folder entry.
    pub const FOLDER: Mode = Mode {
        is_file: false,
        is_folder: true,
        is_link: false,
    };

    /// Mode for a symlink entry.
    pub const LINK: Mode = Mode {
        is_file: false,
        is_folder: false,
        is_link: true,
    };
}

/// This implementation's non-standard permission bit layout, stored in the
/// central directory's external-attributes field when `version made by`'s
/// host-OS byte is [`super::HostSystem::Unix`] (the marker this crate uses
/// for its own archives, per §4.2's "Open Questions": this layout is not
/// POSIX `st_mode` and other tools will not honor it, but it round-trips
/// byte-exactly with archives produced by this implementation).
///
/// Bit layout (low to high): `other_exec, other_write, other_read,
/// group_exec, group_write, group_read, user_exec, user_write, user_read,
/// is_link, has_security`, followed by a reserved low byte that is always
/// zero when written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArcPermissions(pub u32);

impl ArcPermissions {
    const OTHER_EXEC: u32 = 1 << 8;
    const OTHER_WRITE: u32 = 1 << 9;
    const OTHER_READ: u32 = 1 << 10;
    const GROUP_EXEC: u32 = 1 << 11;
    const GROUP_WRITE: u32 = 1 << 12;
    const GROUP_READ: u32 = 1 << 13;
    const USER_EXEC: u32 = 1 << 14;
    const USER_WRITE: u32 = 1 << 15;
    const USER_READ: u32 = 1 << 16;
    const IS_LINK: u32 = 1 << 17;
    const HAS_SECURITY: u32 = 1 << 18;

    /// The default permission mask applied when an archive carries no
    /// custom permission bits for an entry: `rw-r--r--`.
    pub const DEFAULT: ArcPermissions = ArcPermissions(
        Self::USER_READ | Self::USER_WRITE | Self::GROUP_READ | Self::OTHER_READ,
    );

    /// Build from individual read/write/exec triples for user, group, and
    /// other, plus link/security flags.
    #[allow(clippy::too_many_arguments)]
    pub fn from_bits(
        user: (bool, bool, bool),
        group: (bool, bool, bool),
        other: (bool, bool, bool),
        is_link: bool,
        has_security: bool,
    ) -> Self {
        let mut bits = 0u32;
        if user.0 {
            bits |= Self::USER_READ;
        }
        if user.1 {
            bits |= Self::USER_WRITE;
        }
        if user.2 {
            bits |= Self::USER_EXEC;
        }
        if group.0 {
            bits |= Self::GROUP_READ;
        }
        if group.1 {
            bits |= Self::GROUP_WRITE;
        }
        if group.2 {
            bits |= Self::GROUP_EXEC;
        }
        if other.0 {
            bits |= Self::OTHER_READ;
        }
        if other.1 {
            bits |= Self::OTHER_WRITE;
        }
        if other.2 {
            bits |= Self::OTHER_EXEC;
        }
        if is_link {
            bits |= Self::IS_LINK;
        }
        if has_security {
            bits |= Self::HAS_SECURITY;
        }
        ArcPermissions(bits)
    }

    /// Whether the link bit is set.
    pub fn is_link(&self) -> bool {
        self.0 & Self::IS_LINK != 0
    }

    /// Whether the has-security bit is set.
    pub fn has_security(&self) -> bool {
        self.0 & Self::HAS_SECURITY != 0
    }

    /// Unix `rwx` triples in `(user, group, other)` order.
    pub fn unix_triples(&self) -> ((bool, bool, bool), (bool, bool, bool), (bool, bool, bool)) {
        (
            (
                self.0 & Self::USER_READ != 0,
                self.0 & Self::USER_WRITE != 0,
                self.0 & Self::USER_EXEC != 0,
            ),
            (
                self.0 & Self::GROUP_READ != 0,
                self.0 & Self::GROUP_WRITE != 0,
                self.0 & Self::GROUP_EXEC != 0,
            ),
            (
                self.0 & Self::OTHER_READ != 0,
                self.0 & Self::OTHER_WRITE != 0,
                self.0 & Self::OTHER_EXEC != 0,
            ),
        )
    }

    /// Convert to a plain POSIX `st_mode`-style `u32` (permission bits
    /// only, no file-type bits) for applying via `std::fs`.
    pub fn to_posix_mode(self) -> u32 {
        let (u, g, o) = self.unix_triples();
        let mut mode = 0u32;
        if u.0 {
            mode |= 0o400;
        }
        if u.1 {
            mode |= 0o200;
        }
        if u.2 {
            mode |= 0o100;
        }
        if g.0 {
            mode |= 0o040;
        }
        if g.1 {
            mode |= 0o020;
        }
        if g.2 {
            mode |= 0o010;
        }
        if o.0 {
            mode |= 0o004;
        }
        if o.1 {
            mode |= 0o002;
        }
        if o.2 {
            mode |= 0o001;
        }
        mode
    }
}

impl Default for ArcPermissions {
    fn default() -> Self {
        Self::DEFAULT
    }
}
