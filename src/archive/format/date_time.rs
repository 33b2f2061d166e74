//! DOS packed date/time (§4.2).

use winnow::{binary::le_u32, PResult, Parser};

/// A DOS-packed timestamp: `year-1980 << 25 | month << 21 | day << 16 |
/// hour << 11 | minute << 5 | second >> 1`.
///
/// Resolution is 2 seconds; years before 1980 clamp to the DOS epoch
/// (`0x0021_0000`, meaning 1980-01-01 00:00:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsdosTimestamp(pub u32);

impl MsdosTimestamp {
    /// The clamped DOS epoch value used for years before 1980.
    pub const EPOCH: u32 = 0x0021_0000;

    /// Parser for a packed `u32` DOS timestamp.
    pub fn parser(i: &mut &[u8]) -> PResult<Self> {
        le_u32.map(MsdosTimestamp).parse_next(i)
    }

    /// Serialize as a little-endian `u32`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.0.to_le_bytes());
    }

    /// Pack a `chrono` local date/time into DOS format, clamping to the
    /// epoch if it falls before 1980.
    pub fn from_datetime(dt: chrono::NaiveDateTime) -> Self {
        use chrono::{Datelike, Timelike};
        let year = dt.year();
        if year < 1980 {
            return MsdosTimestamp(Self::EPOCH);
        }
        let packed = ((year - 1980) as u32) << 25
            | (dt.month()) << 21
            | (dt.day()) << 16
            | (dt.hour()) << 11
            | (dt.minute()) << 5
            | (dt.second() >> 1);
        MsdosTimestamp(packed)
    }

    /// Unpack into `(year, month, day, hour, minute, second)`. Seconds are
    /// doubled back out of the 5-bit field (odd seconds are lost, per the
    /// format's 2-second resolution).
    pub fn to_parts(self) -> (i32, u32, u32, u32, u32, u32) {
        let v = self.0;
        let year = 1980 + ((v >> 25) & 0x7f) as i32;
        let month = (v >> 21) & 0x0f;
        let day = (v >> 16) & 0x1f;
        let hour = (v >> 11) & 0x1f;
        let minute = (v >> 5) & 0x3f;
        let second = (v & 0x1f) * 2;
        (year, month.max(1), day.max(1), hour, minute, second)
    }

    /// Convert to a `chrono::NaiveDateTime`, best-effort: an invalid
    /// packed value (e.g. day 0) falls back to the DOS epoch.
    pub fn to_datetime(self) -> chrono::NaiveDateTime {
        let (year, month, day, hour, minute, second) = self.to_parts();
        chrono::NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, second.min(59)))
            .unwrap_or_else(|| MsdosTimestamp(Self::EPOCH).to_datetime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_clamp() {
        let dt = chrono::NaiveDate::from_ymd_opt(1975, 3, 4)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(MsdosTimestamp::from_datetime(dt).0, MsdosTimestamp::EPOCH);
    }

    #[test]
    fn round_trip_within_resolution() {
        let dt = chrono::NaiveDate::from_ymd_opt(2023, 11, 2)
            .unwrap()
            .and_hms_opt(13, 37, 42)
            .unwrap();
        let packed = MsdosTimestamp::from_datetime(dt);
        let back = packed.to_datetime();
        assert!((back - dt).num_seconds().abs() <= 2);
    }
}
