//! DOS dates and times, and the timestamp fields of a short directory entry.

/// A DOS date.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Date {
    /// Year number, 1980 to 2107
    year: u16,
    /// Month of the year, 1 to 12 on a sane volume
    month: u8,
    /// Day of the month, 1 to 31 on a sane volume
    day: u8,
}

impl Date {
    const MIN_YEAR: u16 = 1980;

    #[must_use]
    /// Decodes a DOS date. Fields are taken as stored, without validation.
    pub const fn decode(dos_date: u16) -> Self {
        Self {
            year: (dos_date >> 9) + Self::MIN_YEAR,
            month: ((dos_date >> 5) & 0xF) as u8,
            day: (dos_date & 0x1F) as u8,
        }
    }

    #[must_use]
    pub const fn encode(self) -> u16 {
        ((self.year - Self::MIN_YEAR) << 9) | ((self.month as u16) << 5) | self.day as u16
    }

    #[must_use]
    #[inline]
    pub const fn year(&self) -> u16 {
        self.year
    }

    #[must_use]
    #[inline]
    pub const fn month(&self) -> u8 {
        self.month
    }

    #[must_use]
    #[inline]
    pub const fn day(&self) -> u8 {
        self.day
    }
}

/// A DOS time, with a two-second resolution.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Time {
    hour: u8,
    min: u8,
    sec: u8,
}

impl Time {
    #[must_use]
    /// Decodes a DOS time. Fields are taken as stored, without validation.
    pub const fn decode(dos_time: u16) -> Self {
        Self {
            hour: (dos_time >> 11) as u8,
            min: ((dos_time >> 5) & 0x3F) as u8,
            sec: ((dos_time & 0x1F) * 2) as u8,
        }
    }

    #[must_use]
    pub const fn encode(self) -> u16 {
        ((self.hour as u16) << 11) | ((self.min as u16) << 5) | (self.sec as u16 / 2)
    }

    #[must_use]
    #[inline]
    pub const fn hour(&self) -> u8 {
        self.hour
    }

    #[must_use]
    #[inline]
    pub const fn min(&self) -> u8 {
        self.min
    }

    #[must_use]
    #[inline]
    pub const fn sec(&self) -> u8 {
        self.sec
    }
}

/// Bytes 12 to 25 of a short entry: NT flags, creation, access and
/// modification stamps, and the high cluster word.
///
/// This driver does not stamp entries itself. Whatever another driver stored
/// here is carried through every rewrite of the entry.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Timestamps {
    nt_flags: u8,
    created_tenths: u8,
    created_time: u16,
    created_date: u16,
    accessed_date: u16,
    /// Always 0 on FAT16, kept as found
    cluster_high: u16,
    modified_time: u16,
    modified_date: u16,
}

impl Timestamps {
    /// Length of the encoded fields
    pub const SIZE: usize = 14;

    #[must_use]
    pub const fn decode(raw: &[u8; Self::SIZE]) -> Self {
        Self {
            nt_flags: raw[0],
            created_tenths: raw[1],
            created_time: u16::from_le_bytes([raw[2], raw[3]]),
            created_date: u16::from_le_bytes([raw[4], raw[5]]),
            accessed_date: u16::from_le_bytes([raw[6], raw[7]]),
            cluster_high: u16::from_le_bytes([raw[8], raw[9]]),
            modified_time: u16::from_le_bytes([raw[10], raw[11]]),
            modified_date: u16::from_le_bytes([raw[12], raw[13]]),
        }
    }

    #[must_use]
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut raw = [0; Self::SIZE];
        raw[0] = self.nt_flags;
        raw[1] = self.created_tenths;
        for (at, word) in [
            (2, self.created_time),
            (4, self.created_date),
            (6, self.accessed_date),
            (8, self.cluster_high),
            (10, self.modified_time),
            (12, self.modified_date),
        ] {
            raw[at..at + 2].copy_from_slice(&word.to_le_bytes());
        }
        raw
    }

    #[must_use]
    #[inline]
    pub const fn created(&self) -> (Date, Time) {
        (Date::decode(self.created_date), Time::decode(self.created_time))
    }

    #[must_use]
    #[inline]
    pub const fn accessed(&self) -> Date {
        Date::decode(self.accessed_date)
    }

    #[must_use]
    #[inline]
    pub const fn modified(&self) -> (Date, Time) {
        (Date::decode(self.modified_date), Time::decode(self.modified_time))
    }
}
