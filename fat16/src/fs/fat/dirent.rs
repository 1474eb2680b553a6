use super::{Cluster, FatError, FatResult, date::Timestamps};
use alloc::string::String;

/// Size of a directory entry in bytes (always 32 bytes)
pub const DIR_ENTRY_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Directory entry attributes
pub struct Attributes(u8);

impl Attributes {
    /// Read-only attribute
    pub const READ_ONLY: u8 = 0x01;
    /// Hidden attribute
    pub const HIDDEN: u8 = 0x02;
    /// System attribute
    pub const SYSTEM: u8 = 0x04;
    /// Volume ID attribute
    pub const VOLUME_ID: u8 = 0x08;
    /// Directory attribute
    pub const DIRECTORY: u8 = 0x10;
    /// Archive attribute
    pub const ARCHIVE: u8 = 0x20;
    /// Long file name attribute
    pub const LONG_NAME: u8 = Self::READ_ONLY | Self::HIDDEN | Self::SYSTEM | Self::VOLUME_ID;
    /// Long file name mask
    pub const LONG_NAME_MASK: u8 = Self::READ_ONLY
        | Self::HIDDEN
        | Self::SYSTEM
        | Self::VOLUME_ID
        | Self::DIRECTORY
        | Self::ARCHIVE;
    /// Bits that are never set on a short entry
    const RESERVED_MASK: u8 = 0xC0;

    #[must_use]
    #[inline]
    /// Creates a new attribute set
    pub const fn new(attributes: u8) -> Self {
        Self(attributes)
    }

    #[must_use]
    #[inline]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is read-only
    pub const fn is_read_only(&self) -> bool {
        self.0 & Self::READ_ONLY != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a volume ID
    pub const fn is_volume_id(&self) -> bool {
        self.0 & Self::VOLUME_ID != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a directory
    pub const fn is_directory(&self) -> bool {
        self.0 & Self::DIRECTORY != 0
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a long file name
    pub const fn is_long_name(&self) -> bool {
        (self.0 & Self::LONG_NAME_MASK) == Self::LONG_NAME
    }
}

/// Space-padded 8.3 name, as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortName([u8; 11]);

impl ShortName {
    /// Dot entry (current directory)
    pub const DOT: Self = Self(*b".          ");
    /// Dotdot entry (parent directory)
    pub const DOTDOT: Self = Self(*b"..         ");

    /// Stand-in stored for a leading 0xE5 byte, which would read as deleted
    const KANJI_E5: u8 = 0x05;

    #[must_use]
    #[inline]
    pub const fn from_raw(raw: [u8; 11]) -> Self {
        Self(raw)
    }

    #[must_use]
    #[inline]
    pub const fn as_raw(&self) -> &[u8; 11] {
        &self.0
    }

    /// Encodes a file name into its 8.3 form.
    ///
    /// The name is upper-cased. A base longer than 8 bytes or an extension longer
    /// than 3 bytes is rejected with [`FatError::NameTooLong`].
    pub fn parse(name: &str) -> FatResult<Self> {
        match name {
            "." => return Ok(Self::DOT),
            ".." => return Ok(Self::DOTDOT),
            _ => {}
        }

        let (base, ext) = name.rsplit_once('.').unwrap_or((name, ""));
        if base.is_empty() || (name.contains('.') && ext.is_empty()) {
            return Err(FatError::InvalidName);
        }
        if base.len() > 8 || ext.len() > 3 {
            return Err(FatError::NameTooLong);
        }

        let mut raw = [b' '; 11];
        for (dst, src) in raw[..8].iter_mut().zip(base.bytes()) {
            *dst = Self::encode_char(src)?;
        }
        for (dst, src) in raw[8..].iter_mut().zip(ext.bytes()) {
            *dst = Self::encode_char(src)?;
        }
        Ok(Self(raw))
    }

    const fn encode_char(byte: u8) -> FatResult<u8> {
        match byte {
            b'a'..=b'z' => Ok(byte.to_ascii_uppercase()),
            b'A'..=b'Z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'-'
            | b'@'
            | b'^'
            | b'_'
            | b'`'
            | b'{'
            | b'}'
            | b'~' => Ok(byte),
            _ => Err(FatError::InvalidName),
        }
    }

    #[must_use]
    #[inline]
    pub fn is_dot_entry(&self) -> bool {
        *self == Self::DOT || *self == Self::DOTDOT
    }

    #[must_use]
    /// Compares two names the way lookups do (ASCII case-insensitive).
    pub fn matches(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    fn display_byte(byte: u8) -> char {
        if byte == Self::KANJI_E5 {
            char::from(DirEntry::DELETED_ENTRY)
        } else {
            char::from(byte)
        }
    }
}

impl core::fmt::Display for ShortName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let base = self.0[..8].trim_ascii_end();
        let ext = self.0[8..].trim_ascii_end();

        let mut out = String::with_capacity(12);
        out.extend(base.iter().map(|&b| Self::display_byte(b)));
        if !ext.is_empty() {
            out.push('.');
            out.extend(ext.iter().map(|&b| char::from(b)));
        }
        f.write_str(&out)
    }
}

/// Short directory entry
///
/// The name is stored at offset 0, the attributes at 11, the timestamps from
/// 12 to 25, the first cluster at 26 and the size at 28.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    name: ShortName,
    attr: Attributes,
    times: Timestamps,
    first_cluster: Cluster,
    file_size: u32,
}

impl DirEntry {
    /// Deleted entry marker (first byte)
    pub const DELETED_ENTRY: u8 = 0xE5;
    /// End of directory marker (first byte)
    pub const END_OF_ENTRIES: u8 = 0x00;

    #[must_use]
    #[inline]
    pub const fn new(name: ShortName, attr: Attributes, first_cluster: Cluster, file_size: u32) -> Self {
        Self {
            name,
            attr,
            times: Timestamps::decode(&[0; Timestamps::SIZE]),
            first_cluster,
            file_size,
        }
    }

    #[must_use]
    #[inline]
    pub const fn new_file(name: ShortName) -> Self {
        Self::new(name, Attributes::new(Attributes::ARCHIVE), Cluster::FREE, 0)
    }

    #[must_use]
    #[inline]
    pub const fn new_directory(name: ShortName, first_cluster: Cluster) -> Self {
        Self::new(name, Attributes::new(Attributes::DIRECTORY), first_cluster, 0)
    }

    /// Decodes a live short entry.
    ///
    /// Attribute bytes with reserved bits set and first-cluster values that
    /// are neither "none", end of chain nor a data cluster are rejected.
    pub fn decode(raw: &[u8]) -> FatResult<Self> {
        if raw.len() < DIR_ENTRY_SIZE {
            return Err(FatError::InvalidDirEntry);
        }

        let attr = raw[11];
        if attr & Attributes::RESERVED_MASK != 0 {
            return Err(FatError::InvalidDirEntry);
        }

        let first_cluster = Cluster::new(u16::from_le_bytes([raw[26], raw[27]]));
        if !(first_cluster.is_free() || first_cluster.is_valid() || first_cluster == Cluster::END)
        {
            return Err(FatError::InvalidDirEntry);
        }

        let mut name = [0; 11];
        name.copy_from_slice(&raw[..11]);
        let mut times = [0; Timestamps::SIZE];
        times.copy_from_slice(&raw[12..26]);

        Ok(Self {
            name: ShortName(name),
            attr: Attributes::new(attr),
            times: Timestamps::decode(&times),
            first_cluster,
            file_size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        })
    }

    #[must_use]
    /// Encodes the entry into its 32-byte record.
    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0; DIR_ENTRY_SIZE];
        raw[..11].copy_from_slice(&self.name.0);
        if raw[0] == Self::DELETED_ENTRY {
            raw[0] = ShortName::KANJI_E5;
        }
        raw[11] = self.attr.0;
        raw[12..26].copy_from_slice(&self.times.encode());
        raw[26..28].copy_from_slice(&self.first_cluster.value().to_le_bytes());
        raw[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        raw
    }

    #[must_use]
    #[inline]
    pub const fn name(&self) -> &ShortName {
        &self.name
    }

    #[must_use]
    #[inline]
    /// Returns the file attributes
    pub const fn attributes(&self) -> Attributes {
        self.attr
    }

    #[must_use]
    #[inline]
    pub const fn timestamps(&self) -> &Timestamps {
        &self.times
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a directory
    pub const fn is_directory(&self) -> bool {
        self.attr.is_directory()
    }

    #[must_use]
    #[inline]
    /// Returns true if the entry is a volume ID
    pub const fn is_volume_id(&self) -> bool {
        self.attr.is_volume_id() && !self.attr.is_directory()
    }

    #[must_use]
    #[inline]
    /// Returns the first cluster, `None` when no data is attached.
    pub const fn first_cluster(&self) -> Option<Cluster> {
        if self.first_cluster.is_valid() {
            Some(self.first_cluster)
        } else {
            None
        }
    }

    #[inline]
    /// Sets the first cluster (`Cluster::FREE` detaches the data)
    pub const fn set_first_cluster(&mut self, cluster: Cluster) {
        self.first_cluster = cluster;
    }

    #[must_use]
    #[inline]
    /// Returns the file size
    pub const fn file_size(&self) -> u32 {
        self.file_size
    }

    #[inline]
    /// Sets the file size
    pub const fn set_file_size(&mut self, size: u32) {
        self.file_size = size;
    }
}

/// The state of one 32-byte directory slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Never used: no live slot follows in the same region
    NeverUsed,
    /// Tombstoned, reusable
    Deleted,
    /// Long file name fragment, skipped
    LongName,
    Live(DirEntry),
}

impl Slot {
    pub fn decode(raw: &[u8]) -> FatResult<Self> {
        match raw.first() {
            None => Err(FatError::InvalidDirEntry),
            Some(&DirEntry::END_OF_ENTRIES) => Ok(Self::NeverUsed),
            Some(&DirEntry::DELETED_ENTRY) => Ok(Self::Deleted),
            Some(_) if raw.len() > 11 && Attributes::new(raw[11]).is_long_name() => {
                Ok(Self::LongName)
            }
            Some(_) => DirEntry::decode(raw).map(Self::Live),
        }
    }

    #[must_use]
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self, Self::NeverUsed | Self::Deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_short_name_parse() {
        assert_eq!(ShortName::parse("readme.txt").unwrap().as_raw(), b"README  TXT");
        assert_eq!(ShortName::parse("A").unwrap().as_raw(), b"A          ");
        assert_eq!(ShortName::parse("KERNEL.B").unwrap().as_raw(), b"KERNEL  B  ");
        assert_eq!(ShortName::parse("."), Ok(ShortName::DOT));
        assert_eq!(ShortName::parse(".."), Ok(ShortName::DOTDOT));

        assert_eq!(ShortName::parse("longername"), Err(FatError::NameTooLong));
        assert_eq!(ShortName::parse("file.html"), Err(FatError::NameTooLong));
        assert_eq!(ShortName::parse(""), Err(FatError::InvalidName));
        assert_eq!(ShortName::parse(".hidden"), Err(FatError::InvalidName));
        assert_eq!(ShortName::parse("trail."), Err(FatError::InvalidName));
        assert_eq!(ShortName::parse("a b"), Err(FatError::InvalidName));
        assert_eq!(ShortName::parse("a*.txt"), Err(FatError::InvalidName));
        assert_eq!(ShortName::parse("a.b.c"), Err(FatError::InvalidName));
    }

    #[test]
    fn test_short_name_display() {
        assert_eq!(ShortName::parse("readme.txt").unwrap().to_string(), "README.TXT");
        assert_eq!(ShortName::parse("dir").unwrap().to_string(), "DIR");
        assert_eq!(ShortName::DOTDOT.to_string(), "..");
        assert_eq!(ShortName::from_raw(*b"\x05ABC    TXT").to_string(), "\u{e5}ABC.TXT");
    }

    #[test]
    fn test_short_name_matches() {
        let upper = ShortName::from_raw(*b"README  TXT");
        let lower = ShortName::from_raw(*b"readme  txt");
        assert!(upper.matches(&lower));
        assert!(!upper.matches(&ShortName::from_raw(*b"README  TX ")));
        assert!(ShortName::DOT.is_dot_entry());
        assert!(!upper.is_dot_entry());
    }

    #[test]
    fn test_dir_entry_encode_decode() {
        let entry = DirEntry::new(
            ShortName::parse("data.bin").unwrap(),
            Attributes::new(Attributes::ARCHIVE),
            Cluster::new(0x1234),
            5000,
        );
        let raw = entry.encode();
        assert_eq!(&raw[..11], b"DATA    BIN");
        assert_eq!(raw[11], 0x20);
        assert_eq!(&raw[20..22], &[0, 0]);
        assert_eq!(&raw[26..28], &[0x34, 0x12]);
        assert_eq!(&raw[28..32], &5000u32.to_le_bytes());
        assert_eq!(DirEntry::decode(&raw), Ok(entry));

        assert_eq!(entry.first_cluster(), Some(Cluster::new(0x1234)));
        assert_eq!(
            DirEntry::new_file(ShortName::parse("x").unwrap()).first_cluster(),
            None
        );
    }

    #[test]
    fn test_dir_entry_keeps_timestamps() {
        let mut raw = DirEntry::new_file(ShortName::parse("hello.txt").unwrap()).encode();
        let stamps = [
            0x18, 0xC4, 0x6B, 0x8A, 0x52, 0x5D, 0x52, 0x5D, 0x00, 0x00, 0x6B, 0x8A, 0x52, 0x5D,
        ];
        raw[12..26].copy_from_slice(&stamps);

        let mut entry = DirEntry::decode(&raw).unwrap();
        assert_eq!(entry.timestamps().modified().0.year(), 2026);
        entry.set_first_cluster(Cluster::new(40));
        entry.set_file_size(3);

        let rewritten = entry.encode();
        assert_eq!(&rewritten[12..26], &stamps);
        assert_eq!(&rewritten[26..28], &[40, 0]);
    }

    #[test]
    fn test_dir_entry_rejects_impossible_values() {
        let mut raw = DirEntry::new_file(ShortName::parse("x").unwrap()).encode();
        raw[11] = 0x80;
        assert_eq!(DirEntry::decode(&raw), Err(FatError::InvalidDirEntry));

        let mut raw = DirEntry::new_file(ShortName::parse("x").unwrap()).encode();
        raw[26..28].copy_from_slice(&0xFFF3u16.to_le_bytes());
        assert_eq!(DirEntry::decode(&raw), Err(FatError::InvalidDirEntry));

        raw[26..28].copy_from_slice(&1u16.to_le_bytes());
        assert_eq!(DirEntry::decode(&raw), Err(FatError::InvalidDirEntry));

        // "No cluster" may also be spelled as end of chain
        raw[26..28].copy_from_slice(&0xFFFFu16.to_le_bytes());
        assert_eq!(DirEntry::decode(&raw).unwrap().first_cluster(), None);
    }

    #[test]
    fn test_slot_states() {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        assert_eq!(Slot::decode(&raw), Ok(Slot::NeverUsed));

        raw[0] = DirEntry::DELETED_ENTRY;
        raw[11] = 0xFF;
        assert_eq!(Slot::decode(&raw), Ok(Slot::Deleted));

        raw[0] = 0x41;
        raw[11] = Attributes::LONG_NAME;
        assert_eq!(Slot::decode(&raw), Ok(Slot::LongName));

        let entry = DirEntry::new_directory(ShortName::DOT, Cluster::new(9));
        assert_eq!(Slot::decode(&entry.encode()), Ok(Slot::Live(entry)));
        assert!(Slot::Deleted.is_free());
        assert!(!Slot::LongName.is_free());
    }
}
