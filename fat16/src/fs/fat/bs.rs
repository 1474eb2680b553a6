//! Boot sector and BIOS Parameter Block (BPB) handling.
//!
//! All fields are little-endian and decoded explicitly at their fixed offsets.
use super::{
    FatError, FatResult, dirent::DIR_ENTRY_SIZE, layout::Layout, volume::FAT16_MAX_CLUSTERS,
};
use crate::BlockDevice;
use alloc::vec;
use log::{debug, info, warn};

/// Size of the part of the boot sector holding the BPB and the signature.
pub const BOOT_SECTOR_SIZE: usize = 512;
/// Boot sector signature, stored at byte 510.
pub const SIGNATURE: [u8; 2] = [0x55, 0xAA];
/// Extended boot signature announcing the volume id, label and type fields.
pub const EXTENDED_BOOT_SIGNATURE: u8 = 0x29;

/// BIOS Parameter Block (BPB) for FAT16 file system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootParamBlock {
    /// Bytes per sector.
    ///
    /// This field is either 512, 1024, 2048, or 4096.
    bytes_per_sector: u16,
    sectors_per_cluster: u8,
    reserved_sectors: u16,
    fat_count: u8,
    root_entries: u16,
    /// Total sectors in the file system.
    ///
    /// If the total number of sectors exceeds `u16::MAX`, this field is set to 0
    /// and one should use `total_sectors_large` instead.
    total_sectors: u16,
    /// Driver type.
    ///
    /// Example: 0xF8 for fixed disk and 0xF0 for removable disk.
    media_descriptor: u8,
    sectors_per_fat: u16,
    sectors_per_track: u16,
    heads: u16,
    hidden_sectors: u32,
    total_sectors_large: u32,
    drive_number: u8,
    /// Boot signature, 0x29 when the three following fields are present.
    boot_flag: u8,
    volume_id: u32,
    volume_label: [u8; 11],
    fs_type: [u8; 8],
}

fn read_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
    ])
}

impl BootParamBlock {
    /// Decodes the BPB from the first bytes of the boot sector.
    pub fn parse(raw: &[u8]) -> FatResult<Self> {
        if raw.len() < BOOT_SECTOR_SIZE || raw[510..512] != SIGNATURE {
            return Err(FatError::InvalidBootSector);
        }

        let mut volume_label = [0; 11];
        volume_label.copy_from_slice(&raw[43..54]);
        let mut fs_type = [0; 8];
        fs_type.copy_from_slice(&raw[54..62]);

        Ok(Self {
            bytes_per_sector: read_u16(raw, 11),
            sectors_per_cluster: raw[13],
            reserved_sectors: read_u16(raw, 14),
            fat_count: raw[16],
            root_entries: read_u16(raw, 17),
            total_sectors: read_u16(raw, 19),
            media_descriptor: raw[21],
            sectors_per_fat: read_u16(raw, 22),
            sectors_per_track: read_u16(raw, 24),
            heads: read_u16(raw, 26),
            hidden_sectors: read_u32(raw, 28),
            total_sectors_large: read_u32(raw, 32),
            drive_number: raw[36],
            boot_flag: raw[38],
            volume_id: read_u32(raw, 39),
            volume_label,
            fs_type,
        })
    }

    /// Encodes the BPB into `raw`, leaving every other byte untouched.
    pub fn encode(&self, raw: &mut [u8]) {
        raw[11..13].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        raw[13] = self.sectors_per_cluster;
        raw[14..16].copy_from_slice(&self.reserved_sectors.to_le_bytes());
        raw[16] = self.fat_count;
        raw[17..19].copy_from_slice(&self.root_entries.to_le_bytes());
        raw[19..21].copy_from_slice(&self.total_sectors.to_le_bytes());
        raw[21] = self.media_descriptor;
        raw[22..24].copy_from_slice(&self.sectors_per_fat.to_le_bytes());
        raw[24..26].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        raw[26..28].copy_from_slice(&self.heads.to_le_bytes());
        raw[28..32].copy_from_slice(&self.hidden_sectors.to_le_bytes());
        raw[32..36].copy_from_slice(&self.total_sectors_large.to_le_bytes());
        raw[36] = self.drive_number;
        raw[37] = 0;
        raw[38] = self.boot_flag;
        raw[39..43].copy_from_slice(&self.volume_id.to_le_bytes());
        raw[43..54].copy_from_slice(&self.volume_label);
        raw[54..62].copy_from_slice(&self.fs_type);
    }

    #[must_use]
    #[inline]
    /// Returns the number of bytes per sector.
    pub const fn bytes_per_sector(&self) -> u16 {
        self.bytes_per_sector
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors per cluster.
    pub const fn sectors_per_cluster(&self) -> u8 {
        self.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    /// Returns the number of reserved sectors.
    pub const fn reserved_sectors(&self) -> u16 {
        self.reserved_sectors
    }

    #[must_use]
    #[inline]
    /// Returns the number of FATs.
    pub const fn fat_count(&self) -> u8 {
        self.fat_count
    }

    #[must_use]
    #[inline]
    /// Returns the number of root directory entries.
    pub const fn root_entries(&self) -> u16 {
        self.root_entries
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors in the file system.
    pub const fn total_sectors(&self) -> u32 {
        if self.total_sectors != 0 {
            self.total_sectors as u32
        } else {
            self.total_sectors_large
        }
    }

    #[must_use]
    #[inline]
    /// Returns the media descriptor.
    pub const fn media_descriptor(&self) -> u8 {
        self.media_descriptor
    }

    #[must_use]
    #[inline]
    /// Returns the number of sectors per FAT.
    pub const fn sectors_per_fat(&self) -> u16 {
        self.sectors_per_fat
    }

    #[must_use]
    #[inline]
    pub const fn sectors_per_track(&self) -> u16 {
        self.sectors_per_track
    }

    #[must_use]
    #[inline]
    pub const fn heads(&self) -> u16 {
        self.heads
    }

    #[must_use]
    #[inline]
    pub const fn hidden_sectors(&self) -> u32 {
        self.hidden_sectors
    }

    #[must_use]
    #[inline]
    pub const fn drive_number(&self) -> u8 {
        self.drive_number
    }

    #[must_use]
    #[inline]
    /// Returns true if the volume id, label and type fields are meaningful.
    pub const fn has_extended_fields(&self) -> bool {
        self.boot_flag == EXTENDED_BOOT_SIGNATURE
    }

    #[must_use]
    #[inline]
    pub const fn volume_id(&self) -> u32 {
        self.volume_id
    }

    #[must_use]
    #[inline]
    pub const fn volume_label(&self) -> [u8; 11] {
        self.volume_label
    }

    #[must_use]
    #[inline]
    /// Returns the informational file system type string (e.g. `FAT16   `).
    pub const fn fs_type(&self) -> &[u8; 8] {
        &self.fs_type
    }

    #[must_use]
    #[inline]
    /// Returns the number of bytes per cluster.
    pub fn bytes_per_cluster(&self) -> u32 {
        u32::from(self.bytes_per_sector()) * u32::from(self.sectors_per_cluster())
    }

    #[must_use]
    pub fn validate(&self) -> bool {
        /// Maximum bytes per cluster for maximum compatibility.
        const MAX_BYTES_PER_CLUSTER: u32 = 32 * 1024; // 32 KiB
        /// Maximum number of supported FAT
        const MAX_FAT_COUNT: u8 = 2;

        // Check bytes per sector
        if !self.bytes_per_sector().is_power_of_two()
            || self.bytes_per_sector() < 512
            || self.bytes_per_sector() > 4096
        {
            return false;
        }

        // Check sectors per cluster
        if !self.sectors_per_cluster().is_power_of_two()
            || self.bytes_per_cluster() > MAX_BYTES_PER_CLUSTER
        {
            return false;
        }

        // Check reserved sectors
        if self.reserved_sectors() == 0 {
            return false;
        }

        // Check FAT count
        if self.fat_count() == 0 || self.fat_count() > MAX_FAT_COUNT {
            return false;
        }

        // Check root entries
        if self.root_entries() == 0
            || (usize::from(self.root_entries()) * DIR_ENTRY_SIZE
                % usize::from(self.bytes_per_sector())
                != 0)
        {
            return false;
        }

        // Check media descriptor
        if self.media_descriptor() != 0xF0 && self.media_descriptor() < 0xF8 {
            return false;
        }

        // Check total sectors and sectors per fat
        if self.total_sectors() == 0 || self.sectors_per_fat() == 0 {
            return false;
        }

        // Check that the data region exists and that the FAT covers it
        let layout = Layout::new(self);
        if layout.data_first_sector() >= layout.total_sectors() {
            return false;
        }
        layout.fat_size() / 2 >= u64::from(layout.cluster_count()) + 2
    }
}

/// Boot sector builder, used to format new volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSector {
    oem_name: [u8; 8],
    bpb: BootParamBlock,
}

impl BootSector {
    const JUMP: [u8; 3] = [0xEB, 0x3C, 0x90];

    #[must_use]
    /// Starts a FAT16 boot sector with the common hard-disk defaults.
    ///
    /// The cluster size and the FAT size are derived from the total size
    /// unless they are set explicitly.
    pub const fn new_fat16() -> Self {
        Self {
            oem_name: *b"FAT16RS ",
            bpb: BootParamBlock {
                bytes_per_sector: 512,
                sectors_per_cluster: 0,
                reserved_sectors: 1,
                fat_count: 2,
                root_entries: 512,
                total_sectors: 0,
                media_descriptor: 0xF8,
                sectors_per_fat: 0,
                sectors_per_track: 63,
                heads: 255,
                hidden_sectors: 0,
                total_sectors_large: 0,
                drive_number: 0x80,
                boot_flag: EXTENDED_BOOT_SIGNATURE,
                volume_id: 0,
                volume_label: *b"NO NAME    ",
                fs_type: *b"FAT16   ",
            },
        }
    }

    #[must_use]
    pub const fn with_bytes_per_sector(mut self, bytes_per_sector: u16) -> Self {
        self.bpb.bytes_per_sector = bytes_per_sector;
        self
    }

    #[must_use]
    pub const fn with_sectors_per_cluster(mut self, sectors_per_cluster: u8) -> Self {
        self.bpb.sectors_per_cluster = sectors_per_cluster;
        self
    }

    #[must_use]
    pub const fn with_reserved_sectors(mut self, reserved_sectors: u16) -> Self {
        self.bpb.reserved_sectors = reserved_sectors;
        self
    }

    #[must_use]
    pub const fn with_fat_count(mut self, fat_count: u8) -> Self {
        self.bpb.fat_count = fat_count;
        self
    }

    #[must_use]
    pub const fn with_root_entries(mut self, root_entries: u16) -> Self {
        self.bpb.root_entries = root_entries;
        self
    }

    #[must_use]
    pub const fn with_media_descriptor(mut self, media_descriptor: u8) -> Self {
        self.bpb.media_descriptor = media_descriptor;
        self
    }

    #[must_use]
    pub const fn with_total_sectors(mut self, total_sectors: u32) -> Self {
        if total_sectors <= u16::MAX as u32 {
            self.bpb.total_sectors = total_sectors as u16;
            self.bpb.total_sectors_large = 0;
        } else {
            self.bpb.total_sectors = 0;
            self.bpb.total_sectors_large = total_sectors;
        }
        self
    }

    #[must_use]
    /// Overrides the derived FAT size.
    pub const fn with_sectors_per_fat(mut self, sectors_per_fat: u16) -> Self {
        self.bpb.sectors_per_fat = sectors_per_fat;
        self
    }

    #[must_use]
    pub const fn with_volume_id(mut self, volume_id: u32) -> Self {
        self.bpb.volume_id = volume_id;
        self
    }

    #[must_use]
    /// Sets the volume label, truncated or space-padded to 11 bytes.
    pub fn with_volume_label(mut self, label: &str) -> Self {
        let mut raw = [b' '; 11];
        for (dst, src) in raw.iter_mut().zip(label.bytes()) {
            *dst = src.to_ascii_uppercase();
        }
        self.bpb.volume_label = raw;
        self
    }

    #[must_use]
    /// Returns the BPB, deriving the cluster and FAT sizes when they were not
    /// set explicitly.
    pub fn bpb(&self) -> BootParamBlock {
        let mut bpb = self.bpb;
        if bpb.sectors_per_cluster == 0 {
            bpb.sectors_per_cluster = Self::derive_sectors_per_cluster(&bpb);
        }
        if bpb.sectors_per_fat == 0 {
            bpb.sectors_per_fat = Self::derive_sectors_per_fat(&bpb);
        }
        bpb
    }

    /// Cluster size picked the way `mkfs` tools do for FAT16: 1 KiB up to
    /// 16 MiB, 2 KiB up to 128 MiB, then growing with the volume up to 32 KiB.
    fn derive_sectors_per_cluster(bpb: &BootParamBlock) -> u8 {
        const KIB: u64 = 1024;
        const MIB: u64 = 1024 * KIB;
        const MAX_BYTES_PER_CLUSTER: u64 = 32 * KIB;

        let bytes_per_sector = u64::from(bpb.bytes_per_sector).max(1);
        let total_bytes = u64::from(bpb.total_sectors()) * bytes_per_sector;
        let bytes_per_cluster = if total_bytes <= 16 * MIB {
            KIB
        } else if total_bytes <= 128 * MIB {
            2 * KIB
        } else {
            total_bytes.next_power_of_two() / (64 * MIB) * KIB
        };

        let bytes_per_cluster = bytes_per_cluster
            .clamp(bytes_per_sector, MAX_BYTES_PER_CLUSTER.max(bytes_per_sector));
        u8::try_from(bytes_per_cluster / bytes_per_sector).unwrap_or(u8::MAX)
    }

    /// Smallest usual FAT size covering every cluster of the volume.
    fn derive_sectors_per_fat(bpb: &BootParamBlock) -> u16 {
        let bytes_per_sector = u32::from(bpb.bytes_per_sector).max(1);
        let root_sectors =
            (u32::from(bpb.root_entries) * DIR_ENTRY_SIZE as u32).div_ceil(bytes_per_sector);
        let available = bpb
            .total_sectors()
            .saturating_sub(u32::from(bpb.reserved_sectors) + root_sectors);
        let per_fat_sector =
            (bytes_per_sector / 2) * u32::from(bpb.sectors_per_cluster) + u32::from(bpb.fat_count);
        u16::try_from(available.div_ceil(per_fat_sector.max(1))).unwrap_or(u16::MAX)
    }

    /// Encodes the full boot sector (`raw` is one sector long).
    pub fn encode(&self, raw: &mut [u8]) {
        raw.fill(0);
        raw[..3].copy_from_slice(&Self::JUMP);
        raw[3..11].copy_from_slice(&self.oem_name);
        self.bpb().encode(raw);
        raw[510..512].copy_from_slice(&SIGNATURE);
    }
}

/// Writes an empty FAT16 file system onto `device`.
///
/// The boot sector is written first, then every FAT copy (cleared, with the
/// two reserved entries set), then the root directory region is cleared.
/// The data region is left as is.
pub fn format<D: BlockDevice>(device: &mut D, boot_sector: &BootSector) -> FatResult<()> {
    let bpb = boot_sector.bpb();
    if !bpb.validate() {
        return Err(FatError::InvalidBootSector);
    }
    let layout = Layout::new(&bpb);
    if layout.cluster_count() >= FAT16_MAX_CLUSTERS {
        warn!(
            "{} clusters is too many for FAT16, use larger clusters",
            layout.cluster_count()
        );
        return Err(FatError::NotSupported);
    }
    let bytes_per_sector = usize::from(bpb.bytes_per_sector());
    if D::BLOCK_SIZE == 0 || bytes_per_sector % D::BLOCK_SIZE != 0 {
        return Err(FatError::NotSupported);
    }
    let blocks_per_sector = bytes_per_sector / D::BLOCK_SIZE;
    let mut sector = vec![0; bytes_per_sector];

    // Make sure the device can hold the whole volume before touching it
    device.read(
        &mut sector,
        (layout.total_sectors() as usize - 1) * blocks_per_sector,
    )?;

    boot_sector.encode(&mut sector);
    device.write(&sector, 0)?;

    sector.fill(0);
    for reserved in 1..u32::from(bpb.reserved_sectors()) {
        device.write(&sector, reserved as usize * blocks_per_sector)?;
    }

    for copy in 0..layout.fat_count() {
        let first = layout.fat_first_sector(copy);
        for index in 0..layout.sectors_per_fat() {
            sector.fill(0);
            if index == 0 {
                let media = 0xFF00 | u16::from(bpb.media_descriptor());
                sector[0..2].copy_from_slice(&media.to_le_bytes());
                sector[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
            }
            device.write(&sector, (first + index) as usize * blocks_per_sector)?;
        }
    }

    sector.fill(0);
    for index in 0..layout.root_sectors() {
        let sector_number = layout.root_first_sector() + index;
        device.write(&sector, sector_number as usize * blocks_per_sector)?;
    }
    debug!(
        "FAT copies at sector {}, root at sector {}, data at sector {}",
        layout.fat_first_sector(0),
        layout.root_first_sector(),
        layout.data_first_sector()
    );

    info!(
        "Formatted FAT16 volume: {} sectors, {} clusters of {} bytes",
        layout.total_sectors(),
        layout.cluster_count(),
        layout.cluster_size()
    );
    Ok(())
}
