//! Volume geometry and the byte/sector offsets derived from it.
//!
//! Every offset is a pure function of the boot parameter block; a `Layout`
//! is computed once at mount time and never changes afterwards.
use super::{Cluster, bs::BootParamBlock, dirent::DIR_ENTRY_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    fat_count: u32,
    root_entries: u32,
    sectors_per_fat: u32,
    total_sectors: u32,
}

impl Layout {
    #[must_use]
    pub fn new(bpb: &BootParamBlock) -> Self {
        Self {
            bytes_per_sector: u32::from(bpb.bytes_per_sector()),
            sectors_per_cluster: u32::from(bpb.sectors_per_cluster()),
            reserved_sectors: u32::from(bpb.reserved_sectors()),
            fat_count: u32::from(bpb.fat_count()),
            root_entries: u32::from(bpb.root_entries()),
            sectors_per_fat: u32::from(bpb.sectors_per_fat()),
            total_sectors: bpb.total_sectors(),
        }
    }

    #[must_use]
    #[inline]
    pub const fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    #[must_use]
    #[inline]
    pub const fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    pub const fn fat_count(&self) -> u32 {
        self.fat_count
    }

    #[must_use]
    #[inline]
    pub const fn root_entries(&self) -> u32 {
        self.root_entries
    }

    #[must_use]
    #[inline]
    pub const fn sectors_per_fat(&self) -> u32 {
        self.sectors_per_fat
    }

    #[must_use]
    #[inline]
    pub const fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    // Byte offsets

    #[must_use]
    #[inline]
    /// Byte offset of the first FAT copy.
    pub const fn fat_offset(&self) -> u64 {
        self.reserved_sectors as u64 * self.bytes_per_sector as u64
    }

    #[must_use]
    #[inline]
    /// Size in bytes of one FAT copy.
    pub const fn fat_size(&self) -> u64 {
        self.bytes_per_sector as u64 * self.sectors_per_fat as u64
    }

    #[must_use]
    #[inline]
    /// Byte offset of the root directory region.
    pub const fn root_offset(&self) -> u64 {
        self.fat_offset() + self.fat_size() * self.fat_count as u64
    }

    #[must_use]
    #[inline]
    /// Size in bytes of a cluster.
    pub const fn cluster_size(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    /// Byte offset of the data region (cluster 2).
    pub const fn data_offset(&self) -> u64 {
        self.root_offset() + self.root_entries as u64 * DIR_ENTRY_SIZE as u64
    }

    // Sector numbers

    #[must_use]
    #[inline]
    /// First sector of the given FAT copy.
    pub const fn fat_first_sector(&self, copy: u32) -> u32 {
        self.reserved_sectors + copy * self.sectors_per_fat
    }

    #[must_use]
    #[inline]
    /// Locates the FAT entry of `cluster` inside one FAT copy.
    ///
    /// Returns the sector relative to the start of the copy and the byte offset
    /// inside that sector.
    pub const fn fat_entry_position(&self, cluster: Cluster) -> (u32, usize) {
        let offset = cluster.value() as u32 * 2;
        (
            offset / self.bytes_per_sector,
            (offset % self.bytes_per_sector) as usize,
        )
    }

    #[must_use]
    #[inline]
    pub const fn root_first_sector(&self) -> u32 {
        self.fat_first_sector(self.fat_count)
    }

    #[must_use]
    #[inline]
    /// Number of sectors in the root directory region.
    pub const fn root_sectors(&self) -> u32 {
        (self.root_entries * DIR_ENTRY_SIZE as u32).div_ceil(self.bytes_per_sector)
    }

    #[must_use]
    #[inline]
    pub const fn data_first_sector(&self) -> u32 {
        self.root_first_sector() + self.root_sectors()
    }

    #[must_use]
    #[inline]
    /// Number of data clusters on the volume.
    pub const fn cluster_count(&self) -> u32 {
        self.total_sectors.saturating_sub(self.data_first_sector()) / self.sectors_per_cluster
    }

    #[must_use]
    /// Highest cluster number that is backed by both the data region and the FAT.
    pub fn max_cluster(&self) -> Cluster {
        let by_data = self.cluster_count() + 1;
        let by_fat = u32::try_from(self.fat_size() / 2)
            .unwrap_or(u32::MAX)
            .saturating_sub(1);
        let max = by_data
            .min(by_fat)
            .min(u32::from(Cluster::MAX.value()));
        // `max` never exceeds `Cluster::MAX`
        Cluster::new(u16::try_from(max).unwrap_or(Cluster::MAX.value()))
    }

    #[must_use]
    #[inline]
    /// Returns true if `cluster` designates an existing data cluster.
    pub fn is_data_cluster(&self, cluster: Cluster) -> bool {
        cluster.is_valid() && cluster <= self.max_cluster()
    }

    #[must_use]
    #[inline]
    /// First sector of a data cluster.
    pub const fn cluster_first_sector(&self, cluster: Cluster) -> u32 {
        self.data_first_sector() + (cluster.value() as u32 - 2) * self.sectors_per_cluster
    }

    #[must_use]
    #[inline]
    pub const fn entries_per_sector(&self) -> usize {
        self.bytes_per_sector as usize / DIR_ENTRY_SIZE
    }

    #[must_use]
    #[inline]
    /// Number of clusters needed to hold `size` bytes.
    pub const fn clusters_for(&self, size: u64) -> u64 {
        size.div_ceil(self.cluster_size() as u64)
    }
}
