//! Sector and cluster I/O on top of a block device.
use super::{Cluster, FatError, FatResult, bs::BootParamBlock, layout::Layout};
use crate::BlockDevice;
use alloc::{vec, vec::Vec};
use log::{error, info, warn};

/// Smallest cluster count of a FAT16 volume.
pub const FAT16_MIN_CLUSTERS: u32 = 4085;
/// Cluster count from which a volume must be FAT32.
pub const FAT16_MAX_CLUSTERS: u32 = 65525;

/// A block device interpreted through the geometry of its FAT16 volume.
pub struct Volume<D: BlockDevice> {
    device: D,
    layout: Layout,
    blocks_per_sector: usize,
}

impl<D: BlockDevice> Volume<D> {
    /// Reads and checks the boot sector of `device`.
    pub fn open(mut device: D) -> FatResult<Self> {
        if D::BLOCK_SIZE == 0 {
            return Err(FatError::NotSupported);
        }
        let mut raw = vec![0; super::bs::BOOT_SECTOR_SIZE.next_multiple_of(D::BLOCK_SIZE)];
        device.read(&mut raw, 0)?;

        let bpb = BootParamBlock::parse(&raw)?;
        if !bpb.validate() {
            return Err(FatError::InvalidBootSector);
        }
        if bpb.has_extended_fields() && matches!(bpb.fs_type(), b"FAT12   " | b"FAT32   ") {
            return Err(FatError::NotSupported);
        }

        let bytes_per_sector = usize::from(bpb.bytes_per_sector());
        if bytes_per_sector % D::BLOCK_SIZE != 0 {
            return Err(FatError::NotSupported);
        }

        let layout = Layout::new(&bpb);
        let clusters = layout.cluster_count();
        if clusters >= FAT16_MAX_CLUSTERS {
            return Err(FatError::NotSupported);
        }
        if clusters < FAT16_MIN_CLUSTERS {
            warn!("Volume only has {clusters} clusters, other drivers may read it as FAT12");
        }

        info!(
            "Mounted FAT16 volume: {} clusters of {} bytes, {} FAT copies",
            clusters,
            layout.cluster_size(),
            layout.fat_count()
        );

        Ok(Self {
            device,
            layout,
            blocks_per_sector: bytes_per_sector / D::BLOCK_SIZE,
        })
    }

    #[must_use]
    #[inline]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    #[must_use]
    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }

    #[must_use]
    #[inline]
    pub fn into_inner(self) -> D {
        self.device
    }

    #[must_use]
    #[inline]
    /// Allocates a buffer holding one sector.
    pub fn sector_buffer(&self) -> Vec<u8> {
        vec![0; self.layout.bytes_per_sector() as usize]
    }

    /// Reads one sector (`buffer` is exactly one sector long).
    pub fn read_sector(&mut self, sector: u32, buffer: &mut [u8]) -> FatResult<()> {
        debug_assert_eq!(buffer.len(), self.layout.bytes_per_sector() as usize);
        self.device
            .read(buffer, sector as usize * self.blocks_per_sector)
            .map_err(|err| {
                error!("Failed to read sector {sector}: {err}");
                err.into()
            })
    }

    /// Writes one sector (`buffer` is exactly one sector long).
    pub fn write_sector(&mut self, sector: u32, buffer: &[u8]) -> FatResult<()> {
        debug_assert_eq!(buffer.len(), self.layout.bytes_per_sector() as usize);
        self.device
            .write(buffer, sector as usize * self.blocks_per_sector)
            .map_err(|err| {
                error!("Failed to write sector {sector}: {err}");
                err.into()
            })
    }

    fn check_cluster_range(&self, cluster: Cluster, offset: usize, len: usize) -> FatResult<()> {
        if !self.layout.is_data_cluster(cluster) {
            return Err(FatError::InvalidCluster);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.layout.cluster_size() as usize => Ok(()),
            _ => Err(FatError::InvalidParameter),
        }
    }

    /// Reads `dst.len()` bytes of `cluster`, starting `offset` bytes into it.
    pub fn read_cluster(&mut self, cluster: Cluster, offset: usize, dst: &mut [u8]) -> FatResult<()> {
        self.check_cluster_range(cluster, offset, dst.len())?;

        let bytes_per_sector = self.layout.bytes_per_sector() as usize;
        let first_sector = self.layout.cluster_first_sector(cluster);
        let mut sector = self.sector_buffer();
        let mut done = 0;

        while done < dst.len() {
            let position = offset + done;
            let sector_number = first_sector + (position / bytes_per_sector) as u32;
            let within = position % bytes_per_sector;
            let chunk = (bytes_per_sector - within).min(dst.len() - done);

            if chunk == bytes_per_sector {
                self.read_sector(sector_number, &mut dst[done..done + chunk])?;
            } else {
                self.read_sector(sector_number, &mut sector)?;
                dst[done..done + chunk].copy_from_slice(&sector[within..within + chunk]);
            }
            done += chunk;
        }

        Ok(())
    }

    /// Writes `src` into `cluster`, starting `offset` bytes into it.
    ///
    /// Bytes of the cluster outside of `offset..offset + src.len()` are preserved:
    /// a sector that is only partially covered is read, patched and written back.
    pub fn write_cluster(&mut self, cluster: Cluster, offset: usize, src: &[u8]) -> FatResult<()> {
        self.check_cluster_range(cluster, offset, src.len())?;

        let bytes_per_sector = self.layout.bytes_per_sector() as usize;
        let first_sector = self.layout.cluster_first_sector(cluster);
        let mut sector = self.sector_buffer();
        let mut done = 0;

        while done < src.len() {
            let position = offset + done;
            let sector_number = first_sector + (position / bytes_per_sector) as u32;
            let within = position % bytes_per_sector;
            let chunk = (bytes_per_sector - within).min(src.len() - done);

            if chunk == bytes_per_sector {
                self.write_sector(sector_number, &src[done..done + chunk])?;
            } else {
                self.read_sector(sector_number, &mut sector)?;
                sector[within..within + chunk].copy_from_slice(&src[done..done + chunk]);
                self.write_sector(sector_number, &sector)?;
            }
            done += chunk;
        }

        Ok(())
    }

    /// Fills the whole cluster with zeros.
    pub fn zero_cluster(&mut self, cluster: Cluster) -> FatResult<()> {
        self.check_cluster_range(cluster, 0, 0)?;
        let zeros = self.sector_buffer();
        let first_sector = self.layout.cluster_first_sector(cluster);
        for index in 0..self.layout.sectors_per_cluster() {
            self.write_sector(first_sector + index, &zeros)?;
        }
        Ok(())
    }
}
