use super::{Cluster, FatError, FatResult, volume::Volume};
use crate::BlockDevice;
use alloc::vec::Vec;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// FAT16 table entry
pub enum FatEntry {
    /// Free cluster
    Free,
    /// Used cluster, pointing to the next cluster in the chain
    Next(Cluster),
    /// Last cluster in the chain
    EndOfChain,
    /// Bad cluster
    Bad,
    /// Reserved cluster
    Reserved,
}

impl FatEntry {
    #[must_use]
    pub const fn decode(value: u16) -> Self {
        match value {
            0 => Self::Free,
            0xFFF7 => Self::Bad,
            0xFFF0..=0xFFF6 | 1 => Self::Reserved,
            0xFFF8..=0xFFFF => Self::EndOfChain,
            val => Self::Next(Cluster::new(val)),
        }
    }

    #[must_use]
    pub const fn encode(self) -> u16 {
        match self {
            Self::Free => 0,
            Self::Next(next) => next.value(),
            Self::EndOfChain => Cluster::END.value(),
            Self::Bad => 0xFFF7,
            Self::Reserved => 0xFFF6,
        }
    }
}

/// FAT16 entry handling inside a buffer holding (part of) a FAT copy
pub(crate) mod fat16 {
    use super::{FatEntry, FatError, FatResult};

    pub fn read_fat_entry(fat: &[u8], offset: usize) -> FatResult<FatEntry> {
        if offset + 1 >= fat.len() {
            return Err(FatError::OutOfBounds);
        }
        Ok(FatEntry::decode(u16::from_le_bytes([
            fat[offset],
            fat[offset + 1],
        ])))
    }

    pub fn write_fat_entry(fat: &mut [u8], offset: usize, entry: FatEntry) -> FatResult<()> {
        if offset + 1 >= fat.len() {
            return Err(FatError::OutOfBounds);
        }
        fat[offset..offset + 2].copy_from_slice(&entry.encode().to_le_bytes());
        Ok(())
    }
}

/// Collection of FAT entries
pub trait FatEntries {
    #[must_use]
    /// Returns the highest cluster number of the volume
    fn max_cluster(&self) -> Cluster;

    /// Returns the entry value for the given cluster
    fn get(&mut self, cluster: Cluster) -> FatResult<FatEntry>;

    /// Sets the entry value for the given cluster
    fn set(&mut self, cluster: Cluster, entry: FatEntry) -> FatResult<()>;

    #[must_use]
    /// Returns an iterator over all clusters in a chain starting from the given cluster
    fn chain_iter(&mut self, start: Cluster) -> FatChainIter<'_, Self>
    where
        Self: Sized,
    {
        let budget = usize::from(self.max_cluster().value());
        FatChainIter {
            fat: self,
            next: Some(start),
            budget,
        }
    }

    /// Returns the last cluster of the chain and the number of clusters in it
    fn chain_tail(&mut self, start: Cluster) -> FatResult<(Cluster, usize)>
    where
        Self: Sized,
    {
        let mut tail = start;
        let mut count = 0;
        for cluster in self.chain_iter(start) {
            tail = cluster?;
            count += 1;
        }
        Ok((tail, count))
    }

    /// Allocates a new cluster and returns its number
    fn alloc_cluster(&mut self) -> FatResult<Cluster> {
        self.alloc_cluster_chain(1)
    }

    /// Allocates a chain of clusters and returns the first cluster number
    fn alloc_cluster_chain(&mut self, count: usize) -> FatResult<Cluster>;

    /// Frees a cluster
    fn free_cluster(&mut self, cluster: Cluster) -> FatResult<()> {
        self.set(cluster, FatEntry::Free)
    }

    /// Frees a chain of clusters starting from the given cluster
    ///
    /// Returns the number of clusters freed.
    fn free_cluster_chain(&mut self, start: Cluster) -> FatResult<usize>;

    /// Counts the number of free clusters
    fn count_free(&mut self) -> FatResult<u32>;
}

/// Iterator over a chain of clusters
///
/// A chain longer than the volume itself is reported as corrupted
/// instead of being followed forever.
pub struct FatChainIter<'a, T: FatEntries> {
    fat: &'a mut T,
    next: Option<Cluster>,
    budget: usize,
}

impl<T: FatEntries> Iterator for FatChainIter<'_, T> {
    type Item = FatResult<Cluster>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        if self.budget == 0 {
            return Some(Err(FatError::InvalidFat));
        }
        self.budget -= 1;

        match self.fat.get(current) {
            Ok(FatEntry::Next(next)) => self.next = Some(next),
            Ok(FatEntry::EndOfChain) => {}
            Ok(_) => return Some(Err(FatError::InvalidFat)),
            Err(err) => return Some(Err(err)),
        }

        Some(Ok(current))
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Reads an entry from a specific FAT copy
    pub fn get_in_copy(&mut self, copy: u32, cluster: Cluster) -> FatResult<FatEntry> {
        if copy >= self.layout().fat_count() {
            return Err(FatError::InvalidParameter);
        }
        let (sector, offset) = self.layout().fat_entry_position(cluster);
        let mut buffer = self.sector_buffer();
        self.read_sector(self.layout().fat_first_sector(copy) + sector, &mut buffer)?;
        fat16::read_fat_entry(&buffer, offset)
    }

    /// Scans FAT copy 0 in ascending order for up to `count` free clusters
    fn find_free_clusters(&mut self, count: usize) -> FatResult<Vec<Cluster>> {
        let max = self.max_cluster().index();
        let entries_per_sector = self.layout().bytes_per_sector() as usize / 2;
        let first_sector = self.layout().fat_first_sector(0);
        let mut buffer = self.sector_buffer();
        let mut found = Vec::with_capacity(count.min(max));

        for sector in 0..self.layout().sectors_per_fat() {
            let base = sector as usize * entries_per_sector;
            if base > max {
                break;
            }
            self.read_sector(first_sector + sector, &mut buffer)?;

            for (slot, raw) in buffer.chunks_exact(2).enumerate() {
                let index = base + slot;
                if index < Cluster::MIN.index() {
                    continue;
                }
                if index > max {
                    break;
                }
                if raw == [0, 0] {
                    // `index <= max <= Cluster::MAX`
                    found.push(Cluster::new(index as u16));
                    if found.len() == count {
                        return Ok(found);
                    }
                }
            }
        }

        Ok(found)
    }

    fn check_data_cluster(&self, cluster: Cluster) -> FatResult<()> {
        if self.layout().is_data_cluster(cluster) {
            Ok(())
        } else {
            Err(FatError::InvalidCluster)
        }
    }
}

impl<D: BlockDevice> FatEntries for Volume<D> {
    #[inline]
    fn max_cluster(&self) -> Cluster {
        self.layout().max_cluster()
    }

    fn get(&mut self, cluster: Cluster) -> FatResult<FatEntry> {
        self.check_data_cluster(cluster)?;
        self.get_in_copy(0, cluster)
    }

    fn set(&mut self, cluster: Cluster, entry: FatEntry) -> FatResult<()> {
        self.check_data_cluster(cluster)?;
        if let FatEntry::Next(next) = entry {
            self.check_data_cluster(next)?;
        }

        // Patch the sector of the first copy, then replicate it to every copy
        let (sector, offset) = self.layout().fat_entry_position(cluster);
        let mut buffer = self.sector_buffer();
        self.read_sector(self.layout().fat_first_sector(0) + sector, &mut buffer)?;
        fat16::write_fat_entry(&mut buffer, offset, entry)?;
        for copy in 0..self.layout().fat_count() {
            self.write_sector(self.layout().fat_first_sector(copy) + sector, &buffer)?;
        }

        Ok(())
    }

    fn alloc_cluster_chain(&mut self, count: usize) -> FatResult<Cluster> {
        if count == 0 {
            return Err(FatError::InvalidParameter);
        }

        let clusters = self.find_free_clusters(count)?;
        if clusters.len() < count {
            debug!("Cannot allocate {count} clusters, only {} free", clusters.len());
            return Err(FatError::NoSpace);
        }

        // Clear the data before any chain references it
        for &cluster in &clusters {
            self.zero_cluster(cluster)?;
        }

        for pair in clusters.windows(2) {
            self.set(pair[0], FatEntry::Next(pair[1]))?;
        }
        let (first, last) = (clusters[0], clusters[count - 1]);
        self.set(last, FatEntry::EndOfChain)?;

        debug!("Allocated {count} clusters starting at {first}");
        Ok(first)
    }

    fn free_cluster_chain(&mut self, start: Cluster) -> FatResult<usize> {
        self.check_data_cluster(start)?;

        let mut current = start;
        let mut freed = 0;

        loop {
            if freed > self.max_cluster().index() {
                return Err(FatError::InvalidFat);
            }

            // The forward pointer must be read before it is cleared
            let entry = self.get(current)?;
            self.set(current, FatEntry::Free)?;
            freed += 1;

            match entry {
                FatEntry::Next(next) => current = next,
                FatEntry::EndOfChain => break,
                _ => return Err(FatError::InvalidFat),
            }
        }

        debug!("Released {freed} clusters starting at {start}");
        Ok(freed)
    }

    fn count_free(&mut self) -> FatResult<u32> {
        let count = self.find_free_clusters(usize::MAX)?.len();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::volume::tests::test_volume;

    #[test]
    fn test_fat16_read_write() {
        // Create a fake FAT16 sector
        let mut fat = [0u8; 512];

        assert!(fat16::write_fat_entry(&mut fat, 4, FatEntry::EndOfChain).is_ok());
        assert!(fat16::write_fat_entry(&mut fat, 6, FatEntry::Bad).is_ok());
        assert!(fat16::write_fat_entry(&mut fat, 8, FatEntry::Next(Cluster::new(5))).is_ok());

        assert_eq!(&fat[4..10], &[0xFF, 0xFF, 0xF7, 0xFF, 0x05, 0x00]);
        assert_eq!(fat16::read_fat_entry(&fat, 4).unwrap(), FatEntry::EndOfChain);
        assert_eq!(fat16::read_fat_entry(&fat, 6).unwrap(), FatEntry::Bad);
        assert_eq!(
            fat16::read_fat_entry(&fat, 8).unwrap(),
            FatEntry::Next(Cluster::new(5))
        );
        assert_eq!(fat16::read_fat_entry(&fat, 10).unwrap(), FatEntry::Free);

        assert!(fat16::write_fat_entry(&mut fat, 14, FatEntry::Reserved).is_ok());
        assert_eq!(fat16::read_fat_entry(&fat, 14).unwrap(), FatEntry::Reserved);

        // Test edge of the buffer
        assert_eq!(
            fat16::read_fat_entry(&fat, 511).unwrap_err(),
            FatError::OutOfBounds
        );
    }

    #[test]
    fn test_entry_decoding() {
        assert_eq!(FatEntry::decode(0xFFF8), FatEntry::EndOfChain);
        assert_eq!(FatEntry::decode(0xFFF0), FatEntry::Reserved);
        assert_eq!(FatEntry::decode(1), FatEntry::Reserved);
        assert_eq!(FatEntry::decode(0x1234), FatEntry::Next(Cluster::new(0x1234)));
        assert_eq!(FatEntry::EndOfChain.encode(), 0xFFFF);
    }

    #[test]
    fn test_set_replicates_to_every_copy() {
        let mut volume = test_volume(1);
        let values = [
            (Cluster::new(2), FatEntry::Next(Cluster::new(3))),
            (Cluster::new(3), FatEntry::EndOfChain),
            (Cluster::new(300), FatEntry::Next(Cluster::new(2))),
            (volume.max_cluster(), FatEntry::Bad),
        ];

        for (cluster, entry) in values {
            volume.set(cluster, entry).unwrap();
            assert_eq!(volume.get(cluster).unwrap(), entry);
            for copy in 0..2 {
                assert_eq!(volume.get_in_copy(copy, cluster).unwrap(), entry);
            }
        }

        assert_eq!(
            volume.set(Cluster::new(1), FatEntry::EndOfChain),
            Err(FatError::InvalidCluster)
        );
        assert_eq!(
            volume.set(Cluster::new(5), FatEntry::Next(Cluster::new(0))),
            Err(FatError::InvalidCluster)
        );
        assert_eq!(volume.get_in_copy(2, Cluster::MIN), Err(FatError::InvalidParameter));
    }

    #[test]
    fn test_alloc_chain() {
        let mut volume = test_volume(1);
        let free = volume.count_free().unwrap();

        let first = volume.alloc_cluster_chain(3).unwrap();
        assert_eq!(first, Cluster::new(2)); // First data cluster is 2
        assert_eq!(volume.get(Cluster::new(2)).unwrap(), FatEntry::Next(Cluster::new(3)));
        assert_eq!(volume.get(Cluster::new(3)).unwrap(), FatEntry::Next(Cluster::new(4)));
        assert_eq!(volume.get(Cluster::new(4)).unwrap(), FatEntry::EndOfChain);
        assert_eq!(volume.count_free().unwrap(), free - 3);

        let chain: Vec<Cluster> = volume.chain_iter(first).map(Result::unwrap).collect();
        assert_eq!(chain, [Cluster::new(2), Cluster::new(3), Cluster::new(4)]);
        assert_eq!(volume.chain_tail(first).unwrap(), (Cluster::new(4), 3));

        assert_eq!(volume.alloc_cluster_chain(0), Err(FatError::InvalidParameter));
    }

    #[test]
    fn test_alloc_picks_lowest_free_clusters() {
        let mut volume = test_volume(1);
        let first = volume.alloc_cluster_chain(6).unwrap();
        assert_eq!(first, Cluster::new(2));

        // Punch holes at 3 and 5 by hand
        volume.set(Cluster::new(2), FatEntry::EndOfChain).unwrap();
        volume.set(Cluster::new(3), FatEntry::Free).unwrap();
        volume.set(Cluster::new(5), FatEntry::Free).unwrap();

        let second = volume.alloc_cluster_chain(3).unwrap();
        let chain: Vec<Cluster> = volume.chain_iter(second).map(Result::unwrap).collect();
        assert_eq!(chain, [Cluster::new(3), Cluster::new(5), Cluster::new(8)]);
    }

    #[test]
    fn test_alloc_zero_fills() {
        let mut volume = test_volume(2);
        volume.write_cluster(Cluster::new(2), 0, &[0x5A; 1024]).unwrap();

        let cluster = volume.alloc_cluster().unwrap();
        assert_eq!(cluster, Cluster::new(2));
        let mut data = [0xFFu8; 1024];
        volume.read_cluster(cluster, 0, &mut data).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_failure_keeps_fat_untouched() {
        let mut volume = test_volume(1);
        let free = volume.count_free().unwrap() as usize;
        let before = volume.find_free_clusters(usize::MAX).unwrap();

        assert_eq!(volume.alloc_cluster_chain(free + 1), Err(FatError::NoSpace));
        assert_eq!(volume.find_free_clusters(usize::MAX).unwrap(), before);

        // Every remaining cluster can still be taken at once
        let first = volume.alloc_cluster_chain(free).unwrap();
        assert_eq!(volume.count_free().unwrap(), 0);
        assert_eq!(volume.chain_tail(first).unwrap().1, free);
        assert_eq!(volume.alloc_cluster(), Err(FatError::NoSpace));
    }

    #[test]
    fn test_free_chain() {
        let mut volume = test_volume(1);
        let free = volume.count_free().unwrap();
        let keep = volume.alloc_cluster_chain(2).unwrap();
        let drop = volume.alloc_cluster_chain(4).unwrap();

        assert_eq!(volume.free_cluster_chain(drop).unwrap(), 4);
        assert_eq!(volume.count_free().unwrap(), free - 2);
        for cluster in 4..8 {
            assert_eq!(volume.get(Cluster::new(cluster)).unwrap(), FatEntry::Free);
        }
        // Clusters outside the chain are untouched
        assert_eq!(volume.chain_tail(keep).unwrap(), (Cluster::new(3), 2));

        // Freed clusters are handed out again
        assert_eq!(volume.alloc_cluster_chain(4).unwrap(), drop);
    }

    #[test]
    fn test_corrupted_chains() {
        let mut volume = test_volume(1);

        // 2 -> 3 -> 2
        volume.set(Cluster::new(2), FatEntry::Next(Cluster::new(3))).unwrap();
        volume.set(Cluster::new(3), FatEntry::Next(Cluster::new(2))).unwrap();
        assert_eq!(volume.chain_tail(Cluster::new(2)), Err(FatError::InvalidFat));

        // 10 -> free
        volume.set(Cluster::new(10), FatEntry::Next(Cluster::new(11))).unwrap();
        assert_eq!(volume.chain_tail(Cluster::new(10)), Err(FatError::InvalidFat));
        assert_eq!(
            volume.free_cluster_chain(Cluster::new(10)),
            Err(FatError::InvalidFat)
        );

        assert_eq!(
            volume.free_cluster_chain(Cluster::FREE),
            Err(FatError::InvalidCluster)
        );
    }
}
