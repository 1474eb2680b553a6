//! File data I/O: byte ranges of a file mapped onto its cluster chain.
use super::{
    Cluster, Fat16Fs, FatError, FatResult,
    dir::{Located, SlotLocation},
    dirent::DirEntry,
    fat::{FatEntries, FatEntry},
    volume::Volume,
};
use crate::{
    BlockDevice,
    fs::{FileResult, Path},
};
use alloc::{vec, vec::Vec};
use log::debug;

/// An open regular file: its directory entry, where that entry lives, and the
/// volume it belongs to.
///
/// Every mutation keeps `ceil(size / cluster_size)` equal to the chain length
/// and writes the entry back before returning.
pub struct FatFile<'a, D: BlockDevice> {
    volume: &'a mut Volume<D>,
    entry: DirEntry,
    location: SlotLocation,
}

impl<'a, D: BlockDevice> FatFile<'a, D> {
    #[must_use]
    #[inline]
    pub const fn new(volume: &'a mut Volume<D>, located: Located) -> Self {
        Self {
            volume,
            entry: located.entry,
            location: located.location,
        }
    }

    #[must_use]
    #[inline]
    pub const fn entry(&self) -> &DirEntry {
        &self.entry
    }

    #[must_use]
    #[inline]
    pub const fn size(&self) -> u32 {
        self.entry.file_size()
    }

    /// Returns the last cluster of the file and the length of its chain.
    ///
    /// A file without data has no last cluster and a chain of 0 clusters.
    pub fn last_cluster(&mut self) -> FatResult<(Option<Cluster>, usize)> {
        match self.entry.first_cluster() {
            None => Ok((None, 0)),
            Some(first) => {
                let (last, count) = self.volume.chain_tail(first)?;
                Ok((Some(last), count))
            }
        }
    }

    /// Appends `additional` zeroed clusters to the chain ending at `tail`.
    ///
    /// When the file had no data yet, the new chain becomes its first cluster.
    /// Returns the tail as it was before growing.
    pub fn grow_chain(
        &mut self,
        tail: Option<Cluster>,
        additional: usize,
    ) -> FatResult<Option<Cluster>> {
        if additional == 0 {
            return Ok(tail);
        }

        let head = self.volume.alloc_cluster_chain(additional)?;
        match tail {
            None => self.entry.set_first_cluster(head),
            Some(tail) => {
                if let Err(err) = self.volume.set(tail, FatEntry::Next(head)) {
                    self.volume.free_cluster_chain(head)?;
                    return Err(err);
                }
            }
        }

        Ok(tail)
    }

    fn clusters(&mut self) -> FatResult<Vec<Cluster>> {
        match self.entry.first_cluster() {
            None => Ok(Vec::new()),
            Some(first) => self.volume.chain_iter(first).collect(),
        }
    }

    fn cluster_size(&self) -> u64 {
        u64::from(self.volume.layout().cluster_size())
    }

    /// Locates byte `position` of the file: chain index and offset in the cluster.
    fn position(&self, position: u64) -> FatResult<(usize, usize)> {
        let cluster_size = self.cluster_size();
        let index = usize::try_from(position / cluster_size).map_err(|_| FatError::FileTooLarge)?;
        // Smaller than the cluster size
        let within = (position % cluster_size) as usize;
        Ok((index, within))
    }

    /// Writes `data` at byte `offset` of the file, across as many clusters as needed.
    fn write_span(&mut self, clusters: &[Cluster], offset: u64, data: &[u8]) -> FatResult<()> {
        let cluster_size = self.cluster_size() as usize;
        let mut done = 0;

        while done < data.len() {
            let (index, within) = self.position(offset + done as u64)?;
            let chunk = (cluster_size - within).min(data.len() - done);
            let cluster = *clusters.get(index).ok_or(FatError::InvalidFat)?;
            self.volume
                .write_cluster(cluster, within, &data[done..done + chunk])?;
            done += chunk;
        }

        Ok(())
    }

    /// Zeroes `from..to`, clamped to the clusters of `clusters`.
    ///
    /// Bytes past the end of file may hold stale data once a file was shrunk
    /// inside a cluster. They must read back as zeros when the file grows again.
    fn zero_span(&mut self, clusters: &[Cluster], from: u64, to: u64) -> FatResult<()> {
        let chain_bytes = clusters.len() as u64 * self.cluster_size();
        let to = to.min(chain_bytes);
        if from >= to {
            return Ok(());
        }

        let zeros = vec![0; self.volume.layout().cluster_size() as usize];
        let mut position = from;
        while position < to {
            let (_, within) = self.position(position)?;
            // At most one cluster
            let chunk = ((to - position) as usize).min(zeros.len() - within);
            self.write_span(clusters, position, &zeros[..chunk])?;
            position += chunk as u64;
        }

        Ok(())
    }

    fn persist(&mut self) -> FatResult<()> {
        self.volume.create_entry(self.location, &self.entry)
    }

    /// Reads from byte `offset` of the file into `buffer`.
    ///
    /// Returns the number of bytes read, 0 at or past the end of file.
    pub fn read(&mut self, buffer: &mut [u8], offset: u64) -> FatResult<usize> {
        let size = u64::from(self.entry.file_size());
        if offset >= size || buffer.is_empty() {
            return Ok(0);
        }
        // Bounded by the file size, which is a u32
        let len = (size - offset).min(buffer.len() as u64) as usize;

        let clusters = self.clusters()?;
        let cluster_size = self.cluster_size() as usize;
        let mut done = 0;

        while done < len {
            let (index, within) = self.position(offset + done as u64)?;
            let chunk = (cluster_size - within).min(len - done);
            let cluster = *clusters.get(index).ok_or(FatError::InvalidFat)?;
            self.volume
                .read_cluster(cluster, within, &mut buffer[done..done + chunk])?;
            done += chunk;
        }

        Ok(len)
    }

    /// Writes `data` at byte `offset` of the file, growing it as needed.
    ///
    /// The chain is grown first, then the data is written cluster by cluster,
    /// and finally the new first cluster and size are written to the directory
    /// entry. Bytes between the old end of file and `offset` read back as zeros.
    pub fn write(&mut self, data: &[u8], offset: u64) -> FatResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(FatError::InvalidParameter)?;
        let old_size = u64::from(self.entry.file_size());
        let target_size = u32::try_from(end.max(old_size)).map_err(|_| FatError::FileTooLarge)?;

        let (tail, count) = self.last_cluster()?;
        let needed = self.volume.layout().clusters_for(u64::from(target_size));
        let needed = usize::try_from(needed).map_err(|_| FatError::FileTooLarge)?;

        if offset > old_size {
            let clusters = self.clusters()?;
            self.zero_span(&clusters, old_size, offset)?;
        }
        if needed > count {
            self.grow_chain(tail, needed - count)?;
        }

        let clusters = self.clusters()?;
        self.write_span(&clusters, offset, data)?;

        self.entry.set_file_size(target_size);
        self.persist()?;

        debug!(
            "Wrote {} bytes at offset {offset} of {}, size is now {target_size}",
            data.len(),
            self.entry.name()
        );
        Ok(data.len())
    }

    /// Sets the size of the file to `new_size` bytes.
    ///
    /// Growing appends zeroed clusters and zeroes the stale tail of the last
    /// one. Shrinking ends the chain at the last cluster still needed, then
    /// releases the rest.
    pub fn truncate(&mut self, new_size: u64) -> FatResult<()> {
        let target_size = u32::try_from(new_size).map_err(|_| FatError::FileTooLarge)?;
        let old_size = u64::from(self.entry.file_size());

        let (tail, count) = self.last_cluster()?;
        let needed = self.volume.layout().clusters_for(new_size);
        let needed = usize::try_from(needed).map_err(|_| FatError::FileTooLarge)?;

        if new_size > old_size {
            let clusters = self.clusters()?;
            self.zero_span(&clusters, old_size, new_size)?;
        }

        if needed > count {
            self.grow_chain(tail, needed - count)?;
        } else if needed < count {
            let clusters = self.clusters()?;
            if needed == 0 {
                // Detach the chain from the entry before releasing it
                self.entry.set_first_cluster(Cluster::FREE);
                self.entry.set_file_size(0);
                self.persist()?;
                self.volume.free_cluster_chain(clusters[0])?;
            } else {
                self.volume.set(clusters[needed - 1], FatEntry::EndOfChain)?;
                self.volume.free_cluster_chain(clusters[needed])?;
            }
            debug!(
                "Released {} clusters of {}",
                count - needed,
                self.entry.name()
            );
        }

        self.entry.set_file_size(target_size);
        self.persist()
    }
}

impl<D: BlockDevice> Fat16Fs<D> {
    /// Sets the size of the file at `path`, see [`FatFile::truncate`].
    pub fn truncate(&mut self, path: Path, size: u64) -> FileResult<()> {
        let mut file = self.open_file(path)?;
        Ok(file.truncate(size)?)
    }
}
