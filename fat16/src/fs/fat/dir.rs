//! Directory regions and the slots they are made of.
//!
//! The root directory is a flat array of a fixed number of sectors right after
//! the FATs. Every other directory lives in its own cluster chain. Both are
//! walked through [`DirSlots`], which refills its sector buffer at sector and
//! cluster boundaries.
//!
//! Slots are handed out append-only: a deleted slot may be reused, but the
//! first never-used slot of a region guarantees that no live slot follows it.
use super::{
    Cluster, FatError, FatResult,
    dirent::{DIR_ENTRY_SIZE, DirEntry, ShortName, Slot},
    fat::{FatEntries, FatEntry},
    volume::Volume,
};
use crate::BlockDevice;
use alloc::vec::Vec;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Where the entries of a directory are stored
pub enum DirRegion {
    /// Fixed root directory region
    Root,
    /// Cluster chain of a subdirectory, given by its first cluster
    Chain(Cluster),
}

impl DirRegion {
    #[must_use]
    #[inline]
    /// Region designated by a first-cluster field (0 stands for the root, as in `..`).
    pub const fn from_cluster(cluster: Cluster) -> Self {
        if cluster.is_free() {
            Self::Root
        } else {
            Self::Chain(cluster)
        }
    }

    #[must_use]
    #[inline]
    /// First-cluster value that refers to this region from a `..` entry.
    pub const fn cluster(&self) -> Cluster {
        match self {
            Self::Root => Cluster::FREE,
            Self::Chain(cluster) => *cluster,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Exact position of a directory slot: absolute sector and byte offset in it
pub struct SlotLocation {
    sector: u32,
    offset: u16,
}

impl SlotLocation {
    #[must_use]
    #[inline]
    pub const fn new(sector: u32, offset: u16) -> Self {
        Self { sector, offset }
    }

    #[must_use]
    #[inline]
    pub const fn sector(&self) -> u32 {
        self.sector
    }

    #[must_use]
    #[inline]
    pub const fn offset(&self) -> usize {
        self.offset as usize
    }

    #[must_use]
    #[inline]
    /// Byte offset of the slot from the start of the volume
    pub const fn byte_offset(&self, bytes_per_sector: u32) -> u64 {
        self.sector as u64 * bytes_per_sector as u64 + self.offset as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A live entry together with the slot it was read from
pub struct Located {
    pub entry: DirEntry,
    pub location: SlotLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of a directory lookup
pub enum Lookup {
    /// An entry with the requested name exists
    Found(Located),
    /// No such entry, this is the first reusable slot
    Free(SlotLocation),
    /// No such entry and every slot of the region is taken
    Full,
}

/// Lazy iterator over the slots of a directory region
///
/// Iteration stops right after the first never-used slot has been yielded.
pub struct DirSlots<'a, D: BlockDevice> {
    volume: &'a mut Volume<D>,
    buffer: Vec<u8>,
    /// Current cluster, `None` for the root region
    cluster: Option<Cluster>,
    /// First sector of the current cluster (or of the root region)
    unit_first_sector: u32,
    /// Number of sectors in the current unit
    unit_sectors: u32,
    /// Index of the next sector to load in the current unit
    next_sector: u32,
    /// Absolute number of the sector in `buffer`
    current_sector: u32,
    /// Next slot to decode in `buffer`
    slot: usize,
    loaded: bool,
    finished: bool,
    budget: usize,
}

impl<D: BlockDevice> DirSlots<'_, D> {
    /// Loads the next sector of the region, following the chain when needed.
    ///
    /// Returns `false` once the region is exhausted.
    fn load_next(&mut self) -> FatResult<bool> {
        if self.next_sector == self.unit_sectors {
            let Some(current) = self.cluster else {
                return Ok(false);
            };
            let next = match self.volume.get(current)? {
                FatEntry::Next(next) => next,
                FatEntry::EndOfChain => return Ok(false),
                _ => return Err(FatError::InvalidFat),
            };
            if self.budget == 0 {
                return Err(FatError::InvalidFat);
            }
            self.budget -= 1;

            self.cluster = Some(next);
            self.unit_first_sector = self.volume.layout().cluster_first_sector(next);
            self.next_sector = 0;
        }

        let sector = self.unit_first_sector + self.next_sector;
        self.volume.read_sector(sector, &mut self.buffer)?;
        self.current_sector = sector;
        self.next_sector += 1;
        self.slot = 0;
        self.loaded = true;
        Ok(true)
    }

    fn fail(&mut self, err: FatError) -> Option<FatResult<(SlotLocation, Slot)>> {
        self.finished = true;
        Some(Err(err))
    }
}

impl<D: BlockDevice> Iterator for DirSlots<'_, D> {
    type Item = FatResult<(SlotLocation, Slot)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.loaded || self.slot * DIR_ENTRY_SIZE >= self.buffer.len() {
            match self.load_next() {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(err) => return self.fail(err),
            }
        }

        let offset = self.slot * DIR_ENTRY_SIZE;
        self.slot += 1;
        // Sectors are at most 4096 bytes long
        let location = SlotLocation::new(self.current_sector, offset as u16);

        match Slot::decode(&self.buffer[offset..offset + DIR_ENTRY_SIZE]) {
            Ok(slot) => {
                if slot == Slot::NeverUsed {
                    self.finished = true;
                }
                Some(Ok((location, slot)))
            }
            Err(err) => self.fail(err),
        }
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Iterates over the slots of a directory region.
    pub fn slots(&mut self, region: DirRegion) -> FatResult<DirSlots<'_, D>> {
        let layout = *self.layout();
        let (cluster, unit_first_sector, unit_sectors) = match region {
            DirRegion::Root => (None, layout.root_first_sector(), layout.root_sectors()),
            DirRegion::Chain(first) => {
                if !layout.is_data_cluster(first) {
                    return Err(FatError::InvalidCluster);
                }
                (
                    Some(first),
                    layout.cluster_first_sector(first),
                    layout.sectors_per_cluster(),
                )
            }
        };

        Ok(DirSlots {
            buffer: self.sector_buffer(),
            volume: self,
            cluster,
            unit_first_sector,
            unit_sectors,
            next_sector: 0,
            current_sector: unit_first_sector,
            slot: 0,
            loaded: false,
            finished: false,
            budget: layout.max_cluster().index(),
        })
    }

    /// Looks `name` up in a directory and, failing that, finds a slot for it.
    ///
    /// Scanning goes on past deleted slots so that a live entry further down is
    /// still reported as [`Lookup::Found`]. Volume labels never match.
    pub fn find_slot_or_entry(&mut self, region: DirRegion, name: &ShortName) -> FatResult<Lookup> {
        let mut free = None;

        for item in self.slots(region)? {
            let (location, slot) = item?;
            match slot {
                Slot::Live(entry) if !entry.is_volume_id() && entry.name().matches(name) => {
                    return Ok(Lookup::Found(Located { entry, location }));
                }
                Slot::NeverUsed | Slot::Deleted if free.is_none() => free = Some(location),
                _ => {}
            }
        }

        Ok(free.map_or(Lookup::Full, Lookup::Free))
    }

    /// Writes `entry` into the slot at `location`.
    ///
    /// The other slots of the sector are preserved. This is used both to create
    /// entries and to rewrite the cluster or size of an existing one.
    pub fn create_entry(&mut self, location: SlotLocation, entry: &DirEntry) -> FatResult<()> {
        let offset = location.offset();
        let mut sector = self.sector_buffer();
        if offset + DIR_ENTRY_SIZE > sector.len() {
            return Err(FatError::InvalidParameter);
        }

        self.read_sector(location.sector(), &mut sector)?;
        sector[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(&entry.encode());
        self.write_sector(location.sector(), &sector)?;

        debug!(
            "Wrote entry {} at sector {} offset {}",
            entry.name(),
            location.sector(),
            offset
        );
        Ok(())
    }

    /// Tombstones the slot at `location`.
    ///
    /// Only the first byte changes: the rest of the record, its cluster chain
    /// included, is left as is. Releasing the chain is up to the caller.
    pub fn delete_entry(&mut self, location: SlotLocation) -> FatResult<()> {
        let offset = location.offset();
        let mut sector = self.sector_buffer();
        if offset + DIR_ENTRY_SIZE > sector.len() {
            return Err(FatError::InvalidParameter);
        }

        self.read_sector(location.sector(), &mut sector)?;
        sector[offset] = DirEntry::DELETED_ENTRY;
        self.write_sector(location.sector(), &sector)?;

        debug!(
            "Deleted entry at sector {} offset {}",
            location.sector(),
            offset
        );
        Ok(())
    }

    /// Collects the live entries of a directory, in slot order.
    ///
    /// Volume labels are left out, dot entries are kept.
    pub fn live_entries(&mut self, region: DirRegion) -> FatResult<Vec<Located>> {
        let mut entries = Vec::new();
        for item in self.slots(region)? {
            if let (location, Slot::Live(entry)) = item? {
                if !entry.is_volume_id() {
                    entries.push(Located { entry, location });
                }
            }
        }
        Ok(entries)
    }

    /// Returns true if the directory holds nothing but `.` and `..`.
    pub fn is_dir_empty(&mut self, region: DirRegion) -> FatResult<bool> {
        for item in self.slots(region)? {
            if let (_, Slot::Live(entry)) = item? {
                if !entry.is_volume_id() && !entry.name().is_dot_entry() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Grows a subdirectory by one zeroed cluster and returns its first slot.
    pub fn extend_dir(&mut self, first: Cluster) -> FatResult<SlotLocation> {
        let (tail, _) = self.chain_tail(first)?;
        let cluster = self.alloc_cluster()?;
        if let Err(err) = self.set(tail, FatEntry::Next(cluster)) {
            self.free_cluster(cluster)?;
            return Err(err);
        }

        debug!("Extended directory at {first} with cluster {cluster}");
        Ok(SlotLocation::new(
            self.layout().cluster_first_sector(cluster),
            0,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::{dirent::Attributes, volume::tests::test_volume};

    fn file_entry(name: &str, cluster: u16, size: u32) -> DirEntry {
        DirEntry::new(
            ShortName::parse(name).unwrap(),
            Attributes::new(Attributes::ARCHIVE),
            Cluster::new(cluster),
            size,
        )
    }

    fn expect_free(lookup: Lookup) -> SlotLocation {
        match lookup {
            Lookup::Free(location) => location,
            other => panic!("expected a free slot, got {other:?}"),
        }
    }

    #[test]
    fn test_root_lookup_and_create() {
        let mut volume = test_volume(1);
        let root_first = volume.layout().root_first_sector();
        let name = ShortName::parse("a.txt").unwrap();

        let slot = expect_free(volume.find_slot_or_entry(DirRegion::Root, &name).unwrap());
        assert_eq!(slot, SlotLocation::new(root_first, 0));

        let entry = file_entry("a.txt", 0, 0);
        volume.create_entry(slot, &entry).unwrap();

        let lowercase = ShortName::from_raw(*b"a       txt");
        assert_eq!(
            volume.find_slot_or_entry(DirRegion::Root, &lowercase).unwrap(),
            Lookup::Found(Located {
                entry,
                location: slot
            })
        );

        let other = ShortName::parse("b.txt").unwrap();
        assert_eq!(
            expect_free(volume.find_slot_or_entry(DirRegion::Root, &other).unwrap()),
            SlotLocation::new(root_first, 32)
        );
        assert_eq!(slot.byte_offset(512), u64::from(root_first) * 512);
    }

    #[test]
    fn test_create_entry_preserves_neighbours() {
        let mut volume = test_volume(1);
        let sector = volume.layout().root_first_sector();
        let first = file_entry("first", 0, 0);
        let second = file_entry("second", 0, 0);
        volume.create_entry(SlotLocation::new(sector, 0), &first).unwrap();
        volume.create_entry(SlotLocation::new(sector, 32), &second).unwrap();

        // Rewrite the first entry with a new size
        let mut updated = first;
        updated.set_file_size(42);
        volume.create_entry(SlotLocation::new(sector, 0), &updated).unwrap();

        let entries = volume.live_entries(DirRegion::Root).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry, updated);
        assert_eq!(entries[1].entry, second);

        assert_eq!(
            volume.create_entry(SlotLocation::new(sector, 500), &first),
            Err(FatError::InvalidParameter)
        );
    }

    #[test]
    fn test_deleted_slot_is_reused_without_hiding_live_entries() {
        let mut volume = test_volume(1);
        let sector = volume.layout().root_first_sector();
        for (index, name) in ["one", "two", "three"].into_iter().enumerate() {
            volume
                .create_entry(SlotLocation::new(sector, index as u16 * 32), &file_entry(name, 0, 0))
                .unwrap();
        }

        volume.delete_entry(SlotLocation::new(sector, 32)).unwrap();

        // The tombstone only touches the first byte
        let mut raw = volume.sector_buffer();
        volume.read_sector(sector, &mut raw).unwrap();
        assert_eq!(raw[32], 0xE5);
        assert_eq!(&raw[33..43], b"WO        ");

        let three = ShortName::parse("three").unwrap();
        assert!(matches!(
            volume.find_slot_or_entry(DirRegion::Root, &three).unwrap(),
            Lookup::Found(_)
        ));
        let four = ShortName::parse("four").unwrap();
        assert_eq!(
            expect_free(volume.find_slot_or_entry(DirRegion::Root, &four).unwrap()),
            SlotLocation::new(sector, 32)
        );

        let names: Vec<_> = volume
            .live_entries(DirRegion::Root)
            .unwrap()
            .into_iter()
            .map(|located| *located.entry.name())
            .collect();
        assert_eq!(
            names,
            [ShortName::parse("one").unwrap(), three]
        );
    }

    #[test]
    fn test_full_root() {
        let mut volume = test_volume(1);
        let layout = *volume.layout();
        let per_sector = layout.entries_per_sector();

        let mut count = 0u32;
        for sector in 0..layout.root_sectors() {
            for slot in 0..per_sector {
                let name = alloc::format!("F{count}");
                let short = ShortName::parse(&name).unwrap();
                let entry = DirEntry::new_file(short);
                volume
                    .create_entry(
                        SlotLocation::new(layout.root_first_sector() + sector, (slot * 32) as u16),
                        &entry,
                    )
                    .unwrap();
                count += 1;
            }
        }
        assert_eq!(count, layout.root_entries());

        let name = ShortName::parse("extra").unwrap();
        assert_eq!(
            volume.find_slot_or_entry(DirRegion::Root, &name).unwrap(),
            Lookup::Full
        );
        assert_eq!(volume.live_entries(DirRegion::Root).unwrap().len(), 512);
    }

    #[test]
    fn test_subdirectory_spanning_clusters() {
        let mut volume = test_volume(1);
        let first = volume.alloc_cluster().unwrap();
        let region = DirRegion::Chain(first);
        let base = volume.layout().cluster_first_sector(first);

        for slot in 0..16u16 {
            let name = alloc::format!("E{slot}");
            volume
                .create_entry(SlotLocation::new(base, slot * 32), &file_entry(&name, 0, 0))
                .unwrap();
        }
        let name = ShortName::parse("next").unwrap();
        assert_eq!(volume.find_slot_or_entry(region, &name).unwrap(), Lookup::Full);
        assert!(!volume.is_dir_empty(region).unwrap());

        let slot = volume.extend_dir(first).unwrap();
        let (tail, count) = volume.chain_tail(first).unwrap();
        assert_eq!(count, 2);
        assert_eq!(slot, SlotLocation::new(volume.layout().cluster_first_sector(tail), 0));
        assert_eq!(expect_free(volume.find_slot_or_entry(region, &name).unwrap()), slot);

        let entry = file_entry("next", 0, 0);
        volume.create_entry(slot, &entry).unwrap();
        assert!(matches!(
            volume.find_slot_or_entry(region, &name).unwrap(),
            Lookup::Found(Located { location, .. }) if location == slot
        ));
        assert_eq!(volume.live_entries(region).unwrap().len(), 17);
    }

    #[test]
    fn test_is_dir_empty_ignores_dot_entries() {
        let mut volume = test_volume(1);
        let cluster = volume.alloc_cluster().unwrap();
        let region = DirRegion::Chain(cluster);
        let base = volume.layout().cluster_first_sector(cluster);

        volume
            .create_entry(
                SlotLocation::new(base, 0),
                &DirEntry::new_directory(ShortName::DOT, cluster),
            )
            .unwrap();
        volume
            .create_entry(
                SlotLocation::new(base, 32),
                &DirEntry::new_directory(ShortName::DOTDOT, Cluster::FREE),
            )
            .unwrap();
        assert!(volume.is_dir_empty(region).unwrap());

        volume
            .create_entry(SlotLocation::new(base, 64), &file_entry("x", 0, 0))
            .unwrap();
        assert!(!volume.is_dir_empty(region).unwrap());

        volume.delete_entry(SlotLocation::new(base, 64)).unwrap();
        assert!(volume.is_dir_empty(region).unwrap());
    }

    #[test]
    fn test_corrupted_directory() {
        let mut volume = test_volume(1);
        assert!(matches!(
            volume.slots(DirRegion::Chain(Cluster::new(1))),
            Err(FatError::InvalidCluster)
        ));

        // Chain looping onto itself
        let cluster = volume.alloc_cluster().unwrap();
        let base = volume.layout().cluster_first_sector(cluster);
        for slot in 0..16u16 {
            let name = alloc::format!("E{slot}");
            volume
                .create_entry(SlotLocation::new(base, slot * 32), &file_entry(&name, 0, 0))
                .unwrap();
        }
        volume.set(cluster, FatEntry::Next(cluster)).unwrap();
        let name = ShortName::parse("x").unwrap();
        assert_eq!(
            volume.find_slot_or_entry(DirRegion::Chain(cluster), &name),
            Err(FatError::InvalidFat)
        );

        // Impossible attribute byte
        let sector = volume.layout().root_first_sector();
        let mut raw = volume.sector_buffer();
        raw[..11].copy_from_slice(b"BAD        ");
        raw[11] = 0xC0;
        volume.write_sector(sector, &raw).unwrap();
        assert_eq!(
            volume.live_entries(DirRegion::Root),
            Err(FatError::InvalidDirEntry)
        );
    }
}
