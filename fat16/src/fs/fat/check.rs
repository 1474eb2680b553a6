//! Consistency check and repair.
//!
//! An interrupted operation leaves either orphaned clusters (in use in the FAT
//! but reached by no entry) or an entry whose chain is broken.
//! [`Fat16Fs::check`] reports both, and [`Fat16Fs::reclaim_orphans`] hands
//! orphans back to the allocator.
use super::{
    Cluster, Fat16Fs, FatResult,
    dir::DirRegion,
    fat::{FatEntries, FatEntry, fat16},
    volume::Volume,
};
use crate::{
    BlockDevice,
    fs::{FileResult, PathBuf},
};
use alloc::{string::ToString as _, vec, vec::Vec};
use hashbrown::HashSet;
use log::{info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CheckReport {
    /// Clusters in use in the FAT that no entry reaches
    pub orphaned: Vec<Cluster>,
    /// Clusters reached from more than one place
    pub cross_linked: Vec<Cluster>,
    /// Clusters whose entry differs between FAT copy 0 and another copy
    pub fat_mismatches: Vec<(u32, Cluster)>,
    /// Entries whose chain is broken or does not match their size
    pub size_mismatches: Vec<PathBuf>,
}

impl CheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.orphaned.is_empty()
            && self.cross_linked.is_empty()
            && self.fat_mismatches.is_empty()
            && self.size_mismatches.is_empty()
    }
}

impl<D: BlockDevice> Volume<D> {
    /// Reads every entry of one FAT copy, up to the last data cluster.
    fn fat_copy(&mut self, copy: u32) -> FatResult<Vec<FatEntry>> {
        let count = self.layout().max_cluster().index() + 1;
        let first_sector = self.layout().fat_first_sector(copy);
        let mut sector = self.sector_buffer();
        let mut entries = Vec::with_capacity(count);

        'sectors: for index in 0..self.layout().sectors_per_fat() {
            self.read_sector(first_sector + index, &mut sector)?;
            for offset in (0..sector.len()).step_by(2) {
                if entries.len() == count {
                    break 'sectors;
                }
                entries.push(fat16::read_fat_entry(&sector, offset)?);
            }
        }

        Ok(entries)
    }

    /// Marks the chain starting at `first` and returns how many clusters it has.
    ///
    /// Walking stops at the first cluster that was already marked, which is
    /// recorded as cross-linked. `None` is returned for a broken chain.
    fn mark_chain(
        &mut self,
        first: Cluster,
        reached: &mut HashSet<Cluster>,
        cross_linked: &mut Vec<Cluster>,
    ) -> Option<usize> {
        let mut count = 0;
        for cluster in self.chain_iter(first) {
            let Ok(cluster) = cluster else {
                return None;
            };
            if !reached.insert(cluster) {
                cross_linked.push(cluster);
                return None;
            }
            count += 1;
        }
        Some(count)
    }
}

impl<D: BlockDevice> Fat16Fs<D> {
    /// Walks the whole tree and cross-checks it against the FAT.
    ///
    /// Nothing is written.
    pub fn check(&mut self) -> FileResult<CheckReport> {
        let mut report = CheckReport::default();
        let mut reached = HashSet::new();
        let mut pending = vec![(PathBuf::new("/"), DirRegion::Root)];

        while let Some((path, region)) = pending.pop() {
            for located in self.volume.live_entries(region)? {
                let entry = located.entry;
                if entry.name().is_dot_entry() {
                    continue;
                }
                let child = path.join(&entry.name().to_string());

                let Some(first) = entry.first_cluster() else {
                    if entry.is_directory() || entry.file_size() != 0 {
                        report.size_mismatches.push(child);
                    }
                    continue;
                };

                let walked =
                    self.volume
                        .mark_chain(first, &mut reached, &mut report.cross_linked);

                if entry.is_directory() {
                    match walked {
                        Some(_) => pending.push((child, DirRegion::Chain(first))),
                        None => report.size_mismatches.push(child),
                    }
                } else {
                    let expected = self
                        .volume
                        .layout()
                        .clusters_for(u64::from(entry.file_size()));
                    if walked.is_none_or(|count| count as u64 != expected) {
                        report.size_mismatches.push(child);
                    }
                }
            }
        }

        let primary = self.volume.fat_copy(0)?;
        for (index, entry) in primary.iter().enumerate().skip(Cluster::MIN.index()) {
            // Indices come from a FAT16 table
            let cluster = Cluster::new(index as u16);
            if matches!(entry, FatEntry::Next(_) | FatEntry::EndOfChain)
                && !reached.contains(&cluster)
            {
                report.orphaned.push(cluster);
            }
        }

        for copy in 1..self.volume.layout().fat_count() {
            let other = self.volume.fat_copy(copy)?;
            for (index, (a, b)) in primary.iter().zip(&other).enumerate() {
                if a != b {
                    report.fat_mismatches.push((copy, Cluster::new(index as u16)));
                }
            }
        }

        info!(
            "Checked volume: {} reachable clusters, {} orphaned, {} cross-linked",
            reached.len(),
            report.orphaned.len(),
            report.cross_linked.len()
        );
        Ok(report)
    }

    /// Frees every orphaned cluster and returns how many were freed.
    pub fn reclaim_orphans(&mut self) -> FileResult<usize> {
        let orphaned = self.check()?.orphaned;
        for &cluster in &orphaned {
            self.volume.free_cluster(cluster)?;
        }
        if !orphaned.is_empty() {
            warn!("Reclaimed {} orphaned clusters", orphaned.len());
        }
        Ok(orphaned.len())
    }

    /// Rewrites every FAT copy from copy 0 and returns how many sectors changed.
    pub fn sync_fat_copies(&mut self) -> FileResult<usize> {
        let layout = *self.volume.layout();
        let mut primary = self.volume.sector_buffer();
        let mut other = self.volume.sector_buffer();
        let mut rewritten = 0;

        for index in 0..layout.sectors_per_fat() {
            self.volume
                .read_sector(layout.fat_first_sector(0) + index, &mut primary)?;
            for copy in 1..layout.fat_count() {
                let sector = layout.fat_first_sector(copy) + index;
                self.volume.read_sector(sector, &mut other)?;
                if other != primary {
                    self.volume.write_sector(sector, &primary)?;
                    rewritten += 1;
                }
            }
        }

        if rewritten > 0 {
            warn!("Rewrote {rewritten} FAT sectors from the first copy");
        }
        Ok(rewritten)
    }
}
