//! Path resolution and the operations that add or remove directory entries.
use super::{
    Cluster, Fat16Fs, FatError, FatResult,
    dir::{DirRegion, Located, Lookup, SlotLocation},
    dirent::{DIR_ENTRY_SIZE, DirEntry, ShortName},
    fat::FatEntries,
    file::FatFile,
};
use crate::{
    BlockDevice,
    fs::{FileError, FileResult, Path},
};
use alloc::vec::Vec;
use log::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What a path resolves to
pub enum Node {
    /// The root directory, which has no entry of its own
    Root,
    Entry(Located),
}

impl Node {
    /// Returns the region holding the entries of this directory.
    pub fn region(&self) -> FileResult<DirRegion> {
        match self {
            Self::Root => Ok(DirRegion::Root),
            Self::Entry(located) if located.entry.is_directory() => located
                .entry
                .first_cluster()
                .map(DirRegion::Chain)
                .ok_or(FileError::CorruptedFS),
            Self::Entry(_) => Err(FileError::NotADirectory),
        }
    }
}

impl<D: BlockDevice> Fat16Fs<D> {
    /// Resolves `path` to the root or to a live entry and its slot.
    ///
    /// Every component but the last must be a directory, including the one a
    /// `..` steps back out of. `..` at the root stays at the root.
    pub fn resolve(&mut self, path: Path) -> FileResult<Node> {
        let mut ancestors = Vec::new();
        let mut node = Node::Root;

        for component in path.components() {
            let region = node.region()?;
            if component == ".." {
                node = ancestors.pop().unwrap_or(Node::Root);
                continue;
            }

            let name = ShortName::parse(component)?;
            match self.volume.find_slot_or_entry(region, &name)? {
                Lookup::Found(located) => {
                    ancestors.push(node);
                    node = Node::Entry(located);
                }
                Lookup::Free(_) | Lookup::Full => return Err(FileError::NotFound),
            }
        }

        Ok(node)
    }

    /// Resolves `path`, which must be a directory.
    pub fn resolve_dir(&mut self, path: Path) -> FileResult<DirRegion> {
        self.resolve(path)?.region()
    }

    /// Opens the regular file at `path`.
    pub fn open_file(&mut self, path: Path) -> FileResult<FatFile<'_, D>> {
        match self.resolve(path)? {
            Node::Entry(located) if !located.entry.is_directory() => {
                Ok(FatFile::new(&mut self.volume, located))
            }
            _ => Err(FileError::IsADirectory),
        }
    }

    /// Finds the parent directory of a new entry and a slot for it.
    ///
    /// Returns `None` as the slot when the parent has no free slot left.
    fn prepare_create(
        &mut self,
        path: Path,
    ) -> FileResult<(DirRegion, ShortName, Option<SlotLocation>)> {
        let (parent, leaf) = path.split_parent();
        if matches!(leaf, "" | "." | "..") {
            self.resolve(path)?;
            return Err(FileError::AlreadyExists);
        }

        let region = self.resolve_dir(parent)?;
        let name = ShortName::parse(leaf)?;
        match self.volume.find_slot_or_entry(region, &name)? {
            Lookup::Found(_) => Err(FileError::AlreadyExists),
            Lookup::Free(location) => Ok((region, name, Some(location))),
            Lookup::Full => Ok((region, name, None)),
        }
    }

    /// Writes `entry` in `slot`, growing the directory first when it is full.
    fn link_entry(
        &mut self,
        region: DirRegion,
        slot: Option<SlotLocation>,
        entry: &DirEntry,
    ) -> FatResult<()> {
        let location = match (slot, region) {
            (Some(location), _) => location,
            (None, DirRegion::Chain(first)) => self.volume.extend_dir(first)?,
            (None, DirRegion::Root) => return Err(FatError::NoSpace),
        };
        self.volume.create_entry(location, entry)
    }

    /// Writes the `.` and `..` entries at the start of a fresh directory cluster.
    fn init_dir(&mut self, cluster: Cluster, parent: DirRegion) -> FatResult<()> {
        let dot = DirEntry::new_directory(ShortName::DOT, cluster);
        let dotdot = DirEntry::new_directory(ShortName::DOTDOT, parent.cluster());

        // The cluster was zeroed on allocation
        let mut sector = self.volume.sector_buffer();
        sector[..DIR_ENTRY_SIZE].copy_from_slice(&dot.encode());
        sector[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&dotdot.encode());
        let first_sector = self.volume.layout().cluster_first_sector(cluster);
        self.volume.write_sector(first_sector, &sector)
    }

    /// Creates an empty directory.
    ///
    /// Its cluster is allocated and filled before the parent gets an entry for
    /// it, so a failure leaves the parent as it was.
    pub fn mkdir(&mut self, path: Path) -> FileResult<()> {
        let (region, name, slot) = self.prepare_create(path)?;

        let cluster = self.volume.alloc_cluster()?;
        let entry = DirEntry::new_directory(name, cluster);
        let result = self
            .init_dir(cluster, region)
            .and_then(|()| self.link_entry(region, slot, &entry));

        if let Err(err) = result {
            if let Err(release) = self.volume.free_cluster(cluster) {
                warn!("Could not release cluster {cluster} of failed mkdir: {release}");
            }
            return Err(err.into());
        }

        debug!("Created directory {name} at cluster {cluster}");
        Ok(())
    }

    /// Removes an empty directory.
    ///
    /// The cluster chain is released before the parent entry is tombstoned.
    /// After an interrupted removal, [`Fat16Fs::check`] reports what is left
    /// and [`Fat16Fs::reclaim_orphans`] gives back unreachable clusters.
    pub fn rmdir(&mut self, path: Path) -> FileResult<()> {
        let (_, leaf) = path.split_parent();
        if matches!(leaf, "." | "..") {
            return Err(FileError::InvalidArgument);
        }

        let Node::Entry(located) = self.resolve(path)? else {
            return Err(FileError::Busy);
        };
        if !located.entry.is_directory() {
            return Err(FileError::NotADirectory);
        }

        let region = Node::Entry(located).region()?;
        if !self.volume.is_dir_empty(region)? {
            return Err(FileError::DirectoryNotEmpty);
        }

        if let DirRegion::Chain(first) = region {
            self.volume.free_cluster_chain(first)?;
        }
        self.volume.delete_entry(located.location)?;

        debug!("Removed directory {}", located.entry.name());
        Ok(())
    }

    /// Creates an empty regular file.
    pub fn mknod(&mut self, path: Path) -> FileResult<()> {
        let (region, name, slot) = self.prepare_create(path)?;
        self.link_entry(region, slot, &DirEntry::new_file(name))?;
        Ok(())
    }

    /// Removes a regular file, releasing its data.
    pub fn unlink(&mut self, path: Path) -> FileResult<()> {
        let located = match self.resolve(path)? {
            Node::Entry(located) if !located.entry.is_directory() => located,
            _ => return Err(FileError::IsADirectory),
        };

        if let Some(first) = located.entry.first_cluster() {
            self.volume.free_cluster_chain(first)?;
        }
        self.volume.delete_entry(located.location)?;

        debug!("Removed file {}", located.entry.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemDisk;
    use crate::fs::{
        FileSystem,
        fat::{dirent::Slot, testing::test_fs},
    };
    use alloc::{format, vec::Vec};

    fn dir_cluster(fs: &mut Fat16Fs<MemDisk>, path: &str) -> Cluster {
        match fs.resolve_dir(Path::new(path)).unwrap() {
            DirRegion::Chain(cluster) => cluster,
            DirRegion::Root => panic!("{path} is the root"),
        }
    }

    #[test]
    fn test_mkdir_scenario() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();

        let root = fs.volume.live_entries(DirRegion::Root).unwrap();
        assert_eq!(root.len(), 1);
        let entry = root[0].entry;
        assert_eq!(entry.name(), &ShortName::parse("A").unwrap());
        assert!(entry.is_directory());
        assert_eq!(entry.attributes().bits(), 0x10);
        assert_eq!(entry.file_size(), 0);
        let cluster = entry.first_cluster().unwrap();
        assert_eq!(cluster, Cluster::MIN);
        assert_eq!(fs.volume.chain_tail(cluster).unwrap(), (cluster, 1));

        let inside = fs.volume.live_entries(DirRegion::Chain(cluster)).unwrap();
        assert_eq!(inside.len(), 2);
        assert_eq!(inside[0].entry, DirEntry::new_directory(ShortName::DOT, cluster));
        assert_eq!(
            inside[1].entry,
            DirEntry::new_directory(ShortName::DOTDOT, Cluster::FREE)
        );
    }

    #[test]
    fn test_nested_directories() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();
        fs.mkdir(Path::new("/a/b")).unwrap();
        fs.mknod(Path::new("/a/b/c.txt")).unwrap();

        let a = dir_cluster(&mut fs, "/a");
        let b = dir_cluster(&mut fs, "/A/B/");
        let dotdot = fs.volume.live_entries(DirRegion::Chain(b)).unwrap()[1].entry;
        assert_eq!(dotdot.first_cluster(), Some(a));

        assert!(matches!(
            fs.resolve(Path::new("/a/./b/../b/c.txt")),
            Ok(Node::Entry(_))
        ));
        assert_eq!(fs.resolve(Path::new("/a/..")), Ok(Node::Root));
        assert_eq!(
            fs.resolve(Path::new("/a/b/c.txt/d")),
            Err(FileError::NotADirectory)
        );
        assert_eq!(fs.resolve(Path::new("/a/x/c.txt")), Err(FileError::NotFound));
        assert_eq!(
            fs.resolve(Path::new("/a/toolongname")),
            Err(FileError::NameTooLong)
        );
        assert_eq!(fs.resolve(Path::new("/a/b?")), Err(FileError::InvalidPath));
    }

    #[test]
    fn test_dotdot_needs_a_directory() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();
        fs.mknod(Path::new("/f")).unwrap();
        let free = fs.free_clusters().unwrap();

        assert_eq!(fs.mkdir(Path::new("/f/../x")), Err(FileError::NotADirectory));
        assert_eq!(fs.mknod(Path::new("/f/../y")), Err(FileError::NotADirectory));
        assert_eq!(fs.resolve(Path::new("/f/..")), Err(FileError::NotADirectory));
        assert_eq!(fs.mkdir(Path::new("/f/..")), Err(FileError::NotADirectory));
        assert_eq!(fs.mkdir(Path::new("/missing/.")), Err(FileError::NotFound));
        assert_eq!(fs.resolve(Path::new("/missing/..")), Err(FileError::NotFound));
        assert!(!fs.exists(Path::new("/x")).unwrap());
        assert_eq!(fs.free_clusters().unwrap(), free);

        assert_eq!(fs.resolve(Path::new("/../..")), Ok(Node::Root));
        fs.mkdir(Path::new("/a/../x")).unwrap();
        assert!(fs.exists(Path::new("/x")).unwrap());
    }

    #[test]
    fn test_create_errors() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();
        fs.mknod(Path::new("/f")).unwrap();

        assert_eq!(fs.mkdir(Path::new("/a")), Err(FileError::AlreadyExists));
        assert_eq!(fs.mkdir(Path::new("/F")), Err(FileError::AlreadyExists));
        assert_eq!(fs.mknod(Path::new("/A")), Err(FileError::AlreadyExists));
        assert_eq!(fs.mkdir(Path::new("/")), Err(FileError::AlreadyExists));
        assert_eq!(fs.mkdir(Path::new("/a/..")), Err(FileError::AlreadyExists));
        assert_eq!(fs.mkdir(Path::new("/x/y")), Err(FileError::NotFound));
        assert_eq!(fs.mkdir(Path::new("/f/y")), Err(FileError::NotADirectory));
        assert_eq!(
            fs.mknod(Path::new("/a/verylongname.txt")),
            Err(FileError::NameTooLong)
        );
        assert_eq!(fs.open_file(Path::new("/a")).err(), Some(FileError::IsADirectory));
        assert_eq!(fs.open_file(Path::new("/")).err(), Some(FileError::IsADirectory));
    }

    #[test]
    fn test_rmdir_errors() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();
        fs.mknod(Path::new("/a/f")).unwrap();

        let cases = [
            ("/", FileError::Busy, -16),
            ("/missing", FileError::NotFound, -2),
            ("/a/f", FileError::NotADirectory, -20),
            ("/a", FileError::DirectoryNotEmpty, -39),
            ("/a/.", FileError::InvalidArgument, -22),
        ];
        for (path, error, errno) in cases {
            let result = fs.rmdir(Path::new(path));
            assert_eq!(result, Err(error), "rmdir {path}");
            assert_eq!(error.errno(), errno);
        }
    }

    #[test]
    fn test_rmdir_not_empty_leaves_image_untouched() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/a")).unwrap();
        fs.mkdir(Path::new("/a/sub")).unwrap();

        let before = fs.volume.device().as_bytes().to_vec();
        assert_eq!(fs.rmdir(Path::new("/a")), Err(FileError::DirectoryNotEmpty));
        assert!(fs.volume.device().as_bytes() == before.as_slice());
    }

    #[test]
    fn test_rmdir_releases_its_clusters() {
        let mut fs = test_fs();
        let free = fs.free_clusters().unwrap();
        fs.mkdir(Path::new("/keep")).unwrap();
        fs.mkdir(Path::new("/a")).unwrap();
        let keep = dir_cluster(&mut fs, "/keep");
        let a = dir_cluster(&mut fs, "/a");
        assert_eq!(fs.free_clusters().unwrap(), free - 2);

        fs.rmdir(Path::new("/a")).unwrap();
        assert_eq!(fs.free_clusters().unwrap(), free - 1);
        assert_eq!(fs.resolve(Path::new("/a")), Err(FileError::NotFound));
        assert_eq!(fs.volume.chain_tail(keep).unwrap(), (keep, 1));

        // The slot is tombstoned, not cleared
        let slots: Vec<Slot> = fs
            .volume
            .slots(DirRegion::Root)
            .unwrap()
            .map(|item| item.unwrap().1)
            .collect();
        assert_eq!(slots[1], Slot::Deleted);

        // The released cluster and the slot are reused
        fs.mkdir(Path::new("/b")).unwrap();
        assert_eq!(dir_cluster(&mut fs, "/b"), a);
        let root = fs.volume.live_entries(DirRegion::Root).unwrap();
        assert_eq!(root[1].entry.name(), &ShortName::parse("b").unwrap());
    }

    #[test]
    fn test_mkdir_grows_full_subdirectory() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/d")).unwrap();
        // One cluster of 512 bytes holds 16 slots, two are the dot entries
        for index in 0..14 {
            fs.mknod(Path::new(&format!("/d/f{index}"))).unwrap();
        }
        let d = dir_cluster(&mut fs, "/d");
        assert_eq!(fs.volume.chain_tail(d).unwrap().1, 1);

        fs.mkdir(Path::new("/d/sub")).unwrap();
        assert_eq!(fs.volume.chain_tail(d).unwrap().1, 2);
        assert_eq!(fs.read_dir(Path::new("/d")).unwrap().len(), 15);
        assert!(matches!(
            fs.resolve(Path::new("/d/sub")),
            Ok(Node::Entry(located)) if located.entry.is_directory()
        ));
    }

    #[test]
    fn test_mkdir_without_space_keeps_parent() {
        let mut fs = test_fs();
        fs.mkdir(Path::new("/d")).unwrap();
        for index in 0..14 {
            fs.mknod(Path::new(&format!("/d/f{index}"))).unwrap();
        }

        // Leave exactly one free cluster: enough for the new directory,
        // not for growing its parent
        let free = fs.free_clusters().unwrap() as usize;
        fs.volume.alloc_cluster_chain(free - 1).unwrap();
        let before = fs.volume.device().as_bytes().to_vec();

        assert_eq!(fs.mkdir(Path::new("/d/sub")), Err(FileError::NotEnoughSpace));
        assert_eq!(fs.free_clusters().unwrap(), 1);
        let d = dir_cluster(&mut fs, "/d");
        assert_eq!(fs.volume.chain_tail(d).unwrap().1, 1);
        assert_eq!(fs.resolve(Path::new("/d/sub")), Err(FileError::NotFound));

        // Only the data of the released cluster may differ
        let after = fs.volume.device().as_bytes();
        let layout = *fs.layout();
        let data_start = layout.data_first_sector() as usize * 512;
        assert!(after[..data_start] == before[..data_start]);

        fs.volume.alloc_cluster().unwrap();
        assert_eq!(fs.mkdir(Path::new("/e")), Err(FileError::NotEnoughSpace));
        assert_eq!(fs.resolve(Path::new("/e")), Err(FileError::NotFound));
    }

    #[test]
    fn test_full_root() {
        let mut fs = test_fs();
        for index in 0..512 {
            fs.mknod(Path::new(&format!("/f{index}"))).unwrap();
        }
        assert_eq!(fs.mknod(Path::new("/last")), Err(FileError::NotEnoughSpace));
        assert_eq!(fs.mkdir(Path::new("/last")), Err(FileError::NotEnoughSpace));

        fs.unlink(Path::new("/f100")).unwrap();
        fs.mkdir(Path::new("/last")).unwrap();
    }

    #[test]
    fn test_unlink() {
        let mut fs = test_fs();
        let free = fs.free_clusters().unwrap();
        fs.mknod(Path::new("/f.bin")).unwrap();
        fs.write(Path::new("/f.bin"), &[1; 3000], 0).unwrap();
        assert_eq!(fs.free_clusters().unwrap(), free - 6);

        fs.unlink(Path::new("/f.bin")).unwrap();
        assert_eq!(fs.free_clusters().unwrap(), free);
        assert_eq!(fs.unlink(Path::new("/f.bin")), Err(FileError::NotFound));
        assert_eq!(fs.unlink(Path::new("/")), Err(FileError::IsADirectory));

        // Empty files have no chain to release
        fs.mknod(Path::new("/empty")).unwrap();
        fs.unlink(Path::new("/empty")).unwrap();
        assert_eq!(fs.free_clusters().unwrap(), free);
    }
}
