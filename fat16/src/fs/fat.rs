//! FAT16 file system implementation.
use super::{FileError, FileMetadata, FileResult, FileSystem, FileType, Path, PathBuf};
use crate::{BlockDevice, BlockDeviceError};
use alloc::{string::ToString as _, vec::Vec};
use thiserror::Error;

pub mod bs;
pub mod check;
pub mod date;
pub mod dir;
pub mod dirent;
#[expect(clippy::module_inception, reason = "FS is named after this table")]
pub mod fat;
pub mod file;
pub mod layout;
pub mod namespace;
pub mod volume;

use bs::BootSector;
use fat::FatEntries;
use layout::Layout;
use volume::Volume;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// A 16-bit cluster number.
///
/// Cluster numbers are indices: ownership of a cluster is conferred by the one
/// FAT chain that references it.
pub struct Cluster(u16);

impl Cluster {
    /// Free marker, also used by directory entries without data.
    pub const FREE: Self = Self(0);
    /// First data cluster.
    pub const MIN: Self = Self(2);
    /// Last cluster number that may ever be allocated.
    pub const MAX: Self = Self(0xFFEF);
    /// End-of-chain marker as written by this driver.
    pub const END: Self = Self(0xFFFF);

    #[must_use]
    #[inline]
    pub const fn new(cluster: u16) -> Self {
        Self(cluster)
    }

    #[must_use]
    #[inline]
    pub const fn value(&self) -> u16 {
        self.0
    }

    #[must_use]
    #[inline]
    /// Returns the cluster number as an index.
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    #[must_use]
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }

    #[must_use]
    #[inline]
    pub const fn is_end_of_chain(&self) -> bool {
        self.0 >= 0xFFF8
    }

    #[must_use]
    #[inline]
    pub const fn is_bad(&self) -> bool {
        self.0 == 0xFFF7
    }

    #[must_use]
    #[inline]
    pub const fn is_free(&self) -> bool {
        self.0 == 0
    }

    #[must_use]
    #[inline]
    pub const fn is_reserved(&self) -> bool {
        self.0 == 1 || (self.0 >= 0xFFF0 && self.0 <= 0xFFF6)
    }
}

impl core::fmt::Display for Cluster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
/// Error type for FAT filesystem operations
pub enum FatError {
    #[error("Invalid parameter")]
    InvalidParameter,
    #[error("I/O error")]
    Io,
    #[error("Out of bounds")]
    OutOfBounds,
    #[error("Invalid boot sector")]
    InvalidBootSector,
    #[error("Invalid FAT entry")]
    InvalidFat,
    #[error("Invalid cluster")]
    InvalidCluster,
    #[error("Invalid directory entry")]
    InvalidDirEntry,
    #[error("Invalid file name")]
    InvalidName,
    #[error("File name too long")]
    NameTooLong,
    #[error("No free cluster left")]
    NoSpace,
    #[error("File too large")]
    FileTooLarge,
    #[error("Unsupported volume")]
    NotSupported,
}

pub type FatResult<T> = Result<T, FatError>;

impl From<BlockDeviceError> for FatError {
    fn from(error: BlockDeviceError) -> Self {
        match error {
            BlockDeviceError::Io => Self::Io,
            BlockDeviceError::OutOfBounds => Self::OutOfBounds,
            BlockDeviceError::Unsupported | BlockDeviceError::UnalignedAccess => {
                Self::NotSupported
            }
        }
    }
}

impl From<FatError> for FileError {
    fn from(error: FatError) -> Self {
        match error {
            FatError::InvalidParameter => Self::InvalidArgument,
            FatError::Io | FatError::OutOfBounds => Self::Io,
            FatError::InvalidBootSector
            | FatError::InvalidFat
            | FatError::InvalidCluster
            | FatError::InvalidDirEntry => Self::CorruptedFS,
            FatError::InvalidName => Self::InvalidPath,
            FatError::NameTooLong => Self::NameTooLong,
            FatError::NoSpace => Self::NotEnoughSpace,
            FatError::FileTooLarge => Self::FileTooLarge,
            FatError::NotSupported => Self::UnsupportedOperation,
        }
    }
}

/// A mounted FAT16 volume.
///
/// This is the explicit context every operation runs against; there is no
/// process-wide instance.
pub struct Fat16Fs<D: BlockDevice> {
    volume: Volume<D>,
}

impl<D: BlockDevice> Fat16Fs<D> {
    /// Mounts the volume stored on `device`.
    pub fn mount(device: D) -> FatResult<Self> {
        Ok(Self {
            volume: Volume::open(device)?,
        })
    }

    /// Formats `device` with the given boot sector and mounts the fresh volume.
    pub fn format(mut device: D, boot_sector: &BootSector) -> FatResult<Self> {
        bs::format(&mut device, boot_sector)?;
        Self::mount(device)
    }

    #[must_use]
    #[inline]
    pub const fn layout(&self) -> &Layout {
        self.volume.layout()
    }

    /// Unmounts the volume and gives the device back.
    #[must_use]
    #[inline]
    pub fn into_inner(self) -> D {
        self.volume.into_inner()
    }

    /// Counts the clusters currently available for allocation.
    pub fn free_clusters(&mut self) -> FileResult<u32> {
        Ok(self.volume.count_free()?)
    }
}

impl<D: BlockDevice> FileSystem for Fat16Fs<D> {
    fn create(&mut self, path: Path) -> FileResult<()> {
        self.mknod(path)
    }

    fn delete(&mut self, path: Path) -> FileResult<()> {
        self.unlink(path)
    }

    fn exists(&mut self, path: Path) -> FileResult<bool> {
        match self.resolve(path) {
            Ok(_) => Ok(true),
            Err(FileError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn open(&mut self, path: Path) -> FileResult<()> {
        // No handle state, only check that the file is there
        self.resolve(path).map(|_| ())
    }

    fn close(&mut self, _path: Path) -> FileResult<()> {
        // No-op for FAT
        Ok(())
    }

    fn read(&mut self, path: Path, buffer: &mut [u8], offset: usize) -> FileResult<usize> {
        let mut file = self.open_file(path)?;
        Ok(file.read(buffer, offset as u64)?)
    }

    fn write(&mut self, path: Path, buffer: &[u8], offset: usize) -> FileResult<usize> {
        let mut file = self.open_file(path)?;
        Ok(file.write(buffer, offset as u64)?)
    }

    fn metadata(&mut self, path: Path) -> FileResult<FileMetadata> {
        let metadata = match self.resolve(path)? {
            namespace::Node::Root => FileMetadata::new(0, FileType::Directory),
            namespace::Node::Entry(located) => {
                let file_type = if located.entry.is_directory() {
                    FileType::Directory
                } else {
                    FileType::File
                };
                FileMetadata::new(located.entry.file_size() as usize, file_type)
            }
        };
        Ok(metadata)
    }

    fn read_dir(&mut self, path: Path) -> FileResult<Vec<PathBuf>> {
        let region = self.resolve_dir(path)?;
        Ok(self
            .volume
            .live_entries(region)?
            .into_iter()
            .filter(|located| !located.entry.name().is_dot_entry())
            .map(|located| PathBuf::new(&located.entry.name().to_string()))
            .collect())
    }
}
