//! Disk image files used as block devices.
use blockdev::{BlockDevice, BlockDeviceError};
use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::Path,
};

/// A disk image on the host filesystem, accessed in 512-byte blocks.
pub struct ImageFile {
    file: File,
    blocks: u64,
}

impl ImageFile {
    /// Opens an existing image for reading and writing.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let blocks = file.metadata()?.len() / Self::BLOCK_SIZE as u64;
        Ok(Self { file, blocks })
    }

    /// Creates (or truncates) an image of `blocks` zeroed blocks.
    pub fn create(path: &Path, blocks: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(blocks * Self::BLOCK_SIZE as u64)?;
        Ok(Self { file, blocks })
    }

    /// Checks that the transfer fits in the image and seeks to its start.
    fn seek_to(&mut self, len: usize, offset: usize) -> Result<(), BlockDeviceError> {
        if len % Self::BLOCK_SIZE != 0 {
            return Err(BlockDeviceError::UnalignedAccess);
        }
        let count = (len / Self::BLOCK_SIZE) as u64;
        let end = (offset as u64)
            .checked_add(count)
            .ok_or(BlockDeviceError::OutOfBounds)?;
        if end > self.blocks {
            return Err(BlockDeviceError::OutOfBounds);
        }

        self.file
            .seek(SeekFrom::Start(offset as u64 * Self::BLOCK_SIZE as u64))
            .map(|_| ())
            .map_err(io_error)
    }
}

fn io_error(err: io::Error) -> BlockDeviceError {
    log::error!("Image I/O failed: {err}");
    match err.kind() {
        io::ErrorKind::UnexpectedEof => BlockDeviceError::OutOfBounds,
        _ => BlockDeviceError::Io,
    }
}

impl BlockDevice for ImageFile {
    const BLOCK_SIZE: usize = 512;

    fn read(&mut self, dst: &mut [u8], offset: usize) -> Result<(), BlockDeviceError> {
        self.seek_to(dst.len(), offset)?;
        self.file.read_exact(dst).map_err(io_error)
    }

    fn write(&mut self, src: &[u8], offset: usize) -> Result<(), BlockDeviceError> {
        self.seek_to(src.len(), offset)?;
        self.file.write_all(src).map_err(io_error)
    }
}
