//! Sector-granular storage seam shared by the filesystem engine and its hosts.
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

extern crate alloc;

use alloc::{vec, vec::Vec};
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
/// An error that can occur when performing block device operations.
pub enum BlockDeviceError {
    #[error("I/O error")]
    Io,
    #[error("Out of bounds")]
    OutOfBounds,
    #[error("Unsupported operation")]
    Unsupported,
    #[error("Unaligned access")]
    UnalignedAccess,
}

/// A trait for block devices.
///
/// These are devices (such as disk image files or raw drives) that can perform
/// read and/or write operations in blocks.
///
/// Implementations are not reentrant: a single owner drives every transfer.
pub trait BlockDevice {
    const BLOCK_SIZE: usize;

    /// Read blocks from the device into the given buffer.
    ///
    /// The `offset` parameter specifies the block offset from the start of the device.
    ///
    /// ## Errors
    ///
    /// This function returns an error if the read operation failed
    /// or if `dst.len()` isn't a multiple of `Self::BLOCK_SIZE`.
    fn read(&mut self, dst: &mut [u8], offset: usize) -> Result<(), BlockDeviceError>;
    /// Write blocks to the device from the given buffer.
    ///
    /// ## Errors
    ///
    /// This function returns an error if the write operation failed
    /// or if `src.len()` isn't a multiple of `Self::BLOCK_SIZE`.
    fn write(&mut self, src: &[u8], offset: usize) -> Result<(), BlockDeviceError>;
}

/// A RAM-backed device with 512-byte blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemDisk(Vec<u8>);

impl MemDisk {
    #[must_use]
    #[inline]
    /// Creates a zeroed disk holding `blocks` blocks.
    pub fn new(blocks: usize) -> Self {
        Self(vec![0; blocks * <Self as BlockDevice>::BLOCK_SIZE])
    }

    #[must_use]
    #[inline]
    /// Wraps an existing image.
    pub const fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.0
    }

    #[must_use]
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    fn span(&self, len: usize, offset: usize) -> Result<core::ops::Range<usize>, BlockDeviceError> {
        if len % <Self as BlockDevice>::BLOCK_SIZE != 0 {
            return Err(BlockDeviceError::UnalignedAccess);
        }
        let start = offset
            .checked_mul(<Self as BlockDevice>::BLOCK_SIZE)
            .ok_or(BlockDeviceError::OutOfBounds)?;
        let end = start.checked_add(len).ok_or(BlockDeviceError::OutOfBounds)?;
        if end > self.0.len() {
            return Err(BlockDeviceError::OutOfBounds);
        }
        Ok(start..end)
    }
}

impl BlockDevice for MemDisk {
    const BLOCK_SIZE: usize = 512;

    fn read(&mut self, dst: &mut [u8], offset: usize) -> Result<(), BlockDeviceError> {
        let span = self.span(dst.len(), offset)?;
        dst.copy_from_slice(&self.0[span]);
        Ok(())
    }

    fn write(&mut self, src: &[u8], offset: usize) -> Result<(), BlockDeviceError> {
        let span = self.span(src.len(), offset)?;
        self.0[span].copy_from_slice(src);
        Ok(())
    }
}
