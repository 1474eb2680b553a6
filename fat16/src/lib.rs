//! User-space FAT16 driver engine.
//!
//! The engine is not reentrant: every operation takes `&mut self` and performs
//! its sector transfers synchronously before returning. Callers that share a
//! mounted volume across threads must serialize access themselves.
#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

extern crate alloc;
pub use blockdev::{BlockDevice, BlockDeviceError, MemDisk};

pub mod fs;

pub use fs::fat::Fat16Fs;
