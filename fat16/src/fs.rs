use alloc::{string::String, vec::Vec};
use thiserror::Error;

pub mod fat;

/// POSIX error numbers reported through [`FileError::errno`].
pub mod errno {
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const EFBIG: i32 = 27;
    pub const ENOSPC: i32 = 28;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOTEMPTY: i32 = 39;
    pub const EOPNOTSUPP: i32 = 95;
}

#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum FileError {
    #[error("I/O error")]
    Io,
    #[error("File not found")]
    NotFound,
    #[error("Not a directory")]
    NotADirectory,
    #[error("Is a directory")]
    IsADirectory,
    #[error("Directory not empty")]
    DirectoryNotEmpty,
    #[error("Resource busy")]
    Busy,
    #[error("Invalid path")]
    InvalidPath,
    #[error("Invalid argument")]
    InvalidArgument,
    #[error("File name too long")]
    NameTooLong,
    #[error("File already exists")]
    AlreadyExists,
    #[error("File system is full")]
    NotEnoughSpace,
    #[error("File too large")]
    FileTooLarge,
    #[error("File system is corrupted")]
    CorruptedFS,
    #[error("Unsupported operation")]
    UnsupportedOperation,
}

impl FileError {
    #[must_use]
    /// Returns the negative POSIX error number for this error.
    pub const fn errno(self) -> i32 {
        let code = match self {
            Self::Io | Self::CorruptedFS => errno::EIO,
            Self::NotFound => errno::ENOENT,
            Self::NotADirectory => errno::ENOTDIR,
            Self::IsADirectory => errno::EISDIR,
            Self::DirectoryNotEmpty => errno::ENOTEMPTY,
            Self::Busy => errno::EBUSY,
            Self::InvalidPath | Self::InvalidArgument => errno::EINVAL,
            Self::NameTooLong => errno::ENAMETOOLONG,
            Self::AlreadyExists => errno::EEXIST,
            Self::NotEnoughSpace => errno::ENOSPC,
            Self::FileTooLarge => errno::EFBIG,
            Self::UnsupportedOperation => errno::EOPNOTSUPP,
        };
        -code
    }
}

pub type FileResult<T> = Result<T, FileError>;

/// A trait representing a file system interface.
///
/// This trait defines the basic operations that can be performed on a file system,
/// such as creating, deleting, opening, and reading files.
/// It is designed to be implemented by different file system types,
/// allowing for a uniform interface to interact with various file systems.
pub trait FileSystem {
    /// Creates a new file at the given path, if it does not already exist.
    fn create(&mut self, path: Path) -> FileResult<()>;
    /// Deletes the file at the given path.
    fn delete(&mut self, path: Path) -> FileResult<()>;
    /// Checks if a file exists at the given path.
    fn exists(&mut self, path: Path) -> FileResult<bool>;
    /// Opens the file at the given path.
    ///
    /// This can be a no-op for some filesystems
    /// (file handles are managed by the caller).
    fn open(&mut self, path: Path) -> FileResult<()>;
    /// Closes the file.
    ///
    /// This can be a no-op for some filesystems
    /// (file handles are managed by the caller).
    fn close(&mut self, path: Path) -> FileResult<()>;
    /// Reads from the file at the given path into the given buffer.
    ///
    /// This returns how many bytes were read.
    fn read(&mut self, path: Path, buffer: &mut [u8], offset: usize) -> FileResult<usize>;
    /// Writes the given buffer to the file at the given path.
    ///
    /// This returns how many bytes were written.
    fn write(&mut self, path: Path, buffer: &[u8], offset: usize) -> FileResult<usize>;
    /// Returns information about the file at the given path.
    fn metadata(&mut self, path: Path) -> FileResult<FileMetadata>;
    /// Returns every entry in the directory at the given path.
    fn read_dir(&mut self, path: Path) -> FileResult<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct PathBuf(String);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Path<'a>(&'a str);

impl PathBuf {
    #[must_use]
    #[inline]
    /// Creates a new `PathBuf` from the given string.
    pub fn new(path: &str) -> Self {
        Self(String::from(path))
    }

    #[inline]
    #[doc(alias = "push_str")]
    /// Appends a component, inserting a separator when needed.
    pub fn push(&mut self, component: &str) {
        if !self.0.ends_with('/') && !component.starts_with('/') {
            self.0.push('/');
        }
        self.0.push_str(component);
    }

    #[must_use]
    #[inline]
    pub fn as_path(&self) -> Path<'_> {
        Path(&self.0)
    }

    #[must_use]
    #[inline]
    pub fn join(&self, component: &str) -> Self {
        let mut new_path = self.clone();
        new_path.push(component);
        new_path
    }
}

impl core::borrow::Borrow<str> for PathBuf {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PathBuf {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'a> Path<'a> {
    #[must_use]
    #[inline]
    /// Creates a new `Path` from the given string slice.
    pub const fn new(path: &'a str) -> Self {
        Self(path)
    }

    #[must_use]
    /// Returns the components of the path.
    ///
    /// Empty and `.` components are dropped. `..` is kept: stepping back out
    /// of a component is only valid once that component is known to be a
    /// directory, which the file system decides. An empty result designates
    /// the root.
    pub fn components(&self) -> Vec<&'a str> {
        self.0
            .split('/')
            .filter(|component| !matches!(*component, "" | "."))
            .collect()
    }

    #[must_use]
    /// Splits the path into its parent and its last component.
    ///
    /// The last component is returned as written (it may be `.` or `..`).
    /// For the root, the last component is empty.
    pub fn split_parent(&self) -> (Path<'a>, &'a str) {
        let trimmed = self.0.trim_end_matches('/');
        match trimmed.rfind('/') {
            Some(0) => (Path("/"), &trimmed[1..]),
            Some(idx) => (Path(&trimmed[..idx]), &trimmed[idx + 1..]),
            None if self.0.starts_with('/') => (Path("/"), ""),
            None => (Path(""), trimmed),
        }
    }
}

impl Path<'_> {
    #[must_use]
    #[inline]
    /// Allocates a new `PathBuf` from the current path.
    pub fn to_owned(&self) -> PathBuf {
        PathBuf::new(self.0)
    }

    #[must_use]
    #[inline]
    pub const fn as_str(&self) -> &str {
        self.0
    }
}

impl<'a> From<&'a str> for Path<'a> {
    #[inline]
    fn from(value: &'a str) -> Self {
        Self(value)
    }
}

impl core::ops::Deref for Path<'_> {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FileType {
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FileMetadata {
    size: usize,
    file_type: FileType,
}

impl FileMetadata {
    #[must_use]
    #[inline]
    pub const fn new(size: usize, file_type: FileType) -> Self {
        Self { size, file_type }
    }

    #[must_use]
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    #[inline]
    pub const fn file_type(&self) -> FileType {
        self.file_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pathbuf() {
        let mut path = PathBuf::new("/home");
        path.push("user");
        path.push("/documents");
        assert_eq!(path.as_path().as_str(), "/home/user/documents");
        assert_eq!(PathBuf::new("/").join("A.TXT").as_path().as_str(), "/A.TXT");
    }

    #[test]
    fn test_components() {
        assert!(Path::new("/").components().is_empty());
        assert!(Path::new("").components().is_empty());
        assert_eq!(Path::new("/a/b/").components(), ["a", "b"]);
        assert_eq!(Path::new("//a/./b").components(), ["a", "b"]);
        assert_eq!(Path::new("/a/../b").components(), ["a", "..", "b"]);
        assert_eq!(Path::new("/..").components(), [".."]);
    }

    #[test]
    fn test_split_parent() {
        assert_eq!(Path::new("/a").split_parent(), (Path::new("/"), "a"));
        assert_eq!(Path::new("/a/b").split_parent(), (Path::new("/a"), "b"));
        assert_eq!(Path::new("/a/b/").split_parent(), (Path::new("/a"), "b"));
        assert_eq!(Path::new("/").split_parent(), (Path::new("/"), ""));
        assert_eq!(Path::new("/a/..").split_parent(), (Path::new("/a"), ".."));
    }

    #[test]
    fn test_errno() {
        assert_eq!(FileError::NotFound.errno(), -2);
        assert_eq!(FileError::Busy.errno(), -16);
        assert_eq!(FileError::NotADirectory.errno(), -20);
        assert_eq!(FileError::InvalidArgument.errno(), -22);
        assert_eq!(FileError::DirectoryNotEmpty.errno(), -39);
        assert_eq!(FileError::NotEnoughSpace.errno(), -28);
    }
}
