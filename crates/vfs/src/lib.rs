//! Filesystem abstraction consumed by the job engine and the transfer
//! store.
//!
//! Paths are virtual: `/<mount>/<rest>` where the first component names
//! a mount point. A mount is a boundary-enforced root directory; the
//! abstraction refuses anything that would resolve outside it. Deeper
//! policy validation (allowed mounts per user, etc.) lives upstream.

mod mem;
mod os;

pub use mem::MemVfs;
pub use os::OsVfs;

use std::io::{Read, Write};

/// Errors produced by the filesystem abstraction.
#[derive(Debug, thiserror::Error)]
pub enum VfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unknown mount: {0}")]
    UnknownMount(String),

    #[error("path escapes mount root: {0}")]
    RootEscape(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}

/// File or directory metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub len: u64,
    pub is_dir: bool,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Uniform read/write/stat/rename/remove operations over a backing
/// store.
///
/// Implementations are used from blocking worker contexts; all methods
/// are synchronous.
pub trait Vfs: Send + Sync {
    fn metadata(&self, path: &str) -> Result<Metadata, VfsError>;

    /// Opens a file for reading.
    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>, VfsError>;

    /// Creates (or truncates) a file for writing. Parent directories
    /// must already exist.
    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError>;

    /// Opens a file for appending, creating it if absent.
    fn append(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError>;

    fn rename(&self, from: &str, to: &str) -> Result<(), VfsError>;

    fn remove_file(&self, path: &str) -> Result<(), VfsError>;

    /// Removes an empty directory.
    fn remove_dir(&self, path: &str) -> Result<(), VfsError>;

    fn create_dir_all(&self, path: &str) -> Result<(), VfsError>;

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError>;

    /// Returns `true` if both paths live on the same mount, i.e. a
    /// rename between them can be assumed atomic.
    fn same_mount(&self, a: &str, b: &str) -> bool;
}

/// Splits a virtual path into `(mount, rest)`.
///
/// `rest` is relative (possibly empty) and guaranteed free of `..` and
/// leading separators.
pub(crate) fn split_mount(path: &str) -> Result<(&str, &str), VfsError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Err(VfsError::UnknownMount(path.to_string()));
    }
    let (mount, rest) = match trimmed.split_once('/') {
        Some((m, r)) => (m, r),
        None => (trimmed, ""),
    };
    for component in rest.split('/') {
        if component == ".." {
            return Err(VfsError::RootEscape(path.to_string()));
        }
    }
    Ok((mount, rest))
}

/// Returns the mount component of a virtual path, if well formed.
pub fn mount_of(path: &str) -> Option<&str> {
    split_mount(path).ok().map(|(m, _)| m)
}

/// Joins a virtual directory path and a child name.
pub fn join(path: &str, name: &str) -> String {
    if path.ends_with('/') {
        format!("{path}{name}")
    } else {
        format!("{path}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_mount_basic() {
        let (mount, rest) = split_mount("/data/docs/a.txt").unwrap();
        assert_eq!(mount, "data");
        assert_eq!(rest, "docs/a.txt");
    }

    #[test]
    fn split_mount_root_only() {
        let (mount, rest) = split_mount("/data").unwrap();
        assert_eq!(mount, "data");
        assert_eq!(rest, "");
    }

    #[test]
    fn split_mount_rejects_traversal() {
        assert!(matches!(
            split_mount("/data/../etc/passwd"),
            Err(VfsError::RootEscape(_))
        ));
    }

    #[test]
    fn split_mount_rejects_empty() {
        assert!(split_mount("/").is_err());
        assert!(split_mount("").is_err());
    }

    #[test]
    fn join_handles_trailing_slash() {
        assert_eq!(join("/data/docs", "a.txt"), "/data/docs/a.txt");
        assert_eq!(join("/data/docs/", "a.txt"), "/data/docs/a.txt");
    }
}
