//! OS-backed filesystem rooted at named mount directories.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::{split_mount, DirEntry, Metadata, Vfs, VfsError};

/// Real filesystem access through a set of named mounts.
///
/// A virtual path `/<mount>/<rest>` resolves to `<mount root>/<rest>`.
/// Renames across different mounts are reported as crossing a boundary
/// via [`Vfs::same_mount`] so callers fall back to copy-then-delete.
pub struct OsVfs {
    mounts: HashMap<String, PathBuf>,
}

impl OsVfs {
    /// Creates an empty vfs; add roots with [`add_mount`](Self::add_mount).
    pub fn new() -> Self {
        Self {
            mounts: HashMap::new(),
        }
    }

    /// Registers `root` under the mount name `name`.
    pub fn add_mount(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.mounts.insert(name.into(), root.into());
        self
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, VfsError> {
        let (mount, rest) = split_mount(path)?;
        let root = self
            .mounts
            .get(mount)
            .ok_or_else(|| VfsError::UnknownMount(mount.to_string()))?;
        if rest.is_empty() {
            Ok(root.clone())
        } else {
            Ok(root.join(rest))
        }
    }

    fn map_io(path: &str, e: std::io::Error) -> VfsError {
        if e.kind() == std::io::ErrorKind::NotFound {
            VfsError::NotFound(path.to_string())
        } else {
            VfsError::Io(e)
        }
    }
}

impl Default for OsVfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs for OsVfs {
    fn metadata(&self, path: &str) -> Result<Metadata, VfsError> {
        let real = self.resolve(path)?;
        let meta = std::fs::metadata(&real).map_err(|e| Self::map_io(path, e))?;
        Ok(Metadata {
            len: meta.len(),
            is_dir: meta.is_dir(),
        })
    }

    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>, VfsError> {
        let real = self.resolve(path)?;
        let file = std::fs::File::open(&real).map_err(|e| Self::map_io(path, e))?;
        Ok(Box::new(file))
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError> {
        let real = self.resolve(path)?;
        let file = std::fs::File::create(&real).map_err(|e| Self::map_io(path, e))?;
        Ok(Box::new(file))
    }

    fn append(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError> {
        let real = self.resolve(path)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&real)
            .map_err(|e| Self::map_io(path, e))?;
        Ok(Box::new(file))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        std::fs::rename(&src, &dst).map_err(|e| Self::map_io(from, e))
    }

    fn remove_file(&self, path: &str) -> Result<(), VfsError> {
        let real = self.resolve(path)?;
        std::fs::remove_file(&real).map_err(|e| Self::map_io(path, e))
    }

    fn remove_dir(&self, path: &str) -> Result<(), VfsError> {
        let real = self.resolve(path)?;
        std::fs::remove_dir(&real).map_err(|e| Self::map_io(path, e))
    }

    fn create_dir_all(&self, path: &str) -> Result<(), VfsError> {
        let real = self.resolve(path)?;
        std::fs::create_dir_all(&real).map_err(|e| Self::map_io(path, e))
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let real = self.resolve(path)?;
        if !real.is_dir() {
            return Err(VfsError::NotADirectory(path.to_string()));
        }
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&real).map_err(|e| Self::map_io(path, e))? {
            let entry = entry.map_err(VfsError::Io)?;
            let is_dir = entry
                .file_type()
                .map(|t| t.is_dir())
                .map_err(VfsError::Io)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir,
            });
        }
        // Stable order keeps progress deterministic for a given tree.
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn same_mount(&self, a: &str, b: &str) -> bool {
        match (split_mount(a), split_mount(b)) {
            (Ok((ma, _)), Ok((mb, _))) => ma == mb,
            _ => false,
        }
    }
}

/// Convenience for tests and embedders: a single mount over one root.
pub fn single_mount(name: impl Into<String>, root: impl AsRef<Path>) -> OsVfs {
    OsVfs::new().add_mount(name, root.as_ref().to_path_buf())
}
