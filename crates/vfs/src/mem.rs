//! In-memory filesystem for tests.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex};

use crate::{join, split_mount, DirEntry, Metadata, Vfs, VfsError};

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

#[derive(Default)]
struct Inner {
    /// Normalized virtual path -> node. Mount roots are Dir nodes.
    nodes: BTreeMap<String, Node>,
    mounts: HashSet<String>,
    /// Paths whose read/write operations fail with an injected error.
    fail_paths: HashSet<String>,
}

/// In-memory [`Vfs`] with per-path failure injection.
#[derive(Clone, Default)]
pub struct MemVfs {
    inner: Arc<Mutex<Inner>>,
}

impl MemVfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mount named `name`.
    pub fn with_mount(self, name: impl Into<String>) -> Self {
        let name = name.into();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.nodes.insert(format!("/{name}"), Node::Dir);
            inner.mounts.insert(name);
        }
        self
    }

    /// Makes every read/write touching `path` fail with an I/O error.
    pub fn inject_failure(&self, path: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_paths.insert(normalize(path));
    }

    /// Creates a file with the given contents, creating parents.
    pub fn put_file(&self, path: &str, data: &[u8]) {
        let path = normalize(path);
        let mut inner = self.inner.lock().unwrap();
        insert_parents(&mut inner.nodes, &path);
        inner.nodes.insert(path, Node::File(data.to_vec()));
    }

    /// Returns a file's contents, if present.
    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&normalize(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Returns `true` if any node exists at `path`.
    pub fn exists(&self, path: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.nodes.contains_key(&normalize(path))
    }

    fn check(&self, path: &str) -> Result<String, VfsError> {
        let (mount, _) = split_mount(path)?;
        let inner = self.inner.lock().unwrap();
        if !inner.mounts.contains(mount) {
            return Err(VfsError::UnknownMount(mount.to_string()));
        }
        let norm = normalize(path);
        if inner.fail_paths.contains(&norm) {
            return Err(VfsError::Io(std::io::Error::other(format!(
                "injected failure: {norm}"
            ))));
        }
        Ok(norm)
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

fn insert_parents(nodes: &mut BTreeMap<String, Node>, path: &str) {
    let mut prefix = String::new();
    let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
    for part in &parts[..parts.len().saturating_sub(1)] {
        prefix.push('/');
        prefix.push_str(part);
        nodes.entry(prefix.clone()).or_insert(Node::Dir);
    }
}

/// Buffers writes and commits the whole file on flush/drop.
struct MemWriter {
    inner: Arc<Mutex<Inner>>,
    path: String,
    buf: Vec<u8>,
    committed: bool,
}

impl MemWriter {
    fn commit(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        insert_parents(&mut inner.nodes, &self.path);
        inner
            .nodes
            .insert(self.path.clone(), Node::File(self.buf.clone()));
        self.committed = true;
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        self.committed = false;
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.commit();
        Ok(())
    }
}

impl Drop for MemWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.commit();
        }
    }
}

impl Vfs for MemVfs {
    fn metadata(&self, path: &str) -> Result<Metadata, VfsError> {
        let norm = self.check(path)?;
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&norm) {
            Some(Node::File(data)) => Ok(Metadata {
                len: data.len() as u64,
                is_dir: false,
            }),
            Some(Node::Dir) => Ok(Metadata { len: 0, is_dir: true }),
            None => Err(VfsError::NotFound(norm)),
        }
    }

    fn read(&self, path: &str) -> Result<Box<dyn Read + Send>, VfsError> {
        let norm = self.check(path)?;
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&norm) {
            Some(Node::File(data)) => Ok(Box::new(Cursor::new(data.clone()))),
            Some(Node::Dir) => Err(VfsError::Io(std::io::Error::other("is a directory"))),
            None => Err(VfsError::NotFound(norm)),
        }
    }

    fn create(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError> {
        let norm = self.check(path)?;
        Ok(Box::new(MemWriter {
            inner: Arc::clone(&self.inner),
            path: norm,
            buf: Vec::new(),
            committed: false,
        }))
    }

    fn append(&self, path: &str) -> Result<Box<dyn Write + Send>, VfsError> {
        let norm = self.check(path)?;
        let existing = {
            let inner = self.inner.lock().unwrap();
            match inner.nodes.get(&norm) {
                Some(Node::File(data)) => data.clone(),
                _ => Vec::new(),
            }
        };
        Ok(Box::new(MemWriter {
            inner: Arc::clone(&self.inner),
            path: norm,
            buf: existing,
            committed: false,
        }))
    }

    fn rename(&self, from: &str, to: &str) -> Result<(), VfsError> {
        let from = self.check(from)?;
        let to = self.check(to)?;
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .remove(&from)
            .ok_or_else(|| VfsError::NotFound(from.clone()))?;
        // Move any subtree along with a directory.
        if matches!(node, Node::Dir) {
            let prefix = format!("{from}/");
            let moved: Vec<(String, Node)> = inner
                .nodes
                .range(prefix.clone()..)
                .take_while(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (k, _) in &moved {
                inner.nodes.remove(k);
            }
            for (k, v) in moved {
                let new_key = format!("{to}/{}", &k[prefix.len()..]);
                inner.nodes.insert(new_key, v);
            }
        }
        insert_parents(&mut inner.nodes, &to);
        inner.nodes.insert(to, node);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> Result<(), VfsError> {
        let norm = self.check(path)?;
        let mut inner = self.inner.lock().unwrap();
        match inner.nodes.get(&norm) {
            Some(Node::File(_)) => {
                inner.nodes.remove(&norm);
                Ok(())
            }
            Some(Node::Dir) => Err(VfsError::Io(std::io::Error::other("is a directory"))),
            None => Err(VfsError::NotFound(norm)),
        }
    }

    fn remove_dir(&self, path: &str) -> Result<(), VfsError> {
        let norm = self.check(path)?;
        let mut inner = self.inner.lock().unwrap();
        let prefix = format!("{norm}/");
        if inner.nodes.keys().any(|k| k.starts_with(&prefix)) {
            return Err(VfsError::Io(std::io::Error::other("directory not empty")));
        }
        match inner.nodes.remove(&norm) {
            Some(Node::Dir) => Ok(()),
            Some(node) => {
                inner.nodes.insert(norm.clone(), node);
                Err(VfsError::NotADirectory(norm))
            }
            None => Err(VfsError::NotFound(norm)),
        }
    }

    fn create_dir_all(&self, path: &str) -> Result<(), VfsError> {
        let norm = self.check(path)?;
        let mut inner = self.inner.lock().unwrap();
        insert_parents(&mut inner.nodes, &norm);
        inner.nodes.entry(norm).or_insert(Node::Dir);
        Ok(())
    }

    fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let norm = self.check(path)?;
        let inner = self.inner.lock().unwrap();
        match inner.nodes.get(&norm) {
            Some(Node::Dir) => {}
            Some(_) => return Err(VfsError::NotADirectory(norm)),
            None => return Err(VfsError::NotFound(norm)),
        }
        let prefix = format!("{norm}/");
        let mut entries = Vec::new();
        for (key, node) in inner.nodes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if rest.contains('/') {
                continue; // Not a direct child.
            }
            entries.push(DirEntry {
                name: rest.to_string(),
                is_dir: matches!(node, Node::Dir),
            });
        }
        Ok(entries)
    }

    fn same_mount(&self, a: &str, b: &str) -> bool {
        match (split_mount(a), split_mount(b)) {
            (Ok((ma, _)), Ok((mb, _))) => ma == mb,
            _ => false,
        }
    }
}
