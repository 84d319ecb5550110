//! In-memory implementation of [`BlobFs`]
//!
//! Suitable for tests and simulation. Keeps the whole tree in a sorted map,
//! counts every operation, and can be told to fail removals so best-effort
//! cleanup paths can be exercised.

use std::collections::BTreeMap;
use std::io::{self, Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use super::{BlobFs, BlobReader, DirEntry, EntryKind};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Bytes),
}

/// Filesystem held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryFs {
    nodes: RwLock<BTreeMap<PathBuf, Node>>,
    operations: AtomicUsize,
    fail_removals: AtomicBool,
}

fn not_found(path: &Path) -> io::Error {
    io::Error::new(ErrorKind::NotFound, format!("{} not found", path.display()))
}

fn not_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        ErrorKind::NotADirectory,
        format!("{} is not a directory", path.display()),
    )
}

fn is_a_directory(path: &Path) -> io::Error {
    io::Error::new(
        ErrorKind::IsADirectory,
        format!("{} is a directory", path.display()),
    )
}

impl MemoryFs {
    /// Create an empty in-memory filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of [`BlobFs`] calls made so far
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Make every removal fail with `PermissionDenied`
    pub fn fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }

    /// Place a file directly, creating parents, without counting an operation
    ///
    /// Stands in for an external actor dropping files into the tree.
    pub fn insert_file(&self, path: impl AsRef<Path>, data: impl Into<Bytes>) {
        let path = path.as_ref();
        let mut nodes = self.nodes.write();
        if let Some(parent) = path.parent() {
            for ancestor in parent.ancestors() {
                if ancestor.as_os_str().is_empty() {
                    continue;
                }
                nodes
                    .entry(ancestor.to_path_buf())
                    .or_insert(Node::Dir);
            }
        }
        nodes.insert(path.to_path_buf(), Node::File(data.into()));
    }

    /// Contents of a file, if one exists at `path`
    pub fn file_contents(&self, path: impl AsRef<Path>) -> Option<Bytes> {
        match self.nodes.read().get(path.as_ref()) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether anything exists at `path`, without counting an operation
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.nodes.read().contains_key(path.as_ref())
    }

    fn record(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }

    fn check_removal(&self, path: &Path) -> io::Result<()> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                ErrorKind::PermissionDenied,
                format!("removal of {} denied", path.display()),
            ));
        }
        Ok(())
    }

    fn children<'a>(
        nodes: &'a BTreeMap<PathBuf, Node>,
        dir: &'a Path,
    ) -> impl Iterator<Item = (&'a PathBuf, &'a Node)> + 'a {
        nodes
            .range(dir.to_path_buf()..)
            .take_while(move |(path, _)| path.starts_with(dir))
            .filter(move |(path, _)| path.parent() == Some(dir))
    }

    fn require_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        match nodes.get(path) {
            Some(Node::Dir) => Ok(()),
            Some(Node::File(_)) => Err(not_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    fn require_parent_dir(nodes: &BTreeMap<PathBuf, Node>, path: &Path) -> io::Result<()> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => Self::require_dir(nodes, parent),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl BlobFs for MemoryFs {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        self.record();
        Ok(self.nodes.read().contains_key(path))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.record();
        let mut nodes = self.nodes.write();

        let missing: Vec<&Path> = path
            .ancestors()
            .filter(|ancestor| !ancestor.as_os_str().is_empty())
            .take_while(|ancestor| !nodes.contains_key(*ancestor))
            .collect();

        if let Some(existing) = path
            .ancestors()
            .find(|ancestor| nodes.contains_key(*ancestor))
        {
            Self::require_dir(&nodes, existing)?;
        }

        for dir in missing {
            nodes.insert(dir.to_path_buf(), Node::Dir);
        }
        Ok(())
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        self.record();
        let nodes = self.nodes.read();
        Self::require_dir(&nodes, path)?;

        Ok(Self::children(&nodes, path)
            .map(|(child, node)| {
                let (kind, len) = match node {
                    Node::Dir => (EntryKind::Dir, 0),
                    Node::File(data) => (EntryKind::File, data.len() as u64),
                };
                DirEntry {
                    path: child.clone(),
                    name: child
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    kind,
                    len,
                }
            })
            .collect())
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.record();
        let mut nodes = self.nodes.write();
        Self::require_parent_dir(&nodes, path)?;
        if let Some(Node::Dir) = nodes.get(path) {
            return Err(is_a_directory(path));
        }
        nodes.insert(path.to_path_buf(), Node::File(Bytes::copy_from_slice(data)));
        Ok(())
    }

    async fn open(&self, path: &Path) -> io::Result<BlobReader> {
        self.record();
        match self.nodes.read().get(path) {
            Some(Node::File(data)) => Ok(Box::pin(Cursor::new(data.clone()))),
            Some(Node::Dir) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.record();
        let mut nodes = self.nodes.write();
        let data = match nodes.get(from) {
            Some(Node::File(data)) => data.clone(),
            Some(Node::Dir) => return Err(is_a_directory(from)),
            None => return Err(not_found(from)),
        };
        Self::require_parent_dir(&nodes, to)?;
        if let Some(Node::Dir) = nodes.get(to) {
            return Err(is_a_directory(to));
        }
        nodes.remove(from);
        nodes.insert(to.to_path_buf(), Node::File(data));
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.record();
        self.check_removal(path)?;
        let mut nodes = self.nodes.write();
        match nodes.get(path) {
            Some(Node::File(_)) => {
                nodes.remove(path);
                Ok(())
            }
            Some(Node::Dir) => Err(is_a_directory(path)),
            None => Err(not_found(path)),
        }
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        self.record();
        self.check_removal(path)?;
        let mut nodes = self.nodes.write();
        Self::require_dir(&nodes, path)?;
        if Self::children(&nodes, path).next().is_some() {
            return Err(io::Error::new(
                ErrorKind::DirectoryNotEmpty,
                format!("{} is not empty", path.display()),
            ));
        }
        nodes.remove(path);
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.record();
        self.check_removal(path)?;
        let mut nodes = self.nodes.write();
        Self::require_dir(&nodes, path)?;
        nodes.retain(|candidate, _| !candidate.starts_with(path));
        Ok(())
    }
}
