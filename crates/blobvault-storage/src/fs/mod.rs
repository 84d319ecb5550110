//! Filesystem capability
//!
//! Every path computation in the crate ends in a call on a [`BlobFs`], so the
//! bucketing and cleanup logic runs unchanged against the real disk
//! ([`LocalFs`]) or an in-memory tree ([`MemoryFs`]).

mod local;
mod memory;

pub use local::LocalFs;
pub use memory::MemoryFs;

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Streaming reader over a stored blob
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

/// Entry returned by [`BlobFs::read_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Full path of the entry
    pub path: PathBuf,
    /// File name, lossily converted to UTF-8
    pub name: String,
    /// Entry kind
    pub kind: EntryKind,
    /// Length in bytes (0 for anything but files)
    pub len: u64,
}

/// Minimal set of filesystem operations used by blob storage
///
/// Implementations must make `rename` atomic with respect to readers of
/// the target path, and `remove_dir` must refuse non-empty directories.
#[async_trait]
pub trait BlobFs: Send + Sync + Debug {
    /// Whether anything exists at `path`
    async fn exists(&self, path: &Path) -> io::Result<bool>;

    /// Create `path` and all missing parents
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List the direct children of a directory
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    /// Create or truncate a file, write `data` and flush it to stable storage
    async fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Open a file for streaming reads
    async fn open(&self, path: &Path) -> io::Result<BlobReader>;

    /// Atomically move a file, replacing any file at `to`
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a single file
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory and everything below it
    async fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

/// Remove an entry of any kind
pub(crate) async fn remove_entry(fs: &dyn BlobFs, entry: &DirEntry) -> io::Result<()> {
    match entry.kind {
        EntryKind::Dir => fs.remove_dir_all(&entry.path).await,
        EntryKind::File | EntryKind::Other => fs.remove_file(&entry.path).await,
    }
}
