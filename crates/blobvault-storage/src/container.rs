//! Blob container
//!
//! Content-addressed storage rooted at one directory. A blob with digest
//! `d` lives at `<base>/<bb>/<hex(d)>`, where `bb` is the first digest byte
//! in lowercase hex. That gives 256 bucket directories, each of which can be
//! listed and cleaned on its own.
//!
//! Writes go to `<bb>/<hex(d)>.<uuid>.tmp` first and are renamed into
//! place, so a crash leaves at most a temp file behind. Temp files are not
//! valid digest names and are removed by [`BlobContainer::clean_and_return_digests`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blobvault_core::Digest;
use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::{Span, debug, debug_span, instrument, trace, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::fs::{BlobFs, BlobReader, DirEntry, EntryKind, remove_entry};

/// Name of the bucket directory for a digest prefix byte
pub fn bucket_name(prefix: u8) -> String {
    format!("{prefix:02x}")
}

fn parse_bucket_name(name: &str) -> Option<u8> {
    if name.len() != 2 || !name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u8::from_str_radix(name, 16).ok()
}

/// A stored blob as found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobFile {
    /// Digest of the content
    pub digest: Digest,
    /// Size in bytes
    pub len: u64,
    /// Location of the file
    pub path: PathBuf,
}

/// Content-addressed blob storage under one base directory
#[derive(Debug)]
pub struct BlobContainer {
    base_dir: PathBuf,
    fs: Arc<dyn BlobFs>,
    span: Span,
}

impl BlobContainer {
    /// Open a container, creating its base directory if needed
    pub async fn open(base_dir: impl Into<PathBuf>, fs: Arc<dyn BlobFs>) -> StorageResult<Self> {
        let base_dir = base_dir.into();
        fs.create_dir_all(&base_dir).await?;

        let span = debug_span!("blob_container", path = %base_dir.display());
        debug!(parent: &span, "Blob container opened");

        Ok(Self { base_dir, fs, span })
    }

    /// Base directory of the container
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory holding all blobs whose digest starts with `prefix`
    pub fn bucket_dir(&self, prefix: u8) -> PathBuf {
        self.base_dir.join(bucket_name(prefix))
    }

    /// Location of the file for a digest
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.bucket_dir(digest.prefix()).join(digest.to_hex())
    }

    /// Store content and return its digest
    ///
    /// Storing content that is already present is a successful no-op.
    #[instrument(level = "debug", parent = &self.span, skip(self, data), fields(size = data.len()))]
    pub async fn put(&self, data: &[u8]) -> StorageResult<Digest> {
        let digest = Digest::compute(data);
        let path = self.blob_path(&digest);

        if self.fs.exists(&path).await? {
            debug!(digest = %digest.short_hex(), "Blob already exists");
            return Ok(digest);
        }

        let bucket = self.bucket_dir(digest.prefix());
        self.fs.create_dir_all(&bucket).await?;

        let temp_path = bucket.join(format!("{}.{}.tmp", digest, Uuid::new_v4().simple()));
        if let Err(e) = self.fs.write_file(&temp_path, data).await {
            self.fs.remove_file(&temp_path).await.ok();
            return Err(e.into());
        }

        if let Err(e) = self.fs.rename(&temp_path, &path).await {
            self.fs.remove_file(&temp_path).await.ok();
            // A concurrent writer of the same content may have won
            if self.fs.exists(&path).await.unwrap_or(false) {
                debug!(digest = %digest.short_hex(), "Blob stored concurrently");
                return Ok(digest);
            }
            return Err(e.into());
        }

        debug!(digest = %digest.short_hex(), "Stored blob");
        Ok(digest)
    }

    /// Open a stored blob for reading
    #[instrument(level = "trace", parent = &self.span, skip(self), fields(digest = %digest.short_hex()))]
    pub async fn get(&self, digest: &Digest) -> StorageResult<BlobReader> {
        self.fs.open(&self.blob_path(digest)).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StorageError::not_found(digest.to_hex())
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Validate a digest string and open the blob it names
    pub async fn get_str(&self, digest: &str) -> StorageResult<BlobReader> {
        let digest = Digest::parse(digest)?;
        self.get(&digest).await
    }

    /// Read a stored blob into memory
    pub async fn get_bytes(&self, digest: &Digest) -> StorageResult<Bytes> {
        let mut reader = self.get(digest).await?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        Ok(Bytes::from(data))
    }

    /// Check if a blob is stored
    pub async fn contains(&self, digest: &Digest) -> StorageResult<bool> {
        Ok(self.fs.exists(&self.blob_path(digest)).await?)
    }

    /// Delete a blob, returning whether a file was removed
    ///
    /// Deleting an absent blob returns `false`. Other I/O failures are
    /// logged and also reported as `false`.
    #[instrument(level = "debug", parent = &self.span, skip(self), fields(digest = %digest.short_hex()))]
    pub async fn delete(&self, digest: &Digest) -> bool {
        match self.fs.remove_file(&self.blob_path(digest)).await {
            Ok(()) => {
                debug!("Deleted blob");
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                warn!(error = %e, "Could not delete blob");
                false
            }
        }
    }

    /// List the digests stored in one bucket
    ///
    /// Invalid entries are skipped but left in place.
    pub async fn list_by_prefix(&self, prefix: u8) -> StorageResult<Vec<Digest>> {
        let entries = self.bucket_entries(prefix).await?;
        Ok(entries
            .iter()
            .filter_map(|entry| Self::valid_digest(entry, prefix))
            .collect())
    }

    /// List the digests stored in one bucket, deleting invalid entries
    ///
    /// Anything in the bucket that is not a file named by the canonical
    /// digest of this bucket (leftover temp files, stray directories,
    /// misplaced files) is removed. Removal failures are logged and skipped.
    #[instrument(level = "debug", parent = &self.span, skip(self), fields(bucket = %bucket_name(prefix)))]
    pub async fn clean_and_return_digests(&self, prefix: u8) -> StorageResult<Vec<Digest>> {
        let entries = self.bucket_entries(prefix).await?;
        let mut digests = Vec::with_capacity(entries.len());
        let mut removed = 0usize;

        for entry in &entries {
            if let Some(digest) = Self::valid_digest(entry, prefix) {
                digests.push(digest);
                continue;
            }

            match remove_entry(self.fs.as_ref(), entry).await {
                Ok(()) => {
                    trace!(name = %entry.name, "Removed invalid bucket entry");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(name = %entry.name, error = %e, "Could not remove invalid bucket entry"),
            }
        }

        if removed > 0 {
            debug!(removed, retained = digests.len(), "Cleaned bucket");
        }
        Ok(digests)
    }

    /// All valid blob files in the container
    pub async fn files(&self) -> StorageResult<Vec<BlobFile>> {
        let buckets = match self.fs.read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for bucket in buckets {
            if bucket.kind != EntryKind::Dir {
                continue;
            }
            let Some(prefix) = parse_bucket_name(&bucket.name) else {
                continue;
            };

            for entry in self.bucket_entries(prefix).await? {
                if let Some(digest) = Self::valid_digest(&entry, prefix) {
                    files.push(BlobFile {
                        digest,
                        len: entry.len,
                        path: entry.path,
                    });
                }
            }
        }
        Ok(files)
    }

    /// Total size of all blobs in bytes
    pub async fn total_bytes(&self) -> StorageResult<u64> {
        Ok(self.files().await?.iter().map(|f| f.len).sum())
    }

    /// Number of stored blobs
    pub async fn file_count(&self) -> StorageResult<u64> {
        Ok(self.files().await?.len() as u64)
    }

    async fn bucket_entries(&self, prefix: u8) -> StorageResult<Vec<DirEntry>> {
        match self.fs.read_dir(&self.bucket_dir(prefix)).await {
            Ok(entries) => Ok(entries),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn valid_digest(entry: &DirEntry, prefix: u8) -> Option<Digest> {
        if entry.kind != EntryKind::File {
            return None;
        }
        Digest::parse_canonical(&entry.name).filter(|digest| digest.prefix() == prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{LocalFs, MemoryFs};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    async fn memory_container() -> (BlobContainer, Arc<MemoryFs>) {
        let fs = Arc::new(MemoryFs::new());
        let container = BlobContainer::open("/data/blobs", fs.clone()).await.unwrap();
        (container, fs)
    }

    /// Hex string of length 64 starting with the given bytes
    fn digest_with_prefix(lead: &str, fill: char) -> String {
        let mut s = lead.to_string();
        while s.len() < 64 {
            s.push(fill);
        }
        s
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (container, _fs) = memory_container().await;

        let data = b"Hello, blob storage!";
        let digest = container.put(data).await.unwrap();

        assert_eq!(digest, Digest::compute(data));
        let loaded = container.get_bytes(&digest).await.unwrap();
        assert_eq!(&loaded[..], data);
    }

    #[tokio::test]
    async fn test_layout() {
        let (container, fs) = memory_container().await;

        let digest = container.put(b"layout").await.unwrap();
        let hex = digest.to_hex();
        let expected = PathBuf::from("/data/blobs").join(&hex[..2]).join(&hex);

        assert_eq!(container.blob_path(&digest), expected);
        assert!(fs.contains(&expected));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (container, fs) = memory_container().await;

        let first = container.put(b"Duplicate content").await.unwrap();
        let ops_after_first = fs.operations();
        let second = container.put(b"Duplicate content").await.unwrap();

        // Only the existence check on the second call
        assert_eq!(fs.operations(), ops_after_first + 1);
        assert_eq!(first, second);
        assert_eq!(container.file_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_leaves_no_temp_files() {
        let (container, _fs) = memory_container().await;

        let digest = container.put(b"no temp").await.unwrap();
        let entries = container.bucket_entries(digest.prefix()).await.unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, digest.to_hex());
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (container, _fs) = memory_container().await;

        let result = container.get(&Digest::compute(b"never stored")).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_get_invalid_digest_does_no_io() {
        let (container, fs) = memory_container().await;
        let before = fs.operations();

        let result = container.get_str("not-a-hex-digest").await;

        assert!(matches!(result, Err(StorageError::InvalidDigest(_))));
        assert_eq!(fs.operations(), before);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (container, _fs) = memory_container().await;

        let digest = container.put(b"Delete me").await.unwrap();
        assert!(container.contains(&digest).await.unwrap());

        assert!(container.delete(&digest).await);
        assert!(!container.contains(&digest).await.unwrap());
        assert!(!container.delete(&digest).await);
        assert!(!container.delete(&Digest::compute(b"absent")).await);
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let (container, fs) = memory_container().await;

        let a = digest_with_prefix("1fa1", '0');
        let b = digest_with_prefix("2b30", '0');
        let c = digest_with_prefix("1fc9", '0');
        for name in [&a, &b, &c] {
            fs.insert_file(
                PathBuf::from("/data/blobs").join(&name[..2]).join(name),
                "x",
            );
        }

        let listed: BTreeSet<String> = container
            .list_by_prefix(0x1f)
            .await
            .unwrap()
            .iter()
            .map(Digest::to_hex)
            .collect();

        assert_eq!(listed, BTreeSet::from([a, c]));
        assert!(container.list_by_prefix(0x00).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_prefix_keeps_invalid_entries() {
        let (container, fs) = memory_container().await;
        let junk = PathBuf::from("/data/blobs/1f/junk");
        fs.insert_file(&junk, "x");

        assert!(container.list_by_prefix(0x1f).await.unwrap().is_empty());
        assert!(fs.contains(&junk));
    }

    #[tokio::test]
    async fn test_clean_removes_orphans() {
        let (container, fs) = memory_container().await;

        let valid = digest_with_prefix("ab", '1');
        let bucket = PathBuf::from("/data/blobs/ab");
        fs.insert_file(bucket.join(&valid), "keep");
        fs.insert_file(bucket.join("not-a-digest"), "junk");
        fs.insert_file(bucket.join(format!("{valid}.0123.tmp")), "partial");
        fs.insert_file(bucket.join(valid.to_uppercase()), "wrong case");
        // Valid digest in the wrong bucket
        fs.insert_file(bucket.join(digest_with_prefix("cd", '1')), "misplaced");
        fs.insert_file(bucket.join("stray").join("nested"), "dir");

        let digests = container.clean_and_return_digests(0xab).await.unwrap();

        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].to_hex(), valid);

        let remaining = container.bucket_entries(0xab).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, valid);
    }

    #[tokio::test]
    async fn test_clean_survives_removal_failures() {
        let (container, fs) = memory_container().await;
        fs.insert_file("/data/blobs/ab/junk", "x");
        fs.fail_removals(true);

        let digests = container.clean_and_return_digests(0xab).await.unwrap();

        assert!(digests.is_empty());
        assert!(fs.contains("/data/blobs/ab/junk"));
    }

    #[tokio::test]
    async fn test_sizes_and_counts() {
        let (container, fs) = memory_container().await;

        container.put(&[1u8; 10]).await.unwrap();
        container.put(&[2u8; 20]).await.unwrap();
        container.put(&[3u8; 5]).await.unwrap();
        // Not a blob, not counted
        fs.insert_file("/data/blobs/00/leftover.tmp", vec![0u8; 100]);
        fs.insert_file("/data/blobs/README", "hello");

        assert_eq!(container.file_count().await.unwrap(), 3);
        assert_eq!(container.total_bytes().await.unwrap(), 35);
    }

    #[tokio::test]
    async fn test_on_local_disk() {
        let temp = TempDir::new().unwrap();
        let base = temp.path().join("blobs");
        let container = BlobContainer::open(&base, Arc::new(LocalFs::new()))
            .await
            .unwrap();

        let digest = container.put(b"on disk").await.unwrap();
        let hex = digest.to_hex();
        assert!(base.join(&hex[..2]).join(&hex).is_file());

        let loaded = container.get_bytes(&digest).await.unwrap();
        assert_eq!(&loaded[..], b"on disk");

        std::fs::write(base.join(&hex[..2]).join("crashed.tmp"), b"x").unwrap();
        let digests = container
            .clean_and_return_digests(digest.prefix())
            .await
            .unwrap();
        assert_eq!(digests, vec![digest]);
        assert!(!base.join(&hex[..2]).join("crashed.tmp").exists());
    }
}
