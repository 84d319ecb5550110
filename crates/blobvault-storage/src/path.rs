//! Blob path resolution and removal
//!
//! Every table stores its shards under a base directory:
//!
//! ```text
//! <base>/indices/<table>/<shard>/blobs/<bb>/<digest>
//! ```
//!
//! The base is the table's own blobs path if one was given at creation,
//! otherwise the node default. Several tables may share a base, so the
//! resolver counts which tables use which base and only removes a base
//! directory once no table uses it and nothing else was put there.
//!
//! The counts only cover tables hosted on this node. Removal decisions are
//! local and best effort.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blobvault_core::ShardId;
use dashmap::DashMap;
use tracing::{Span, debug, info, info_span, instrument, warn};

use crate::config::{BlobsConfig, TableBlobSettings};
use crate::error::{CleanupOutcome, RetainReason};
use crate::fs::BlobFs;

/// Directory under a base path that holds one directory per table
pub const INDICES_DIR: &str = "indices";

/// Decides where table blobs live and when a base directory may go
#[derive(Debug)]
pub struct PathResolver {
    default_path: PathBuf,
    fs: Arc<dyn BlobFs>,
    references: DashMap<PathBuf, usize>,
    span: Span,
}

impl PathResolver {
    /// Create a resolver for the node configuration
    pub fn new(config: &BlobsConfig, fs: Arc<dyn BlobFs>) -> Self {
        let default_path = config.default_blobs_path();
        let span = info_span!("path_resolver", default_path = %default_path.display());
        Self {
            default_path,
            fs,
            references: DashMap::new(),
            span,
        }
    }

    /// Node default blobs path
    pub fn default_path(&self) -> &Path {
        &self.default_path
    }

    /// Base directory for a table's blobs
    pub fn resolve(&self, settings: &TableBlobSettings) -> PathBuf {
        settings
            .blobs_path
            .clone()
            .unwrap_or_else(|| self.default_path.clone())
    }

    /// Directory holding all shards of a table
    pub fn table_location(base: &Path, table: &str) -> PathBuf {
        base.join(INDICES_DIR).join(table)
    }

    /// Data directory of one shard
    pub fn shard_location(base: &Path, shard_id: &ShardId) -> PathBuf {
        Self::table_location(base, &shard_id.table).join(shard_id.shard.to_string())
    }

    /// Record that `table` stores its blobs under `base`
    ///
    /// Every registration counts once and is undone by one
    /// [`maybe_remove`](Self::maybe_remove) or
    /// [`release_abandoned`](Self::release_abandoned).
    pub fn register(&self, base: &Path, table: &str) {
        *self.references.entry(base.to_path_buf()).or_default() += 1;
        debug!(parent: &self.span, base = %base.display(), table, "Registered blobs path");
    }

    /// Number of registrations currently using `base`
    pub fn references(&self, base: &Path) -> usize {
        self.references.get(base).map_or(0, |count| *count)
    }

    fn release(&self, base: &Path) -> bool {
        if let Some(mut count) = self.references.get_mut(base) {
            *count = count.saturating_sub(1);
        }
        self.references.remove_if(base, |_, count| *count == 0);
        self.references.contains_key(base)
    }

    /// Release a dropped table's use of `base` and remove what is no longer needed
    ///
    /// The table's own directory is always removed. The base directory itself
    /// is removed only if no other table uses it, it is not the node default,
    /// and it holds nothing besides the (now empty) `indices` directory.
    #[instrument(parent = &self.span, skip(self), fields(base = %base.display()))]
    pub async fn maybe_remove(&self, base: &Path, dropped_table: &str) -> CleanupOutcome {
        let still_referenced = self.release(base);

        let table_dir = Self::table_location(base, dropped_table);
        match self.fs.remove_dir_all(&table_dir).await {
            Ok(()) => debug!(path = %table_dir.display(), "Removed table directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %table_dir.display(), error = %e, "Could not remove table directory");
                return CleanupOutcome::Failed(e.to_string());
            }
        }

        self.remove_if_unused(base, still_referenced).await
    }

    /// Release a table whose creation failed
    ///
    /// Unlike [`maybe_remove`](Self::maybe_remove) the table directory is only
    /// removed when empty, so entries the failed creation did not make stay.
    #[instrument(parent = &self.span, skip(self), fields(base = %base.display()))]
    pub async fn release_abandoned(&self, base: &Path, table: &str) -> CleanupOutcome {
        let still_referenced = self.release(base);

        if let Some(outcome) = self
            .remove_empty_dir(&Self::table_location(base, table))
            .await
        {
            return outcome;
        }

        self.remove_if_unused(base, still_referenced).await
    }

    async fn remove_if_unused(&self, base: &Path, still_referenced: bool) -> CleanupOutcome {
        if still_referenced {
            debug!("Blobs path still used by other tables");
            return CleanupOutcome::Retained(RetainReason::StillReferenced);
        }
        if base == self.default_path {
            return CleanupOutcome::Retained(RetainReason::DefaultPath);
        }

        let entries = match self.fs.read_dir(base).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return CleanupOutcome::AlreadyGone,
            Err(e) => {
                warn!(error = %e, "Could not list blobs path");
                return CleanupOutcome::Failed(e.to_string());
            }
        };

        let indices_dir = base.join(INDICES_DIR);
        for entry in &entries {
            if entry.path != indices_dir {
                info!(entry = %entry.name, "Keeping blobs path with foreign entries");
                return CleanupOutcome::Retained(RetainReason::ForeignFiles);
            }
        }

        if !entries.is_empty()
            && let Some(outcome) = self.remove_empty_dir(&indices_dir).await
        {
            return outcome;
        }
        if let Some(outcome) = self.remove_empty_dir(base).await {
            return outcome;
        }

        info!("Removed blobs path");
        CleanupOutcome::Removed
    }

    /// Remove an empty directory, returning an outcome if that was not possible
    async fn remove_empty_dir(&self, dir: &Path) -> Option<CleanupOutcome> {
        match self.fs.remove_dir(dir).await {
            Ok(()) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => {
                info!(path = %dir.display(), "Keeping non-empty directory");
                Some(CleanupOutcome::Retained(RetainReason::ForeignFiles))
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not remove directory");
                Some(CleanupOutcome::Failed(e.to_string()))
            }
        }
    }
}
