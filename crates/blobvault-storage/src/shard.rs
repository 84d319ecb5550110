//! Blob shards
//!
//! A [`BlobShard`] binds one [`BlobContainer`] to one physical shard. Its
//! container lives at `<shard data path>/blobs` and is owned exclusively by
//! the shard.
//!
//! Lifecycle: `Opening -> Active -> Closing -> Removed`. Blob operations are
//! only accepted while `Active`. Each operation holds a read lock on the
//! state for its whole duration, so [`BlobShard::close`] (which takes the
//! write lock) waits for in-flight operations before the directory is
//! removed.

use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use blobvault_core::{Digest, ShardId, ShardRouting};
use bytes::Bytes;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{Instrument, Span, debug, info, info_span, instrument, warn};

use crate::container::BlobContainer;
use crate::error::{CleanupOutcome, StorageError, StorageResult};
use crate::fs::{BlobFs, BlobReader};
use crate::stats::{BlobStats, StatsAggregator};

/// Sub directory of a shard's data path that holds its blobs
pub const BLOBS_SUB_PATH: &str = "blobs";

/// Lifecycle state of a blob shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShardState {
    /// Container is being created
    Opening,
    /// Serving blob operations
    Active,
    /// Draining in-flight operations, no new ones accepted
    Closing,
    /// Closed for good
    Removed,
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardState::Opening => write!(f, "opening"),
            ShardState::Active => write!(f, "active"),
            ShardState::Closing => write!(f, "closing"),
            ShardState::Removed => write!(f, "removed"),
        }
    }
}

/// Blob storage of one physical shard
#[derive(Debug)]
pub struct BlobShard {
    shard_id: ShardId,
    routing: ShardRouting,
    container: BlobContainer,
    fs: Arc<dyn BlobFs>,
    state: RwLock<ShardState>,
    span: Span,
}

/// Open the blob shard stored under `shard_data_path`
///
/// Creates `<shard_data_path>/blobs` if needed. Failing to create it is
/// fatal: the shard cannot serve blobs without its directory.
pub async fn open_shard(
    shard_id: ShardId,
    routing: ShardRouting,
    shard_data_path: impl AsRef<Path>,
    fs: Arc<dyn BlobFs>,
) -> StorageResult<BlobShard> {
    let blob_dir = shard_data_path.as_ref().join(BLOBS_SUB_PATH);
    let span = info_span!(
        "blob_shard",
        table = %shard_id.table,
        shard = shard_id.shard,
        primary = routing.primary
    );

    info!(parent: &span, path = %blob_dir.display(), "Creating blob container");
    let container = BlobContainer::open(blob_dir, fs.clone())
        .instrument(span.clone())
        .await?;

    let mut shard = BlobShard {
        shard_id,
        routing,
        container,
        fs,
        state: RwLock::new(ShardState::Opening),
        span,
    };
    *shard.state.get_mut() = ShardState::Active;
    debug!(parent: &shard.span, "Blob shard active");

    Ok(shard)
}

impl BlobShard {
    /// Identity of this shard
    pub fn shard_id(&self) -> &ShardId {
        &self.shard_id
    }

    /// Routing entry this shard was opened with
    pub fn routing(&self) -> &ShardRouting {
        &self.routing
    }

    /// The shard's container
    pub fn container(&self) -> &BlobContainer {
        &self.container
    }

    /// Current lifecycle state
    pub async fn state(&self) -> ShardState {
        *self.state.read().await
    }

    async fn active(&self) -> StorageResult<RwLockReadGuard<'_, ShardState>> {
        let state = self.state.read().await;
        if *state != ShardState::Active {
            return Err(StorageError::ShardNotActive {
                shard: self.shard_id.clone(),
                state: *state,
            });
        }
        Ok(state)
    }

    /// Hold the state the way a running blob operation does
    #[cfg(test)]
    pub(crate) async fn hold_active(&self) -> RwLockReadGuard<'_, ShardState> {
        self.state.read().await
    }

    /// Store content and return its digest
    pub async fn put(&self, data: &[u8]) -> StorageResult<Digest> {
        let _active = self.active().await?;
        self.container.put(data).await
    }

    /// Open a stored blob for reading
    pub async fn get(&self, digest: &Digest) -> StorageResult<BlobReader> {
        let _active = self.active().await?;
        self.container.get(digest).await
    }

    /// Validate a digest string and open the blob it names
    ///
    /// The digest is validated before the shard state is even looked at.
    pub async fn get_str(&self, digest: &str) -> StorageResult<BlobReader> {
        let digest = Digest::parse(digest)?;
        self.get(&digest).await
    }

    /// Read a stored blob into memory
    pub async fn get_bytes(&self, digest: &Digest) -> StorageResult<Bytes> {
        let _active = self.active().await?;
        self.container.get_bytes(digest).await
    }

    /// Check if a blob is stored
    pub async fn contains(&self, digest: &Digest) -> StorageResult<bool> {
        let _active = self.active().await?;
        self.container.contains(digest).await
    }

    /// Delete a blob, returning whether a file was removed
    pub async fn delete(&self, digest: &Digest) -> StorageResult<bool> {
        let _active = self.active().await?;
        Ok(self.container.delete(digest).await)
    }

    /// Digests in one bucket, removing invalid entries on the way
    ///
    /// Used by recovery and maintenance to walk a shard one bucket at a time.
    pub async fn current_digests(&self, prefix: u8) -> StorageResult<Vec<Digest>> {
        let _active = self.active().await?;
        self.container.clean_and_return_digests(prefix).await
    }

    /// Usage statistics of this shard
    pub async fn stats(&self) -> StorageResult<BlobStats> {
        StatsAggregator::collect(&self.container).await
    }

    /// Remove the shard's blob directory and everything in it
    ///
    /// Best effort: a missing directory counts as done and I/O failures are
    /// logged and reported, never raised.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn delete_path(&self) -> CleanupOutcome {
        let dir = self.container.base_dir();

        match self.fs.exists(dir).await {
            Ok(true) => {}
            Ok(false) => {
                info!(path = %dir.display(), "Blob shard directory already gone");
                return CleanupOutcome::AlreadyGone;
            }
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not check blob shard directory");
                return CleanupOutcome::Failed(e.to_string());
            }
        }

        debug!(path = %dir.display(), "Deleting blob shard directory");
        match self.fs.remove_dir_all(dir).await {
            Ok(()) => CleanupOutcome::Removed,
            Err(e) if e.kind() == ErrorKind::NotFound => CleanupOutcome::AlreadyGone,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Could not delete blob shard directory");
                CleanupOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop serving, wait for in-flight operations, and delete the shard's data
    ///
    /// Closing a shard that is already closing or removed does nothing and
    /// reports [`CleanupOutcome::AlreadyGone`].
    pub async fn close(&self) -> CleanupOutcome {
        if !self.begin_close().await {
            return CleanupOutcome::AlreadyGone;
        }
        let outcome = self.delete_path().await;
        self.finish_close().await;
        outcome
    }

    /// Stop serving and wait for in-flight operations, keeping the data
    ///
    /// Used when the shard moves to another node or the node shuts down.
    pub async fn close_retaining_data(&self) {
        if self.begin_close().await {
            self.finish_close().await;
        }
    }

    async fn begin_close(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            ShardState::Opening | ShardState::Active => {
                *state = ShardState::Closing;
                debug!(parent: &self.span, "Blob shard closing");
                true
            }
            ShardState::Closing | ShardState::Removed => false,
        }
    }

    async fn finish_close(&self) {
        *self.state.write().await = ShardState::Removed;
        debug!(parent: &self.span, "Blob shard removed");
    }
}
