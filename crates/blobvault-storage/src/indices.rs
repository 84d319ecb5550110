//! Node-local registry of blob tables
//!
//! [`BlobIndices`] is the entry point used by the table management layer. It
//! resolves a table's base directory, opens one [`BlobShard`] for every shard
//! this node hosts, and tears everything down again when the table is
//! dropped. Teardown is best effort: a table drop succeeds even when
//! directories cannot be removed, and the [`DropReport`] says what was left.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use blobvault_core::{ShardId, ShardRouting, validate_table_name};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tracing::{Span, debug, info, info_span, instrument, warn};

use crate::config::{BlobsConfig, TableBlobSettings};
use crate::error::{CleanupOutcome, StorageError, StorageResult};
use crate::fs::BlobFs;
use crate::path::PathResolver;
use crate::shard::{BlobShard, open_shard};
use crate::stats::BlobStats;

/// A blob table as seen from this node
#[derive(Debug)]
struct BlobTable {
    base_path: PathBuf,
    settings: TableBlobSettings,
    shards: DashMap<u32, Arc<BlobShard>>,
    /// Held across every change to the set of shards, `true` once dropped
    dropped: Mutex<bool>,
}

impl BlobTable {
    fn shards(&self) -> Vec<Arc<BlobShard>> {
        let mut shards: Vec<_> = self.shards.iter().map(|s| s.value().clone()).collect();
        shards.sort_by_key(|s| s.shard_id().shard);
        shards
    }
}

/// What happened while dropping a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropReport {
    /// Name of the dropped table
    pub table: String,
    /// Base directory the table used
    pub base_path: PathBuf,
    /// Cleanup outcome per local shard
    pub shards: Vec<(ShardId, CleanupOutcome)>,
    /// Cleanup outcome of the base directory
    pub base_path_outcome: CleanupOutcome,
}

impl DropReport {
    /// Whether any cleanup step failed
    pub fn has_failures(&self) -> bool {
        self.base_path_outcome.is_failed() || self.shards.iter().any(|(_, o)| o.is_failed())
    }
}

/// Blob tables and shards hosted on this node
#[derive(Debug)]
pub struct BlobIndices {
    resolver: PathResolver,
    fs: Arc<dyn BlobFs>,
    tables: DashMap<String, Arc<BlobTable>>,
    span: Span,
}

impl BlobIndices {
    /// Create an empty registry
    pub fn new(config: &BlobsConfig, fs: Arc<dyn BlobFs>) -> Self {
        Self {
            resolver: PathResolver::new(config, fs.clone()),
            fs,
            tables: DashMap::new(),
            span: info_span!("blob_indices"),
        }
    }

    /// Path resolver used for all tables
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Names of all tables, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    /// Base directory of a table
    pub fn base_path(&self, table: &str) -> Option<PathBuf> {
        self.tables.get(table).map(|t| t.base_path.clone())
    }

    /// Settings a table was created with
    pub fn settings(&self, table: &str) -> Option<TableBlobSettings> {
        self.tables.get(table).map(|t| t.settings.clone())
    }

    /// Look up a local shard
    pub fn shard(&self, table: &str, shard: u32) -> Option<Arc<BlobShard>> {
        let table = self.tables.get(table)?;
        table.shards.get(&shard).map(|s| s.value().clone())
    }

    /// All local shards of a table, ordered by shard number
    pub fn shards(&self, table: &str) -> Vec<Arc<BlobShard>> {
        self.table(table).map(|t| t.shards()).unwrap_or_default()
    }

    fn table(&self, name: &str) -> Option<Arc<BlobTable>> {
        self.tables.get(name).map(|t| t.value().clone())
    }

    /// Create a blob table and open the shards hosted on this node
    ///
    /// Returns the table's base directory. If any shard fails to open, the
    /// shards opened so far are closed again and the table is not created.
    /// A table that is still being dropped counts as existing.
    #[instrument(parent = &self.span, skip(self, settings, local_shards), fields(shards = local_shards.len()))]
    pub async fn create_table(
        &self,
        name: &str,
        settings: TableBlobSettings,
        local_shards: &[(u32, ShardRouting)],
    ) -> StorageResult<PathBuf> {
        validate_table_name(name)?;
        settings.validate()?;
        if let Some((shard, _)) = local_shards
            .iter()
            .find(|(shard, _)| *shard >= settings.number_of_shards)
        {
            return Err(StorageError::config(format!(
                "shard {shard} out of range for table with {} shards",
                settings.number_of_shards
            )));
        }

        let base_path = self.resolver.resolve(&settings);
        let table = Arc::new(BlobTable {
            base_path: base_path.clone(),
            settings,
            shards: DashMap::new(),
            dropped: Mutex::new(false),
        });

        // Nobody else can lock a table before it is published
        let mut dropped = table.dropped.lock().await;
        match self.tables.entry(name.to_string()) {
            Entry::Occupied(_) => return Err(StorageError::TableExists(name.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(table.clone());
            }
        }
        self.resolver.register(&base_path, name);

        for (shard, routing) in local_shards {
            let shard_id = ShardId::new(name, *shard);
            match self.open(&base_path, shard_id, routing.clone()).await {
                Ok(opened) => {
                    table.shards.insert(*shard, Arc::new(opened));
                }
                Err(e) => {
                    warn!(shard, error = %e, "Could not open blob shard, rolling back table");
                    for opened in table.shards() {
                        opened.close().await;
                        self.remove_shard_dir(&base_path, opened.shard_id()).await;
                    }
                    table.shards.clear();
                    self.resolver.release_abandoned(&base_path, name).await;

                    *dropped = true;
                    self.tables.remove_if(name, |_, t| Arc::ptr_eq(t, &table));
                    return Err(e);
                }
            }
        }

        info!(base = %base_path.display(), "Created blob table");
        Ok(base_path)
    }

    async fn open(
        &self,
        base_path: &Path,
        shard_id: ShardId,
        routing: ShardRouting,
    ) -> StorageResult<BlobShard> {
        let location = PathResolver::shard_location(base_path, &shard_id);
        open_shard(shard_id, routing, location, self.fs.clone()).await
    }

    /// Remove a shard's data directory, which is empty once its blobs are gone
    async fn remove_shard_dir(&self, base_path: &Path, shard_id: &ShardId) {
        let location = PathResolver::shard_location(base_path, shard_id);
        match self.fs.remove_dir(&location).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => debug!(path = %location.display(), error = %e, "Kept shard directory"),
        }
    }

    /// Open a shard that was allocated to this node after table creation
    #[instrument(parent = &self.span, skip(self, routing))]
    pub async fn add_shard(
        &self,
        table: &str,
        shard: u32,
        routing: ShardRouting,
    ) -> StorageResult<Arc<BlobShard>> {
        let blob_table = self
            .table(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let dropped = blob_table.dropped.lock().await;
        if *dropped {
            return Err(StorageError::TableNotFound(table.to_string()));
        }

        if shard >= blob_table.settings.number_of_shards {
            return Err(StorageError::config(format!(
                "shard {shard} out of range for table with {} shards",
                blob_table.settings.number_of_shards
            )));
        }
        if let Some(existing) = blob_table.shards.get(&shard) {
            return Ok(existing.value().clone());
        }

        let opened = Arc::new(
            self.open(&blob_table.base_path, ShardId::new(table, shard), routing)
                .await?,
        );
        blob_table.shards.insert(shard, opened.clone());
        debug!(shard = %opened.shard_id(), "Added blob shard");
        Ok(opened)
    }

    /// Close one local shard and delete its data
    ///
    /// The table stays registered. Cleanup failures end up in the returned
    /// outcome only.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn remove_shard(&self, table: &str, shard: u32) -> StorageResult<CleanupOutcome> {
        let blob_table = self
            .table(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;
        let dropped = blob_table.dropped.lock().await;
        if *dropped {
            return Err(StorageError::TableNotFound(table.to_string()));
        }

        let shard_id = ShardId::new(table, shard);
        let (_, removed) = blob_table
            .shards
            .remove(&shard)
            .ok_or_else(|| StorageError::ShardNotFound(shard_id.clone()))?;

        let outcome = removed.close().await;
        self.remove_shard_dir(&blob_table.base_path, &shard_id).await;
        Ok(outcome)
    }

    /// Drop a table: close every local shard, delete its data, and release
    /// the base directory
    ///
    /// The table stays registered until cleanup has finished, so it cannot
    /// be re-created or grow shards while its directories are removed.
    #[instrument(parent = &self.span, skip(self))]
    pub async fn drop_table(&self, name: &str) -> StorageResult<DropReport> {
        let table = self
            .table(name)
            .ok_or_else(|| StorageError::TableNotFound(name.to_string()))?;
        let mut dropped = table.dropped.lock().await;
        if *dropped {
            return Err(StorageError::TableNotFound(name.to_string()));
        }

        let mut shards = Vec::new();
        for shard in table.shards() {
            let outcome = shard.close().await;
            shards.push((shard.shard_id().clone(), outcome));
        }

        let base_path_outcome = self.resolver.maybe_remove(&table.base_path, name).await;

        *dropped = true;
        self.tables.remove_if(name, |_, t| Arc::ptr_eq(t, &table));

        let report = DropReport {
            table: name.to_string(),
            base_path: table.base_path.clone(),
            shards,
            base_path_outcome,
        };

        if report.has_failures() {
            warn!(?report, "Dropped blob table, some directories were left behind");
        } else {
            info!(outcome = ?report.base_path_outcome, "Dropped blob table");
        }
        Ok(report)
    }

    /// Close every shard without deleting data
    pub async fn shutdown(&self) {
        let tables: Vec<_> = self
            .tables
            .iter()
            .map(|t| (t.key().clone(), t.value().clone()))
            .collect();
        for (name, table) in tables {
            let mut dropped = table.dropped.lock().await;
            if *dropped {
                continue;
            }
            for shard in table.shards() {
                shard.close_retaining_data().await;
            }
            *dropped = true;
            self.tables.remove_if(&name, |_, t| Arc::ptr_eq(t, &table));
        }
        debug!(parent: &self.span, "Blob indices shut down");
    }

    /// Usage statistics of every local shard, ordered by shard id
    pub async fn stats(&self) -> StorageResult<Vec<(ShardId, BlobStats)>> {
        let mut shards: Vec<_> = self
            .tables
            .iter()
            .flat_map(|t| t.value().shards())
            .collect();
        shards.sort_by(|a, b| a.shard_id().cmp(b.shard_id()));

        let mut result = Vec::with_capacity(shards.len());
        for shard in shards {
            result.push((shard.shard_id().clone(), shard.stats().await?));
        }
        Ok(result)
    }

    /// Usage of one table summed over its local shards
    pub async fn table_stats(&self, table: &str) -> StorageResult<BlobStats> {
        let blob_table = self
            .table(table)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))?;

        let mut total = BlobStats {
            location: blob_table.base_path.display().to_string(),
            ..Default::default()
        };
        for shard in blob_table.shards() {
            total.merge(&shard.stats().await?);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetainReason;
    use crate::fs::MemoryFs;
    use crate::shard::ShardState;

    fn indices() -> (BlobIndices, Arc<MemoryFs>) {
        let fs = Arc::new(MemoryFs::new());
        let config = BlobsConfig::with_data_dir("/data");
        (BlobIndices::new(&config, fs.clone()), fs)
    }

    fn local(shards: &[u32]) -> Vec<(u32, ShardRouting)> {
        shards
            .iter()
            .map(|s| (*s, ShardRouting::primary("node-1")))
            .collect()
    }

    #[tokio::test]
    async fn test_create_table_opens_local_shards() {
        let (indices, fs) = indices();
        let settings = TableBlobSettings::default().with_shards(2);

        let base = indices
            .create_table("images", settings, &local(&[0, 1]))
            .await
            .unwrap();

        assert_eq!(base, PathBuf::from("/data/blobs"));
        assert!(fs.contains("/data/blobs/indices/images/0/blobs"));
        assert!(fs.contains("/data/blobs/indices/images/1/blobs"));
        assert_eq!(indices.tables(), vec!["images".to_string()]);
        assert_eq!(indices.shards("images").len(), 2);
        assert!(indices.shard("images", 1).is_some());
        assert!(indices.shard("images", 2).is_none());
    }

    #[tokio::test]
    async fn test_create_table_rejects_duplicates_and_bad_input() {
        let (indices, _fs) = indices();
        let settings = TableBlobSettings::default();

        indices
            .create_table("images", settings.clone(), &local(&[0]))
            .await
            .unwrap();

        let err = indices
            .create_table("images", settings.clone(), &local(&[0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TableExists(_)));

        let err = indices
            .create_table("../escape", settings.clone(), &local(&[0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTableName(_)));

        let err = indices
            .create_table("other", settings.with_shards(1), &local(&[3]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_create_table_rolls_back_on_open_failure() {
        let (indices, fs) = indices();
        // Blocks creation of shard 1's directory
        fs.insert_file("/custom/indices/images/1", "in the way");
        let settings = TableBlobSettings::default()
            .with_shards(2)
            .with_blobs_path("/custom");

        let result = indices
            .create_table("images", settings, &local(&[0, 1]))
            .await;

        assert!(matches!(result, Err(StorageError::Io(_))));
        assert!(indices.tables().is_empty());
        assert!(!fs.contains("/custom/indices/images/0"));
        // Entries the failed creation did not make are left alone
        assert_eq!(
            fs.file_contents("/custom/indices/images/1").as_deref(),
            Some(&b"in the way"[..])
        );
        assert_eq!(indices.resolver().references(Path::new("/custom")), 0);
    }

    #[tokio::test]
    async fn test_table_stays_registered_until_drop_finishes() {
        let (indices, fs) = indices();
        let indices = Arc::new(indices);
        let settings = TableBlobSettings::default()
            .with_shards(2)
            .with_blobs_path("/custom");
        indices
            .create_table("t", settings.clone(), &local(&[0]))
            .await
            .unwrap();

        let shard = indices.shard("t", 0).unwrap();
        let in_flight = shard.hold_active().await;

        let dropping = tokio::spawn({
            let indices = indices.clone();
            async move { indices.drop_table("t").await }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!dropping.is_finished());

        // Neither re-creation nor new shards while the drop is pending
        let err = indices
            .create_table("t", settings.clone(), &local(&[0]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TableExists(_)));

        let adding = tokio::spawn({
            let indices = indices.clone();
            async move {
                indices
                    .add_shard("t", 1, ShardRouting::replica("node-1"))
                    .await
                    .map(|_| ())
            }
        });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!adding.is_finished());

        drop(in_flight);
        let report = dropping.await.unwrap().unwrap();
        assert_eq!(report.base_path_outcome, CleanupOutcome::Removed);
        assert!(matches!(
            adding.await.unwrap(),
            Err(StorageError::TableNotFound(_))
        ));
        assert!(!fs.contains("/custom"));

        // A table created after the drop keeps its data
        indices
            .create_table("t", settings, &local(&[0]))
            .await
            .unwrap();
        let shard = indices.shard("t", 0).unwrap();
        let digest = shard.put(b"new table").await.unwrap();
        assert_eq!(indices.resolver().references(Path::new("/custom")), 1);
        assert!(fs.contains(shard.container().blob_path(&digest)));
    }

    #[tokio::test]
    async fn test_dropped_table_rejects_shard_changes() {
        let (indices, _fs) = indices();
        indices
            .create_table("t", TableBlobSettings::default(), &local(&[0]))
            .await
            .unwrap();
        indices.drop_table("t").await.unwrap();

        let err = indices
            .add_shard("t", 1, ShardRouting::primary("node-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
        let err = indices.remove_shard("t", 0).await.unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_drop_table_removes_shard_data() {
        let (indices, fs) = indices();
        indices
            .create_table("images", TableBlobSettings::default(), &local(&[0, 1]))
            .await
            .unwrap();
        let shard = indices.shard("images", 0).unwrap();
        shard.put(b"some blob").await.unwrap();

        let report = indices.drop_table("images").await.unwrap();

        assert!(!report.has_failures());
        assert_eq!(report.shards.len(), 2);
        assert!(report.shards.iter().all(|(_, o)| o.is_gone()));
        assert_eq!(
            report.base_path_outcome,
            CleanupOutcome::Retained(RetainReason::DefaultPath)
        );
        assert!(!fs.contains("/data/blobs/indices/images"));
        assert_eq!(shard.state().await, ShardState::Removed);
        assert!(indices.tables().is_empty());

        let err = indices.drop_table("images").await.unwrap_err();
        assert!(matches!(err, StorageError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_drop_never_fails_on_cleanup_errors() {
        let (indices, fs) = indices();
        indices
            .create_table(
                "images",
                TableBlobSettings::default().with_blobs_path("/custom"),
                &local(&[0]),
            )
            .await
            .unwrap();
        fs.fail_removals(true);

        let report = indices.drop_table("images").await.unwrap();

        assert!(report.has_failures());
        assert!(indices.tables().is_empty());
        assert!(fs.contains("/custom/indices/images/0/blobs"));
    }

    #[tokio::test]
    async fn test_add_and_remove_shard() {
        let (indices, fs) = indices();
        indices
            .create_table(
                "images",
                TableBlobSettings::default().with_shards(3),
                &local(&[0]),
            )
            .await
            .unwrap();

        let added = indices
            .add_shard("images", 2, ShardRouting::replica("node-1"))
            .await
            .unwrap();
        assert!(!added.routing().primary);
        assert!(fs.contains("/data/blobs/indices/images/2/blobs"));

        // Adding again returns the open shard
        let again = indices
            .add_shard("images", 2, ShardRouting::replica("node-1"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&added, &again));

        let outcome = indices.remove_shard("images", 2).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Removed);
        assert!(!fs.contains("/data/blobs/indices/images/2"));
        assert!(indices.shard("images", 2).is_none());

        let err = indices.remove_shard("images", 2).await.unwrap_err();
        assert!(matches!(err, StorageError::ShardNotFound(_)));
        let err = indices
            .add_shard("images", 7, ShardRouting::replica("node-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[tokio::test]
    async fn test_stats() {
        let (indices, _fs) = indices();
        indices
            .create_table("a", TableBlobSettings::default(), &local(&[0, 1]))
            .await
            .unwrap();
        indices
            .create_table("b", TableBlobSettings::default(), &local(&[0]))
            .await
            .unwrap();

        indices.shard("a", 0).unwrap().put(&[1u8; 10]).await.unwrap();
        indices.shard("a", 1).unwrap().put(&[2u8; 20]).await.unwrap();
        indices.shard("b", 0).unwrap().put(&[3u8; 5]).await.unwrap();

        let stats = indices.stats().await.unwrap();
        let ids: Vec<String> = stats.iter().map(|(id, _)| id.to_string()).collect();
        assert_eq!(ids, vec!["[a][0]", "[a][1]", "[b][0]"]);

        let table = indices.table_stats("a").await.unwrap();
        assert_eq!(table.count, 2);
        assert_eq!(table.total_usage, 30);
    }

    #[tokio::test]
    async fn test_shutdown_keeps_data() {
        let (indices, fs) = indices();
        indices
            .create_table("images", TableBlobSettings::default(), &local(&[0]))
            .await
            .unwrap();
        let shard = indices.shard("images", 0).unwrap();
        let digest = shard.put(b"kept").await.unwrap();

        indices.shutdown().await;

        assert!(indices.tables().is_empty());
        assert_eq!(shard.state().await, ShardState::Removed);
        assert!(fs.contains(shard.container().blob_path(&digest)));
    }
}
