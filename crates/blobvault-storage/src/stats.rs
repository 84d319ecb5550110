//! Blob usage statistics
//!
//! Stats are recomputed from disk on every call. The scan is linear in the
//! number of stored blobs and is meant for monitoring, not request paths.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::container::BlobContainer;
use crate::error::StorageResult;

/// Usage snapshot of one blob container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStats {
    /// Absolute base directory of the container
    pub location: String,
    /// Sum of all blob sizes in bytes
    pub total_usage: u64,
    /// Number of stored blobs
    pub count: u64,
}

impl BlobStats {
    /// Fold another snapshot's totals into this one
    pub fn merge(&mut self, other: &BlobStats) {
        self.total_usage += other.total_usage;
        self.count += other.count;
    }
}

/// Produces [`BlobStats`] by walking a container
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsAggregator;

impl StatsAggregator {
    /// Scan a container and summarize its blobs
    pub async fn collect(container: &BlobContainer) -> StorageResult<BlobStats> {
        let base = container.base_dir();
        let location = std::path::absolute(base)
            .unwrap_or_else(|_| base.to_path_buf())
            .display()
            .to_string();

        let stats = container
            .files()
            .await?
            .iter()
            .fold(BlobStats { location, ..Default::default() }, |mut stats, file| {
                stats.total_usage += file.len;
                stats.count += 1;
                stats
            });

        debug!(
            location = %stats.location,
            count = stats.count,
            total_usage = stats.total_usage,
            "Collected blob stats"
        );
        Ok(stats)
    }
}
