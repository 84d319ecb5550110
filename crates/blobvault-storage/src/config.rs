//! Configuration for blob storage
//!
//! [`BlobsConfig`] is the node-wide setting; [`TableBlobSettings`] is given
//! per table when it is created.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Node-wide blob storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobsConfig {
    /// Base directory for all node data
    pub data_dir: PathBuf,
    /// Cluster-wide default blobs path, used by tables without an override
    pub blobs_path: Option<PathBuf>,
}

impl Default for BlobsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./blobvault-data"),
            blobs_path: None,
        }
    }
}

impl BlobsConfig {
    /// Create a configuration with a custom data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            blobs_path: None,
        }
    }

    /// Set the cluster-wide default blobs path
    pub fn with_blobs_path(mut self, blobs_path: impl Into<PathBuf>) -> Self {
        self.blobs_path = Some(blobs_path.into());
        self
    }

    /// Blobs path used by tables without an override
    pub fn default_blobs_path(&self) -> PathBuf {
        self.blobs_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("blobs"))
    }
}

/// Blob settings of one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableBlobSettings {
    /// Number of shards the table is split into
    pub number_of_shards: u32,
    /// Per-table blobs path, overriding the node default
    pub blobs_path: Option<PathBuf>,
}

impl Default for TableBlobSettings {
    fn default() -> Self {
        Self {
            number_of_shards: 4,
            blobs_path: None,
        }
    }
}

impl TableBlobSettings {
    /// Set the number of shards
    pub fn with_shards(mut self, number_of_shards: u32) -> Self {
        self.number_of_shards = number_of_shards;
        self
    }

    /// Set a per-table blobs path
    pub fn with_blobs_path(mut self, blobs_path: impl Into<PathBuf>) -> Self {
        self.blobs_path = Some(blobs_path.into());
        self
    }

    /// Check the settings for values that cannot be served
    pub fn validate(&self) -> StorageResult<()> {
        if self.number_of_shards == 0 {
            return Err(StorageError::config("number_of_shards must be at least 1"));
        }
        if let Some(path) = &self.blobs_path
            && path.as_os_str().is_empty()
        {
            return Err(StorageError::config("blobs_path must not be empty"));
        }
        Ok(())
    }
}
