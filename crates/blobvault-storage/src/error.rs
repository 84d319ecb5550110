//! Error types for blobvault-storage
//!
//! Operations on the critical path (`put`, `get`, shard open, table
//! creation) return [`StorageError`]. Maintenance operations whose failure
//! must never abort the surrounding work return a [`CleanupOutcome`]
//! instead, which callers are free to inspect or ignore.

use blobvault_core::{DigestError, ShardId, TableNameError};
use thiserror::Error;

use crate::shard::ShardState;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Input failed digest validation; no I/O was performed
    #[error("Invalid digest: {0}")]
    InvalidDigest(#[from] DigestError),

    /// Requested blob does not exist
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Shard is not accepting blob operations
    #[error("Shard {shard} is not active (state: {state})")]
    ShardNotActive { shard: ShardId, state: ShardState },

    /// Blob table is already registered on this node
    #[error("Blob table already exists: {0}")]
    TableExists(String),

    /// Blob table is not registered on this node
    #[error("Blob table not found: {0}")]
    TableNotFound(String),

    /// Shard is not hosted on this node
    #[error("Shard not found: {0}")]
    ShardNotFound(ShardId),

    /// Table name cannot be used as a directory name
    #[error("Invalid table name: {0}")]
    InvalidTableName(#[from] TableNameError),

    /// Invalid table or node settings
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

impl StorageError {
    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }

    /// Create a new Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error reports a missing blob
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Why a best-effort removal left a directory in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainReason {
    /// Another table still uses the directory
    StillReferenced,
    /// The directory is the cluster-wide default blobs path
    DefaultPath,
    /// The directory holds entries this node did not create
    ForeignFiles,
}

/// Result of a best-effort cleanup
///
/// Cleanup never fails the operation it belongs to. Failures are logged
/// where they happen and reported here for callers that care.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The target was removed
    Removed,
    /// The target did not exist
    AlreadyGone,
    /// The target was deliberately kept
    Retained(RetainReason),
    /// Removal was attempted and failed
    Failed(String),
}

impl CleanupOutcome {
    /// Whether the target no longer exists
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Removed | Self::AlreadyGone)
    }

    /// Whether removal was attempted and failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
